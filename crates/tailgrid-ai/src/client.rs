//! HTTP client for the text-generation endpoint

use std::time::Duration;

use async_stream::stream;
use futures::{StreamExt, future};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    stream::{ChunkStream, SseFrame, StreamChunk, chunk_stream},
    types::{ChatMessage, CompletionBody, InferenceRequest},
};

/// Default model used when none is configured
pub const DEFAULT_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";

/// Anything that can stream a reply to a chat transcript
pub trait Inference: Send + Sync {
    /// Stream a reply. Failures arrive as a final [`StreamChunk::Error`].
    fn stream_response(&self, messages: &[ChatMessage], cancel: CancellationToken) -> ChunkStream;
}

/// Endpoint configuration
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Full URL the request is posted to
    pub endpoint: String,
    /// Bearer token
    pub api_token: String,
    /// Model identifier sent in the request body
    pub model: String,
    /// Timeout for the non-streaming call
    pub request_timeout: Duration,
}

impl InferenceConfig {
    /// Build the Workers AI run endpoint for an account and model
    pub fn workers_ai(
        api_base: &str,
        account_id: &str,
        api_token: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            endpoint: format!(
                "{}/accounts/{}/ai/run/{}",
                api_base.trim_end_matches('/'),
                account_id,
                model
            ),
            api_token: api_token.into(),
            model,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Client for the inference endpoint.
///
/// The bearer credential is attached once, when the client is built.
#[derive(Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Create a new client
    pub fn new(config: InferenceConfig) -> Result<Self> {
        if config.api_token.is_empty() {
            return Err(Error::InvalidApiKey);
        }
        if config.endpoint.is_empty() {
            return Err(Error::InvalidConfig("inference endpoint is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_token))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the client configuration
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Fetch a full reply in one call.
    ///
    /// Used when the endpoint answers a streaming request with a plain body.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = InferenceRequest {
            model: &self.config.model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.request_timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let text = response.text().await?;
        let body: CompletionBody = serde_json::from_str(&text)
            .map_err(|e| Error::UnexpectedResponse(format!("{}: {}", e, text)))?;
        Ok(body.into_text())
    }

    fn open_event_source(&self, messages: &[ChatMessage]) -> Result<EventSource> {
        let request = InferenceRequest {
            model: &self.config.model,
            messages,
            stream: true,
        };
        let body = serde_json::to_vec(&request)?;
        let request_builder = self.client.post(&self.config.endpoint).body(body);

        EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))
    }
}

impl Inference for InferenceClient {
    fn stream_response(&self, messages: &[ChatMessage], cancel: CancellationToken) -> ChunkStream {
        let event_source = match self.open_event_source(messages) {
            Ok(source) => source,
            Err(e) => {
                return Box::pin(futures::stream::once(future::ready(StreamChunk::error(
                    e.to_string(),
                ))));
            }
        };

        tracing::debug!("Streaming inference response from {}", self.config.endpoint);

        // The event source reconnects on its own after the body ends; treat
        // that end as the end of the reply instead.
        let events = event_source.take_while(|item| {
            future::ready(!matches!(
                item,
                Err(reqwest_eventsource::Error::StreamEnded)
            ))
        });

        let client = self.clone();
        let messages = messages.to_vec();
        let frames = stream! {
            let mut events = Box::pin(events);
            while let Some(item) = events.next().await {
                let (frame, last): (std::result::Result<SseFrame, String>, bool) = match item {
                    Ok(Event::Open) => (Ok(SseFrame::Open), false),
                    Ok(Event::Message(msg)) => (Ok(SseFrame::Data(msg.data)), false),
                    Err(reqwest_eventsource::Error::InvalidContentType(content_type, _)) => {
                        tracing::debug!(
                            "Endpoint answered with {:?} instead of an event stream, fetching the reply in one call",
                            content_type
                        );
                        let reply = client.complete(&messages).await;
                        (reply.map(SseFrame::Reply).map_err(|e| e.to_string()), true)
                    }
                    Err(e) => (Err(e.to_string()), true),
                };
                yield frame;
                if last {
                    break;
                }
            }
        };

        Box::pin(chunk_stream(frames, cancel))
    }
}
