//! Streaming chunk types and server-sent event decoding

use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::types::FragmentPayload;

/// Literal payload that ends a response stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Items delivered to the consumer of a response stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// An incremental text fragment
    Text { text: String },
    /// The request failed; always the last chunk of the stream
    Error { message: String },
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        StreamChunk::Text { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamChunk::Error {
            message: message.into(),
        }
    }

    /// Check if this is the terminal error chunk
    pub fn is_error(&self) -> bool {
        matches!(self, StreamChunk::Error { .. })
    }
}

/// A stream of response chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Transport-level frames fed into [`chunk_stream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// The connection was established
    Open,
    /// The `data:` payload of one event
    Data(String),
    /// A whole reply fetched without streaming; ends the stream
    Reply(String),
}

/// Result of decoding one event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// End-of-stream sentinel
    Done,
    /// A well-formed `{"response": ...}` fragment
    Fragment(String),
    /// Anything else, passed through untouched
    Raw(String),
}

/// Decode a single event payload.
///
/// Payloads that are not a `{"response": ...}` object are returned as
/// [`Payload::Raw`] so the caller can forward them instead of losing them.
pub fn decode_payload(data: &str) -> Payload {
    let trimmed = data.trim();
    if trimmed == DONE_SENTINEL {
        return Payload::Done;
    }
    match serde_json::from_str::<FragmentPayload>(trimmed) {
        Ok(payload) => Payload::Fragment(payload.response),
        Err(_) => Payload::Raw(data.to_string()),
    }
}

/// Turn a sequence of transport frames into response chunks.
///
/// The stream ends on the `[DONE]` sentinel, on the end of `frames`, or
/// after emitting a single error chunk for the first transport error.
/// Once `cancel` fires nothing else is yielded, not even an error.
pub fn chunk_stream<S, E>(frames: S, cancel: CancellationToken) -> impl Stream<Item = StreamChunk>
where
    S: Stream<Item = Result<SseFrame, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    stream! {
        let mut frames = Box::pin(frames);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                None => break,
                Some(Ok(SseFrame::Open)) => {}
                Some(Ok(SseFrame::Reply(text))) => {
                    if !text.is_empty() {
                        yield StreamChunk::Text { text };
                    }
                    break;
                }
                Some(Ok(SseFrame::Data(data))) => match decode_payload(&data) {
                    Payload::Done => break,
                    Payload::Fragment(text) => {
                        if !text.is_empty() {
                            yield StreamChunk::Text { text };
                        }
                    }
                    Payload::Raw(raw) => {
                        tracing::debug!("Forwarding undecodable payload verbatim");
                        yield StreamChunk::Text { text: raw };
                    }
                },
                Some(Err(e)) => {
                    if !cancel.is_cancelled() {
                        yield StreamChunk::Error {
                            message: format!("Stream error: {}", e),
                        };
                    }
                    break;
                }
            }
        }
    }
}
