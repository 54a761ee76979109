//! Creating and deleting remote tails

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default base URL of the platform API
pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// A tail created on the remote side
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TailInfo {
    /// Session identifier, needed to delete the tail later
    pub id: String,
    /// WebSocket URL to stream events from
    pub url: String,
    /// When the remote side will expire the tail. Informational only.
    #[serde(default)]
    pub expires_at: String,
}

/// Creates and deletes tails. Implementations carry their own credentials.
#[async_trait]
pub trait TailProvisioner: Send + Sync {
    /// Create a tail for `source`
    async fn create_tail(&self, source: &str) -> Result<TailInfo>;

    /// Delete a previously created tail
    async fn delete_tail(&self, source: &str, tail_id: &str) -> Result<()>;
}

/// Delete a tail without letting the call hold anything up.
///
/// Failures and timeouts are logged and swallowed.
pub async fn delete_tail_best_effort(
    provisioner: Arc<dyn TailProvisioner>,
    source: String,
    tail_id: String,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, provisioner.delete_tail(&source, &tail_id)).await {
        Ok(Ok(())) => tracing::debug!("Deleted tail {} for {}", tail_id, source),
        Ok(Err(e)) => tracing::warn!("Failed to delete tail {} for {}: {}", tail_id, source, e),
        Err(_) => tracing::warn!(
            "Deleting tail {} for {} timed out after {:?}",
            tail_id,
            source,
            timeout
        ),
    }
}

/// Tail provisioning against the Workers scripts API
pub struct CloudflareTails {
    client: reqwest::Client,
    api_base: String,
    account_id: String,
    api_token: String,
}

impl CloudflareTails {
    pub fn new(
        api_base: impl Into<String>,
        account_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        let api_base: String = api_base.into();
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
        }
    }

    fn tails_url(&self, script: &str) -> String {
        format!(
            "{}/accounts/{}/workers/scripts/{}/tails",
            self.api_base, self.account_id, script
        )
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

impl<T> ApiEnvelope<T> {
    fn error_text(&self) -> String {
        if self.errors.is_empty() {
            return "request was not successful".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("{} (code {})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn parse_envelope<T: serde::de::DeserializeOwned>(status: u16, body: &str) -> Result<Option<T>> {
    let envelope: ApiEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| Error::Provision(format!("HTTP {}: unreadable response: {}", status, e)))?;
    if !envelope.success {
        return Err(Error::Provision(format!(
            "HTTP {}: {}",
            status,
            envelope.error_text()
        )));
    }
    Ok(envelope.result)
}

#[async_trait]
impl TailProvisioner for CloudflareTails {
    async fn create_tail(&self, source: &str) -> Result<TailInfo> {
        let response = self
            .client
            .post(self.tails_url(source))
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_envelope::<TailInfo>(status, &body)?
            .ok_or_else(|| Error::Provision(format!("HTTP {}: response carried no tail", status)))
    }

    async fn delete_tail(&self, source: &str, tail_id: &str) -> Result<()> {
        let url = format!("{}/{}", self.tails_url(source), tail_id);
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_envelope::<serde_json::Value>(status, &body)?;
        Ok(())
    }
}
