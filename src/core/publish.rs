/// Push delivery of snapshots
///
/// The scheduler only knows the `PublishSink` capability: hand over one
/// serialized snapshot per cycle and learn whether it was delivered. Retry and
/// reconnection belong to the sink; the next cycle simply publishes the next
/// snapshot.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::utils::format_interval;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish cancelled")]
    Cancelled,

    #[error("publish timed out after {}", format_interval(.0))]
    TimedOut(Duration),

    #[error("sink rejected payload with status {0}")]
    Rejected(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mqtt client not connected")]
    NotConnected,

    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
}

/// Best-effort delivery of one serialized snapshot
///
/// Implementations must return promptly once `cancel` fires and must not
/// retry internally past the call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn publish(&self, payload: &[u8], cancel: &CancellationToken) -> Result<(), PublishError>;
}

/// Posts each snapshot as a JSON body to an HTTP endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl WebhookSink {
    pub fn new(
        url: &str,
        timeout: Duration,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, PublishError> {
        if url.trim().is_empty() {
            return Err(PublishError::InvalidConfig("publish url is empty".to_string()));
        }

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| PublishError::InvalidConfig(format!("invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| PublishError::InvalidConfig(format!("invalid value for header {}", name)))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edgebeat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.trim().to_string(),
            headers: header_map,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PublishSink for WebhookSink {
    async fn publish(&self, payload: &[u8], cancel: &CancellationToken) -> Result<(), PublishError> {
        let request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PublishError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status.as_u16()));
        }

        debug!(url = %self.url, bytes = payload.len(), "snapshot published");
        Ok(())
    }
}

/// Hands each snapshot to several sinks at once
///
/// Every sink gets every payload. The first failure, in sink order, is
/// returned; later ones are only logged.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn PublishSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn PublishSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl PublishSink for FanoutSink {
    async fn publish(&self, payload: &[u8], cancel: &CancellationToken) -> Result<(), PublishError> {
        let results = join_all(self.sinks.iter().map(|sink| sink.publish(payload, cancel))).await;

        let mut first = None;
        for err in results.into_iter().filter_map(Result::err) {
            if first.is_none() {
                first = Some(err);
            } else {
                warn!(error = %err, "publish failed");
            }
        }

        first.map_or(Ok(()), Err)
    }
}
