//! Remote API delivery - one best-effort POST per dispatched weight
//!
//! Body: `{"peso": <kg>, "timestamp": <epoch seconds>}`.
//! The response body is ignored; only transport errors, timeouts and
//! non-2xx statuses count as failures. Nothing is retried.

use crate::domain::DispatchPayload;
use crate::infra::config::Config;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("http client not initialized")]
    ClientUnavailable,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote api responded with status {0}")]
    Status(u16),
}

/// Destination for dispatched weights
#[async_trait]
pub trait WeightSink: Send + Sync {
    async fn send(&self, payload: &DispatchPayload) -> Result<(), DispatchError>;
}

pub struct HttpDispatcher {
    url: String,
    http_client: Option<reqwest::Client>,
}

impl HttpDispatcher {
    pub fn new(config: &Config) -> Self {
        Self::with_url(config.dispatch_url(), config.dispatch_timeout())
    }

    pub fn with_url(url: &str, timeout: Duration) -> Self {
        // Created once for reuse (connection pooling)
        let http_client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                error!(error = %e, "dispatch_http_client_build_failed");
                None
            }
        };

        Self { url: url.to_string(), http_client }
    }
}

#[async_trait]
impl WeightSink for HttpDispatcher {
    async fn send(&self, payload: &DispatchPayload) -> Result<(), DispatchError> {
        let client = self.http_client.as_ref().ok_or(DispatchError::ClientUnavailable)?;
        let start = Instant::now();

        let response = client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        let latency_us = start.elapsed().as_micros() as u64;

        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }

        info!(
            peso = %payload.peso,
            timestamp = %payload.timestamp,
            status = %status.as_u16(),
            latency_us = %latency_us,
            "weight_dispatched"
        );
        Ok(())
    }
}
