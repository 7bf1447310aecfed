//! Snapshot fetching over HTTPS.
//!
//! [`SnapshotFetcher`] is the seam between the trust logic and the network:
//! production code uses [`HttpFetcher`]; tests supply scripted stubs. Every
//! fetch carries an explicit timeout: a source that does not answer in
//! time is *unknown*, never confirmed and never denied.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use lynx_core::error::{LynxError, TransportError};
use lynx_core::snapshot::RawSnapshot;

/// Fetches a checkpoint snapshot from a URL.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch and parse the snapshot at `url`.
    ///
    /// # Errors
    ///
    /// [`TransportError`] for network, timeout, and non-200 failures;
    /// [`lynx_core::error::SnapshotError`] when the body is not snapshot
    /// JSON.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawSnapshot, LynxError>;
}

/// HTTPS fetcher with TLS peer verification (rustls).
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher. TLS verification is on by default and never
    /// disabled here.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawSnapshot, LynxError> {
        debug!(url, ?timeout, "fetching checkpoint snapshot");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()).into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(RawSnapshot::from_json(&body)?)
    }
}
