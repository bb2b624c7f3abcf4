//! HTTP transport to the package registry.
//!
//! Everything above this module talks to the network through
//! [`RegistryTransport`], so tests can swap in an in-memory registry.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::debug;

use crate::config::RegistryConfig;
use crate::download::{DownloadProgress, ProgressCallback};
use crate::error::{BazaarError, Result};

/// Upper bound on the buffer reserved up front from a response's
/// `Content-Length`.
const INITIAL_BUFFER_LIMIT: u64 = 8 * 1024 * 1024;

/// Network operations the marketplace needs from its registry.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch a URL into memory, reporting progress per received chunk.
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> Result<Bytes>;

    /// POST a JSON body; the response body is ignored.
    async fn post_json(&self, url: &str, body: &serde_json::Value, timeout: Duration)
        -> Result<()>;

    /// True when the host answers at all within `timeout`.
    async fn probe(&self, url: &str, timeout: Duration) -> bool;
}

/// [`RegistryTransport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport sending the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| BazaarError::ConfigError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        Self::new(&config.user_agent)
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> Result<Bytes> {
        debug!("GET {}", url);

        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BazaarError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Content-Length is only a hint and is never trusted for allocation.
        let total = response.content_length().unwrap_or(0);
        let mut buf = BytesMut::with_capacity(total.min(INITIAL_BUFFER_LIMIT) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BazaarError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            buf.extend_from_slice(&chunk);

            if let Some(callback) = &progress {
                callback(DownloadProgress::new(buf.len() as u64, total));
            }
        }

        debug!("Fetched {} bytes from {}", buf.len(), url);
        Ok(buf.freeze())
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<()> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BazaarError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.client.head(url).timeout(timeout).send().await {
            Ok(response) => {
                debug!("Probe {} answered {}", url, response.status());
                true
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}
