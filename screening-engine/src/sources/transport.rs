use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {reason}")]
    Network { url: String, reason: String },
}

/// How adapters retrieve list payloads. Swapped for a fake in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("screening-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network {
                url: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                    timeout,
                }
            } else {
                TransportError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).timeout(timeout).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(classify)?;
        Ok(body.to_vec())
    }
}
