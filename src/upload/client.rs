use super::request::UploadRequest;
use crate::error::UploadError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Sends one upload request and returns the collector's status
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UploadRequest) -> Result<StatusCode, UploadError>;
}

/// reqwest-backed transport with a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(UploadError::HttpRequest)?;

        Ok(Self { client, timeout })
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: UploadRequest) -> Result<StatusCode, UploadError> {
        let pending = self
            .client
            .post(request.url)
            .headers(request.headers)
            .body(request.body)
            .send();

        // The whole attempt, body included, is bounded by the timeout
        let response = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| UploadError::Timeout(self.timeout))??;

        Ok(response.status())
    }
}
