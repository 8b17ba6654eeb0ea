use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::models::CameraReport;

#[derive(Debug, Error)]
pub enum NodeClientError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node answered with status {0}")]
    Status(u16),
}

/// Outbound call to a node's agent asking which cameras it serves.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn list_cameras(&self, address: &str) -> Result<CameraReport, NodeClientError>;
}

/// Talks to the node agent over plain HTTP.
pub struct HttpNodeClient {
    http: reqwest::Client,
    port: u16,
    endpoint: String,
    timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(port: u16, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            port,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn url(&self, address: &str) -> String {
        format!(
            "http://{}:{}/{}",
            address,
            self.port,
            self.endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn list_cameras(&self, address: &str) -> Result<CameraReport, NodeClientError> {
        let url = self.url(address);
        debug!(%url, "querying node cameras");

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeClientError::Status(status.as_u16()));
        }
        response
            .json::<CameraReport>()
            .await
            .map_err(|e| self.classify(e))
    }
}

impl HttpNodeClient {
    fn classify(&self, error: reqwest::Error) -> NodeClientError {
        if error.is_timeout() {
            NodeClientError::Timeout(self.timeout)
        } else {
            NodeClientError::Http(error)
        }
    }
}
