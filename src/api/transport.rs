//! The seam between the request executor and the network.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use std::fmt::Debug;

/// A fully-read HTTP response. The body is always drained before retry decisions are made so
/// that connections can be reused.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl RawResponse {
    pub(crate) fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub(crate) fn status(&self) -> u16 {
        self.status
    }

    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub(crate) fn header(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub(crate) fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    pub(crate) fn retry_after(&self) -> Option<&str> {
        self.header(RETRY_AFTER)
    }

    pub(crate) fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn into_body(self) -> Bytes {
        self.body
    }
}

/// A failure to get any response at all.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Only timeouts are worth another attempt. Connection failures and cancellations are not.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Failed(Box::new(e))
        }
    }
}

/// Sends one request and reads the whole response.
#[async_trait]
pub(crate) trait Transport: Debug + Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> Result<RawResponse, TransportError>;
}

/// The production transport.
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<RawResponse, TransportError> {
        let response = self.client.execute(request).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(RawResponse::new(status, headers, body))
    }
}
