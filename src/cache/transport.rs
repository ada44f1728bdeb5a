//! Outbound transport for genuinely external calls.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

use crate::http::{FetchResponse, ResponseBody};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("outbound request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The task driving the call ended without producing a result.
    #[error("outbound call aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Other(String),
}

/// A request leaving the process.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Sends requests to external services.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: OutboundRequest) -> Result<FetchResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<FetchResponse, TransportError> {
        tracing::debug!(method = %request.method, url = %request.url, "Outbound request");

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        let body = if bytes.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Bytes(bytes)
        };
        Ok(FetchResponse::new(status, headers, body))
    }
}
