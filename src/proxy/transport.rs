//! Upstream transport
//!
//! A `Transport` performs a single GET through one egress path. The reqwest
//! implementation owns a pooled client bound to its proxy; tests swap in a
//! scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{RelayError, Result};

/// Lazy, finite byte stream of an upstream body
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, TransportError>>;

/// Network-level failure of a single attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out")]
    Timeout,

    #[error("body read failed: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// A single outbound GET
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: HeaderMap,
    /// Whole-exchange deadline, or only until headers arrive when `streaming`
    pub timeout: Duration,
    /// Body is relayed as it arrives and may outlast `timeout`
    pub streaming: bool,
}

/// Status line and headers, with the body still on the wire
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl UpstreamResponse {
    /// Read the whole body
    pub async fn bytes(self) -> std::result::Result<Bytes, TransportError> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Read at most `limit` bytes, keeping whatever arrived before an error
    pub async fn bytes_limited(self, limit: usize) -> Bytes {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while buf.len() < limit {
            match body.next().await {
                Some(Ok(chunk)) => {
                    let take = chunk.len().min(limit - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
                Some(Err(e)) => {
                    debug!("Body read stopped early: {}", e);
                    break;
                }
                None => break,
            }
        }
        buf.freeze()
    }
}

/// Performs GETs through one egress path
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed transport, one pooled client per egress path
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Client that connects to origins directly, ignoring proxy env vars
    pub fn direct(config: &FetchConfig) -> Result<Self> {
        let client = Self::builder(config)
            .no_proxy()
            .build()
            .map_err(|e| RelayError::InvalidConfig(format!("failed to build client: {}", e)))?;
        Ok(Self { client })
    }

    /// Client that sends every request through `proxy_url`
    pub fn with_proxy(proxy_url: &str, config: &FetchConfig) -> Result<Self> {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| RelayError::InvalidConfig(format!("invalid proxy URL: {}", e)))?;
        let client = Self::builder(config)
            .proxy(proxy)
            .build()
            .map_err(|e| RelayError::InvalidConfig(format!("failed to build client: {}", e)))?;
        Ok(Self { client })
    }

    fn builder(config: &FetchConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .redirect(Policy::limited(10))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, TransportError> {
        let builder = self.client.get(&request.url).headers(request.headers);
        let response = if request.streaming {
            // A stalled body is cut off by the client's read timeout instead.
            tokio::time::timeout(request.timeout, builder.send())
                .await
                .map_err(|_| TransportError::Timeout)??
        } else {
            builder.timeout(request.timeout).send().await?
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(TransportError::from).boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
