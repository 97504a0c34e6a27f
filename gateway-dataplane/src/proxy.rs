//! Upstream proxy (C14, spec §4.14). Validates the target host against
//! SSRF rules, checks the circuit breaker, and dispatches with a bounded
//! retry loop, each attempt carrying its own cancellation deadline.
//!
//! Streaming responses (spec §4.14, §9) are never buffered: once the
//! upstream's headers are in, the body is handed back as a live byte
//! stream and no further retry is possible for that attempt.

use crate::breaker::CircuitBreaker;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use gateway_core::error::GatewayError;
use gateway_core::host;
use gateway_core::model::{ProxyResult, UpstreamRequest};
use http::{HeaderMap, StatusCode};
use std::pin::Pin;
use std::time::{Duration, Instant};

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A dispatch that was never buffered into memory.
pub struct StreamingProxyResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
    pub upstream_latency_ms: u64,
}

pub enum ProxyOutcome {
    Buffered(ProxyResult),
    Streaming(StreamingProxyResult),
}

pub struct Proxy {
    client: reqwest::Client,
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl Proxy {
    pub fn new(client: reqwest::Client, breaker: std::sync::Arc<CircuitBreaker>) -> Self {
        Self { client, breaker }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch(
        &self,
        request: UpstreamRequest,
        timeout_ms: u64,
        retries: u32,
        allowed_hosts: &[String],
        connector_slug: &str,
        streaming: bool,
    ) -> Result<ProxyOutcome, GatewayError> {
        let parsed = reqwest::Url::parse(&request.url)
            .map_err(|e| GatewayError::Internal(format!("invalid upstream URL: {e}")))?;
        let host = parsed.host_str().unwrap_or_default();
        host::validate(host, allowed_hosts).map_err(GatewayError::SsrfBlocked)?;

        if !self.breaker.allow(connector_slug) {
            return Err(GatewayError::CircuitOpen(connector_slug.to_string()));
        }

        let attempts = 1 + retries.min(5);
        let timeout = Duration::from_millis(timeout_ms);

        for attempt in 0..attempts {
            let started = Instant::now();
            let response = match tokio::time::timeout(timeout, self.send_request(&request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(_network_err)) => {
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                        continue;
                    }
                    self.breaker.record_failure(connector_slug);
                    return Err(GatewayError::UpstreamUnavailable(connector_slug.to_string()));
                }
                Err(_timed_out) => {
                    self.breaker.record_failure(connector_slug);
                    return Err(GatewayError::UpstreamTimeout);
                }
            };
            let upstream_latency_ms = started.elapsed().as_millis() as u64;

            if streaming {
                self.breaker.record_success(connector_slug);
                let mut result = Self::into_streaming(response);
                result.upstream_latency_ms = upstream_latency_ms;
                return Ok(ProxyOutcome::Streaming(result));
            }

            match tokio::time::timeout(timeout, Self::buffer(response)).await {
                Ok(Ok(mut result)) => {
                    self.breaker.record_success(connector_slug);
                    result.upstream_latency_ms = upstream_latency_ms;
                    return Ok(ProxyOutcome::Buffered(result));
                }
                Ok(Err(_network_err)) => {
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                        continue;
                    }
                    self.breaker.record_failure(connector_slug);
                    return Err(GatewayError::UpstreamUnavailable(connector_slug.to_string()));
                }
                Err(_timed_out) => {
                    self.breaker.record_failure(connector_slug);
                    return Err(GatewayError::UpstreamTimeout);
                }
            }
        }

        unreachable!("attempts is always >= 1")
    }

    async fn send_request(&self, request: &UpstreamRequest) -> reqwest::Result<reqwest::Response> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        self.client
            .request(method, request.url.as_str())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
    }

    async fn buffer(response: reqwest::Response) -> reqwest::Result<ProxyResult> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(ProxyResult { status, headers, body, upstream_latency_ms: 0, cached: false })
    }

    fn into_streaming(response: reqwest::Response) -> StreamingProxyResult {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        StreamingProxyResult { status, headers, body: Box::pin(body), upstream_latency_ms: 0 }
    }
}
