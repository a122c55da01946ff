//! Upstream forwarder.
//!
//! Rewrites an inbound request onto the configured origin and relays the
//! answer back, either as a live stream (proxy mode) or as one buffered unit
//! (capture mode, so the same bytes can be recorded).

use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::CONTENT_LENGTH;
use http::{request, HeaderMap, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use reqwest::Client;
use tracing::{debug, warn};

use crate::body::{full, BoxError, ResponseBody};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::headers::{strip_hop_by_hop, upstream_request_headers};
use crate::telemetry;

/// Options fixed at startup for every forwarded request.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Target origin, possibly with a base path.
    pub base_url: String,
    /// Routing prefix stripped from the inbound path.
    pub route_prefix: String,
    /// Bearer credential replacing the caller's `authorization`.
    pub bearer_token: Option<String>,
    /// Bound on connecting and on the arrival of the upstream status and
    /// headers. Buffered relays also apply it to the whole exchange; a
    /// streamed body may take as long as the upstream needs.
    pub timeout: Duration,
}

impl ProxyOptions {
    /// Build options from the gateway configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            base_url: config.upstream.base_url.clone(),
            route_prefix: config.gateway.route_prefix.clone(),
            bearer_token: config.upstream.bearer_token.clone(),
            timeout: config.upstream.timeout,
        }
    }
}

/// How the upstream response is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStrategy {
    /// Relay chunks as they arrive; the request body is streamed too.
    Streaming,
    /// Accumulate the whole response before returning.
    Buffered,
}

/// A completed, fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    /// Upstream status.
    pub status: StatusCode,
    /// Upstream headers without hop-by-hop headers.
    pub headers: HeaderMap,
    /// Exact upstream body bytes.
    pub body: Bytes,
}

impl BufferedResponse {
    /// Convert into a response carrying the same bytes.
    pub fn into_response(self) -> Response<ResponseBody> {
        let mut response = Response::new(full(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Result of forwarding one request.
#[derive(Debug)]
pub enum Relay {
    /// Status and headers are final; the body is still streaming.
    Streaming(Response<ResponseBody>),
    /// The full upstream response.
    Buffered(BufferedResponse),
}

impl Relay {
    /// Convert into the response relayed to the caller.
    pub fn into_response(self) -> Response<ResponseBody> {
        match self {
            Self::Streaming(response) => response,
            Self::Buffered(buffered) => buffered.into_response(),
        }
    }
}

/// Forwards requests to the upstream origin.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    options: ProxyOptions,
}

impl Forwarder {
    /// Create a new forwarder.
    pub fn new(options: ProxyOptions) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(options.timeout)
            .pool_max_idle_per_host(100)
            .no_proxy()
            .build()
            .map_err(|e| GatewayError::server(format!("failed to create upstream client: {e}")))?;

        Ok(Self { client, options })
    }

    /// Get the options.
    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Upstream URL for an inbound URI: prefix stripped, query kept verbatim,
    /// joined onto the base URL.
    pub fn upstream_url(&self, uri: &Uri) -> String {
        rewrite_url(&self.options.base_url, &self.options.route_prefix, uri)
    }

    /// Forward a request upstream and relay the response with `strategy`.
    pub async fn forward<B>(
        &self,
        request: Request<B>,
        strategy: RelayStrategy,
        request_id: &str,
    ) -> GatewayResult<Relay>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match strategy {
            RelayStrategy::Streaming => self
                .forward_streaming(request, request_id)
                .await
                .map(Relay::Streaming),
            RelayStrategy::Buffered => self
                .forward_buffered(request, request_id)
                .await
                .map(Relay::Buffered),
        }
    }

    /// Stream the request body upstream and return as soon as the upstream
    /// status and headers arrive. Body chunks are relayed as they come in; a
    /// mid-stream failure is logged and ends the body.
    ///
    /// The caller's `content-length` is kept so the upstream sees the same
    /// framing instead of a chunked re-encoding.
    pub async fn forward_streaming<B>(
        &self,
        request: Request<B>,
        request_id: &str,
    ) -> GatewayResult<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let content_length = parts.headers.get(CONTENT_LENGTH).cloned();
        let upstream_body = reqwest::Body::wrap_stream(body.into_data_stream());
        let (url, response) = self
            .send(parts, upstream_body, content_length, request_id)
            .await?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map(Frame::data).map_err(|e| {
                warn!(url = %url, error = %error_chain(&e), "upstream body failed mid-stream");
                telemetry::record_upstream_failure();
                Box::new(e) as BoxError
            })
        });

        let mut relayed = Response::new(StreamBody::new(stream).boxed_unsync());
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }

    /// Send the whole request body and accumulate the whole upstream
    /// response, all within the configured timeout.
    pub async fn forward_buffered<B>(
        &self,
        request: Request<B>,
        request_id: &str,
    ) -> GatewayResult<BufferedResponse>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| {
                let e: BoxError = e.into();
                GatewayError::bad_request(format!("failed to read request body: {e}"))
            })?
            .to_bytes();
        let url = self.upstream_url(&parts.uri);

        let exchange = async {
            let (url, response) = self
                .send(parts, reqwest::Body::from(bytes), None, request_id)
                .await?;

            let status = response.status();
            let headers = strip_hop_by_hop(response.headers());
            let body = response
                .bytes()
                .await
                .map_err(|e| upstream_failure(&url, &e))?;

            Ok::<_, GatewayError>(BufferedResponse {
                status,
                headers,
                body,
            })
        };

        tokio::time::timeout(self.options.timeout, exchange)
            .await
            .unwrap_or_else(|_| Err(upstream_deadline(&url, self.options.timeout)))
    }

    /// Send the request and wait for the upstream status and headers, within
    /// the configured timeout.
    async fn send(
        &self,
        parts: request::Parts,
        body: reqwest::Body,
        content_length: Option<http::HeaderValue>,
        request_id: &str,
    ) -> GatewayResult<(String, reqwest::Response)> {
        let url = self.upstream_url(&parts.uri);
        let mut headers = upstream_request_headers(
            &parts.headers,
            self.options.bearer_token.as_deref(),
            request_id,
        );
        if let Some(length) = content_length {
            headers.insert(CONTENT_LENGTH, length);
        }

        debug!(method = %parts.method, url = %url, "forwarding upstream");

        let pending = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send();

        let response = match tokio::time::timeout(self.options.timeout, pending).await {
            Ok(sent) => sent.map_err(|e| upstream_failure(&url, &e))?,
            Err(_) => return Err(upstream_deadline(&url, self.options.timeout)),
        };

        Ok((url, response))
    }
}

/// Strip the routing prefix from `path`.
///
/// Returns `None` when `path` is not under `prefix`. The bare prefix maps to
/// `/`.
pub fn strip_route_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn rewrite_url(base_url: &str, route_prefix: &str, uri: &Uri) -> String {
    let path = uri.path();
    let rest = strip_route_prefix(path, route_prefix).unwrap_or(path);
    let base = base_url.trim_end_matches('/');

    let mut url = String::with_capacity(base.len() + rest.len() + 1 + uri.query().map_or(0, str::len));
    url.push_str(base);
    url.push_str(rest);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn upstream_failure(url: &str, err: &reqwest::Error) -> GatewayError {
    telemetry::record_upstream_failure();
    let cause = error_chain(err);
    warn!(url = %url, error = %cause, timeout = err.is_timeout(), "upstream request failed");

    if err.is_timeout() {
        GatewayError::upstream_timeout(cause)
    } else {
        GatewayError::upstream(cause)
    }
}

fn upstream_deadline(url: &str, timeout: Duration) -> GatewayError {
    telemetry::record_upstream_failure();
    warn!(
        url = %url,
        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        "upstream request timed out"
    );
    GatewayError::upstream_timeout(format!("no upstream response within {timeout:?}"))
}

/// Render an error with its sources, e.g. `error sending request: connection refused`.
fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_str = cause.to_string();
        if !rendered.contains(&cause_str) {
            rendered.push_str(": ");
            rendered.push_str(&cause_str);
        }
        source = cause.source();
    }
    rendered
}
