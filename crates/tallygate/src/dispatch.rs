//! Mode dispatcher.
//!
//! Every request under the routing prefix goes through [`Dispatcher::dispatch`],
//! which hands it to exactly one of the synthesizer (mock) or the forwarder
//! (proxy, capture) according to the mode fixed at startup.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{request, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use tallygate_contract::{Contract, Operation, ValidationOutcome};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::body::{empty, error_response, full, BoxError, ResponseBody};
use crate::config::{GatewayConfig, GatewayMode};
use crate::error::{GatewayError, GatewayResult};
use crate::forward::{strip_route_prefix, Forwarder, ProxyOptions, Relay, RelayStrategy};
use crate::headers::{new_request_id, set_request_id};
use crate::recorder::{Exchange, ExchangeRecorder};
use crate::telemetry;

/// Routes each request to the synthesizer or the forwarder.
#[derive(Debug)]
pub struct Dispatcher {
    mode: GatewayMode,
    route_prefix: String,
    contract: Option<Arc<Contract>>,
    forwarder: Forwarder,
    recorder: Option<ExchangeRecorder>,
    validate_captures: bool,
}

impl Dispatcher {
    /// Create a dispatcher for the configured mode.
    ///
    /// `contract` must be present when the mode needs it.
    pub fn new(config: &GatewayConfig, contract: Option<Arc<Contract>>) -> GatewayResult<Self> {
        let mode = config.mode();
        let validate_captures = mode == GatewayMode::Capture && config.contract.validate_captures;

        if (mode == GatewayMode::Mock || validate_captures) && contract.is_none() {
            return Err(GatewayError::config(format!(
                "{mode} mode requires a loaded contract"
            )));
        }

        let recorder = (mode == GatewayMode::Capture)
            .then(|| ExchangeRecorder::new(config.capture.log_path.clone()));

        Ok(Self {
            mode,
            route_prefix: config.gateway.route_prefix.clone(),
            contract,
            forwarder: Forwarder::new(ProxyOptions::from_config(config))?,
            recorder,
            validate_captures,
        })
    }

    /// The mode fixed at startup.
    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    /// Handle one request. Never fails: errors and panics inside the mode
    /// handlers become JSON error responses.
    pub async fn dispatch<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let request_id = new_request_id();
        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
            mode = %self.mode,
        );

        async move {
            let start = Instant::now();
            let outcome = AssertUnwindSafe(self.handle(request, &request_id))
                .catch_unwind()
                .await;

            let mut response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    if err.status_code().is_server_error() {
                        warn!(error = %err, category = err.category(), "request failed");
                    } else {
                        debug!(error = %err, category = err.category(), "request rejected");
                    }
                    error_response(&err, &request_id)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "request handler panicked");
                    error_response(&GatewayError::internal("request handler panicked"), &request_id)
                }
            };

            set_request_id(response.headers_mut(), &request_id);

            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            telemetry::record_request(self.mode, status, elapsed);
            info!(
                status,
                duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "request completed"
            );

            response
        }
        .instrument(span)
        .await
    }

    async fn handle<B>(&self, request: Request<B>, request_id: &str) -> GatewayResult<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match self.mode {
            GatewayMode::Mock => self.mock(request).await,
            GatewayMode::Proxy => Ok(self
                .forwarder
                .forward(request, RelayStrategy::Streaming, request_id)
                .await?
                .into_response()),
            GatewayMode::Capture => self.capture(request, request_id).await,
        }
    }

    async fn mock<B>(&self, request: Request<B>) -> GatewayResult<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let body = read_body(body).await?;
        let contract = self.contract()?;
        let operation = self.check_contract(contract, &parts, &body)?;

        let synthesized = contract.synthesize(operation);
        let mut response = if synthesized.body.is_empty() {
            Response::new(empty())
        } else {
            Response::new(full(synthesized.body))
        };
        *response.status_mut() = synthesized.status;

        if let Some(content_type) = synthesized.content_type {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
        }

        Ok(response)
    }

    async fn capture<B>(&self, request: Request<B>, request_id: &str) -> GatewayResult<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let body = read_body(body).await?;

        if self.validate_captures {
            let contract = self.contract()?;
            self.check_contract(contract, &parts, &body)?;
        }

        let method = parts.method.clone();
        let headers = parts.headers.clone();
        let url = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

        let relay = self
            .forwarder
            .forward(
                Request::from_parts(parts, Full::new(body.clone())),
                RelayStrategy::Buffered,
                request_id,
            )
            .await?;

        let upstream = match relay {
            Relay::Buffered(upstream) => upstream,
            Relay::Streaming(response) => return Ok(response),
        };

        if let Some(recorder) = &self.recorder {
            let exchange = Exchange::new(&method, url, &headers, &body, upstream.status, &upstream.body);
            if let Err(err) = recorder.record(&exchange).await {
                warn!(error = %err, "failed to record exchange");
                telemetry::record_capture_failure();
            }
        }

        Ok(upstream.into_response())
    }

    fn contract(&self) -> GatewayResult<&Contract> {
        self.contract
            .as_deref()
            .ok_or_else(|| GatewayError::internal("no contract loaded"))
    }

    fn check_contract<'c>(
        &self,
        contract: &'c Contract,
        parts: &request::Parts,
        body: &[u8],
    ) -> GatewayResult<&'c Operation> {
        let inbound = parts.uri.path();
        let path = strip_route_prefix(inbound, &self.route_prefix).unwrap_or(inbound);

        match contract.match_request(&parts.method, path, parts.uri.query(), &parts.headers, body) {
            ValidationOutcome::Matched(matched) => {
                debug!(operation_id = %matched.operation.id, "matched operation");
                Ok(matched.operation)
            }
            ValidationOutcome::NotFound => Err(GatewayError::contract_mismatch(inbound)),
            ValidationOutcome::ValidationFailed(errors) => Err(GatewayError::validation(errors)),
        }
    }
}

async fn read_body<B>(body: B) -> GatewayResult<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    body.collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| {
            let e: BoxError = e.into();
            GatewayError::bad_request(format!("failed to read request body: {e}"))
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
