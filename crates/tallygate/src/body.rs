//! Response body type shared by every gateway path.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use serde::Serialize;

use crate::error::{ErrorResponse, GatewayError};

/// Boxed error carried by streamed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body of every response the gateway produces: a fixed buffer for mock,
/// capture and error responses, or a live upstream stream in proxy mode.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// A body holding `bytes`.
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// An empty body.
pub fn empty() -> ResponseBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

/// Create a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<ResponseBody> {
    let (status, json) = match serde_json::to_vec(body) {
        Ok(json) => (status, json),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"error":"Internal gateway error","category":"internal"}"#.to_vec(),
        ),
    };

    let mut response = Response::new(full(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create the JSON error response for `err`.
pub fn error_response(err: &GatewayError, request_id: &str) -> Response<ResponseBody> {
    let body = ErrorResponse::from(err).with_request_id(request_id);
    json_response(err.status_code(), &body)
}
