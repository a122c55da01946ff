//! Capture log recorder.
//!
//! Each exchange becomes one line of JSON appended to the capture log:
//!
//! ```text
//! {"ts":"2024-05-01T17:00:00.000Z","req":{"method":"POST","url":"/api/...","headers":{...},"body":{...}},"res":{"status":200,"body":"{\"ok\":true}"}}
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tallygate_contract::operation::is_json_media_type;

use crate::error::{GatewayError, GatewayResult};
use crate::headers::redacted_header_map;

/// One recorded request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    /// The inbound request.
    pub req: RecordedRequest,
    /// The response relayed to the caller.
    pub res: RecordedResponse,
}

/// Request half of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Inbound path and query, routing prefix included.
    pub url: String,
    /// Inbound headers with credentials redacted.
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON, raw text, or `null` when empty.
    pub body: Value,
}

/// Response half of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// Upstream status.
    pub status: u16,
    /// Body as UTF-8 text, or base64 when `body_encoding` is set.
    pub body: String,
    /// `base64` for bodies that are not valid UTF-8.
    #[serde(rename = "bodyEncoding", default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<String>,
}

impl Exchange {
    /// Build an exchange timestamped now.
    pub fn new(
        method: &Method,
        url: impl Into<String>,
        headers: &HeaderMap,
        request_body: &[u8],
        status: StatusCode,
        response_body: &[u8],
    ) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            req: RecordedRequest {
                method: method.as_str().to_string(),
                url: url.into(),
                headers: redacted_header_map(headers),
                body: request_body_value(headers, request_body),
            },
            res: RecordedResponse::from_bytes(status, response_body),
        }
    }

    /// Raw response bytes, decoding base64 if needed.
    pub fn response_bytes(&self) -> Option<Vec<u8>> {
        match self.res.body_encoding.as_deref() {
            Some("base64") => STANDARD.decode(&self.res.body).ok(),
            Some(_) => None,
            None => Some(self.res.body.clone().into_bytes()),
        }
    }
}

impl RecordedResponse {
    fn from_bytes(status: StatusCode, body: &[u8]) -> Self {
        match std::str::from_utf8(body) {
            Ok(text) => Self {
                status: status.as_u16(),
                body: text.to_string(),
                body_encoding: None,
            },
            Err(_) => Self {
                status: status.as_u16(),
                body: STANDARD.encode(body),
                body_encoding: Some("base64".to_string()),
            },
        }
    }
}

fn request_body_value(headers: &HeaderMap, body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_json_media_type);

    if is_json {
        if let Ok(value) = serde_json::from_slice(body) {
            return value;
        }
    }

    Value::String(String::from_utf8_lossy(body).into_owned())
}

/// Appends exchanges to the capture log.
///
/// The log is opened in append mode for every record and each line goes out
/// in a single write, so concurrent records never interleave.
#[derive(Debug, Clone)]
pub struct ExchangeRecorder {
    path: PathBuf,
}

impl ExchangeRecorder {
    /// Create a recorder for the log at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the capture log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one exchange.
    pub async fn record(&self, exchange: &Exchange) -> GatewayResult<()> {
        let mut line = serde_json::to_vec(exchange)?;
        line.push(b'\n');

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| GatewayError::recording(format!("capture task failed: {e}")))?
            .map_err(|e| {
                GatewayError::recording(format!("failed to append to {}: {e}", self.path.display()))
            })
    }
}

fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line)
}
