//! Error types for the tallygate gateway.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tallygate_contract::{ContractError, ValidationError};
use thiserror::Error;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No contract operation matches the request.
    #[error("Path not found in specification: {path}")]
    ContractMismatch {
        /// Inbound path, prefix included.
        path: String,
    },

    /// The request matched an operation but violates its constraints.
    #[error("Request validation failed ({} errors)", errors.len())]
    ValidationFailure {
        /// Every violated constraint.
        errors: Vec<ValidationError>,
    },

    /// The request itself could not be read.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message.
        message: String,
    },

    /// The upstream could not be reached or failed mid-request.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Underlying cause.
        message: String,
        /// Whether the failure was a timeout.
        timed_out: bool,
    },

    /// The capture log could not be written.
    #[error("Recording error: {message}")]
    Recording {
        /// Error message.
        message: String,
    },

    /// Path outside the routing prefix and the gateway's own endpoints.
    #[error("Route not handled by gateway: {path}")]
    RouteNotHandled {
        /// Inbound path.
        path: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Contract load failure.
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    /// Server startup error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl GatewayError {
    /// Create a contract mismatch error.
    pub fn contract_mismatch(path: impl Into<String>) -> Self {
        Self::ContractMismatch { path: path.into() }
    }

    /// Create a validation failure.
    pub fn validation(errors: Vec<ValidationError>) -> Self {
        Self::ValidationFailure { errors }
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create an upstream timeout error.
    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            timed_out: true,
        }
    }

    /// Create a recording error.
    pub fn recording(message: impl Into<String>) -> Self {
        Self::Recording {
            message: message.into(),
        }
    }

    /// Create a route-not-handled error.
    pub fn route_not_handled(path: impl Into<String>) -> Self {
        Self::RouteNotHandled { path: path.into() }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ContractMismatch { .. } => StatusCode::NOT_FOUND,
            Self::ValidationFailure { .. } => StatusCode::BAD_REQUEST,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::RouteNotHandled { .. } => StatusCode::NOT_FOUND,
            Self::Recording { .. }
            | Self::Config { .. }
            | Self::Contract(_)
            | Self::Server { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for metrics and error bodies.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ContractMismatch { .. } => "contract_mismatch",
            Self::ValidationFailure { .. } => "validation",
            Self::BadRequest { .. } => "bad_request",
            Self::Upstream { .. } => "upstream",
            Self::Recording { .. } => "recording",
            Self::RouteNotHandled { .. } => "routing",
            Self::Config { .. } => "config",
            Self::Contract(_) => "contract",
            Self::Server { .. } => "server",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Internal { .. } => "internal",
        }
    }

    /// Caller-facing summary, without internal detail.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::ContractMismatch { .. } => "Path not found in specification",
            Self::ValidationFailure { .. } => "Request validation failed",
            Self::BadRequest { .. } => "Failed to read request",
            Self::Upstream {
                timed_out: true, ..
            } => "Upstream request timed out",
            Self::Upstream { .. } => "Upstream request failed",
            Self::RouteNotHandled { .. } => "Route not handled by gateway",
            _ => "Internal gateway error",
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// JSON body of every error the gateway returns to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Summary message.
    pub error: String,
    /// Error category.
    pub category: String,
    /// Offending path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Field-level validation errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationError>>,
    /// Underlying cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Request ID for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            category: category.into(),
            path: None,
            errors: None,
            detail: None,
            request_id: None,
        }
    }

    /// Set the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the underlying cause.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        let mut response = Self::new(err.summary(), err.category());
        match err {
            GatewayError::ContractMismatch { path } | GatewayError::RouteNotHandled { path } => {
                response.path = Some(path.clone());
            }
            GatewayError::ValidationFailure { errors } => {
                response.errors = Some(errors.clone());
            }
            GatewayError::BadRequest { message }
            | GatewayError::Upstream { message, .. }
            | GatewayError::Internal { message } => {
                response.detail = Some(message.clone());
            }
            _ => {}
        }
        response
    }
}

impl From<GatewayError> for ErrorResponse {
    fn from(err: GatewayError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.error)
    }
}
