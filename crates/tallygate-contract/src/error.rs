//! Contract error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for contract operations.
pub type ContractResult<T> = Result<T, ContractError>;

/// Errors raised while loading or compiling a contract.
///
/// All of these are startup failures: a contract that produces one of them
/// is never used to serve traffic.
#[derive(Debug, Error)]
pub enum ContractError {
    /// The contract file could not be read.
    #[error("failed to read contract {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The contract document could not be parsed.
    #[error("failed to parse contract: {0}")]
    Parse(String),

    /// The document declares an OpenAPI version this loader does not handle.
    #[error("unsupported OpenAPI version '{0}', expected 3.x")]
    UnsupportedVersion(String),

    /// A path template is malformed.
    #[error("invalid path template '{template}': {message}")]
    InvalidPathTemplate {
        /// The offending template.
        template: String,
        /// What is wrong with it.
        message: String,
    },

    /// A response key is neither a status code, a range nor `default`.
    #[error("invalid response status '{status}' in operation '{operation_id}'")]
    InvalidResponseStatus {
        /// Operation carrying the response.
        operation_id: String,
        /// The offending key.
        status: String,
    },

    /// Two operations share the same identifier.
    #[error("duplicate operation id '{0}'")]
    DuplicateOperation(String),

    /// A `$ref` points at a component that does not exist.
    #[error("unresolved reference '{reference}' in {context}")]
    UnresolvedReference {
        /// The reference string.
        reference: String,
        /// Where the reference was found.
        context: String,
    },

    /// A schema `pattern` is not a valid regular expression.
    #[error("invalid pattern '{pattern}' in {context}: {message}")]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// Where the pattern was found.
        context: String,
        /// Regex compiler message.
        message: String,
    },
}

impl ContractError {
    pub(crate) fn unresolved(reference: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            reference: reference.into(),
            context: context.into(),
        }
    }

    pub(crate) fn invalid_template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPathTemplate {
            template: template.into(),
            message: message.into(),
        }
    }
}

/// A single violated constraint found while validating a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Dotted location of the violation (e.g. `query.minorversion`,
    /// `body.Line[0].Amount`).
    pub path: String,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_reference_display() {
        let err = ContractError::unresolved("#/components/schemas/Missing", "operation 'getCustomer'");
        assert!(err.to_string().contains("#/components/schemas/Missing"));
        assert!(err.to_string().contains("getCustomer"));
    }

    #[test]
    fn test_invalid_template_display() {
        let err = ContractError::invalid_template("/v3/{id", "unbalanced braces");
        assert!(err.to_string().contains("/v3/{id"));
        assert!(err.to_string().contains("unbalanced"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("query.minorversion", "expected integer, got 'abc'");
        assert_eq!(err.to_string(), "query.minorversion: expected integer, got 'abc'");
    }

    #[test]
    fn test_validation_error_serializes_path_and_message() {
        let err = ValidationError::new("body.DisplayName", "missing required property");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["path"], "body.DisplayName");
        assert_eq!(json["message"], "missing required property");
    }
}
