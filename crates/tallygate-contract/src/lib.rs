//! Tallygate Contract - OpenAPI contract handling
//!
//! This crate gives the gateway its view of the accounting API contract:
//! it loads an OpenAPI 3.x document, matches inbound requests to documented
//! operations, validates them, and synthesizes representative responses for
//! mock mode.
//!
//! # Overview
//!
//! - [`ContractLoader`] parses the document and resolves component references
//! - [`OperationResolver`] maps (method, path) to an operation
//! - [`SchemaValidator`] checks parameters and bodies against schemas
//! - [`ResponseSynthesizer`] builds a response from examples or schemas
//!
//! The [`Contract`] facade ties them together and is what the gateway holds.
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────────┐
//!                      │   OpenAPI document         │
//!                      └──────────┬─────────────────┘
//!                                 │ load once
//!                      ┌──────────▼─────────────────┐
//!                      │   ContractLoader           │
//!                      └──────────┬─────────────────┘
//!                                 │ compile
//!                      ┌──────────▼─────────────────┐
//!      HTTP Request ──▶│   OperationResolver        │──▶ NotFound
//!                      └──────────┬─────────────────┘
//!                                 │ operation + path params
//!                      ┌──────────▼─────────────────┐
//!                      │   SchemaValidator          │──▶ ValidationFailed
//!                      └──────────┬─────────────────┘
//!                                 │ Matched
//!                      ┌──────────▼─────────────────┐
//!                      │   ResponseSynthesizer      │
//!                      └────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tallygate_contract::{Contract, ValidationOutcome};
//!
//! let contract = Contract::from_file("accounting.json").await?;
//!
//! match contract.match_request(&Method::GET, "/v3/company/42/customer", None, &headers, b"") {
//!     ValidationOutcome::Matched(matched) => {
//!         let response = contract.synthesize(matched.operation);
//!         assert_eq!(response.status, 200);
//!     }
//!     ValidationOutcome::NotFound => { /* 404 */ }
//!     ValidationOutcome::ValidationFailed(errors) => { /* 400 */ }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod openapi;
pub mod operation;
pub mod resolver;
pub mod synthesizer;
pub mod validation;

use std::collections::HashMap;
use std::path::Path;

use http::{HeaderMap, Method};

// Re-exports for convenience
pub use error::{ContractError, ContractResult, ValidationError};
pub use loader::{ContractLoader, LoadedContract};
pub use operation::{Operation, ParameterSpec, RequestBodySpec, ResponseSpec, ResponseStatus};
pub use resolver::{OperationResolver, RouteMatch};
pub use synthesizer::{ResponseSynthesizer, SynthesizedResponse};
pub use validation::{RequestParts, SchemaValidator, ValidationResult};

/// An operation matched by an inbound request.
#[derive(Debug, Clone)]
pub struct MatchedOperation<'a> {
    /// The matched operation.
    pub operation: &'a Operation,
    /// Percent-decoded path variables.
    pub path_params: HashMap<String, String>,
}

/// Outcome of matching a request against the contract.
#[derive(Debug, Clone)]
pub enum ValidationOutcome<'a> {
    /// The request matched an operation and satisfied all its constraints.
    Matched(MatchedOperation<'a>),
    /// No operation matches the method and path.
    NotFound,
    /// An operation matched but the request violates its constraints.
    ValidationFailed(Vec<ValidationError>),
}

/// A loaded, compiled contract.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug)]
pub struct Contract {
    loaded: LoadedContract,
    resolver: OperationResolver,
    validator: SchemaValidator,
    synthesizer: ResponseSynthesizer,
}

impl Contract {
    /// Compile a loaded contract.
    pub fn new(loaded: LoadedContract) -> ContractResult<Self> {
        let resolver = OperationResolver::from_contract(&loaded)?;
        let validator = SchemaValidator::from_contract(&loaded)?;
        let synthesizer = ResponseSynthesizer::from_contract(&loaded);

        Ok(Self {
            loaded,
            resolver,
            validator,
            synthesizer,
        })
    }

    /// Load and compile a contract file.
    pub async fn from_file(path: impl AsRef<Path>) -> ContractResult<Self> {
        Self::new(ContractLoader::from_file(path).await?)
    }

    /// Load and compile a JSON contract.
    pub fn from_json(json: &str) -> ContractResult<Self> {
        Self::new(ContractLoader::from_json(json)?)
    }

    /// Load and compile a YAML contract.
    pub fn from_yaml(yaml: &str) -> ContractResult<Self> {
        Self::new(ContractLoader::from_yaml(yaml)?)
    }

    /// API title.
    pub fn title(&self) -> &str {
        &self.loaded.title
    }

    /// API version.
    pub fn version(&self) -> &str {
        &self.loaded.version
    }

    /// Get the operation count.
    pub fn operation_count(&self) -> usize {
        self.loaded.operations.len()
    }

    /// All operations in document order.
    pub fn operations(&self) -> &[Operation] {
        &self.loaded.operations
    }

    /// Find an operation by identifier.
    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.loaded.operation(id)
    }

    /// Get all registered HTTP methods.
    pub fn methods(&self) -> Vec<&str> {
        self.resolver.methods()
    }

    /// Get all routes for a specific method.
    pub fn routes_for_method(&self, method: &str) -> Vec<&str> {
        self.resolver.routes_for_method(method)
    }

    /// Match an inbound request to an operation and validate it.
    ///
    /// `path` is the request path with the routing prefix already removed
    /// and without the query string.
    pub fn match_request(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> ValidationOutcome<'_> {
        let Some(route) = self.resolver.resolve(method.as_str(), path) else {
            return ValidationOutcome::NotFound;
        };
        let operation = &self.loaded.operations[route.index];

        let result = self.validator.validate_request(
            operation,
            RequestParts {
                path_params: &route.path_params,
                query,
                headers,
                body,
            },
        );

        if result.valid {
            ValidationOutcome::Matched(MatchedOperation {
                operation,
                path_params: route.path_params,
            })
        } else {
            ValidationOutcome::ValidationFailed(result.errors)
        }
    }

    /// Produce the mock response for an operation.
    pub fn synthesize(&self, operation: &Operation) -> SynthesizedResponse {
        self.synthesizer.synthesize(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = r#"{
        "openapi": "3.0.1",
        "info": {"title": "Accounting", "version": "3"},
        "paths": {
            "/v3/company/{realmId}/customer": {
                "get": {
                    "operationId": "listCustomers",
                    "parameters": [{"name": "realmId", "in": "path", "required": true, "schema": {"type": "integer"}}],
                    "responses": {"200": {"description": "ok", "content": {"application/json": {"example": {"Customer": []}}}}}
                }
            }
        }
    }"#;

    #[test]
    fn test_contract_creation() {
        let contract = Contract::from_json(CONTRACT).unwrap();
        assert_eq!(contract.title(), "Accounting");
        assert_eq!(contract.version(), "3");
        assert_eq!(contract.operation_count(), 1);
        assert!(contract.methods().contains(&"GET"));
        assert_eq!(contract.routes_for_method("GET"), vec!["/v3/company/{realmId}/customer"]);
    }

    #[test]
    fn test_match_request_outcomes() {
        let contract = Contract::from_json(CONTRACT).unwrap();
        let headers = HeaderMap::new();

        match contract.match_request(&Method::GET, "/v3/company/42/customer", None, &headers, b"") {
            ValidationOutcome::Matched(matched) => {
                assert_eq!(matched.operation.id, "listCustomers");
                assert_eq!(matched.path_params["realmId"], "42");
            }
            other => panic!("expected match, got {other:?}"),
        }

        assert!(matches!(
            contract.match_request(&Method::GET, "/v3/company/42/invoice", None, &headers, b""),
            ValidationOutcome::NotFound
        ));
        assert!(matches!(
            contract.match_request(&Method::POST, "/v3/company/42/customer", None, &headers, b""),
            ValidationOutcome::NotFound
        ));

        match contract.match_request(&Method::GET, "/v3/company/abc/customer", None, &headers, b"") {
            ValidationOutcome::ValidationFailed(errors) => assert_eq!(errors[0].path, "path.realmId"),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_synthesize_through_facade() {
        let contract = Contract::from_json(CONTRACT).unwrap();
        let op = contract.operation("listCustomers").unwrap();
        let response = contract.synthesize(op);
        assert_eq!(response.status, http::StatusCode::OK);
        assert_eq!(&response.body[..], br#"{"Customer":[]}"#);
    }
}
