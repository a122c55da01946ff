//! Operation resolution from HTTP requests.
//!
//! This module provides the `OperationResolver` which maps an inbound
//! (method, path) pair to an operation of the loaded contract, binding the
//! path variables of its template.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::error::{ContractError, ContractResult};
use crate::loader::LoadedContract;

/// Result of resolving an HTTP request to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Index of the operation in [`LoadedContract::operations`].
    pub index: usize,
    /// Percent-decoded path variables.
    pub path_params: HashMap<String, String>,
}

/// Resolves HTTP requests to contract operations.
///
/// The resolver builds a routing table from the loaded contract and provides
/// path matching with parameter extraction.
#[derive(Debug)]
pub struct OperationResolver {
    /// Routes indexed by upper-case HTTP method.
    routes: HashMap<String, Vec<CompiledRoute>>,
}

/// A compiled route for matching.
#[derive(Debug)]
struct CompiledRoute {
    /// Original path template.
    template: String,
    /// Regex for matching paths.
    pattern: Regex,
    /// Parameter names in capture order.
    param_names: Vec<String>,
    /// Index of the operation.
    index: usize,
}

impl OperationResolver {
    /// Create a resolver from a loaded contract.
    pub fn from_contract(contract: &LoadedContract) -> ContractResult<Self> {
        let mut routes: HashMap<String, Vec<CompiledRoute>> = HashMap::new();

        for (index, op) in contract.operations.iter().enumerate() {
            let (pattern, param_names) = Self::compile_path(&op.path)?;
            routes
                .entry(op.method.as_str().to_uppercase())
                .or_default()
                .push(CompiledRoute {
                    template: op.path.clone(),
                    pattern,
                    param_names,
                    index,
                });
        }

        // Sort routes by specificity (more specific paths first)
        for method_routes in routes.values_mut() {
            method_routes.sort_by(|a, b| Self::route_specificity(&a.template, &b.template));
        }

        debug!(
            methods = routes.len(),
            total_routes = routes.values().map(Vec::len).sum::<usize>(),
            "operation resolver initialized"
        );

        Ok(Self { routes })
    }

    /// Resolve a method and path to an operation.
    ///
    /// Method comparison is case-insensitive. The path must not carry a
    /// query string.
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let routes = self.routes.get(&method.to_uppercase())?;

        // Try each route in order (already sorted by specificity)
        routes.iter().find_map(|route| {
            let captures = route.pattern.captures(path)?;
            let mut path_params = HashMap::with_capacity(route.param_names.len());
            for (i, name) in route.param_names.iter().enumerate() {
                if let Some(value) = captures.get(i + 1) {
                    let raw = value.as_str();
                    let decoded = urlencoding::decode(raw)
                        .map_or_else(|_| raw.to_string(), |v| v.into_owned());
                    path_params.insert(name.clone(), decoded);
                }
            }
            Some(RouteMatch {
                index: route.index,
                path_params,
            })
        })
    }

    /// Get all registered methods.
    pub fn methods(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    /// Get all route templates for a specific method, most specific first.
    pub fn routes_for_method(&self, method: &str) -> Vec<&str> {
        self.routes
            .get(&method.to_uppercase())
            .map(|routes| routes.iter().map(|r| r.template.as_str()).collect())
            .unwrap_or_default()
    }

    fn compile_path(template: &str) -> ContractResult<(Regex, Vec<String>)> {
        let mut pattern = String::from("^");
        let mut param_names = Vec::new();

        for segment in template.split('/') {
            if segment.is_empty() {
                continue;
            }

            pattern.push('/');

            // A segment may mix literals and variables, e.g. `{id}.pdf`.
            let mut rest = segment;
            while let Some(start) = rest.find('{') {
                pattern.push_str(&regex::escape(&rest[..start]));
                let end = rest[start..]
                    .find('}')
                    .map(|offset| start + offset)
                    .ok_or_else(|| ContractError::invalid_template(template, "unbalanced braces"))?;
                param_names.push(rest[start + 1..end].to_string());
                pattern.push_str("([^/]+?)");
                rest = &rest[end + 1..];
            }
            pattern.push_str(&regex::escape(rest));
        }

        // Handle root path
        if pattern == "^" {
            pattern.push_str("/$");
        } else {
            pattern.push_str("/?$");
        }

        let regex = Regex::new(&pattern)
            .map_err(|e| ContractError::invalid_template(template, e.to_string()))?;
        Ok((regex, param_names))
    }

    /// Compare route specificity for sorting.
    /// More specific routes (fewer parameters, longer literals) come first.
    fn route_specificity(a: &str, b: &str) -> std::cmp::Ordering {
        let a_params = a.matches('{').count();
        let b_params = b.matches('{').count();

        // Fewer parameters = more specific
        if a_params != b_params {
            return a_params.cmp(&b_params);
        }

        // Longer path = more specific (among same param count)
        b.len().cmp(&a.len())
    }
}
