//! Request validation against contract operations.
//!
//! The validator checks path, query, header and cookie parameters and the
//! request body of an inbound request against a matched [`Operation`]. It
//! reports one [`ValidationError`] per violated constraint and never stops
//! at the first one.

use std::collections::HashMap;

use http::header::{CONTENT_TYPE, COOKIE};
use http::HeaderMap;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Number, Value};
use tracing::debug;

use crate::error::{ContractError, ContractResult, ValidationError};
use crate::loader::{component_name, LoadedContract};
use crate::openapi::{AdditionalProperties, ParameterLocation, Schema, SchemaType};
use crate::operation::{is_json_media_type, media_essence, Operation, ParameterSpec};

/// Nesting limit for schema checks; guards against recursive schemas.
const MAX_DEPTH: usize = 64;

/// Result of a validation operation.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Whether validation passed.
    pub valid: bool,
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a successful validation result.
    pub fn success() -> Self {
        Self {
            valid: true,
            errors: vec![],
        }
    }

    /// Build a result from collected errors.
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// The parts of an inbound request the validator looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    /// Path variables bound by the resolver.
    pub path_params: &'a HashMap<String, String>,
    /// Raw query string, without the leading `?`.
    pub query: Option<&'a str>,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Request body bytes.
    pub body: &'a [u8],
}

/// Compiled `pattern` constraints, keyed by pattern source.
#[derive(Debug, Default)]
pub struct PatternCache {
    patterns: HashMap<String, Regex>,
}

impl PatternCache {
    /// Compile every `pattern` found in the contract.
    pub fn from_contract(contract: &LoadedContract) -> ContractResult<Self> {
        let mut patterns = HashMap::new();
        for (context, schema) in contract.schemas_with_context() {
            let mut failure = None;
            schema.walk(&mut |nested| {
                let Some(source) = &nested.pattern else { return };
                if failure.is_some() || patterns.contains_key(source) {
                    return;
                }
                match Regex::new(source) {
                    Ok(regex) => {
                        patterns.insert(source.clone(), regex);
                    }
                    Err(e) => {
                        failure = Some(ContractError::InvalidPattern {
                            pattern: source.clone(),
                            context: context.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(Self { patterns })
    }

    /// Whether `value` matches the pattern. Unknown patterns match.
    pub fn is_match(&self, pattern: &str, value: &str) -> bool {
        self.patterns.get(pattern).map_or(true, |regex| regex.is_match(value))
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no pattern was compiled.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Validates requests against contract schemas.
#[derive(Debug)]
pub struct SchemaValidator {
    /// Component schemas, targets of `$ref`.
    schemas: IndexMap<String, Schema>,
    /// Compiled `pattern` constraints.
    patterns: PatternCache,
}

impl SchemaValidator {
    /// Create a validator from a loaded contract.
    ///
    /// Fails if any schema `pattern` is not a valid regular expression.
    pub fn from_contract(contract: &LoadedContract) -> ContractResult<Self> {
        let patterns = PatternCache::from_contract(contract)?;

        debug!(
            schema_count = contract.schemas.len(),
            pattern_count = patterns.len(),
            "schema validator initialized"
        );

        Ok(Self {
            schemas: contract.schemas.clone(),
            patterns,
        })
    }

    /// Validate every part of a request against an operation.
    pub fn validate_request(&self, operation: &Operation, request: RequestParts<'_>) -> ValidationResult {
        let mut errors = Vec::new();

        self.validate_path_params(operation, request.path_params, &mut errors);
        self.validate_query_params(operation, request.query, &mut errors);
        self.validate_headers(operation, request.headers, &mut errors);
        self.validate_cookies(operation, request.headers, &mut errors);
        self.validate_body(operation, request.headers, request.body, &mut errors);

        if !errors.is_empty() {
            debug!(operation_id = %operation.id, errors = errors.len(), "request failed validation");
        }
        ValidationResult::from_errors(errors)
    }

    /// Validate a JSON value against a schema, reporting errors under `path`.
    pub fn validate_value(&self, value: &Value, schema: &Schema, path: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        self.check(value, schema, path, 0, &mut errors);
        errors
    }

    fn validate_path_params(
        &self,
        operation: &Operation,
        params: &HashMap<String, String>,
        errors: &mut Vec<ValidationError>,
    ) {
        for spec in operation.parameters_in(ParameterLocation::Path) {
            match params.get(&spec.name) {
                Some(value) => self.check_raw_values(spec, &[value.as_str()], errors),
                None => errors.push(ValidationError::new(
                    field_path(ParameterLocation::Path, &spec.name),
                    format!("missing required path parameter '{}'", spec.name),
                )),
            }
        }
    }

    fn validate_query_params(
        &self,
        operation: &Operation,
        query: Option<&str>,
        errors: &mut Vec<ValidationError>,
    ) {
        let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(query.unwrap_or_default()) {
            Ok(pairs) => pairs,
            Err(e) => {
                errors.push(ValidationError::new("query", format!("malformed query string: {e}")));
                return;
            }
        };

        for spec in operation.parameters_in(ParameterLocation::Query) {
            let values: Vec<&str> = pairs
                .iter()
                .filter(|(name, _)| *name == spec.name)
                .map(|(_, value)| value.as_str())
                .collect();
            self.check_present_values(spec, &values, "query parameter", errors);
        }
    }

    fn validate_headers(&self, operation: &Operation, headers: &HeaderMap, errors: &mut Vec<ValidationError>) {
        for spec in operation.parameters_in(ParameterLocation::Header) {
            let mut values = Vec::new();
            for value in headers.get_all(spec.name.as_str()) {
                match value.to_str() {
                    Ok(text) => values.extend(split_header_values(text, spec, self)),
                    Err(_) => errors.push(ValidationError::new(
                        field_path(ParameterLocation::Header, &spec.name),
                        "header value is not valid text",
                    )),
                }
            }
            self.check_present_values(spec, &values, "header", errors);
        }
    }

    fn validate_cookies(&self, operation: &Operation, headers: &HeaderMap, errors: &mut Vec<ValidationError>) {
        let specs: Vec<&ParameterSpec> = operation.parameters_in(ParameterLocation::Cookie).collect();
        if specs.is_empty() {
            return;
        }

        let cookies: Vec<(&str, &str)> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();

        for spec in specs {
            let values: Vec<&str> = cookies
                .iter()
                .filter(|(name, _)| *name == spec.name)
                .map(|(_, value)| *value)
                .collect();
            self.check_present_values(spec, &values, "cookie", errors);
        }
    }

    fn validate_body(
        &self,
        operation: &Operation,
        headers: &HeaderMap,
        body: &[u8],
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(spec) = &operation.request_body else {
            return;
        };

        if body.is_empty() {
            if spec.required {
                errors.push(ValidationError::new("body", "request body is required"));
            }
            return;
        }

        if spec.content.is_empty() {
            return;
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(media_essence);

        let Some(content_type) = content_type else {
            errors.push(ValidationError::new(
                "header.content-type",
                "missing content-type for request body",
            ));
            return;
        };

        let Some((declared, media)) = spec
            .content
            .iter()
            .find(|(declared, _)| media_matches(declared, &content_type))
        else {
            let expected: Vec<&str> = spec.content.keys().map(String::as_str).collect();
            errors.push(ValidationError::new(
                "header.content-type",
                format!(
                    "unsupported content type '{content_type}', expected one of: {}",
                    expected.join(", ")
                ),
            ));
            return;
        };

        // Only JSON payloads are checked structurally.
        if !is_json_media_type(&content_type) && !is_json_media_type(declared) {
            return;
        }

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                errors.push(ValidationError::new("body", format!("invalid JSON: {e}")));
                return;
            }
        };

        if let Some(schema) = &media.schema {
            self.check(&value, schema, "body", 0, errors);
        }
    }

    /// Missing-required check followed by the per-value check.
    fn check_present_values(
        &self,
        spec: &ParameterSpec,
        values: &[&str],
        kind: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        if values.is_empty() {
            if spec.required {
                errors.push(ValidationError::new(
                    field_path(spec.location, &spec.name),
                    format!("missing required {kind} '{}'", spec.name),
                ));
            }
            return;
        }
        self.check_raw_values(spec, values, errors);
    }

    /// Coerce raw textual parameter values to the schema type and check them.
    fn check_raw_values(&self, spec: &ParameterSpec, values: &[&str], errors: &mut Vec<ValidationError>) {
        let path = field_path(spec.location, &spec.name);
        let Some(schema) = spec.schema.as_ref().map(|s| self.deref(s)) else {
            return;
        };

        let coerced = if schema.primary_type() == Some(SchemaType::Array) {
            let item_schema = schema.items.as_deref().map(|s| self.deref(s));
            values
                .iter()
                .map(|raw| coerce(raw, item_schema))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        } else {
            coerce(values[0], Some(schema))
        };

        match coerced {
            Ok(value) => self.check(&value, schema, &path, 0, errors),
            Err(message) => errors.push(ValidationError::new(path, message)),
        }
    }

    /// Follow `$ref` links to the target component schema.
    fn deref<'a>(&'a self, mut schema: &'a Schema) -> &'a Schema {
        for _ in 0..MAX_DEPTH {
            let Some(target) = schema.reference.as_deref().and_then(|r| self.lookup(r)) else {
                break;
            };
            schema = target;
        }
        schema
    }

    fn lookup(&self, reference: &str) -> Option<&Schema> {
        component_name(reference, "schemas").and_then(|name| self.schemas.get(&name))
    }

    fn check(&self, value: &Value, schema: &Schema, path: &str, depth: usize, errors: &mut Vec<ValidationError>) {
        if depth > MAX_DEPTH {
            return;
        }

        if let Some(reference) = &schema.reference {
            match self.lookup(reference) {
                Some(target) => self.check(value, target, path, depth + 1, errors),
                None => errors.push(ValidationError::new(path, format!("unresolved schema '{reference}'"))),
            }
            return;
        }

        if value.is_null() && schema.is_nullable() {
            return;
        }

        if let Some(types) = &schema.schema_type {
            if !types.as_slice().iter().any(|t| t.matches(value)) {
                let expected: Vec<&str> = types.as_slice().iter().map(|t| t.as_str()).collect();
                errors.push(ValidationError::new(
                    path,
                    format!("expected {}, got {}", expected.join(" or "), kind_of(value)),
                ));
                return;
            }
        }

        if !schema.enum_values.is_empty() && !schema.enum_values.contains(value) {
            let allowed: Vec<String> = schema.enum_values.iter().map(Value::to_string).collect();
            errors.push(ValidationError::new(
                path,
                format!("value {value} is not one of: {}", allowed.join(", ")),
            ));
        }

        match value {
            Value::Number(number) => check_number(number, schema, path, errors),
            Value::String(text) => self.check_string(text, schema, path, errors),
            Value::Array(items) => self.check_array(items, schema, path, depth, errors),
            Value::Object(object) => self.check_object(object, schema, path, depth, errors),
            Value::Bool(_) | Value::Null => {}
        }

        for nested in &schema.all_of {
            self.check(value, nested, path, depth + 1, errors);
        }

        for (keyword, alternatives) in [("anyOf", &schema.any_of), ("oneOf", &schema.one_of)] {
            if alternatives.is_empty() {
                continue;
            }
            let satisfied = alternatives.iter().any(|alternative| {
                let mut scratch = Vec::new();
                self.check(value, alternative, path, depth + 1, &mut scratch);
                scratch.is_empty()
            });
            if !satisfied {
                errors.push(ValidationError::new(
                    path,
                    format!("does not match any schema in {keyword}"),
                ));
            }
        }
    }

    fn check_string(&self, text: &str, schema: &Schema, path: &str, errors: &mut Vec<ValidationError>) {
        let length = text.chars().count();
        if let Some(min) = schema.min_length.filter(|min| length < *min) {
            errors.push(ValidationError::new(path, format!("length {length} is shorter than {min}")));
        }
        if let Some(max) = schema.max_length.filter(|max| length > *max) {
            errors.push(ValidationError::new(path, format!("length {length} is longer than {max}")));
        }
        if let Some(pattern) = &schema.pattern {
            if !self.patterns.is_match(pattern, text) {
                errors.push(ValidationError::new(path, format!("does not match pattern '{pattern}'")));
            }
        }
        if schema.format.as_deref() == Some("uuid") && uuid::Uuid::parse_str(text).is_err() {
            errors.push(ValidationError::new(path, format!("'{text}' is not a valid uuid")));
        }
    }

    fn check_array(
        &self,
        items: &[Value],
        schema: &Schema,
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Some(min) = schema.min_items.filter(|min| items.len() < *min) {
            errors.push(ValidationError::new(
                path,
                format!("expected at least {min} items, got {}", items.len()),
            ));
        }
        if let Some(max) = schema.max_items.filter(|max| items.len() > *max) {
            errors.push(ValidationError::new(
                path,
                format!("expected at most {max} items, got {}", items.len()),
            ));
        }
        if let Some(item_schema) = &schema.items {
            for (i, item) in items.iter().enumerate() {
                self.check(item, item_schema, &format!("{path}[{i}]"), depth + 1, errors);
            }
        }
    }

    fn check_object(
        &self,
        object: &serde_json::Map<String, Value>,
        schema: &Schema,
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        for name in &schema.required {
            if !object.contains_key(name) {
                errors.push(ValidationError::new(
                    join_path(path, name),
                    "missing required property",
                ));
            }
        }

        for (name, property) in object {
            let property_path = join_path(path, name);
            if let Some(property_schema) = schema.properties.get(name) {
                self.check(property, property_schema, &property_path, depth + 1, errors);
                continue;
            }
            match &schema.additional_properties {
                Some(AdditionalProperties::Allowed(false)) => {
                    errors.push(ValidationError::new(property_path, "additional property not allowed"));
                }
                Some(AdditionalProperties::Schema(extra)) => {
                    self.check(property, extra, &property_path, depth + 1, errors);
                }
                Some(AdditionalProperties::Allowed(true)) | None => {}
            }
        }
    }
}

fn check_number(number: &Number, schema: &Schema, path: &str, errors: &mut Vec<ValidationError>) {
    let Some(n) = number.as_f64() else { return };
    if let Some(min) = schema.minimum.filter(|min| n < *min) {
        errors.push(ValidationError::new(path, format!("{number} is less than minimum {min}")));
    }
    if let Some(max) = schema.maximum.filter(|max| n > *max) {
        errors.push(ValidationError::new(path, format!("{number} is greater than maximum {max}")));
    }
}

/// Turn a textual parameter into a JSON value of the schema's type.
fn coerce(raw: &str, schema: Option<&Schema>) -> Result<Value, String> {
    let Some(schema_type) = schema.and_then(Schema::primary_type) else {
        return Ok(Value::String(raw.to_string()));
    };

    match schema_type {
        SchemaType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected integer, got '{raw}'")),
        SchemaType::Number => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected number, got '{raw}'")),
        SchemaType::Boolean => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("expected boolean, got '{raw}'")),
        },
        SchemaType::Null if raw.is_empty() || raw == "null" => Ok(Value::Null),
        SchemaType::Object | SchemaType::Array => {
            serde_json::from_str(raw).map_err(|_| format!("expected {}, got '{raw}'", schema_type.as_str()))
        }
        SchemaType::String | SchemaType::Null => Ok(Value::String(raw.to_string())),
    }
}

/// Array-typed headers carry comma-separated values.
fn split_header_values<'a>(text: &'a str, spec: &ParameterSpec, validator: &SchemaValidator) -> Vec<&'a str> {
    let is_array = spec
        .schema
        .as_ref()
        .map(|s| validator.deref(s))
        .and_then(Schema::primary_type)
        == Some(SchemaType::Array);
    if is_array {
        text.split(',').map(str::trim).filter(|v| !v.is_empty()).collect()
    } else {
        vec![text]
    }
}

/// Whether a declared media range accepts an actual content type essence.
fn media_matches(declared: &str, actual: &str) -> bool {
    let declared = media_essence(declared);
    if declared == "*/*" {
        return true;
    }
    match declared.strip_suffix("/*") {
        Some(main_type) => actual
            .split_once('/')
            .is_some_and(|(actual_main, _)| actual_main == main_type),
        None => declared == actual,
    }
}

fn field_path(location: ParameterLocation, name: &str) -> String {
    format!("{}.{name}", location.as_str())
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
