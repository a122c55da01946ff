//! Response synthesis for mock mode.
//!
//! Produces a representative response for an operation from what the
//! contract documents, without contacting any backend. The choice is
//! deterministic, so the same operation always yields the same bytes.

use bytes::Bytes;
use http::StatusCode;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::loader::{component_name, LoadedContract};
use crate::openapi::{Schema, SchemaType};
use crate::operation::{is_json_media_type, media_essence, MediaTypeSpec, Operation, ResponseSpec, ResponseStatus};

/// Depth at which derived bodies stop descending into nested schemas.
const MAX_DERIVE_DEPTH: usize = 8;

/// A locally produced response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedResponse {
    /// Response status.
    pub status: StatusCode,
    /// Content type of the body, if any.
    pub content_type: Option<String>,
    /// Body bytes.
    pub body: Bytes,
}

impl SynthesizedResponse {
    /// The fallback used when an operation documents no success response.
    pub fn undocumented(operation_id: &str) -> Self {
        let body = json!({
            "error": "No example response documented for operation",
            "operationId": operation_id,
        });
        Self {
            status: StatusCode::NOT_IMPLEMENTED,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(body.to_string()),
        }
    }
}

/// Builds mock responses from a contract.
#[derive(Debug)]
pub struct ResponseSynthesizer {
    /// Component schemas, targets of `$ref`.
    schemas: IndexMap<String, Schema>,
}

impl ResponseSynthesizer {
    /// Create a synthesizer from a loaded contract.
    pub fn from_contract(contract: &LoadedContract) -> Self {
        Self {
            schemas: contract.schemas.clone(),
        }
    }

    /// Produce the response for an operation. Never fails.
    pub fn synthesize(&self, operation: &Operation) -> SynthesizedResponse {
        let Some((status, response)) = success_response(operation) else {
            return SynthesizedResponse::undocumented(&operation.id);
        };

        let Some((media_type, media)) = pick_media_type(&response.content) else {
            return SynthesizedResponse {
                status,
                content_type: None,
                body: Bytes::new(),
            };
        };

        let value = media
            .example
            .clone()
            .or_else(|| media.examples.first().map(|(_, value)| value.clone()))
            .or_else(|| media.schema.as_ref().map(|schema| self.example_for(schema)));

        let body = match value {
            None => Bytes::new(),
            // Non-JSON examples written as strings are emitted verbatim.
            Some(Value::String(text)) if !is_json_media_type(media_type) => Bytes::from(text),
            Some(value) => Bytes::from(value.to_string()),
        };

        SynthesizedResponse {
            status,
            content_type: Some(media_type.to_string()),
            body,
        }
    }

    /// The schema's own example (following `$ref`), or a value derived from
    /// its structure.
    pub fn example_for(&self, schema: &Schema) -> Value {
        self.derive(schema, 0)
    }

    fn derive(&self, schema: &Schema, depth: usize) -> Value {
        if depth > MAX_DERIVE_DEPTH {
            return Value::Null;
        }

        if let Some(reference) = &schema.reference {
            return component_name(reference, "schemas")
                .and_then(|name| self.schemas.get(&name))
                .map_or(Value::Null, |target| self.derive(target, depth + 1));
        }

        if let Some(value) = schema.example.as_ref().or(schema.default.as_ref()) {
            return value.clone();
        }
        if let Some(first) = schema.enum_values.first() {
            return first.clone();
        }

        if !schema.all_of.is_empty() {
            let mut merged = Map::new();
            for part in &schema.all_of {
                match self.derive(part, depth + 1) {
                    Value::Object(fields) => merged.extend(fields),
                    other if merged.is_empty() && schema.all_of.len() == 1 => return other,
                    _ => {}
                }
            }
            return Value::Object(merged);
        }
        if let Some(first) = schema.one_of.first().or_else(|| schema.any_of.first()) {
            return self.derive(first, depth + 1);
        }

        let schema_type = schema.primary_type().or_else(|| {
            if schema.properties.is_empty() {
                schema.items.as_ref().map(|_| SchemaType::Array)
            } else {
                Some(SchemaType::Object)
            }
        });

        match schema_type {
            Some(SchemaType::Object) => Value::Object(
                schema
                    .properties
                    .iter()
                    .map(|(name, property)| (name.clone(), self.derive(property, depth + 1)))
                    .collect(),
            ),
            Some(SchemaType::Array) => match &schema.items {
                Some(items) if depth < MAX_DERIVE_DEPTH => {
                    let item = self.derive(items, depth + 1);
                    if item.is_null() {
                        json!([])
                    } else {
                        json!([item])
                    }
                }
                _ => json!([]),
            },
            Some(SchemaType::String) => Value::String(String::new()),
            Some(SchemaType::Integer | SchemaType::Number) => {
                schema.minimum.map_or(json!(0), |min| json!(min.max(0.0).ceil() as i64))
            }
            Some(SchemaType::Boolean) => Value::Bool(false),
            Some(SchemaType::Null) | None => Value::Null,
        }
    }
}

/// The lowest-status success response, preferring ones that carry an
/// explicit example.
fn success_response(operation: &Operation) -> Option<(StatusCode, &ResponseSpec)> {
    let mut candidates: Vec<(u16, bool, &ResponseSpec)> = operation
        .responses
        .iter()
        .filter_map(|response| {
            let code = match response.status {
                ResponseStatus::Code(code) if (200..300).contains(&code) => code,
                ResponseStatus::Range(2) | ResponseStatus::Default => 200,
                _ => return None,
            };
            Some((code, has_example(response), response))
        })
        .collect();

    // Stable sort keeps document order among equal keys.
    candidates.sort_by_key(|(code, explicit, _)| (!*explicit, *code));
    let (code, _, response) = candidates.into_iter().next()?;
    StatusCode::from_u16(code).ok().map(|status| (status, response))
}

fn has_example(response: &ResponseSpec) -> bool {
    response
        .content
        .values()
        .any(|media| media.example.is_some() || !media.examples.is_empty())
}

/// Prefer `application/json`, then any `+json`, then the first declared.
fn pick_media_type(content: &IndexMap<String, MediaTypeSpec>) -> Option<(&str, &MediaTypeSpec)> {
    content
        .iter()
        .find(|(media, _)| media_essence(media) == "application/json")
        .or_else(|| content.iter().find(|(media, _)| is_json_media_type(media)))
        .or_else(|| content.first())
        .map(|(media, spec)| (media.as_str(), spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ContractLoader;

    fn setup(paths: &str, schemas: &str) -> (LoadedContract, ResponseSynthesizer) {
        let doc = format!(
            r#"{{"openapi": "3.0.1", "info": {{"title": "t", "version": "1"}},
                "paths": {paths}, "components": {{"schemas": {schemas}}}}}"#
        );
        let contract = ContractLoader::from_json(&doc).unwrap();
        let synthesizer = ResponseSynthesizer::from_contract(&contract);
        (contract, synthesizer)
    }

    fn body_json(response: &SynthesizedResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_explicit_example() {
        let (contract, synthesizer) = setup(
            r#"{"/customer": {"get": {"operationId": "list", "responses": {
                "200": {"description": "ok", "content": {"application/json": {"example": {"Customer": []}}}}
            }}}}"#,
            "{}",
        );
        let response = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(&response.body[..], br#"{"Customer":[]}"#);
    }

    #[test]
    fn test_prefers_documented_example_over_lower_status() {
        let (contract, synthesizer) = setup(
            r#"{"/invoice": {"post": {"operationId": "create", "responses": {
                "201": {"description": "created", "content": {"application/json": {
                    "examples": {"first": {"value": {"Id": "1"}}, "second": {"value": {"Id": "2"}}}
                }}},
                "200": {"description": "ok", "content": {"application/json": {"schema": {"type": "object"}}}},
                "400": {"description": "bad", "content": {"application/json": {"example": {"Fault": {}}}}}
            }}}}"#,
            "{}",
        );
        let response = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(body_json(&response), json!({"Id": "1"}));
    }

    #[test]
    fn test_lowest_success_status_when_no_examples() {
        let (contract, synthesizer) = setup(
            r#"{"/a": {"get": {"operationId": "a", "responses": {
                "default": {"description": "any", "content": {"application/json": {"schema": {"type": "string"}}}},
                "202": {"description": "accepted", "content": {"application/json": {"schema": {"type": "boolean"}}}}
            }}}}"#,
            "{}",
        );
        let response = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(body_json(&response), json!(""));
    }

    #[test]
    fn test_derived_from_schema() {
        let (contract, synthesizer) = setup(
            r##"{"/customer/{id}": {"get": {"operationId": "get", "responses": {
                "200": {"description": "ok", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Envelope"}}}}
            }}}}"##,
            r##"{
                "Envelope": {"type": "object", "properties": {
                    "Customer": {"$ref": "#/components/schemas/Customer"},
                    "time": {"type": "string", "example": "2024-01-01T00:00:00Z"}
                }},
                "Customer": {"type": "object", "properties": {
                    "Id": {"type": "string"},
                    "Balance": {"type": "number"},
                    "Active": {"type": "boolean", "default": true},
                    "Kind": {"type": "string", "enum": ["Individual", "Company"]},
                    "Emails": {"type": "array", "items": {"type": "string"}},
                    "Parent": {"$ref": "#/components/schemas/Customer"}
                }}
            }"##,
        );
        let response = synthesizer.synthesize(&contract.operations[0]);
        let body = body_json(&response);
        assert_eq!(body["time"], "2024-01-01T00:00:00Z");
        assert_eq!(body["Customer"]["Id"], "");
        assert_eq!(body["Customer"]["Balance"], 0);
        assert_eq!(body["Customer"]["Active"], true);
        assert_eq!(body["Customer"]["Kind"], "Individual");
        assert_eq!(body["Customer"]["Emails"], json!([""]));
        // Recursion is cut off rather than looping.
        assert!(body["Customer"]["Parent"].is_object());
    }

    #[test]
    fn test_success_without_content_is_empty() {
        let (contract, synthesizer) = setup(
            r#"{"/a": {"delete": {"operationId": "remove", "responses": {"204": {"description": "gone"}}}}}"#,
            "{}",
        );
        let response = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.content_type.is_none());
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_undocumented_fallback() {
        let (contract, synthesizer) = setup(
            r#"{"/a": {"get": {"operationId": "broken", "responses": {"404": {"description": "missing"}}}}}"#,
            "{}",
        );
        let response = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            body_json(&response),
            json!({"error": "No example response documented for operation", "operationId": "broken"})
        );
    }

    #[test]
    fn test_media_type_preference_and_verbatim_text() {
        let (contract, synthesizer) = setup(
            r#"{
                "/pdf": {"get": {"operationId": "pdf", "responses": {"200": {"description": "ok", "content": {
                    "application/xml": {"example": "<Invoice/>"},
                    "application/vnd.intuit+json": {"example": {"Invoice": {}}}
                }}}}},
                "/xml": {"get": {"operationId": "xml", "responses": {"200": {"description": "ok", "content": {
                    "application/xml": {"example": "<Invoice/>"}
                }}}}}
            }"#,
            "{}",
        );
        let json_response = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(json_response.content_type.as_deref(), Some("application/vnd.intuit+json"));

        let xml_response = synthesizer.synthesize(&contract.operations[1]);
        assert_eq!(&xml_response.body[..], b"<Invoice/>");
    }

    #[test]
    fn test_deterministic() {
        let (contract, synthesizer) = setup(
            r#"{"/a": {"get": {"operationId": "a", "responses": {"200": {"description": "ok", "content": {
                "application/json": {"schema": {"type": "object", "properties": {"b": {"type": "integer"}, "a": {"type": "string"}}}}
            }}}}}}"#,
            "{}",
        );
        let first = synthesizer.synthesize(&contract.operations[0]);
        let second = synthesizer.synthesize(&contract.operations[0]);
        assert_eq!(first, second);
    }
}
