//! Resolved operation model.
//!
//! These types are produced by the loader after every component `$ref` on
//! parameters, request bodies, responses and examples has been followed.
//! Schemas keep their `$ref`s, which are resolved lazily against the
//! contract's component schemas.

use http::Method;
use indexmap::IndexMap;
use serde_json::Value;

use crate::openapi::{ParameterLocation, Schema};

/// One (method, path template) entry of the contract.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Operation identifier (`operationId`, or `"<METHOD> <template>"`).
    pub id: String,
    /// HTTP method.
    pub method: Method,
    /// Path template (e.g. `/v3/company/{realmId}/customer/{id}`).
    pub path: String,
    /// Short summary.
    pub summary: Option<String>,
    /// Whether deprecated.
    pub deprecated: bool,
    /// Path-level and operation-level parameters, merged.
    pub parameters: Vec<ParameterSpec>,
    /// Request body, if the operation accepts one.
    pub request_body: Option<RequestBodySpec>,
    /// Documented responses, in document order.
    pub responses: Vec<ResponseSpec>,
}

impl Operation {
    /// Parameters declared at a given location.
    pub fn parameters_in(&self, location: ParameterLocation) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(move |p| p.location == location)
    }
}

/// A resolved parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Where the parameter is carried.
    pub location: ParameterLocation,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Value schema.
    pub schema: Option<Schema>,
}

/// A resolved request body.
#[derive(Debug, Clone)]
pub struct RequestBodySpec {
    /// Whether a body must be sent.
    pub required: bool,
    /// Accepted media types, in document order.
    pub content: IndexMap<String, MediaTypeSpec>,
}

/// A resolved media type entry.
#[derive(Debug, Clone, Default)]
pub struct MediaTypeSpec {
    /// Schema of the payload.
    pub schema: Option<Schema>,
    /// Single example value.
    pub example: Option<Value>,
    /// Named examples in document order.
    pub examples: Vec<(String, Value)>,
}

/// Status key of a documented response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    /// Exact status code.
    Code(u16),
    /// Status class such as `2XX` (stores the leading digit).
    Range(u8),
    /// The `default` response.
    Default,
}

impl ResponseStatus {
    /// Parse a response key.
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        if key.eq_ignore_ascii_case("default") {
            return Some(Self::Default);
        }
        if key.is_ascii() && key.len() == 3 && key[1..].eq_ignore_ascii_case("xx") {
            return match key.as_bytes()[0] {
                digit @ b'1'..=b'5' => Some(Self::Range(digit - b'0')),
                _ => None,
            };
        }
        key.parse::<u16>()
            .ok()
            .filter(|code| (100..=599).contains(code))
            .map(Self::Code)
    }
}

/// A resolved response.
#[derive(Debug, Clone)]
pub struct ResponseSpec {
    /// Status key.
    pub status: ResponseStatus,
    /// Description.
    pub description: String,
    /// Content by media type, in document order.
    pub content: IndexMap<String, MediaTypeSpec>,
}

/// Whether a media type carries JSON (`application/json`, `*+json`).
pub fn is_json_media_type(media_type: &str) -> bool {
    let essence = media_essence(media_type);
    essence == "application/json" || essence.ends_with("+json")
}

/// Media type without parameters, lowercased (`Application/JSON; charset=utf-8`
/// becomes `application/json`).
pub fn media_essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_parse() {
        assert_eq!(ResponseStatus::parse("200"), Some(ResponseStatus::Code(200)));
        assert_eq!(ResponseStatus::parse("2XX"), Some(ResponseStatus::Range(2)));
        assert_eq!(ResponseStatus::parse("4xx"), Some(ResponseStatus::Range(4)));
        assert_eq!(ResponseStatus::parse("default"), Some(ResponseStatus::Default));
        assert_eq!(ResponseStatus::parse("6XX"), None);
        assert_eq!(ResponseStatus::parse("99"), None);
        assert_eq!(ResponseStatus::parse("ok"), None);
    }

    #[test]
    fn test_media_helpers() {
        assert_eq!(media_essence("Application/JSON; charset=utf-8"), "application/json");
        assert!(is_json_media_type("application/json"));
        assert!(is_json_media_type("application/vnd.intuit+json"));
        assert!(!is_json_media_type("application/xml"));
        assert!(!is_json_media_type("text/plain"));
    }
}
