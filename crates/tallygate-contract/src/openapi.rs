//! OpenAPI document types.
//!
//! Only the parts of OpenAPI 3.0 / 3.1 the gateway reads are modelled.
//! Unknown fields are ignored when deserializing, so vendor extensions and
//! documentation-only fields do not break loading.

use http::Method;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// OpenAPI document root object.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenApiDocument {
    /// OpenAPI version string (e.g. "3.0.1").
    pub openapi: String,
    /// API metadata.
    #[serde(default)]
    pub info: Info,
    /// Paths and their operations, in document order.
    #[serde(default)]
    pub paths: IndexMap<String, PathItem>,
    /// Reusable components.
    #[serde(default)]
    pub components: Components,
}

/// API metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Info {
    /// API title.
    #[serde(default)]
    pub title: String,
    /// API version.
    #[serde(default)]
    pub version: String,
}

/// Either an inline object or a `$ref` to a component.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefOr<T> {
    /// Reference to a component (e.g. `#/components/parameters/MinorVersion`).
    Ref {
        /// The reference string.
        #[serde(rename = "$ref")]
        reference: String,
    },
    /// Inline definition.
    Item(T),
}

/// A path item containing operations for a single path template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathItem {
    /// GET operation.
    #[serde(default)]
    pub get: Option<OperationObject>,
    /// PUT operation.
    #[serde(default)]
    pub put: Option<OperationObject>,
    /// POST operation.
    #[serde(default)]
    pub post: Option<OperationObject>,
    /// DELETE operation.
    #[serde(default)]
    pub delete: Option<OperationObject>,
    /// OPTIONS operation.
    #[serde(default)]
    pub options: Option<OperationObject>,
    /// HEAD operation.
    #[serde(default)]
    pub head: Option<OperationObject>,
    /// PATCH operation.
    #[serde(default)]
    pub patch: Option<OperationObject>,
    /// TRACE operation.
    #[serde(default)]
    pub trace: Option<OperationObject>,
    /// Parameters shared by every operation on this path.
    #[serde(default)]
    pub parameters: Vec<RefOr<ParameterObject>>,
}

impl PathItem {
    /// Iterate the operations defined on this path, in a fixed method order.
    pub fn operations(&self) -> impl Iterator<Item = (Method, &OperationObject)> {
        [
            (Method::GET, self.get.as_ref()),
            (Method::PUT, self.put.as_ref()),
            (Method::POST, self.post.as_ref()),
            (Method::DELETE, self.delete.as_ref()),
            (Method::OPTIONS, self.options.as_ref()),
            (Method::HEAD, self.head.as_ref()),
            (Method::PATCH, self.patch.as_ref()),
            (Method::TRACE, self.trace.as_ref()),
        ]
        .into_iter()
        .filter_map(|(method, op)| op.map(|op| (method, op)))
    }
}

/// An API operation as written in the document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationObject {
    /// Unique operation identifier.
    #[serde(default, rename = "operationId")]
    pub operation_id: Option<String>,
    /// Short summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Whether deprecated.
    #[serde(default)]
    pub deprecated: bool,
    /// Operation parameters.
    #[serde(default)]
    pub parameters: Vec<RefOr<ParameterObject>>,
    /// Request body.
    #[serde(default, rename = "requestBody")]
    pub request_body: Option<RefOr<RequestBodyObject>>,
    /// Responses keyed by status code, range (`2XX`) or `default`.
    #[serde(default)]
    pub responses: IndexMap<String, RefOr<ResponseObject>>,
}

/// Parameter location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    /// Query string parameter.
    Query,
    /// URL path parameter.
    Path,
    /// HTTP header.
    Header,
    /// Cookie.
    Cookie,
}

impl ParameterLocation {
    /// Prefix used in validation error paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Path => "path",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

/// An operation parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterObject {
    /// Parameter name.
    pub name: String,
    /// Parameter location.
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    /// Whether required.
    #[serde(default)]
    pub required: bool,
    /// Parameter schema.
    #[serde(default)]
    pub schema: Option<Schema>,
}

/// Request body definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBodyObject {
    /// Whether a body must be sent.
    #[serde(default)]
    pub required: bool,
    /// Accepted media types.
    #[serde(default)]
    pub content: IndexMap<String, MediaTypeObject>,
}

/// Response definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseObject {
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Content by media type.
    #[serde(default)]
    pub content: IndexMap<String, MediaTypeObject>,
}

/// Media type content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaTypeObject {
    /// Schema for this media type.
    #[serde(default)]
    pub schema: Option<Schema>,
    /// Single example value.
    #[serde(default)]
    pub example: Option<Value>,
    /// Named examples.
    #[serde(default)]
    pub examples: IndexMap<String, RefOr<ExampleObject>>,
}

/// A named example.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExampleObject {
    /// Short summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Literal example value.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Reusable components.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Components {
    /// Reusable schemas.
    #[serde(default)]
    pub schemas: IndexMap<String, Schema>,
    /// Reusable parameters.
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterObject>,
    /// Reusable request bodies.
    #[serde(default, rename = "requestBodies")]
    pub request_bodies: IndexMap<String, RequestBodyObject>,
    /// Reusable responses.
    #[serde(default)]
    pub responses: IndexMap<String, ResponseObject>,
    /// Reusable examples.
    #[serde(default)]
    pub examples: IndexMap<String, ExampleObject>,
}

/// JSON Schema primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// String type.
    String,
    /// Number type.
    Number,
    /// Integer type.
    Integer,
    /// Boolean type.
    Boolean,
    /// Array type.
    Array,
    /// Object type.
    Object,
    /// Null type.
    Null,
}

impl SchemaType {
    /// Name used in validation messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }

    /// Whether a JSON value is an instance of this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|n| n.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }
}

/// `type` keyword: a single type (3.0) or a list of types (3.1).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SchemaTypes {
    /// One type.
    Single(SchemaType),
    /// Several allowed types.
    Multiple(Vec<SchemaType>),
}

impl SchemaTypes {
    /// All allowed types.
    pub fn as_slice(&self) -> &[SchemaType] {
        match self {
            Self::Single(t) => std::slice::from_ref(t),
            Self::Multiple(types) => types,
        }
    }

    /// The first non-null type.
    pub fn primary(&self) -> Option<SchemaType> {
        self.as_slice().iter().copied().find(|t| *t != SchemaType::Null)
    }
}

/// `additionalProperties` keyword.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    /// `true` or `false`.
    Allowed(bool),
    /// Schema every extra property must satisfy.
    Schema(Box<Schema>),
}

/// JSON Schema subset used by OpenAPI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Schema {
    /// Reference to a component schema.
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
    /// Allowed type(s).
    #[serde(rename = "type")]
    pub schema_type: Option<SchemaTypes>,
    /// OpenAPI 3.0 nullability.
    pub nullable: bool,
    /// Format hint (e.g. "uuid", "date-time").
    pub format: Option<String>,
    /// Object properties.
    pub properties: IndexMap<String, Schema>,
    /// Required object properties.
    pub required: Vec<String>,
    /// Extra object properties policy.
    #[serde(rename = "additionalProperties")]
    pub additional_properties: Option<AdditionalProperties>,
    /// Array item schema.
    pub items: Option<Box<Schema>>,
    /// Allowed values.
    #[serde(rename = "enum")]
    pub enum_values: Vec<Value>,
    /// Schemas that must all hold.
    #[serde(rename = "allOf")]
    pub all_of: Vec<Schema>,
    /// Schemas of which exactly one must hold.
    #[serde(rename = "oneOf")]
    pub one_of: Vec<Schema>,
    /// Schemas of which at least one must hold.
    #[serde(rename = "anyOf")]
    pub any_of: Vec<Schema>,
    /// Inclusive numeric lower bound.
    pub minimum: Option<f64>,
    /// Inclusive numeric upper bound.
    pub maximum: Option<f64>,
    /// Minimum string length in characters.
    #[serde(rename = "minLength")]
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    #[serde(rename = "maxLength")]
    pub max_length: Option<usize>,
    /// Minimum array length.
    #[serde(rename = "minItems")]
    pub min_items: Option<usize>,
    /// Maximum array length.
    #[serde(rename = "maxItems")]
    pub max_items: Option<usize>,
    /// Regular expression strings must match.
    pub pattern: Option<String>,
    /// Example value.
    pub example: Option<Value>,
    /// Default value.
    pub default: Option<Value>,
}

impl Schema {
    /// Whether `null` is an accepted value.
    pub fn is_nullable(&self) -> bool {
        self.nullable
            || self
                .schema_type
                .as_ref()
                .is_some_and(|t| t.as_slice().contains(&SchemaType::Null))
    }

    /// The first non-null declared type.
    pub fn primary_type(&self) -> Option<SchemaType> {
        self.schema_type.as_ref().and_then(SchemaTypes::primary)
    }

    /// Visit this schema and every nested inline schema (not following `$ref`).
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Schema)) {
        visit(self);
        for property in self.properties.values() {
            property.walk(visit);
        }
        if let Some(items) = &self.items {
            items.walk(visit);
        }
        if let Some(AdditionalProperties::Schema(extra)) = &self.additional_properties {
            extra.walk(visit);
        }
        for nested in self.all_of.iter().chain(&self.one_of).chain(&self.any_of) {
            nested.walk(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_or_prefers_reference() {
        let param: RefOr<ParameterObject> =
            serde_json::from_str(r##"{"$ref": "#/components/parameters/MinorVersion"}"##).unwrap();
        assert!(matches!(param, RefOr::Ref { reference } if reference.ends_with("MinorVersion")));

        let param: RefOr<ParameterObject> =
            serde_json::from_str(r#"{"name": "id", "in": "path", "required": true}"#).unwrap();
        assert!(matches!(param, RefOr::Item(p) if p.name == "id" && p.location == ParameterLocation::Path));
    }

    #[test]
    fn test_schema_type_list() {
        let schema: Schema = serde_json::from_str(r#"{"type": ["string", "null"]}"#).unwrap();
        assert!(schema.is_nullable());
        assert_eq!(schema.primary_type(), Some(SchemaType::String));

        let schema: Schema = serde_json::from_str(r#"{"type": "integer", "nullable": true}"#).unwrap();
        assert!(schema.is_nullable());
        assert_eq!(schema.primary_type(), Some(SchemaType::Integer));
    }

    #[test]
    fn test_integer_matches_whole_floats() {
        assert!(SchemaType::Integer.matches(&serde_json::json!(3)));
        assert!(SchemaType::Integer.matches(&serde_json::json!(3.0)));
        assert!(!SchemaType::Integer.matches(&serde_json::json!(3.5)));
        assert!(!SchemaType::Integer.matches(&serde_json::json!("3")));
    }

    #[test]
    fn test_path_item_operations_order() {
        let item: PathItem = serde_json::from_str(
            r#"{"post": {"responses": {}}, "get": {"operationId": "read", "responses": {}}}"#,
        )
        .unwrap();
        let methods: Vec<Method> = item.operations().map(|(m, _)| m).collect();
        assert_eq!(methods, vec![Method::GET, Method::POST]);
    }

    #[test]
    fn test_walk_visits_nested_schemas() {
        let schema: Schema = serde_json::from_str(
            r#"{
                "type": "object",
                "properties": {
                    "Line": {"type": "array", "items": {"type": "object", "properties": {"Amount": {"type": "number"}}}}
                }
            }"#,
        )
        .unwrap();
        let mut count = 0;
        schema.walk(&mut |_| count += 1);
        assert_eq!(count, 4);
    }
}
