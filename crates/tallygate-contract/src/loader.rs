//! Contract loading and reference resolution.
//!
//! The loader turns an OpenAPI document into a [`LoadedContract`]: a flat,
//! immutable list of operations with every component reference on
//! parameters, request bodies, responses and examples already followed.
//! Anything that cannot be resolved is reported at load time so that a bad
//! contract stops the gateway before it accepts connections.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{ContractError, ContractResult};
use crate::openapi::{
    Components, MediaTypeObject, OpenApiDocument, OperationObject, ParameterObject, RefOr, Schema,
};
use crate::operation::{MediaTypeSpec, Operation, ParameterSpec, RequestBodySpec, ResponseSpec, ResponseStatus};

/// A loaded contract ready for runtime use.
#[derive(Debug, Clone)]
pub struct LoadedContract {
    /// API title.
    pub title: String,
    /// API version.
    pub version: String,
    /// OpenAPI version of the source document.
    pub openapi: String,
    /// All operations in document order.
    pub operations: Vec<Operation>,
    /// Component schemas, the targets of schema `$ref`s.
    pub schemas: IndexMap<String, Schema>,
}

impl LoadedContract {
    /// Find an operation by identifier.
    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Every schema reachable inline from the contract, with a label for
    /// error messages. Referenced component schemas are listed once under
    /// their component name.
    pub fn schemas_with_context(&self) -> Vec<(String, &Schema)> {
        let mut out: Vec<(String, &Schema)> = self
            .schemas
            .iter()
            .map(|(name, schema)| (format!("component schema '{name}'"), schema))
            .collect();

        for op in &self.operations {
            for param in &op.parameters {
                if let Some(schema) = &param.schema {
                    out.push((format!("parameter '{}' of '{}'", param.name, op.id), schema));
                }
            }
            if let Some(body) = &op.request_body {
                for (media, spec) in &body.content {
                    if let Some(schema) = &spec.schema {
                        out.push((format!("request body '{media}' of '{}'", op.id), schema));
                    }
                }
            }
            for response in &op.responses {
                for (media, spec) in &response.content {
                    if let Some(schema) = &spec.schema {
                        out.push((format!("response '{media}' of '{}'", op.id), schema));
                    }
                }
            }
        }
        out
    }
}

/// Loads contracts from files or strings.
pub struct ContractLoader;

impl ContractLoader {
    /// Load a contract from a file.
    ///
    /// `.json` files are parsed as JSON, `.yaml`/`.yml` as YAML; any other
    /// extension is tried as JSON first and then as YAML.
    pub async fn from_file(path: impl AsRef<Path>) -> ContractResult<LoadedContract> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading contract from file");

        let content = fs::read_to_string(path).await.map_err(|source| ContractError::Read {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml" | "yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content).or_else(|json_err| {
                Self::from_yaml(&content).map_err(|yaml_err| {
                    ContractError::Parse(format!("not JSON ({json_err}) nor YAML ({yaml_err})"))
                })
            }),
        }
    }

    /// Load a contract from a JSON string.
    pub fn from_json(json: &str) -> ContractResult<LoadedContract> {
        let document: OpenApiDocument = serde_json::from_str(json)
            .map_err(|e| ContractError::Parse(format!("invalid JSON: {e}")))?;
        Self::from_document(document)
    }

    /// Load a contract from a YAML string.
    pub fn from_yaml(yaml: &str) -> ContractResult<LoadedContract> {
        let document: OpenApiDocument = serde_yaml::from_str(yaml)
            .map_err(|e| ContractError::Parse(format!("invalid YAML: {e}")))?;
        Self::from_document(document)
    }

    /// Convert a parsed document into a [`LoadedContract`].
    pub fn from_document(document: OpenApiDocument) -> ContractResult<LoadedContract> {
        if !document.openapi.trim().starts_with("3.") {
            return Err(ContractError::UnsupportedVersion(document.openapi));
        }

        let components = &document.components;
        let mut operations = Vec::new();
        let mut seen_ids = HashSet::new();

        for (template, item) in &document.paths {
            check_template(template)?;

            let shared = item
                .parameters
                .iter()
                .map(|p| resolve_parameter(p, components, template))
                .collect::<ContractResult<Vec<_>>>()?;

            for (method, op) in item.operations() {
                let id = op
                    .operation_id
                    .clone()
                    .unwrap_or_else(|| format!("{method} {template}"));

                if !seen_ids.insert(id.clone()) {
                    return Err(ContractError::DuplicateOperation(id));
                }

                operations.push(convert_operation(id, method, template, op, &shared, components)?);
            }
        }

        let contract = LoadedContract {
            title: document.info.title,
            version: document.info.version,
            openapi: document.openapi,
            operations,
            schemas: document.components.schemas,
        };

        check_schema_refs(&contract)?;

        debug!(
            title = %contract.title,
            version = %contract.version,
            operations = contract.operations.len(),
            schemas = contract.schemas.len(),
            "contract loaded successfully"
        );

        Ok(contract)
    }
}

fn convert_operation(
    id: String,
    method: http::Method,
    template: &str,
    op: &OperationObject,
    shared: &[ParameterSpec],
    components: &Components,
) -> ContractResult<Operation> {
    let mut parameters: Vec<ParameterSpec> = shared.to_vec();
    for param in &op.parameters {
        let param = resolve_parameter(param, components, &id)?;
        // Operation-level parameters override path-level ones with the same name and location.
        parameters.retain(|p| !(p.name == param.name && p.location == param.location));
        parameters.push(param);
    }

    let request_body = match &op.request_body {
        Some(body) => {
            let body = resolve(body, "requestBodies", &components.request_bodies, &id)?;
            Some(RequestBodySpec {
                required: body.required,
                content: convert_content(&body.content, components, &id)?,
            })
        }
        None => None,
    };

    let mut responses = Vec::with_capacity(op.responses.len());
    for (key, response) in &op.responses {
        let status = ResponseStatus::parse(key).ok_or_else(|| ContractError::InvalidResponseStatus {
            operation_id: id.clone(),
            status: key.clone(),
        })?;
        let response = resolve(response, "responses", &components.responses, &id)?;
        responses.push(ResponseSpec {
            status,
            description: response.description.clone(),
            content: convert_content(&response.content, components, &id)?,
        });
    }

    Ok(Operation {
        id,
        method,
        path: template.to_string(),
        summary: op.summary.clone(),
        deprecated: op.deprecated,
        parameters,
        request_body,
        responses,
    })
}

fn resolve_parameter(
    param: &RefOr<ParameterObject>,
    components: &Components,
    context: &str,
) -> ContractResult<ParameterSpec> {
    let param = resolve(param, "parameters", &components.parameters, context)?;
    Ok(ParameterSpec {
        name: param.name.clone(),
        location: param.location,
        required: param.required,
        schema: param.schema.clone(),
    })
}

fn convert_content(
    content: &IndexMap<String, MediaTypeObject>,
    components: &Components,
    context: &str,
) -> ContractResult<IndexMap<String, MediaTypeSpec>> {
    content
        .iter()
        .map(|(media, object)| {
            let examples = object
                .examples
                .iter()
                .filter_map(|(name, example)| {
                    match resolve(example, "examples", &components.examples, context) {
                        Ok(example) => example.value.clone().map(|value| Ok((name.clone(), value))),
                        Err(e) => Some(Err(e)),
                    }
                })
                .collect::<ContractResult<Vec<_>>>()?;

            Ok((
                media.clone(),
                MediaTypeSpec {
                    schema: object.schema.clone(),
                    example: object.example.clone(),
                    examples,
                },
            ))
        })
        .collect()
}

/// Follow a `#/components/<section>/<name>` reference.
fn resolve<'a, T>(
    item: &'a RefOr<T>,
    section: &str,
    table: &'a IndexMap<String, T>,
    context: &str,
) -> ContractResult<&'a T> {
    match item {
        RefOr::Item(item) => Ok(item),
        RefOr::Ref { reference } => component_name(reference, section)
            .and_then(|name| table.get(&name))
            .ok_or_else(|| ContractError::unresolved(reference, format!("'{context}'"))),
    }
}

/// Extract the component name from a local reference, unescaping JSON
/// pointer sequences.
pub(crate) fn component_name(reference: &str, section: &str) -> Option<String> {
    let name = reference
        .strip_prefix("#/components/")?
        .strip_prefix(section)?
        .strip_prefix('/')?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name.replace("~1", "/").replace("~0", "~"))
}

fn check_template(template: &str) -> ContractResult<()> {
    if !template.starts_with('/') {
        return Err(ContractError::invalid_template(template, "must start with '/'"));
    }

    let mut names = HashSet::new();
    let mut open: Option<usize> = None;
    for (i, c) in template.char_indices() {
        match (c, open) {
            ('{', None) => open = Some(i),
            ('}', Some(start)) => {
                let name = &template[start + 1..i];
                if name.is_empty() {
                    return Err(ContractError::invalid_template(template, "empty parameter name"));
                }
                if !names.insert(name) {
                    return Err(ContractError::invalid_template(
                        template,
                        format!("parameter '{name}' appears twice"),
                    ));
                }
                open = None;
            }
            ('{', Some(_)) | ('}', None) => {
                return Err(ContractError::invalid_template(template, "unbalanced braces"));
            }
            ('/', Some(_)) => {
                return Err(ContractError::invalid_template(
                    template,
                    "parameter spans a path separator",
                ));
            }
            _ => {}
        }
    }
    if open.is_some() {
        return Err(ContractError::invalid_template(template, "unbalanced braces"));
    }
    Ok(())
}

fn check_schema_refs(contract: &LoadedContract) -> ContractResult<()> {
    for (context, schema) in contract.schemas_with_context() {
        let mut missing = None;
        schema.walk(&mut |nested| {
            if missing.is_some() {
                return;
            }
            if let Some(reference) = &nested.reference {
                let found = component_name(reference, "schemas")
                    .is_some_and(|name| contract.schemas.contains_key(&name));
                if !found {
                    missing = Some(reference.clone());
                }
            }
        });
        if let Some(reference) = missing {
            return Err(ContractError::unresolved(reference, context));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::ParameterLocation;

    const CONTRACT: &str = r##"{
        "openapi": "3.0.1",
        "info": {"title": "Accounting", "version": "3"},
        "paths": {
            "/v3/company/{realmId}/customer": {
                "parameters": [{"$ref": "#/components/parameters/RealmId"}],
                "get": {
                    "operationId": "listCustomers",
                    "parameters": [
                        {"name": "minorversion", "in": "query", "required": true, "schema": {"type": "integer"}}
                    ],
                    "responses": {
                        "200": {"$ref": "#/components/responses/CustomerList"},
                        "default": {"description": "error"}
                    }
                },
                "post": {
                    "requestBody": {"$ref": "#/components/requestBodies/Customer"},
                    "responses": {"2XX": {"description": "created"}}
                }
            }
        },
        "components": {
            "parameters": {
                "RealmId": {"name": "realmId", "in": "path", "required": true, "schema": {"type": "string"}}
            },
            "requestBodies": {
                "Customer": {
                    "required": true,
                    "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Customer"}}}
                }
            },
            "responses": {
                "CustomerList": {
                    "description": "ok",
                    "content": {
                        "application/json": {
                            "examples": {"empty": {"$ref": "#/components/examples/Empty"}}
                        }
                    }
                }
            },
            "examples": {"Empty": {"value": {"Customer": []}}},
            "schemas": {
                "Customer": {"type": "object", "required": ["DisplayName"], "properties": {"DisplayName": {"type": "string"}}}
            }
        }
    }"##;

    #[test]
    fn test_load_resolves_component_references() {
        let contract = ContractLoader::from_json(CONTRACT).unwrap();
        assert_eq!(contract.title, "Accounting");
        assert_eq!(contract.operations.len(), 2);

        let list = contract.operation("listCustomers").unwrap();
        assert_eq!(list.method, http::Method::GET);
        assert_eq!(list.parameters.len(), 2);
        assert!(list
            .parameters_in(ParameterLocation::Path)
            .any(|p| p.name == "realmId" && p.required));

        let ok = &list.responses[0];
        assert_eq!(ok.status, ResponseStatus::Code(200));
        let media = &ok.content["application/json"];
        assert_eq!(media.examples[0].0, "empty");
        assert_eq!(media.examples[0].1, serde_json::json!({"Customer": []}));
        assert_eq!(list.responses[1].status, ResponseStatus::Default);
    }

    #[test]
    fn test_missing_operation_id_is_derived() {
        let contract = ContractLoader::from_json(CONTRACT).unwrap();
        let create = contract.operation("POST /v3/company/{realmId}/customer").unwrap();
        assert!(create.request_body.as_ref().unwrap().required);
        assert_eq!(create.responses[0].status, ResponseStatus::Range(2));
    }

    #[test]
    fn test_unresolved_parameter_reference_fails() {
        let doc = CONTRACT.replace("#/components/parameters/RealmId", "#/components/parameters/Nope");
        let err = ContractLoader::from_json(&doc).unwrap_err();
        assert!(matches!(err, ContractError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_unresolved_schema_reference_fails() {
        let doc = CONTRACT.replace("#/components/schemas/Customer", "#/components/schemas/Client");
        let err = ContractLoader::from_json(&doc).unwrap_err();
        assert!(err.to_string().contains("#/components/schemas/Client"));
    }

    #[test]
    fn test_unsupported_version_fails() {
        let err = ContractLoader::from_json(r#"{"swagger": "2.0", "openapi": "2.0", "paths": {}}"#).unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedVersion(v) if v == "2.0"));
    }

    #[test]
    fn test_malformed_json_fails() {
        let err = ContractLoader::from_json("{not json").unwrap_err();
        assert!(matches!(err, ContractError::Parse(_)));
    }

    #[test]
    fn test_invalid_response_status_fails() {
        let doc = r#"{"openapi": "3.1.0", "paths": {"/a": {"get": {"responses": {"ok": {"description": "x"}}}}}}"#;
        let err = ContractLoader::from_json(doc).unwrap_err();
        assert!(matches!(err, ContractError::InvalidResponseStatus { .. }));
    }

    #[test]
    fn test_duplicate_operation_id_fails() {
        let doc = r#"{"openapi": "3.0.0", "paths": {
            "/a": {"get": {"operationId": "same", "responses": {}}},
            "/b": {"get": {"operationId": "same", "responses": {}}}
        }}"#;
        let err = ContractLoader::from_json(doc).unwrap_err();
        assert!(matches!(err, ContractError::DuplicateOperation(id) if id == "same"));
    }

    #[test]
    fn test_check_template() {
        assert!(check_template("/v3/company/{realmId}/invoice/{id}.pdf").is_ok());
        assert!(check_template("v3/company").is_err());
        assert!(check_template("/v3/{id").is_err());
        assert!(check_template("/v3/id}").is_err());
        assert!(check_template("/v3/{}").is_err());
        assert!(check_template("/v3/{id}/{id}").is_err());
        assert!(check_template("/v3/{a/b}").is_err());
    }

    #[test]
    fn test_component_name_unescapes_pointer() {
        assert_eq!(
            component_name("#/components/schemas/a~1b", "schemas"),
            Some("a/b".to_string())
        );
        assert_eq!(component_name("#/components/schemas/Customer", "parameters"), None);
        assert_eq!(component_name("other.json#/Customer", "schemas"), None);
    }

    #[test]
    fn test_yaml_contract() {
        let yaml = r"
openapi: 3.0.3
info:
  title: Accounting
  version: '3'
paths:
  /v3/company/{realmId}/customer:
    get:
      operationId: listCustomers
      responses:
        '200':
          description: ok
          content:
            application/json:
              example:
                Customer: []
";
        let contract = ContractLoader::from_yaml(yaml).unwrap();
        let op = contract.operation("listCustomers").unwrap();
        assert_eq!(
            op.responses[0].content["application/json"].example,
            Some(serde_json::json!({"Customer": []}))
        );
    }

    #[tokio::test]
    async fn test_from_file_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.json");
        std::fs::write(&path, CONTRACT).unwrap();
        let contract = ContractLoader::from_file(&path).await.unwrap();
        assert_eq!(contract.operations.len(), 2);

        let missing = ContractLoader::from_file(dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(ContractError::Read { .. })));
    }
}
