//! GraphQL resolution by introspection.
//!
//! The endpoint's full type system is fetched with the standard
//! introspection query, cached as JSON at a fixed path, and parsed into the
//! canonical schema. Objects, interfaces and input objects become entities
//! with fields; enums and unions become entities with variants. Scalars are
//! referenced, never emitted, and `__`-prefixed introspection types are
//! skipped.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::provision::RemoteEndpoint;
use crate::schema::{CanonicalSchema, Entity, EntityKind, Field, TypeRef};

/// The standard introspection query.
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
  }
}

fragment FullType on __Type {
  kind
  name
  fields(includeDeprecated: true) {
    name
    args { ...InputValue }
    type { ...TypeRef }
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) { name }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  type { ...TypeRef }
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType { kind name }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Debug, Deserialize)]
struct IntrospectionSchema {
    types: Vec<FullType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullType {
    kind: TypeKind,
    name: Option<String>,
    #[serde(default)]
    fields: Option<Vec<InputValue>>,
    #[serde(default)]
    input_fields: Option<Vec<InputValue>>,
    #[serde(default)]
    enum_values: Option<Vec<EnumValue>>,
    #[serde(default)]
    possible_types: Option<Vec<IntrospectionTypeRef>>,
}

/// Fields and input values share the `name` + `type` shape we need.
#[derive(Debug, Deserialize)]
struct InputValue {
    name: String,
    #[serde(rename = "type")]
    ty: IntrospectionTypeRef,
}

#[derive(Debug, Deserialize)]
struct EnumValue {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionTypeRef {
    kind: TypeKind,
    name: Option<String>,
    of_type: Option<Box<IntrospectionTypeRef>>,
}

/// Run the introspection query against the endpoint.
pub async fn fetch(remote: &RemoteEndpoint) -> SchemaGenResult<Value> {
    info!(endpoint = %remote.endpoint, "fetching schema by introspection");

    let mut request = remote.client.post(remote.endpoint.clone()).json(&serde_json::json!({
        "operationName": "IntrospectionQuery",
        "query": INTROSPECTION_QUERY,
    }));
    if let Some(token) = &remote.auth_token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| SchemaGenError::resolution(format!("introspection request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SchemaGenError::resolution(format!(
            "introspection request returned HTTP {}",
            status
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| SchemaGenError::resolution(format!("introspection response is not JSON: {}", e)))
}

/// Replace the cached document at `path`.
pub fn store_cache(path: &Path, document: &Value) -> SchemaGenResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(document)
        .map_err(|e| SchemaGenError::resolution(format!("failed to encode schema document: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;

    debug!(path = %path.display(), "cached schema document");
    Ok(())
}

/// Read a cached document.
pub fn read_cache(path: &Path) -> SchemaGenResult<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        SchemaGenError::resolution(format!(
            "failed to read cached schema document '{}': {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        SchemaGenError::resolution(format!(
            "cached schema document '{}' is not valid JSON: {}",
            path.display(),
            e
        ))
    })
}

/// Parse an introspection response (with or without the `data` envelope).
pub fn parse_document(document: &Value, namespace: &str) -> SchemaGenResult<CanonicalSchema> {
    if let Some(errors) = document.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            return Err(SchemaGenError::resolution(format!(
                "introspection returned errors: {}",
                messages.join("; ")
            )));
        }
    }

    let raw_schema = document
        .get("data")
        .unwrap_or(document)
        .get("__schema")
        .ok_or_else(|| SchemaGenError::resolution("document has no __schema"))?;

    let schema: IntrospectionSchema = serde_json::from_value(raw_schema.clone())
        .map_err(|e| SchemaGenError::resolution(format!("malformed introspection document: {}", e)))?;

    let digest = format!("{:x}", md5::compute(raw_schema.to_string().as_bytes()));

    let mut entities = Vec::new();
    for ty in &schema.types {
        let Some(name) = ty.name.as_deref() else {
            continue;
        };
        if name.starts_with("__") {
            continue;
        }
        if let Some(entity) = convert_type(name, ty)? {
            entities.push(entity);
        }
    }
    entities.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(CanonicalSchema {
        version: Some(digest[..12].to_string()),
        namespace: namespace.to_string(),
        entities,
        sequences: Vec::new(),
    })
}

fn convert_type(name: &str, ty: &FullType) -> SchemaGenResult<Option<Entity>> {
    let kind = match ty.kind {
        TypeKind::Object => EntityKind::Object,
        TypeKind::Interface => EntityKind::Interface,
        TypeKind::InputObject => EntityKind::InputObject,
        TypeKind::Enum => EntityKind::Enum,
        TypeKind::Union => EntityKind::Union,
        TypeKind::Scalar => return Ok(None),
        TypeKind::List | TypeKind::NonNull => {
            return Err(SchemaGenError::resolution(format!(
                "type '{}' has wrapper kind {:?}",
                name, ty.kind
            )));
        }
    };

    let mut entity = Entity::new(name, kind);

    let fields = match kind {
        EntityKind::InputObject => ty.input_fields.as_deref(),
        _ => ty.fields.as_deref(),
    };
    for field in fields.unwrap_or_default() {
        let field_ty = convert_ref(&field.ty, true).map_err(|reason| {
            SchemaGenError::resolution(format!("{}.{}: {}", name, field.name, reason))
        })?;
        entity.fields.push(Field::new(field.name.clone(), field_ty));
    }

    if let Some(values) = &ty.enum_values {
        entity.variants = values.iter().map(|v| v.name.clone()).collect();
    }
    if let Some(members) = &ty.possible_types {
        if kind == EntityKind::Union {
            entity.variants = members.iter().filter_map(|m| m.name.clone()).collect();
        }
    }

    Ok(Some(entity))
}

/// Unwrap `NON_NULL` / `LIST` wrappers into a type reference.
fn convert_ref(r: &IntrospectionTypeRef, nullable: bool) -> Result<TypeRef, String> {
    match r.kind {
        TypeKind::NonNull => {
            let inner = r.of_type.as_deref().ok_or("NON_NULL without ofType")?;
            convert_ref(inner, false)
        }
        TypeKind::List => {
            let inner = r.of_type.as_deref().ok_or("LIST without ofType")?;
            Ok(TypeRef::List {
                of: Box::new(convert_ref(inner, true)?),
                nullable,
            })
        }
        TypeKind::Scalar => Ok(TypeRef::Scalar {
            name: r.name.clone().ok_or("unnamed scalar")?,
            nullable,
        }),
        TypeKind::Object
        | TypeKind::Interface
        | TypeKind::Union
        | TypeKind::Enum
        | TypeKind::InputObject => Ok(TypeRef::Entity {
            name: r.name.clone().ok_or("unnamed type reference")?,
            nullable,
        }),
    }
}
