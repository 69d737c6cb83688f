//! Naming and type transform.
//!
//! Pure and deterministic: the same [`CanonicalSchema`] and rules always give
//! the same [`TransformedSchema`]. Output order follows input order.

pub mod naming;
pub mod types;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::schema::{CanonicalSchema, Entity, EntityKind, TypeRef};

pub use naming::{CaseConvention, NameExpression, NamingRule, NamingRuleSet, Role};
pub use types::{Dialect, TargetType, TypeMapper, ValueType};

/// Module names taken by the support artifacts.
pub const RESERVED_MODULES: [&str; 2] = ["mod", "sequences"];

/// Names the generated code itself declares or imports next to entity types:
/// the package root's `FieldInfo` and `SCHEMA_VERSION`, and the serde derives
/// every record file brings into scope.
pub const RESERVED_TYPES: [&str; 4] = ["FieldInfo", "SCHEMA_VERSION", "Serialize", "Deserialize"];

/// Rules for one transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformRules {
    pub naming: NamingRuleSet,
    pub types: TypeMapper,
}

impl TransformRules {
    pub fn new(naming: NamingRuleSet, types: TypeMapper) -> Self {
        Self { naming, types }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformedSchema {
    pub version: Option<String>,
    pub namespace: String,
    pub entities: Vec<TransformedEntity>,
    pub sequences: Vec<TransformedSequence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformedEntity {
    pub raw_name: String,
    pub kind: EntityKind,
    pub container_name: String,
    pub record_name: String,
    pub fields: Vec<TransformedField>,
    /// Primary-key columns, by raw name.
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
    pub variants: Vec<TransformedVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformedField {
    pub raw_name: String,
    pub ident: String,
    /// Raw type as declared, without nullability (`int4`, `[Item]`).
    pub raw_type: String,
    pub ty: TargetType,
}

/// An enum value, or a union member with its record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformedVariant {
    pub raw_name: String,
    pub ident: String,
    pub record: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformedSequence {
    pub raw_name: String,
    pub ident: String,
    pub data_type: String,
    pub system: bool,
}

/// Apply naming and type rules to every entity and sequence.
pub fn transform(
    schema: &CanonicalSchema,
    rules: &TransformRules,
) -> SchemaGenResult<TransformedSchema> {
    let records = name_entities(schema, &rules.naming)?;

    let mut entities = Vec::with_capacity(schema.entities.len());
    for entity in &schema.entities {
        let transformed = transform_entity(entity, rules, &records)?;
        debug!(
            entity = %entity.name,
            container = %transformed.container_name,
            record = %transformed.record_name,
            "transformed"
        );
        entities.push(transformed);
    }

    let mut sequences = Vec::with_capacity(schema.sequences.len());
    let mut seen = UniqueNames::new(&schema.namespace);
    for seq in &schema.sequences {
        let ident = naming::const_ident(&seq.name);
        seen.claim(&ident, &seq.name)?;
        sequences.push(TransformedSequence {
            raw_name: seq.name.clone(),
            ident,
            data_type: seq.data_type.clone(),
            system: seq.system,
        });
    }

    Ok(TransformedSchema {
        version: schema.version.clone(),
        namespace: schema.namespace.clone(),
        entities,
        sequences,
    })
}

/// Name both roles of every entity, rejecting collisions across the whole
/// schema. Returns raw name -> record name.
fn name_entities(
    schema: &CanonicalSchema,
    naming: &NamingRuleSet,
) -> SchemaGenResult<HashMap<String, String>> {
    let mut types = UniqueNames::new(&schema.namespace);
    let mut modules = UniqueNames::new(&schema.namespace);
    for reserved in RESERVED_MODULES {
        modules.claim(reserved, "<generated support module>")?;
    }
    for reserved in RESERVED_TYPES {
        types.claim(reserved, "<generated support item>")?;
    }
    let mut records = HashMap::new();

    for entity in &schema.entities {
        for role in [Role::Container, Role::Record] {
            let name = naming.name(&entity.name, role);
            types.claim(&name, &entity.name)?;
            modules.claim(&naming::module_name(&name), &entity.name)?;
            if role == Role::Record {
                records.insert(entity.name.clone(), name);
            }
        }
    }
    Ok(records)
}

fn transform_entity(
    entity: &Entity,
    rules: &TransformRules,
    records: &HashMap<String, String>,
) -> SchemaGenResult<TransformedEntity> {
    let container_name = rules.naming.name(&entity.name, Role::Container);
    let record_name = records
        .get(&entity.name)
        .cloned()
        .unwrap_or_else(|| rules.naming.name(&entity.name, Role::Record));

    let mut idents = UniqueNames::new(&entity.name);
    let mut fields = Vec::with_capacity(entity.fields.len());
    for field in &entity.fields {
        let ident = naming::field_ident(&field.name);
        idents.claim(&ident, &field.name)?;
        let location = format!("{}.{}", entity.name, field.name);
        fields.push(TransformedField {
            raw_name: field.name.clone(),
            ident,
            raw_type: raw_type_name(&field.ty),
            ty: map_type(&field.ty, rules, records, &location)?,
        });
    }

    let mut variant_idents = UniqueNames::new(&entity.name);
    let mut variants = Vec::with_capacity(entity.variants.len());
    for raw in &entity.variants {
        let ident = naming::variant_ident(raw);
        variant_idents.claim(&ident, raw)?;
        let record = match entity.kind {
            EntityKind::Union => Some(records.get(raw).cloned().ok_or_else(|| {
                SchemaGenError::UnsupportedType {
                    raw_type: raw.clone(),
                    location: format!("union {}", entity.name),
                }
            })?),
            _ => None,
        };
        variants.push(TransformedVariant {
            raw_name: raw.clone(),
            ident,
            record,
        });
    }

    Ok(TransformedEntity {
        raw_name: entity.name.clone(),
        kind: entity.kind,
        container_name,
        record_name,
        fields,
        primary_key: entity.primary_key.clone(),
        unique: entity.unique.clone(),
        variants,
    })
}

fn map_type(
    ty: &TypeRef,
    rules: &TransformRules,
    records: &HashMap<String, String>,
    location: &str,
) -> SchemaGenResult<TargetType> {
    let value = match ty {
        TypeRef::Scalar { name, .. } => rules.types.scalar(name, location)?,
        // References to excluded or unknown entities have nothing to point at.
        TypeRef::Entity { name, .. } => ValueType::Record(records.get(name).cloned().ok_or_else(
            || SchemaGenError::UnsupportedType {
                raw_type: name.clone(),
                location: location.to_string(),
            },
        )?),
        TypeRef::List { of, .. } => {
            ValueType::List(Box::new(map_type(of, rules, records, location)?))
        }
    };
    Ok(TargetType::new(value, ty.is_nullable()))
}

/// `int4`, `Item`, `[int4]`.
pub fn raw_type_name(ty: &TypeRef) -> String {
    match ty {
        TypeRef::Scalar { name, .. } | TypeRef::Entity { name, .. } => name.clone(),
        TypeRef::List { of, .. } => format!("[{}]", raw_type_name(of)),
    }
}

/// Tracks target identifiers within one scope.
struct UniqueNames<'a> {
    scope: &'a str,
    claimed: HashMap<String, String>,
}

impl<'a> UniqueNames<'a> {
    fn new(scope: &'a str) -> Self {
        Self {
            scope,
            claimed: HashMap::new(),
        }
    }

    fn claim(&mut self, target: &str, raw: &str) -> SchemaGenResult<()> {
        match self.claimed.get(target) {
            // The same raw name claims both roles' module paths; only a
            // different raw name is a collision.
            Some(first) if first != raw => Err(SchemaGenError::NameCollision {
                first: first.clone(),
                second: raw.to_string(),
                target: format!("{} in {}", target, self.scope),
            }),
            Some(_) => Ok(()),
            None => {
                self.claimed.insert(target.to_string(), raw.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Sequence};
    use pretty_assertions::assert_eq;

    fn users() -> CanonicalSchema {
        let mut users = Entity::new("users", EntityKind::Table)
            .field(Field::new("id", TypeRef::scalar("int4", false)))
            .field(Field::new("name", TypeRef::scalar("text", false)))
            .field(Field::new("tags", TypeRef::List {
                of: Box::new(TypeRef::scalar("text", true)),
                nullable: true,
            }));
        users.primary_key = vec!["id".to_string()];

        CanonicalSchema {
            version: Some("1".to_string()),
            namespace: "public".to_string(),
            entities: vec![users],
            sequences: vec![Sequence {
                name: "users_id_seq".to_string(),
                data_type: "integer".to_string(),
                system: true,
            }],
        }
    }

    fn relational() -> TransformRules {
        TransformRules::new(NamingRuleSet::relational(), TypeMapper::new(Dialect::Postgres))
    }

    #[test]
    fn test_users_table() {
        let out = transform(&users(), &relational()).unwrap();
        let users = &out.entities[0];

        assert_eq!(users.container_name, "Users_Table");
        assert_eq!(users.record_name, "Users_Record");
        let fields: Vec<String> = users
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.ident, f.ty))
            .collect();
        assert_eq!(
            fields,
            vec![
                "id: integer(non-null)",
                "name: string(non-null)",
                "tags: list<string(nullable)>(nullable)",
            ]
        );
        assert_eq!(users.primary_key, vec!["id"]);
        assert_eq!(out.sequences[0].ident, "USERS_ID_SEQ");
    }

    #[test]
    fn test_transform_is_idempotent() {
        let schema = users();
        let rules = relational();
        let first = transform(&schema, &rules).unwrap();
        let second = transform(&schema, &rules).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_unsupported_type_halts() {
        let mut schema = users();
        schema.entities[0]
            .fields
            .push(Field::new("search", TypeRef::scalar("tsvector", true)));

        let err = transform(&schema, &relational()).unwrap_err();
        assert!(matches!(
            err,
            SchemaGenError::UnsupportedType { ref raw_type, ref location }
                if raw_type == "tsvector" && location == "users.search"
        ));
    }

    #[test]
    fn test_reference_to_missing_entity_is_unsupported() {
        let schema = CanonicalSchema {
            namespace: "api".to_string(),
            entities: vec![Entity::new("Task", EntityKind::Object)
                .field(Field::new("owner", TypeRef::Entity {
                    name: "User".to_string(),
                    nullable: true,
                }))],
            ..Default::default()
        };
        let rules = TransformRules::new(NamingRuleSet::graphql(), TypeMapper::new(Dialect::GraphQl));

        let err = transform(&schema, &rules).unwrap_err();
        assert!(matches!(err, SchemaGenError::UnsupportedType { ref raw_type, .. } if raw_type == "User"));
    }

    #[test]
    fn test_entity_name_collision() {
        let schema = CanonicalSchema {
            namespace: "public".to_string(),
            entities: vec![
                Entity::new("order_items", EntityKind::Table),
                Entity::new("OrderItems", EntityKind::Table),
            ],
            ..Default::default()
        };

        let err = transform(&schema, &relational()).unwrap_err();
        assert!(matches!(err, SchemaGenError::NameCollision { .. }));
    }

    #[test]
    fn test_support_item_names_are_reserved() {
        let rules = TransformRules::new(NamingRuleSet::graphql(), TypeMapper::new(Dialect::GraphQl));
        for raw in ["FieldInfo", "Serialize", "Deserialize"] {
            let schema = CanonicalSchema {
                namespace: "api".to_string(),
                entities: vec![Entity::new(raw, EntityKind::Object)
                    .field(Field::new("id", TypeRef::scalar("ID", false)))],
                ..Default::default()
            };

            let err = transform(&schema, &rules).unwrap_err();
            assert!(
                matches!(err, SchemaGenError::NameCollision { ref second, .. } if second == raw),
                "{raw}: {err}"
            );
        }

        // Under the relational suffixes the same raw names are fine.
        let schema = CanonicalSchema {
            namespace: "public".to_string(),
            entities: vec![Entity::new("field_info", EntityKind::Table)],
            ..Default::default()
        };
        assert!(transform(&schema, &relational()).is_ok());
    }

    #[test]
    fn test_field_name_collision() {
        let schema = CanonicalSchema {
            namespace: "public".to_string(),
            entities: vec![Entity::new("t", EntityKind::Table)
                .field(Field::new("createdAt", TypeRef::scalar("date", true)))
                .field(Field::new("created_at", TypeRef::scalar("date", true)))],
            ..Default::default()
        };

        let err = transform(&schema, &relational()).unwrap_err();
        assert!(matches!(
            err,
            SchemaGenError::NameCollision { ref first, ref second, .. }
                if first == "createdAt" && second == "created_at"
        ));
    }

    #[test]
    fn test_union_members_resolve_to_records() {
        let mut union = Entity::new("SearchResult", EntityKind::Union);
        union.variants = vec!["Item".to_string(), "Trader".to_string()];
        let schema = CanonicalSchema {
            namespace: "api".to_string(),
            entities: vec![
                Entity::new("Item", EntityKind::Object),
                union,
                Entity::new("Trader", EntityKind::Object),
            ],
            ..Default::default()
        };
        let rules = TransformRules::new(NamingRuleSet::graphql(), TypeMapper::new(Dialect::GraphQl));

        let out = transform(&schema, &rules).unwrap();
        let variants = &out.entities[1].variants;
        assert_eq!(variants[0].ident, "Item");
        assert_eq!(variants[0].record.as_deref(), Some("Item"));
        assert_eq!(variants[1].record.as_deref(), Some("Trader"));
    }
}
