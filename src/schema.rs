//! Canonical schema: the source-agnostic description shared by both
//! pipelines.
//!
//! The relational resolver and the GraphQL resolver both produce a
//! [`CanonicalSchema`]; the transform engine only ever sees this shape.

use serde::{Deserialize, Serialize};

/// A resolved schema snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    /// Version marker of the source (latest migration, or a document digest).
    pub version: Option<String>,
    /// Namespace the entities were read from (`public`, or the endpoint).
    pub namespace: String,
    pub entities: Vec<Entity>,
    /// Sequences, when requested. Relational sources only.
    #[serde(default)]
    pub sequences: Vec<Sequence>,
}

/// What an entity was in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Table,
    View,
    Object,
    Interface,
    InputObject,
    Enum,
    Union,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Table => "table",
            EntityKind::View => "view",
            EntityKind::Object => "object",
            EntityKind::Interface => "interface",
            EntityKind::InputObject => "input object",
            EntityKind::Enum => "enum",
            EntityKind::Union => "union",
        }
    }
}

/// A named entity: a table, view, or GraphQL type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub fields: Vec<Field>,
    /// Primary-key column names, in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Unique constraints, each a list of column names.
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    /// Enum values or union members.
    #[serde(default)]
    pub variants: Vec<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            variants: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A field type as the source declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeRef {
    /// A raw scalar type name (`int4`, `text`, `String`, `Int`, ...).
    Scalar { name: String, nullable: bool },
    /// A reference to another entity in the same schema.
    Entity { name: String, nullable: bool },
    /// A list of another type.
    List { of: Box<TypeRef>, nullable: bool },
}

impl TypeRef {
    pub fn scalar(name: impl Into<String>, nullable: bool) -> Self {
        TypeRef::Scalar {
            name: name.into(),
            nullable,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            TypeRef::Scalar { nullable, .. }
            | TypeRef::Entity { nullable, .. }
            | TypeRef::List { nullable, .. } => *nullable,
        }
    }
}

/// A database sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub data_type: String,
    /// Owned by a column (serial / identity).
    pub system: bool,
}
