//! Raw type -> target value type mapping.
//!
//! The mapping is fail-fast: a raw type that neither the forced-type table
//! nor the built-in table covers is an [`SchemaGenError::UnsupportedType`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{SchemaGenError, SchemaGenResult};

/// Which built-in table to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    GraphQl,
}

/// A target value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum ValueType {
    Short,
    Integer,
    Long,
    Float,
    Double,
    Decimal,
    Boolean,
    String,
    /// GraphQL `ID`.
    Id,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Bytes,
    /// A forced Rust type path.
    Custom(String),
    /// A generated record type, by its target name.
    Record(String),
    List(Box<TargetType>),
}

impl ValueType {
    /// Built-in value types by their display name, for forced-type values
    /// that name one (`tsvector = "string"`).
    fn builtin(name: &str) -> Option<Self> {
        let ty = match name {
            "short" => ValueType::Short,
            "integer" => ValueType::Integer,
            "long" => ValueType::Long,
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            "decimal" => ValueType::Decimal,
            "boolean" => ValueType::Boolean,
            "string" => ValueType::String,
            "id" => ValueType::Id,
            "uuid" => ValueType::Uuid,
            "date" => ValueType::Date,
            "time" => ValueType::Time,
            "timestamp" => ValueType::Timestamp,
            "timestamptz" => ValueType::TimestampTz,
            "json" => ValueType::Json,
            "bytes" => ValueType::Bytes,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Short => f.write_str("short"),
            ValueType::Integer => f.write_str("integer"),
            ValueType::Long => f.write_str("long"),
            ValueType::Float => f.write_str("float"),
            ValueType::Double => f.write_str("double"),
            ValueType::Decimal => f.write_str("decimal"),
            ValueType::Boolean => f.write_str("boolean"),
            ValueType::String => f.write_str("string"),
            ValueType::Id => f.write_str("id"),
            ValueType::Uuid => f.write_str("uuid"),
            ValueType::Date => f.write_str("date"),
            ValueType::Time => f.write_str("time"),
            ValueType::Timestamp => f.write_str("timestamp"),
            ValueType::TimestampTz => f.write_str("timestamptz"),
            ValueType::Json => f.write_str("json"),
            ValueType::Bytes => f.write_str("bytes"),
            ValueType::Custom(path) => write!(f, "custom<{}>", path),
            ValueType::Record(name) => write!(f, "record<{}>", name),
            ValueType::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

/// A value type plus nullability. Displays as `integer(non-null)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetType {
    pub value: ValueType,
    pub nullable: bool,
}

impl TargetType {
    pub fn new(value: ValueType, nullable: bool) -> Self {
        Self { value, nullable }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nullability = if self.nullable { "nullable" } else { "non-null" };
        write!(f, "{}({})", self.value, nullability)
    }
}

/// Maps raw scalar names for one dialect, forced types first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMapper {
    dialect: Dialect,
    forced: BTreeMap<String, String>,
}

impl TypeMapper {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            forced: BTreeMap::new(),
        }
    }

    /// Force `raw` to map to `target`: a built-in value type name or a Rust
    /// type path.
    pub fn with_forced(mut self, raw: impl Into<String>, target: impl Into<String>) -> Self {
        self.forced.insert(raw.into(), target.into());
        self
    }

    pub fn with_forced_types(mut self, forced: &BTreeMap<String, String>) -> Self {
        self.forced
            .extend(forced.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Map a raw scalar type. `location` names the field for error messages.
    pub fn scalar(&self, raw: &str, location: &str) -> SchemaGenResult<ValueType> {
        if let Some(target) = self.forced.get(raw) {
            return Ok(ValueType::builtin(target)
                .unwrap_or_else(|| ValueType::Custom(target.clone())));
        }

        let builtin = match self.dialect {
            Dialect::Postgres => postgres_type(raw),
            Dialect::GraphQl => graphql_type(raw),
        };
        builtin.ok_or_else(|| SchemaGenError::UnsupportedType {
            raw_type: raw.to_string(),
            location: location.to_string(),
        })
    }
}

fn postgres_type(udt_name: &str) -> Option<ValueType> {
    let ty = match udt_name {
        "int2" => ValueType::Short,
        "int4" => ValueType::Integer,
        "int8" => ValueType::Long,
        "float4" => ValueType::Float,
        "float8" => ValueType::Double,
        "numeric" => ValueType::Decimal,
        "bool" => ValueType::Boolean,
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => ValueType::String,
        "uuid" => ValueType::Uuid,
        "date" => ValueType::Date,
        "time" => ValueType::Time,
        "timestamp" => ValueType::Timestamp,
        "timestamptz" => ValueType::TimestampTz,
        "json" | "jsonb" => ValueType::Json,
        "bytea" => ValueType::Bytes,
        _ => return None,
    };
    Some(ty)
}

fn graphql_type(name: &str) -> Option<ValueType> {
    let ty = match name {
        "Int" => ValueType::Integer,
        "Float" => ValueType::Double,
        "String" => ValueType::String,
        "Boolean" => ValueType::Boolean,
        "ID" => ValueType::Id,
        _ => return None,
    };
    Some(ty)
}
