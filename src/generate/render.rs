//! Rust source templates.
//!
//! Every function here is a pure function of its input. Nothing
//! time- or environment-dependent is rendered.

use crate::schema::EntityKind;
use crate::transform::naming::module_name;
use crate::transform::{TargetType, TransformedEntity, TransformedSchema, ValueType};

const HEADER: &str = "// @generated by schemagen. Do not edit.\n";

/// Rendering switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RenderOptions {
    /// Emit `with_<field>(self, value) -> Self` builders on record structs.
    pub fluent_setters: bool,
}

/// The Rust type for a target type, as seen from inside the package.
pub fn rust_type(ty: &TargetType) -> String {
    let inner = match &ty.value {
        ValueType::Short => "i16".to_string(),
        ValueType::Integer => "i32".to_string(),
        ValueType::Long => "i64".to_string(),
        ValueType::Float => "f32".to_string(),
        ValueType::Double => "f64".to_string(),
        ValueType::Decimal => "rust_decimal::Decimal".to_string(),
        ValueType::Boolean => "bool".to_string(),
        ValueType::String | ValueType::Id => "String".to_string(),
        ValueType::Uuid => "uuid::Uuid".to_string(),
        ValueType::Date => "chrono::NaiveDate".to_string(),
        ValueType::Time => "chrono::NaiveTime".to_string(),
        ValueType::Timestamp => "chrono::NaiveDateTime".to_string(),
        ValueType::TimestampTz => "chrono::DateTime<chrono::Utc>".to_string(),
        ValueType::Json => "serde_json::Value".to_string(),
        ValueType::Bytes => "Vec<u8>".to_string(),
        ValueType::Custom(path) => path.clone(),
        // Records may be recursive; a direct reference needs indirection.
        ValueType::Record(name) => format!("Box<super::{}>", name),
        ValueType::List(of) => match &of.value {
            ValueType::Record(name) if !of.nullable => format!("Vec<super::{}>", name),
            ValueType::Record(name) => format!("Vec<Option<super::{}>>", name),
            _ => format!("Vec<{}>", rust_type(of)),
        },
    };
    if ty.nullable {
        format!("Option<{}>", inner)
    } else {
        inner
    }
}

/// The container: the entity's queryable shape as constants.
pub fn container(entity: &TransformedEntity, namespace: &str) -> String {
    let mut output = String::new();
    output.push_str(HEADER);
    output.push_str(&format!(
        "//! {} `{}` in `{}`.\n\n",
        capitalize(entity.kind.as_str()),
        entity.raw_name,
        namespace
    ));
    output.push_str("#![allow(non_camel_case_types)]\n\n");
    output.push_str("use super::FieldInfo;\n\n");

    output.push_str(&format!(
        "/// Shape of `{}`. Rows are [`super::{}`].\n",
        entity.raw_name, entity.record_name
    ));
    output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq)]\n");
    output.push_str(&format!("pub struct {};\n\n", entity.container_name));

    output.push_str(&format!("impl {} {{\n", entity.container_name));
    output.push_str(&format!("    pub const NAME: &'static str = {:?};\n", entity.raw_name));
    output.push_str(&format!(
        "    pub const KIND: &'static str = {:?};\n",
        entity.kind.as_str()
    ));

    output.push_str("    pub const FIELDS: &'static [FieldInfo] = &[\n");
    for field in &entity.fields {
        output.push_str(&format!(
            "        FieldInfo {{ name: {:?}, raw_type: {:?}, nullable: {} }},\n",
            field.raw_name, field.raw_type, field.ty.nullable
        ));
    }
    output.push_str("    ];\n");

    if matches!(entity.kind, EntityKind::Table | EntityKind::View) {
        output.push_str(&format!(
            "    pub const PRIMARY_KEY: &'static [&'static str] = &[{}];\n",
            string_list(&entity.primary_key)
        ));
        let unique: Vec<String> = entity
            .unique
            .iter()
            .map(|cols| format!("&[{}]", string_list(cols)))
            .collect();
        output.push_str(&format!(
            "    pub const UNIQUE: &'static [&'static [&'static str]] = &[{}];\n",
            unique.join(", ")
        ));
    }

    if matches!(entity.kind, EntityKind::Enum | EntityKind::Union) {
        let raw: Vec<String> = entity.variants.iter().map(|v| v.raw_name.clone()).collect();
        output.push_str(&format!(
            "    pub const VARIANTS: &'static [&'static str] = &[{}];\n",
            string_list(&raw)
        ));
    }

    output.push_str("\n    pub fn field(name: &str) -> Option<&'static FieldInfo> {\n");
    output.push_str("        Self::FIELDS.iter().find(|f| f.name == name)\n");
    output.push_str("    }\n");
    output.push_str("}\n");
    output
}

/// The record: a single row or instance.
pub fn record(entity: &TransformedEntity, options: &RenderOptions) -> String {
    let mut output = String::new();
    output.push_str(HEADER);
    output.push_str(&format!(
        "//! Record type for {} `{}`.\n\n",
        entity.kind.as_str(),
        entity.raw_name
    ));
    output.push_str("#![allow(non_camel_case_types)]\n\n");
    output.push_str("use serde::{Deserialize, Serialize};\n\n");

    match entity.kind {
        EntityKind::Enum => enum_record(&mut output, entity),
        EntityKind::Union => union_record(&mut output, entity),
        _ => struct_record(&mut output, entity, options),
    }
    output
}

fn struct_record(output: &mut String, entity: &TransformedEntity, options: &RenderOptions) {
    output.push_str(&format!("/// A single `{}`.\n", entity.raw_name));
    output.push_str("#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]\n");
    output.push_str(&format!("pub struct {} {{\n", entity.record_name));
    for field in &entity.fields {
        if unraw(&field.ident) != field.raw_name {
            output.push_str(&format!("    #[serde(rename = {:?})]\n", field.raw_name));
        }
        output.push_str(&format!("    pub {}: {},\n", field.ident, rust_type(&field.ty)));
    }
    output.push_str("}\n");

    if options.fluent_setters && !entity.fields.is_empty() {
        output.push_str(&format!("\nimpl {} {{\n", entity.record_name));
        for (i, field) in entity.fields.iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            output.push_str(&format!(
                "    pub fn with_{}(mut self, value: {}) -> Self {{\n",
                unraw(&field.ident),
                rust_type(&field.ty)
            ));
            output.push_str(&format!("        self.{} = value;\n", field.ident));
            output.push_str("        self\n");
            output.push_str("    }\n");
        }
        output.push_str("}\n");
    }
}

fn enum_record(output: &mut String, entity: &TransformedEntity) {
    output.push_str(&format!("/// Values of `{}`.\n", entity.raw_name));
    output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]\n");
    output.push_str(&format!("pub enum {} {{\n", entity.record_name));
    for variant in &entity.variants {
        if variant.ident != variant.raw_name {
            output.push_str(&format!("    #[serde(rename = {:?})]\n", variant.raw_name));
        }
        output.push_str(&format!("    {},\n", variant.ident));
    }
    output.push_str("}\n");
}

fn union_record(output: &mut String, entity: &TransformedEntity) {
    output.push_str(&format!(
        "/// Members of `{}`, tagged by `__typename`.\n",
        entity.raw_name
    ));
    output.push_str("#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]\n");
    output.push_str("#[serde(tag = \"__typename\")]\n");
    output.push_str(&format!("pub enum {} {{\n", entity.record_name));
    for variant in &entity.variants {
        if variant.ident != variant.raw_name {
            output.push_str(&format!("    #[serde(rename = {:?})]\n", variant.raw_name));
        }
        let record = variant.record.as_deref().unwrap_or(&variant.raw_name);
        output.push_str(&format!("    {}(super::{}),\n", variant.ident, record));
    }
    output.push_str("}\n");
}

/// The package root: module declarations, re-exports, version marker and
/// the shared `FieldInfo` type.
pub fn package_root(schema: &TransformedSchema) -> String {
    let mut modules: Vec<(String, String)> = Vec::new();
    for entity in &schema.entities {
        for name in [&entity.container_name, &entity.record_name] {
            modules.push((module_name(name), name.clone()));
        }
    }
    modules.sort();

    let mut output = String::new();
    output.push_str(HEADER);
    output.push_str(&format!("//! Bindings for `{}`.\n\n", schema.namespace));

    for (module, _) in &modules {
        output.push_str(&format!("pub mod {};\n", module));
    }
    if !schema.sequences.is_empty() {
        output.push_str("pub mod sequences;\n");
    }
    if !modules.is_empty() {
        output.push('\n');
    }
    for (module, name) in &modules {
        output.push_str(&format!("pub use {}::{};\n", module, name));
    }
    if !modules.is_empty() {
        output.push('\n');
    }

    output.push_str("/// Schema version these bindings were generated from.\n");
    match &schema.version {
        Some(version) => output.push_str(&format!(
            "pub const SCHEMA_VERSION: Option<&str> = Some({:?});\n\n",
            version
        )),
        None => output.push_str("pub const SCHEMA_VERSION: Option<&str> = None;\n\n"),
    }

    output.push_str("/// A field as declared in the source schema.\n");
    output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq)]\n");
    output.push_str("pub struct FieldInfo {\n");
    output.push_str("    pub name: &'static str,\n");
    output.push_str("    pub raw_type: &'static str,\n");
    output.push_str("    pub nullable: bool,\n");
    output.push_str("}\n");
    output
}

/// Sequence names as constants.
pub fn sequences(schema: &TransformedSchema) -> String {
    let mut output = String::new();
    output.push_str(HEADER);
    output.push_str(&format!("//! Sequences in `{}`.\n", schema.namespace));
    for seq in &schema.sequences {
        let owner = if seq.system { ", owned by a column" } else { "" };
        output.push_str(&format!("\n/// `{}` ({}{}).\n", seq.raw_name, seq.data_type, owner));
        output.push_str(&format!("pub const {}: &str = {:?};\n", seq.ident, seq.raw_name));
    }
    output
}

fn string_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("{:?}", s))
        .collect::<Vec<_>>()
        .join(", ")
}

fn unraw(ident: &str) -> &str {
    ident.strip_prefix("r#").unwrap_or(ident)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{TransformedField, TransformedVariant};
    use pretty_assertions::assert_eq;

    fn field(raw: &str, ident: &str, raw_type: &str, value: ValueType, nullable: bool) -> TransformedField {
        TransformedField {
            raw_name: raw.to_string(),
            ident: ident.to_string(),
            raw_type: raw_type.to_string(),
            ty: TargetType::new(value, nullable),
        }
    }

    fn users() -> TransformedEntity {
        TransformedEntity {
            raw_name: "users".to_string(),
            kind: EntityKind::Table,
            container_name: "Users_Table".to_string(),
            record_name: "Users_Record".to_string(),
            fields: vec![
                field("id", "id", "int4", ValueType::Integer, false),
                field("type", "r#type", "text", ValueType::String, true),
            ],
            primary_key: vec!["id".to_string()],
            unique: vec![],
            variants: vec![],
        }
    }

    #[test]
    fn test_rust_types() {
        let nullable_list = TargetType::new(
            ValueType::List(Box::new(TargetType::new(ValueType::Integer, true))),
            true,
        );
        assert_eq!(rust_type(&nullable_list), "Option<Vec<Option<i32>>>");

        let items = TargetType::new(
            ValueType::List(Box::new(TargetType::new(ValueType::Record("Item".into()), false))),
            false,
        );
        assert_eq!(rust_type(&items), "Vec<super::Item>");

        let parent = TargetType::new(ValueType::Record("Item".into()), true);
        assert_eq!(rust_type(&parent), "Option<Box<super::Item>>");
    }

    #[test]
    fn test_record_struct() {
        let out = record(&users(), &RenderOptions { fluent_setters: true });

        assert!(out.contains("pub struct Users_Record {\n    pub id: i32,\n"));
        assert!(out.contains("    #[serde(rename = \"type\")]\n    pub r#type: Option<String>,\n"));
        assert!(out.contains("pub fn with_type(mut self, value: Option<String>) -> Self {"));
        assert!(out.contains("self.r#type = value;"));
    }

    #[test]
    fn test_container_constants() {
        let out = container(&users(), "public");

        assert!(out.contains("pub struct Users_Table;"));
        assert!(out.contains("pub const NAME: &'static str = \"users\";"));
        assert!(out.contains("FieldInfo { name: \"id\", raw_type: \"int4\", nullable: false },"));
        assert!(out.contains("pub const PRIMARY_KEY: &'static [&'static str] = &[\"id\"];"));
        assert!(!out.contains("VARIANTS"));
    }

    #[test]
    fn test_enum_record_renames_values() {
        let entity = TransformedEntity {
            raw_name: "ItemType".to_string(),
            kind: EntityKind::Enum,
            container_name: "ItemType_Fields".to_string(),
            record_name: "ItemType".to_string(),
            fields: vec![],
            primary_key: vec![],
            unique: vec![],
            variants: vec![TransformedVariant {
                raw_name: "AMMO".to_string(),
                ident: "Ammo".to_string(),
                record: None,
            }],
        };

        let out = record(&entity, &RenderOptions::default());
        assert!(out.contains("    #[serde(rename = \"AMMO\")]\n    Ammo,\n"));
    }

    #[test]
    fn test_package_root_lists_modules_in_order() {
        let schema = TransformedSchema {
            version: Some("2".to_string()),
            namespace: "public".to_string(),
            entities: vec![users()],
            sequences: vec![],
        };

        let out = package_root(&schema);
        let expected = "pub mod users_record;\npub mod users_table;\n\n\
                        pub use users_record::Users_Record;\npub use users_table::Users_Table;\n";
        assert!(out.contains(expected));
        assert!(out.contains("pub const SCHEMA_VERSION: Option<&str> = Some(\"2\");"));
        assert!(!out.contains("pub mod sequences;"));
    }
}
