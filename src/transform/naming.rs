//! Naming rules: case conventions plus `$0`-style name expressions.
//!
//! An expression is identifier text (`[A-Za-z0-9_]`) around the single
//! placeholder `$0`, which expands to the case-converted base name. The
//! rendered name is therefore always a Rust identifier.
//!
//! With the pascal convention, `orders` becomes `Orders_Table` under
//! `$0_Table` and `Orders_Record` under `$0_Record`.

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};

use crate::error::{SchemaGenError, SchemaGenResult};

/// Case convention applied to the raw identifier before substitution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseConvention {
    #[default]
    Pascal,
    Camel,
    Snake,
    UpperSnake,
    /// Keep the raw identifier as is.
    AsIs,
}

impl CaseConvention {
    pub fn apply(&self, raw: &str) -> String {
        let converted = match self {
            CaseConvention::Pascal => raw.to_case(Case::Pascal),
            CaseConvention::Camel => raw.to_case(Case::Camel),
            CaseConvention::Snake => raw.to_case(Case::Snake),
            CaseConvention::UpperSnake => raw.to_case(Case::UpperSnake),
            CaseConvention::AsIs => raw.to_string(),
        };
        sanitize_identifier(&converted)
    }
}

/// The two generated-type roles of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The entity's queryable shape.
    Container,
    /// A single row / instance.
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Base,
}

/// A parsed name expression such as `$0_Table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct NameExpression {
    source: String,
    #[serde(skip)]
    parts: Vec<Part>,
}

impl NameExpression {
    pub fn parse(source: &str) -> SchemaGenResult<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut has_base = false;
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            if c != '$' {
                if !(c.is_ascii_alphanumeric() || c == '_') {
                    return Err(SchemaGenError::Config(format!(
                        "Name expression '{}': '{}' cannot appear in a type name",
                        source, c
                    )));
                }
                if parts.is_empty() && literal.is_empty() && c.is_ascii_digit() {
                    return Err(SchemaGenError::Config(format!(
                        "Name expression '{}' cannot start with a digit",
                        source
                    )));
                }
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('0') => {
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Base);
                    has_base = true;
                }
                other => {
                    return Err(SchemaGenError::Config(format!(
                        "Name expression '{}': unknown placeholder '${}' (expected $0)",
                        source,
                        other.map(String::from).unwrap_or_default()
                    )));
                }
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        if !has_base {
            return Err(SchemaGenError::Config(format!(
                "Name expression '{}' must contain $0",
                source
            )));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Substitute `base` for `$0`.
    pub fn render(&self, base: &str) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Literal(text) => text.as_str(),
                Part::Base => base,
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl From<NameExpression> for String {
    fn from(e: NameExpression) -> Self {
        e.source
    }
}

/// Case convention + expression for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamingRule {
    pub case: CaseConvention,
    pub expression: NameExpression,
}

impl NamingRule {
    pub fn new(case: CaseConvention, expression: &str) -> SchemaGenResult<Self> {
        Ok(Self {
            case,
            expression: NameExpression::parse(expression)?,
        })
    }

    pub fn apply(&self, raw: &str) -> String {
        self.expression.render(&self.case.apply(raw))
    }
}

/// Naming rules for both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamingRuleSet {
    pub container: NamingRule,
    pub record: NamingRule,
}

impl NamingRuleSet {
    pub fn new(case: CaseConvention, container: &str, record: &str) -> SchemaGenResult<Self> {
        Ok(Self {
            container: NamingRule::new(case, container)?,
            record: NamingRule::new(case, record)?,
        })
    }

    /// `$0_Table` / `$0_Record`, pascal.
    pub fn relational() -> Self {
        Self::from_static("$0_Table", "$0_Record")
    }

    /// `$0_Fields` / `$0`, pascal.
    pub fn graphql() -> Self {
        Self::from_static("$0_Fields", "$0")
    }

    fn from_static(container: &'static str, record: &'static str) -> Self {
        let rule = |source: &'static str| NamingRule {
            case: CaseConvention::Pascal,
            expression: NameExpression {
                source: source.to_string(),
                parts: static_parts(source),
            },
        };
        Self {
            container: rule(container),
            record: rule(record),
        }
    }

    pub fn name(&self, raw: &str, role: Role) -> String {
        match role {
            Role::Container => self.container.apply(raw),
            Role::Record => self.record.apply(raw),
        }
    }
}

/// Split a known-good `$0...` expression without the error path.
fn static_parts(source: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    for (i, piece) in source.split("$0").enumerate() {
        if i > 0 {
            parts.push(Part::Base);
        }
        if !piece.is_empty() {
            parts.push(Part::Literal(piece.to_string()));
        }
    }
    parts
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod",
    "move", "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait",
    "true", "type", "unsafe", "use", "where", "while", "abstract", "become", "box", "do",
    "final", "macro", "override", "priv", "try", "typeof", "unsized", "virtual", "yield",
];

/// Replace characters that cannot appear in an identifier and guard a
/// leading digit.
fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// A snake_case field identifier, raw-escaped when it is a keyword.
pub fn field_ident(raw: &str) -> String {
    let ident = CaseConvention::Snake.apply(raw);
    match ident.as_str() {
        // These cannot be raw identifiers.
        "self" | "Self" | "super" | "crate" | "_" => format!("{}_", ident),
        kw if RUST_KEYWORDS.contains(&kw) => format!("r#{}", ident),
        _ => ident,
    }
}

/// A PascalCase variant identifier.
pub fn variant_ident(raw: &str) -> String {
    let ident = CaseConvention::Pascal.apply(raw);
    if ident == "Self" {
        return "Self_".to_string();
    }
    ident
}

/// An UPPER_SNAKE constant identifier.
pub fn const_ident(raw: &str) -> String {
    CaseConvention::UpperSnake.apply(raw)
}

/// The module / file stem for a generated type name.
pub fn module_name(type_name: &str) -> String {
    let name = CaseConvention::Snake.apply(type_name);
    if RUST_KEYWORDS.contains(&name.as_str()) {
        format!("{}_", name)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_container_and_record_names() {
        let rules = NamingRuleSet::new(CaseConvention::Pascal, "$0_Table", "$0_Record").unwrap();
        assert_eq!(rules.name("orders", Role::Container), "Orders_Table");
        assert_eq!(rules.name("orders", Role::Record), "Orders_Record");
        assert_eq!(rules.name("item_grid_view", Role::Container), "ItemGridView_Table");
    }

    #[test]
    fn test_builtin_rule_sets_match_parsed_ones() {
        let parsed = NamingRuleSet::new(CaseConvention::Pascal, "$0_Table", "$0_Record").unwrap();
        assert_eq!(NamingRuleSet::relational(), parsed);

        let graphql = NamingRuleSet::graphql();
        assert_eq!(graphql.name("Item", Role::Container), "Item_Fields");
        assert_eq!(graphql.name("Item", Role::Record), "Item");
    }

    #[test]
    fn test_expression_placeholders() {
        let expr = NameExpression::parse("Db$0_V2").unwrap();
        assert_eq!(expr.render("Orders"), "DbOrders_V2");

        assert!(NameExpression::parse("$1_Table").is_err());
        assert!(NameExpression::parse("Table").is_err());
        assert!(NameExpression::parse("$0_$").is_err());
        assert!(NameExpression::parse("$0$$").is_err());
    }

    #[test]
    fn test_expression_rejects_non_identifier_text() {
        assert!(NameExpression::parse("$0-Table").is_err());
        assert!(NameExpression::parse("$0 Record").is_err());
        assert!(NameExpression::parse("2$0").is_err());
        assert!(NamingRuleSet::new(CaseConvention::Pascal, "$0-Table", "$0_Record").is_err());
        assert!(NameExpression::parse("_$0").is_ok());
    }

    #[test]
    fn test_field_idents() {
        assert_eq!(field_ident("name"), "name");
        assert_eq!(field_ident("createdAt"), "created_at");
        assert_eq!(field_ident("type"), "r#type");
        assert_eq!(field_ident("self"), "self_");
        assert_eq!(field_ident("2fa"), "_2fa");
    }

    #[test]
    fn test_variant_and_module_names() {
        assert_eq!(variant_ident("AMMO"), "Ammo");
        assert_eq!(variant_ident("BARTER_ITEM"), "BarterItem");
        assert_eq!(variant_ident("BarterItem"), "BarterItem");
        assert_eq!(module_name("Orders_Table"), "orders_table");
        assert_eq!(const_ident("orders_id_seq"), "ORDERS_ID_SEQ");
    }
}
