//! Relational resolution from `information_schema` and the catalog.
//!
//! Tables and views come back in lexical order, columns in declaration
//! (ordinal) order. Identifier columns are cast to `text` because the
//! `information_schema` domains do not decode as strings directly.

use std::collections::BTreeMap;

use sqlx::PgPool;
use tracing::debug;

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::resolve::ResolveOptions;
use crate::schema::{CanonicalSchema, Entity, EntityKind, Field, Sequence, TypeRef};

const TABLES_SQL: &str = "
    SELECT table_name::text, table_type::text
    FROM information_schema.tables
    WHERE table_schema = $1
    ORDER BY table_name";

const COLUMNS_SQL: &str = "
    SELECT table_name::text, column_name::text, udt_name::text, is_nullable::text
    FROM information_schema.columns
    WHERE table_schema = $1
    ORDER BY table_name, ordinal_position";

const CONSTRAINTS_SQL: &str = "
    SELECT tc.table_name::text, tc.constraint_name::text, tc.constraint_type::text, kcu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_schema = tc.constraint_schema
     AND kcu.constraint_name = tc.constraint_name
     AND kcu.table_name = tc.table_name
    WHERE tc.table_schema = $1
      AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
    ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position";

const SEQUENCES_SQL: &str = "
    SELECT c.relname::text,
           format_type(s.seqtypid, NULL),
           EXISTS (
               SELECT 1 FROM pg_depend d
               WHERE d.objid = c.oid
                 AND d.classid = 'pg_class'::regclass
                 AND d.deptype IN ('a', 'i')
           )
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_sequence s ON s.seqrelid = c.oid
    WHERE c.relkind = 'S' AND n.nspname = $1
    ORDER BY c.relname";

/// Read tables, views, columns, key constraints and (optionally) sequences.
pub async fn resolve(pool: &PgPool, options: &ResolveOptions) -> SchemaGenResult<CanonicalSchema> {
    let tables: Vec<(String, String)> = sqlx::query_as(TABLES_SQL)
        .bind(&options.schema)
        .fetch_all(pool)
        .await
        .map_err(|e| query_failed("tables", e))?;

    let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
    for (name, table_type) in tables {
        if options.filter.is_excluded(&name) {
            continue;
        }
        let kind = if table_type == "VIEW" {
            EntityKind::View
        } else {
            EntityKind::Table
        };
        entities.insert(name.clone(), Entity::new(name, kind));
    }

    let columns: Vec<(String, String, String, String)> = sqlx::query_as(COLUMNS_SQL)
        .bind(&options.schema)
        .fetch_all(pool)
        .await
        .map_err(|e| query_failed("columns", e))?;

    for (table, column, udt_name, is_nullable) in columns {
        if let Some(entity) = entities.get_mut(&table) {
            let ty = column_type(&udt_name, is_nullable == "YES");
            entity.fields.push(Field::new(column, ty));
        }
    }

    let constraints: Vec<(String, String, String, String)> = sqlx::query_as(CONSTRAINTS_SQL)
        .bind(&options.schema)
        .fetch_all(pool)
        .await
        .map_err(|e| query_failed("constraints", e))?;

    apply_constraints(&mut entities, constraints);

    let sequences = if options.include_sequences {
        let rows: Vec<(String, String, bool)> = sqlx::query_as(SEQUENCES_SQL)
            .bind(&options.schema)
            .fetch_all(pool)
            .await
            .map_err(|e| query_failed("sequences", e))?;

        rows.into_iter()
            .filter(|(_, _, system)| options.include_system_sequences || !system)
            .map(|(name, data_type, system)| Sequence {
                name,
                data_type,
                system,
            })
            .collect()
    } else {
        Vec::new()
    };

    debug!(
        schema = %options.schema,
        entities = entities.len(),
        sequences = sequences.len(),
        "read relational schema"
    );

    Ok(CanonicalSchema {
        version: None,
        namespace: options.schema.clone(),
        entities: entities.into_values().collect(),
        sequences,
    })
}

/// Map a `udt_name` to a type reference. Array types are `_`-prefixed.
pub fn column_type(udt_name: &str, nullable: bool) -> TypeRef {
    match udt_name.strip_prefix('_') {
        Some(element) => TypeRef::List {
            of: Box::new(TypeRef::scalar(element, true)),
            nullable,
        },
        None => TypeRef::scalar(udt_name, nullable),
    }
}

/// Fold `(table, constraint, type, column)` rows into primary and unique keys.
fn apply_constraints(
    entities: &mut BTreeMap<String, Entity>,
    rows: Vec<(String, String, String, String)>,
) {
    let mut unique: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();

    for (table, constraint, constraint_type, column) in rows {
        let Some(entity) = entities.get_mut(&table) else {
            continue;
        };
        match constraint_type.as_str() {
            "PRIMARY KEY" => entity.primary_key.push(column),
            _ => unique.entry((table, constraint)).or_default().push(column),
        }
    }

    for ((table, _), columns) in unique {
        if let Some(entity) = entities.get_mut(&table) {
            entity.unique.push(columns);
        }
    }
}

fn query_failed(what: &str, e: sqlx::Error) -> SchemaGenError {
    SchemaGenError::resolution(format!("failed to read {}: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_array_columns_become_lists() {
        assert_eq!(
            column_type("_int4", false),
            TypeRef::List {
                of: Box::new(TypeRef::scalar("int4", true)),
                nullable: false,
            }
        );
        assert_eq!(column_type("text", true), TypeRef::scalar("text", true));
    }

    #[test]
    fn test_constraints_fold_into_entities() {
        let mut entities = BTreeMap::new();
        entities.insert("account".to_string(), Entity::new("account", EntityKind::Table));

        let row = |c: &str, t: &str, col: &str| {
            ("account".to_string(), c.to_string(), t.to_string(), col.to_string())
        };
        apply_constraints(
            &mut entities,
            vec![
                row("account_pkey", "PRIMARY KEY", "id"),
                row("account_email_key", "UNIQUE", "email"),
                row("account_tenant_name_key", "UNIQUE", "tenant_id"),
                row("account_tenant_name_key", "UNIQUE", "name"),
                ("missing".to_string(), "x".to_string(), "UNIQUE".to_string(), "y".to_string()),
            ],
        );

        let account = &entities["account"];
        assert_eq!(account.primary_key, vec!["id"]);
        assert_eq!(
            account.unique,
            vec![
                vec!["email".to_string()],
                vec!["tenant_id".to_string(), "name".to_string()],
            ]
        );
    }
}
