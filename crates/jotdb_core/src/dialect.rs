//! SQL dialect shim.
//!
//! Everything engine-specific lives here: JSON extraction syntax, virtual
//! generated-column DDL, the `REGEXP` user function, table naming, and the
//! JSON-to-SQL parameter conversion. The layers above compose these
//! fragments and stay dialect-agnostic.

use std::sync::Arc;

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Prefix applied to every collection's backing table.
pub(crate) const TABLE_PREFIX: &str = "collection_";

/// Name of the default collection backing the database-level CRUD API.
pub(crate) const DEFAULT_COLLECTION: &str = "documents";

/// Column names reserved by the table layout.
const RESERVED_COLUMNS: [&str; 2] = ["id", "data"];

/// Checks that a name is non-empty and `[A-Za-z0-9_]` only.
pub(crate) fn validate_ident(name: &str, what: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_field(format!(
            "{what} must be a non-empty string"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(CoreError::invalid_field(format!(
            "{what} '{name}' contains characters outside [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

/// Checks a field name used in a query predicate.
pub(crate) fn validate_field(name: &str) -> CoreResult<()> {
    validate_ident(name, "key")
}

/// Checks a field name declared for indexing.
///
/// Indexed fields become real column names, so the reserved `id` and `data`
/// columns are rejected here in addition to the character rules.
pub(crate) fn validate_indexed_field(name: &str) -> CoreResult<()> {
    validate_ident(name, "indexed field")?;
    if RESERVED_COLUMNS.contains(&name) {
        return Err(CoreError::invalid_field(format!(
            "'{name}' is a reserved column name and cannot be indexed"
        )));
    }
    Ok(())
}

/// Returns the backing table name for a collection.
pub(crate) fn table_name(collection: &str) -> String {
    format!("{TABLE_PREFIX}{collection}")
}

/// Returns the index name for a generated column.
pub(crate) fn index_name(table: &str, field: &str) -> String {
    format!("idx_{table}_{field}")
}

/// JSON extraction expression for a top-level key.
pub(crate) fn json_extract(field: &str) -> String {
    format!("json_extract(data, '$.{field}')")
}

/// Column definition for a virtual generated column over a JSON path.
///
/// Declared `VIRTUAL` so the value is computed on read and only the B-tree
/// index materialises it.
pub(crate) fn generated_column(field: &str) -> String {
    format!(
        "\"{field}\" GENERATED ALWAYS AS (json_extract(data, '$.{field}')) VIRTUAL"
    )
}

/// Quoted column reference for an indexed field.
pub(crate) fn column_ref(field: &str) -> String {
    format!("\"{field}\"")
}

/// Converts a JSON value to an SQL parameter.
///
/// Booleans bind as 0/1 integers and arrays/objects as their JSON text,
/// matching what `json_extract` yields for the same stored values.
pub(crate) fn bind_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

/// Registers the `REGEXP` operator as a scalar function.
///
/// SQLite rewrites `X REGEXP Y` to `regexp(Y, X)`, so argument 0 is the
/// pattern. The compiled regex is cached in the statement's auxiliary-data
/// slot and reused across rows. Non-text operands never match.
pub(crate) fn register_regexp(conn: &Connection) -> CoreResult<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
            let pattern: Arc<Regex> =
                ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                    Ok(Regex::new(vr.as_str()?)?)
                })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Text(t) => match std::str::from_utf8(t) {
                    Ok(text) => pattern.is_match(text),
                    Err(_) => false,
                },
                _ => false,
            };
            Ok(matched)
        },
    )?;
    Ok(())
}

/// Validates a regex pattern eagerly so callers get `InvalidField` instead
/// of a deferred engine error on first row.
pub(crate) fn validate_pattern(pattern: &str) -> CoreResult<()> {
    if pattern.is_empty() {
        return Err(CoreError::invalid_field(
            "pattern must be a non-empty string",
        ));
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| CoreError::invalid_field(format!("invalid pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ident_rules() {
        assert!(validate_ident("users", "collection").is_ok());
        assert!(validate_ident("user_id2", "key").is_ok());
        assert!(validate_ident("", "key").is_err());
        assert!(validate_ident("a-b", "key").is_err());
        assert!(validate_ident("a.b", "key").is_err());
        assert!(validate_ident("a b", "key").is_err());
    }

    #[test]
    fn reserved_columns_not_indexable() {
        assert!(validate_indexed_field("email").is_ok());
        assert!(validate_indexed_field("id").is_err());
        assert!(validate_indexed_field("data").is_err());
    }

    #[test]
    fn table_and_index_names() {
        assert_eq!(table_name("users"), "collection_users");
        assert_eq!(index_name("collection_users", "email"), "idx_collection_users_email");
    }

    #[test]
    fn sql_fragments() {
        assert_eq!(json_extract("age"), "json_extract(data, '$.age')");
        assert_eq!(
            generated_column("age"),
            "\"age\" GENERATED ALWAYS AS (json_extract(data, '$.age')) VIRTUAL"
        );
    }

    #[test]
    fn bind_value_conversions() {
        assert_eq!(bind_value(&json!(true)), rusqlite::types::Value::Integer(1));
        assert_eq!(bind_value(&json!(7)), rusqlite::types::Value::Integer(7));
        assert_eq!(bind_value(&json!(1.5)), rusqlite::types::Value::Real(1.5));
        assert_eq!(
            bind_value(&json!("x")),
            rusqlite::types::Value::Text("x".into())
        );
        assert_eq!(bind_value(&Value::Null), rusqlite::types::Value::Null);
        assert_eq!(
            bind_value(&json!([1, 2])),
            rusqlite::types::Value::Text("[1,2]".into())
        );
    }

    #[test]
    fn regexp_matches_through_connection() {
        let conn = Connection::open_in_memory().unwrap();
        register_regexp(&conn).unwrap();
        let hit: bool = conn
            .query_row("SELECT 'hello world' REGEXP '^hello'", [], |r| r.get(0))
            .unwrap();
        assert!(hit);
        let miss: bool = conn
            .query_row("SELECT 'goodbye' REGEXP '^hello'", [], |r| r.get(0))
            .unwrap();
        assert!(!miss);
    }

    #[test]
    fn regexp_non_text_never_matches() {
        let conn = Connection::open_in_memory().unwrap();
        register_regexp(&conn).unwrap();
        let hit: bool = conn
            .query_row("SELECT 42 REGEXP '4'", [], |r| r.get(0))
            .unwrap();
        assert!(!hit);
    }

    #[test]
    fn pattern_validation() {
        assert!(validate_pattern("^a.*b$").is_ok());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("(unclosed").is_err());
    }
}
