//! Query compiler.
//!
//! Turns a conjunction of `(field, op, value)` triples into a parameterised
//! WHERE clause. Each triple is routed independently: predicates on indexed
//! fields use the generated column (so the engine can pick the B-tree
//! index), everything else goes through `json_extract`. `LIKE` always scans.
//! No cross-predicate rewriting happens here; index selection among eligible
//! columns is the engine's job.

use std::collections::HashSet;

use serde_json::Value;

use crate::dialect;
use crate::error::{CoreError, CoreResult};

/// Comparison operator of a single predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `field = v` (`IS NULL` when `v` is null).
    Eq,
    /// `field <> v` (`IS NOT NULL` when `v` is null).
    Ne,
    /// `field > v`.
    Gt,
    /// `field >= v`.
    Gte,
    /// `field < v`.
    Lt,
    /// `field <= v`.
    Lte,
    /// `field IN (…)`; the value must be an array.
    In,
    /// `field LIKE v`; never routed to an index.
    Like,
    /// `field IS NULL` / `IS NOT NULL`; the value must be a boolean.
    IsNull,
}

impl CmpOp {
    /// Whether this operator may use a generated column when the field is
    /// indexed.
    fn index_eligible(self) -> bool {
        !matches!(self, Self::Like)
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In | Self::IsNull => unreachable!("handled separately"),
        }
    }
}

/// One `(field, op, value)` triple.
#[derive(Debug, Clone)]
pub struct Predicate {
    /// Top-level JSON key the predicate applies to.
    pub field: String,
    /// Comparison operator.
    pub op: CmpOp,
    /// Comparison operand.
    pub value: Value,
}

impl Predicate {
    /// Creates a predicate.
    pub fn new(field: impl Into<String>, op: CmpOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Creates an equality predicate.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, CmpOp::Eq, value)
    }
}

/// A compiled WHERE clause and its parameter vector.
#[derive(Debug)]
pub(crate) struct Compiled {
    /// Conditions joined with ` AND `; empty when there are no predicates.
    pub where_clause: String,
    /// Positional parameters in condition order.
    pub params: Vec<rusqlite::types::Value>,
}

/// Compiles a conjunction of predicates.
pub(crate) fn compile(
    predicates: &[Predicate],
    indexed: &HashSet<String>,
) -> CoreResult<Compiled> {
    let mut conditions = Vec::with_capacity(predicates.len());
    let mut params = Vec::new();

    for pred in predicates {
        dialect::validate_field(&pred.field)?;

        let lhs = if indexed.contains(&pred.field) && pred.op.index_eligible() {
            dialect::column_ref(&pred.field)
        } else {
            dialect::json_extract(&pred.field)
        };

        match pred.op {
            CmpOp::In => {
                let Value::Array(values) = &pred.value else {
                    return Err(CoreError::invalid_field(
                        "in lookup requires a list of values",
                    ));
                };
                if values.is_empty() {
                    conditions.push("1 = 0".to_string());
                    continue;
                }
                let placeholders =
                    values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                conditions.push(format!("{lhs} IN ({placeholders})"));
                params.extend(values.iter().map(dialect::bind_value));
            }
            CmpOp::IsNull => {
                let Value::Bool(want_null) = pred.value else {
                    return Err(CoreError::invalid_field(
                        "isnull lookup requires a boolean value",
                    ));
                };
                if want_null {
                    conditions.push(format!("{lhs} IS NULL"));
                } else {
                    conditions.push(format!("{lhs} IS NOT NULL"));
                }
            }
            CmpOp::Eq if pred.value.is_null() => {
                conditions.push(format!("{lhs} IS NULL"));
            }
            CmpOp::Ne if pred.value.is_null() => {
                conditions.push(format!("{lhs} IS NOT NULL"));
            }
            op => {
                conditions.push(format!("{lhs} {} ?", op.sql()));
                params.push(dialect::bind_value(&pred.value));
            }
        }
    }

    Ok(Compiled {
        where_clause: conditions.join(" AND "),
        params,
    })
}

/// Appends `LIMIT`/`OFFSET` clauses, pushing their parameters.
///
/// An offset without a limit gets `LIMIT -1` (unbounded) first, which the
/// engine requires.
pub(crate) fn push_limit_offset(
    sql: &mut String,
    params: &mut Vec<rusqlite::types::Value>,
    limit: Option<u64>,
    offset: Option<u64>,
) {
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(rusqlite::types::Value::Integer(limit as i64));
    }
    if let Some(offset) = offset {
        if limit.is_none() {
            sql.push_str(" LIMIT -1");
        }
        sql.push_str(" OFFSET ?");
        params.push(rusqlite::types::Value::Integer(offset as i64));
    }
}
