//! Filters and lookup operators.
//!
//! A [`Filter`] is an ordered conjunction of `(key, value)` terms. Keys may
//! carry a Django-style `__op` suffix selecting a non-equality predicate;
//! a bare key means exact match. Translation to core predicates happens at
//! execution time, which is also when unknown suffixes are rejected.

use jotdb_core::{CmpOp, Predicate};
use serde_json::Value;

use crate::error::{OdmError, OdmResult};

/// An ordered conjunction of filter terms.
///
/// ```rust,ignore
/// let adults = User::filter(
///     Filter::new().field("age__gte", 18).field("age__lt", 65),
///     None,
///     None,
/// )?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Filter {
    terms: Vec<(String, Value)>,
}

impl Filter {
    /// Creates an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a term. The key may carry a lookup suffix such as `age__gte`.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((key.into(), value.into()));
        self
    }

    /// Whether the filter has no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Conjoins another filter's terms onto this one.
    #[must_use]
    pub fn and(mut self, other: Filter) -> Self {
        self.terms.extend(other.terms);
        self
    }

    /// Translates the terms into core predicates.
    pub(crate) fn to_predicates(&self) -> OdmResult<Vec<Predicate>> {
        self.terms
            .iter()
            .map(|(key, value)| {
                let (field, op) = parse_lookup_key(key)?;
                Ok(Predicate::new(field, op, value.clone()))
            })
            .collect()
    }
}

/// Splits a filter key into its field and operator.
///
/// Only a double-underscore split is interpreted; single underscores stay
/// part of the field name (`first_name` is a field, `first_name__like` is a
/// `LIKE` on it). An unrecognised suffix fails with `UnknownLookup`.
pub(crate) fn parse_lookup_key(key: &str) -> OdmResult<(&str, CmpOp)> {
    let Some((field, suffix)) = key.rsplit_once("__") else {
        return Ok((key, CmpOp::Eq));
    };
    let op = match suffix {
        "gt" => CmpOp::Gt,
        "gte" => CmpOp::Gte,
        "lt" => CmpOp::Lt,
        "lte" => CmpOp::Lte,
        "ne" => CmpOp::Ne,
        "in" => CmpOp::In,
        "like" => CmpOp::Like,
        "isnull" => CmpOp::IsNull,
        other => {
            return Err(OdmError::UnknownLookup {
                op: other.to_string(),
            })
        }
    };
    Ok((field, op))
}
