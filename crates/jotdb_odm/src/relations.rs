//! Relationship descriptors.
//!
//! Three cardinalities, each as a small facet the model exposes through a
//! named method:
//!
//! - [`ForeignKey`]: many-to-one. A static descriptor plus a per-instance
//!   [`FkCache`] slot gives lazy loading with caching.
//! - [`RelatedSet`]: the reverse side of a foreign key.
//! - [`ManyToMany`]: set membership through a junction collection indexed
//!   on both keys.
//!
//! ```rust,ignore
//! static ORDER_USER: ForeignKey<User> = ForeignKey::new("user_id");
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Order {
//!     #[serde(skip)]
//!     id: Option<DocId>,
//!     order_id: i64,
//!     user_id: Option<i64>,
//!     #[serde(skip)]
//!     user_cache: FkCache<User>,
//! }
//!
//! impl Order {
//!     fn user(&self) -> OdmResult<Option<User>> {
//!         ORDER_USER.load(self.user_id.map(Value::from).as_ref(), &self.user_cache)
//!     }
//!     fn set_user(&mut self, user: Option<&User>) -> OdmResult<()> {
//!         self.user_id = ORDER_USER.assign(user, &self.user_cache)?;
//!         Ok(())
//!     }
//! }
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;

use jotdb_core::{Collection, Document, Predicate};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{OdmError, OdmResult};
use crate::lookup::Filter;
use crate::model::{bound_database, to_document, Model};

/// Per-instance cache slot for a [`ForeignKey`].
///
/// Lives on the owning instance behind `#[serde(skip)]`; it never enters
/// the payload, never participates in equality, and is reset whenever the
/// instance is rebuilt from a document. Manual edits to the raw foreign-key
/// field do not invalidate it; reassignment goes through the descriptor.
pub struct FkCache<T> {
    slot: RefCell<Option<T>>,
}

impl<T> Default for FkCache<T> {
    fn default() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }
}

impl<T: Clone> Clone for FkCache<T> {
    fn clone(&self) -> Self {
        Self {
            slot: RefCell::new(self.slot.borrow().clone()),
        }
    }
}

impl<T> PartialEq for FkCache<T> {
    /// Caches never participate in instance equality.
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> std::fmt::Debug for FkCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.slot.borrow().is_some() {
            "cached"
        } else {
            "empty"
        };
        f.debug_tuple("FkCache").field(&state).finish()
    }
}

/// Many-to-one relationship descriptor.
///
/// Holds the static configuration: the local scalar field, the field on
/// the target model it references (defaulting to the same name), and
/// whether null is allowed. Declared `static` once per relationship; the
/// per-instance state is the [`FkCache`] slot.
pub struct ForeignKey<T: Model> {
    fk_field: &'static str,
    related_field: &'static str,
    optional: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> ForeignKey<T> {
    /// Creates a required relationship over `fk_field`, targeting the
    /// field of the same name on `T`.
    #[must_use]
    pub const fn new(fk_field: &'static str) -> Self {
        Self {
            fk_field,
            related_field: fk_field,
            optional: false,
            _marker: PhantomData,
        }
    }

    /// Targets a differently-named field on the related model.
    #[must_use]
    pub const fn related(mut self, field: &'static str) -> Self {
        self.related_field = field;
        self
    }

    /// Allows the relationship to be null.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Loads the related instance, lazily and cached.
    ///
    /// Resolution order: the cache slot; then the foreign-key value
    /// (`None`/null is `Ok(None)` when optional, `MissingRelation`
    /// otherwise); then a `get` on the target model by the related field,
    /// whose result populates the cache.
    pub fn load(&self, fk_value: Option<&Value>, cache: &FkCache<T>) -> OdmResult<Option<T>> {
        if let Some(cached) = cache.slot.borrow().as_ref() {
            return Ok(Some(cached.clone()));
        }

        let fk_value = fk_value.filter(|v| !v.is_null());
        let Some(fk_value) = fk_value else {
            if self.optional {
                return Ok(None);
            }
            return Err(OdmError::missing_relation(format!(
                "foreign key '{}' is null; declare the relationship optional if that is valid",
                self.fk_field
            )));
        };

        let related = T::get(Filter::new().field(self.related_field, fk_value.clone()))?;
        match related {
            Some(instance) => {
                *cache.slot.borrow_mut() = Some(instance.clone());
                Ok(Some(instance))
            }
            None if self.optional => Ok(None),
            None => Err(OdmError::missing_relation(format!(
                "{} with {} = {} not found",
                T::model_name(),
                self.related_field,
                fk_value
            ))),
        }
    }

    /// Reassigns the relationship, returning the new foreign-key scalar
    /// for the caller's field and filling the cache in the same step.
    ///
    /// `None` is only accepted for optional relationships; it clears both
    /// the key (the returned value is `None`) and the cache.
    pub fn assign<K: DeserializeOwned>(
        &self,
        value: Option<&T>,
        cache: &FkCache<T>,
    ) -> OdmResult<Option<K>> {
        let Some(related) = value else {
            if !self.optional {
                return Err(OdmError::invalid_assignment(format!(
                    "cannot set required relationship over '{}' to null",
                    self.fk_field
                )));
            }
            *cache.slot.borrow_mut() = None;
            return Ok(None);
        };

        let doc = to_document(related)?;
        let raw = doc.get(self.related_field).cloned().ok_or_else(|| {
            OdmError::missing_relation(format!(
                "{} carries no value for '{}'",
                T::model_name(),
                self.related_field
            ))
        })?;
        let key: K = serde_json::from_value(raw)
            .map_err(|e| OdmError::serialization(format!("foreign key value: {e}")))?;

        *cache.slot.borrow_mut() = Some(related.clone());
        Ok(Some(key))
    }
}

/// Overwrites one field of an instance through its document form.
///
/// The rebuilt instance keeps its id; `#[serde(skip)]` slots (relationship
/// caches included) reset to their defaults.
fn set_field<M: Model>(
    instance: &mut M,
    field: &str,
    value: Value,
) -> Result<(), serde_json::Error> {
    let mut doc = to_document(instance).map_err(serde::de::Error::custom)?;
    doc.insert(field.to_string(), value);
    let id = instance.id();
    let mut rebuilt: M = serde_json::from_value(Value::Object(doc))?;
    rebuilt.set_id(id);
    *instance = rebuilt;
    Ok(())
}

/// One-to-many reverse manager.
///
/// Built per access from the owning instance's local key value; the model
/// exposes it through a named method:
///
/// ```rust,ignore
/// impl User {
///     fn orders(&self) -> RelatedSet<Order> {
///         RelatedSet::new("user_id", self.user_id)
///     }
/// }
/// ```
///
/// There is no assignment operation: membership changes go through `add`,
/// `remove`, and `clear`, which write the member's foreign key and save it.
pub struct RelatedSet<T: Model> {
    fk_field: &'static str,
    local_value: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> RelatedSet<T> {
    /// Creates a manager over members whose `fk_field` equals
    /// `local_value`.
    pub fn new(fk_field: &'static str, local_value: impl Into<Value>) -> Self {
        Self {
            fk_field,
            local_value: local_value.into(),
            _marker: PhantomData,
        }
    }

    fn base_filter(&self) -> Filter {
        Filter::new().field(self.fk_field, self.local_value.clone())
    }

    /// All current members, optionally limited.
    pub fn all(&self, limit: Option<u64>) -> OdmResult<Vec<T>> {
        T::filter(self.base_filter(), limit, None)
    }

    /// Members matching additional filter terms.
    pub fn filter(&self, extra: Filter, limit: Option<u64>) -> OdmResult<Vec<T>> {
        T::filter(self.base_filter().and(extra), limit, None)
    }

    /// Number of current members.
    pub fn count(&self) -> OdmResult<u64> {
        T::count(self.base_filter())
    }

    /// Iterates over the current members.
    pub fn iter(&self) -> OdmResult<std::vec::IntoIter<T>> {
        Ok(self.all(None)?.into_iter())
    }

    /// Adds a member: sets its foreign key to the owner's value and saves.
    pub fn add(&self, member: &mut T) -> OdmResult<()> {
        set_field(member, self.fk_field, self.local_value.clone())
            .map_err(|e| OdmError::serialization(e.to_string()))?;
        member.save()?;
        Ok(())
    }

    /// Removes a member: sets its foreign key to null and saves.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` when the member's foreign-key field cannot
    /// hold null.
    pub fn remove(&self, member: &mut T) -> OdmResult<()> {
        set_field(member, self.fk_field, Value::Null).map_err(|_| {
            OdmError::unsupported(format!(
                "foreign key '{}' on {} is not nullable; remove requires an optional key",
                self.fk_field,
                T::model_name()
            ))
        })?;
        member.save()?;
        Ok(())
    }

    /// Removes every current member, returning how many were detached.
    pub fn clear(&self) -> OdmResult<usize> {
        let mut members = self.all(None)?;
        for member in &mut members {
            self.remove(member)?;
        }
        Ok(members.len())
    }
}

/// Many-to-many manager through a junction collection.
///
/// The junction stores `{local_key, remote_key}` documents indexed on both
/// keys; `remote_field` doubles as the lookup field on the target model.
///
/// ```rust,ignore
/// impl Student {
///     fn courses(&self) -> ManyToMany<Course> {
///         ManyToMany::new("enrollments", "student_id", "course_id", self.student_id)
///     }
/// }
/// ```
pub struct ManyToMany<T: Model> {
    through: &'static str,
    local_field: &'static str,
    remote_field: &'static str,
    local_value: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> ManyToMany<T> {
    /// Creates a manager over the `through` junction collection.
    pub fn new(
        through: &'static str,
        local_field: &'static str,
        remote_field: &'static str,
        local_value: impl Into<Value>,
    ) -> Self {
        Self {
            through,
            local_field,
            remote_field,
            local_value: local_value.into(),
            _marker: PhantomData,
        }
    }

    fn junction(&self) -> OdmResult<Collection> {
        let db = bound_database()?;
        Ok(db.collection(self.through, &[self.local_field, self.remote_field])?)
    }

    fn remote_key_of(&self, member: &T) -> OdmResult<Value> {
        let doc = to_document(member)?;
        match doc.get(self.remote_field) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(OdmError::missing_relation(format!(
                "{} carries no value for '{}'",
                T::model_name(),
                self.remote_field
            ))),
        }
    }

    fn local_predicate(&self) -> Predicate {
        Predicate::eq(self.local_field, self.local_value.clone())
    }

    /// All related instances.
    pub fn all(&self) -> OdmResult<Vec<T>> {
        let rows = self.junction()?.find(&[self.local_predicate()], None, None)?;
        let remote_keys: Vec<Value> = rows
            .into_iter()
            .filter_map(|r| r.doc.get(self.remote_field).cloned())
            .collect();
        T::filter(
            Filter::new().field(
                format!("{}__in", self.remote_field),
                Value::Array(remote_keys),
            ),
            None,
            None,
        )
    }

    /// Related instances matching additional filter terms.
    pub fn filter(&self, extra: Filter, limit: Option<u64>) -> OdmResult<Vec<T>> {
        let rows = self.junction()?.find(&[self.local_predicate()], None, None)?;
        let remote_keys: Vec<Value> = rows
            .into_iter()
            .filter_map(|r| r.doc.get(self.remote_field).cloned())
            .collect();
        let base = Filter::new().field(
            format!("{}__in", self.remote_field),
            Value::Array(remote_keys),
        );
        T::filter(base.and(extra), limit, None)
    }

    /// Number of related instances.
    pub fn count(&self) -> OdmResult<u64> {
        Ok(self.junction()?.count(&[self.local_predicate()])?)
    }

    /// Whether `member` is currently related.
    pub fn contains(&self, member: &T) -> OdmResult<bool> {
        let remote = self.remote_key_of(member)?;
        let n = self.junction()?.count(&[
            self.local_predicate(),
            Predicate::eq(self.remote_field, remote),
        ])?;
        Ok(n > 0)
    }

    /// Relates `member`, inserting a junction row. Duplicate adds are
    /// no-ops.
    pub fn add(&self, member: &T) -> OdmResult<()> {
        if self.contains(member)? {
            return Ok(());
        }
        let remote = self.remote_key_of(member)?;
        let mut row = Document::new();
        row.insert(self.local_field.to_string(), self.local_value.clone());
        row.insert(self.remote_field.to_string(), remote);
        self.junction()?.insert(&row)?;
        Ok(())
    }

    /// Unrelates `member`, deleting its junction rows.
    pub fn remove(&self, member: &T) -> OdmResult<()> {
        let remote = self.remote_key_of(member)?;
        self.junction()?.delete_where(&[
            self.local_predicate(),
            Predicate::eq(self.remote_field, remote),
        ])?;
        Ok(())
    }

    /// Unrelates everything, returning how many junction rows were
    /// removed.
    pub fn clear(&self) -> OdmResult<usize> {
        Ok(self.junction()?.delete_where(&[self.local_predicate()])?)
    }

    /// Iterates over the related instances.
    pub fn iter(&self) -> OdmResult<std::vec::IntoIter<T>> {
        Ok(self.all()?.into_iter())
    }
}
