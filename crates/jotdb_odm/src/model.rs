//! Typed document models.
//!
//! A model is a `Serialize + DeserializeOwned` struct with an id slot the
//! engine fills on save. Declaring one takes an `impl Model` block naming
//! the collection (or letting it derive from the type name) and the
//! indexed fields:
//!
//! ```rust,ignore
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     #[serde(skip)]
//!     id: Option<DocId>,
//!     name: String,
//!     email: String,
//! }
//!
//! impl Model for User {
//!     const INDEXED_FIELDS: &'static [&'static str] = &["email"];
//!     fn id(&self) -> Option<DocId> { self.id }
//!     fn set_id(&mut self, id: Option<DocId>) { self.id = id; }
//! }
//!
//! jotdb_odm::bind_database(db);
//! let mut user = User { id: None, name: "Alice".into(), email: "a@x".into() };
//! user.save()?;
//! let found = User::get(Filter::new().field("email", "a@x"))?;
//! ```
//!
//! The id field is `#[serde(skip)]` so it never enters the payload; it is
//! attached again on read.

use jotdb_core::{Collection, Database, DocId, Document};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{OdmError, OdmResult};
use crate::lookup::Filter;
use crate::naming;

/// The process-wide database binding shared by all models.
static BOUND: RwLock<Option<Database>> = RwLock::new(None);

/// Binds a database to the model layer.
///
/// All model operations go through the bound handle until it is replaced
/// or [`unbind_database`] is called.
pub fn bind_database(db: Database) {
    debug!("database bound to model layer");
    *BOUND.write() = Some(db);
}

/// Removes the process-wide binding.
pub fn unbind_database() {
    *BOUND.write() = None;
}

/// Returns the bound database, or `DatabaseNotBound`.
pub fn bound_database() -> OdmResult<Database> {
    BOUND.read().clone().ok_or(OdmError::DatabaseNotBound)
}

/// Serialises a model instance into a document.
///
/// The instance's declared fields are projected; the id slot and any
/// `#[serde(skip)]` relationship caches stay out of the payload.
pub fn to_document<M: Serialize>(instance: &M) -> OdmResult<Document> {
    let value = serde_json::to_value(instance)
        .map_err(|e| OdmError::serialization(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(OdmError::serialization(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Structurally coerces a document into a model instance and attaches the
/// given id.
pub fn from_document<M: Model>(doc: Document, id: DocId) -> OdmResult<M> {
    let mut instance: M = serde_json::from_value(Value::Object(doc))
        .map_err(|e| OdmError::serialization(format!("failed to deserialize document: {e}")))?;
    instance.set_id(Some(id));
    Ok(instance)
}

/// A typed document mapped 1:1 to a collection.
///
/// Implementors supply the id accessors and optionally override the
/// collection name and indexed fields; every query and persistence method
/// comes for free.
pub trait Model: Serialize + DeserializeOwned + Clone {
    /// Explicit collection name; derived from the type name when `None`.
    const COLLECTION: Option<&'static str> = None;

    /// Indexed JSON paths declared for this model's collection.
    const INDEXED_FIELDS: &'static [&'static str] = &[];

    /// The assigned document id, `None` before the first save.
    fn id(&self) -> Option<DocId>;

    /// Sets the document id. Called by the engine on save and load.
    fn set_id(&mut self, id: Option<DocId>);

    /// The bare type name, used for collection-name derivation.
    fn model_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// The collection name: explicit, or snake-cased and pluralised from
    /// the type name (`User` → `users`, `Category` → `categories`).
    fn collection_name() -> String {
        match Self::COLLECTION {
            Some(name) => name.to_string(),
            None => naming::derive_collection_name(Self::model_name()),
        }
    }

    /// Opens this model's collection on the bound database.
    fn collection() -> OdmResult<Collection> {
        let db = bound_database()?;
        Ok(db.collection(&Self::collection_name(), Self::INDEXED_FIELDS)?)
    }

    // ========================================================================
    // Instance API
    // ========================================================================

    /// Inserts the instance, or replaces the stored payload when it already
    /// has an id. Returns the id.
    fn save(&mut self) -> OdmResult<DocId> {
        let doc = to_document(self)?;
        let collection = Self::collection()?;
        match self.id() {
            Some(id) => {
                collection.replace(id, &doc)?;
                Ok(id)
            }
            None => {
                let id = collection.insert(&doc)?;
                self.set_id(Some(id));
                Ok(id)
            }
        }
    }

    /// Deletes the stored row.
    ///
    /// # Errors
    ///
    /// `UnsavedInstance` when the instance has no id.
    fn delete(&self) -> OdmResult<()> {
        let id = self.id().ok_or(OdmError::UnsavedInstance)?;
        Self::collection()?.remove_by_id(id)?;
        Ok(())
    }

    // ========================================================================
    // Class API
    // ========================================================================

    /// Fetches a single instance matching the filter, if any.
    fn get(filter: Filter) -> OdmResult<Option<Self>> {
        Ok(Self::filter(filter, Some(1), None)?.into_iter().next())
    }

    /// Fetches an instance by id.
    fn get_by_id(id: DocId) -> OdmResult<Option<Self>> {
        match Self::collection()?.get_by_id(id)? {
            Some(record) => Ok(Some(from_document(record.doc, record.id)?)),
            None => Ok(None),
        }
    }

    /// Fetches instances matching the filter.
    ///
    /// Without a limit, every matching row is returned.
    fn filter(filter: Filter, limit: Option<u64>, offset: Option<u64>) -> OdmResult<Vec<Self>> {
        let predicates = filter.to_predicates()?;
        let records = Self::collection()?.find(&predicates, limit, offset)?;
        records
            .into_iter()
            .map(|r| from_document(r.doc, r.id))
            .collect()
    }

    /// Fetches all instances.
    fn all(limit: Option<u64>, offset: Option<u64>) -> OdmResult<Vec<Self>> {
        let records = Self::collection()?.all(limit, offset)?;
        records
            .into_iter()
            .map(|r| from_document(r.doc, r.id))
            .collect()
    }

    /// Counts instances matching the filter with `SELECT COUNT(*)`.
    fn count(filter: Filter) -> OdmResult<u64> {
        let predicates = filter.to_predicates()?;
        Ok(Self::collection()?.count(&predicates)?)
    }

    /// Batch-inserts instances, all-or-nothing, assigning ids in order.
    fn insert_many(instances: &mut [Self]) -> OdmResult<Vec<DocId>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        let docs: Vec<Document> = instances
            .iter()
            .map(to_document)
            .collect::<OdmResult<_>>()?;
        let ids = Self::collection()?.insert_many(&docs)?;
        for (instance, id) in instances.iter_mut().zip(&ids) {
            instance.set_id(Some(*id));
        }
        Ok(ids)
    }

    /// Deletes instances matching the filter, returning the count removed.
    ///
    /// # Errors
    ///
    /// `MissingPredicate` when the filter is empty; mass deletion must be
    /// explicit (use the collection's `purge`).
    fn delete_many(filter: Filter) -> OdmResult<usize> {
        if filter.is_empty() {
            return Err(OdmError::MissingPredicate);
        }
        let predicates = filter.to_predicates()?;
        Ok(Self::collection()?.delete_where(&predicates)?)
    }

    /// Returns a lazy sequence over matching instances, fetched in chunks
    /// of 100.
    ///
    /// Each call produces a fresh sequence starting from the beginning.
    fn paginate(filter: Filter) -> Paginated<Self> {
        Paginated::new(filter)
    }
}

/// Chunk size used by [`Model::paginate`].
const PAGE_CHUNK: u64 = 100;

/// A lazy, finite sequence of model instances.
///
/// Fetches rows in chunks of 100 as iteration proceeds. Errors surface
/// through the items; iteration stops after the first error.
pub struct Paginated<M: Model> {
    filter: Filter,
    buffer: std::vec::IntoIter<M>,
    offset: u64,
    exhausted: bool,
}

impl<M: Model> Paginated<M> {
    fn new(filter: Filter) -> Self {
        Self {
            filter,
            buffer: Vec::new().into_iter(),
            offset: 0,
            exhausted: false,
        }
    }
}

impl<M: Model> Iterator for Paginated<M> {
    type Item = OdmResult<M>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(instance) = self.buffer.next() {
                return Some(Ok(instance));
            }
            if self.exhausted {
                return None;
            }
            match M::filter(self.filter.clone(), Some(PAGE_CHUNK), Some(self.offset)) {
                Ok(chunk) => {
                    if (chunk.len() as u64) < PAGE_CHUNK {
                        self.exhausted = true;
                    }
                    if chunk.is_empty() {
                        return None;
                    }
                    self.offset += chunk.len() as u64;
                    self.buffer = chunk.into_iter();
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

// ============================================================================
// Transaction proxies
// ============================================================================

/// Runs `f` in a transaction on the bound database.
///
/// Commits on `Ok`, rolls back on `Err`. Nested calls degrade to
/// savepoints, exactly like the core scope.
pub fn transaction<T>(f: impl FnOnce() -> OdmResult<T>) -> OdmResult<T> {
    let db = bound_database()?;
    if db.in_transaction() {
        let sp = db.savepoint(None)?;
        return match f() {
            Ok(value) => {
                db.release(&sp)?;
                Ok(value)
            }
            Err(err) => {
                db.rollback_to(&sp)?;
                db.release(&sp)?;
                Err(err)
            }
        };
    }

    db.begin()?;
    match f() {
        Ok(value) => {
            db.commit()?;
            Ok(value)
        }
        Err(err) => {
            db.rollback()?;
            Err(err)
        }
    }
}

/// Begins a transaction on the bound database.
pub fn begin() -> OdmResult<()> {
    Ok(bound_database()?.begin()?)
}

/// Commits the open transaction on the bound database.
pub fn commit() -> OdmResult<()> {
    Ok(bound_database()?.commit()?)
}

/// Rolls back the open transaction on the bound database.
pub fn rollback() -> OdmResult<()> {
    Ok(bound_database()?.rollback()?)
}
