//! Database handle.
//!
//! `Database` owns one SQLite connection (WAL journaling, busy timeout,
//! `REGEXP` registered), the transaction controller, and a registry of open
//! collection handles keyed by name. Handles are cheap to clone and share
//! the same underlying state.
//!
//! A default collection named `documents` backs the database-level CRUD
//! API; its methods forward there so single-collection callers never touch
//! `collection()` at all.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::collection::{Collection, CollectionState};
use crate::config::Config;
use crate::dialect;
use crate::error::{CoreError, CoreResult};
use crate::stats::{CollectionStats, DatabaseStats, Page};
use crate::transaction::TransactionController;
use crate::{DocId, Document, Record};

/// Shared state behind every clone of a [`Database`] and its collections.
pub(crate) struct Shared {
    /// The connection. Reentrant so a transaction scope can hold the lock
    /// while the closure re-acquires it for individual statements.
    conn: ReentrantMutex<RefCell<Connection>>,
    /// Database file path; `None` for in-memory databases.
    path: Option<PathBuf>,
    /// Whether the engine accepted WAL journaling.
    wal_mode: bool,
    /// Transaction state machine and savepoint stack.
    pub(crate) txn: TransactionController,
    /// Operation counters.
    pub(crate) stats: DatabaseStats,
    /// Open collection handles, keyed by name. Entries are never removed.
    registry: RwLock<HashMap<String, Arc<CollectionState>>>,
    /// Cleared by `close()`; all operations check it first.
    open: AtomicBool,
}

impl Shared {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Locks the connection after checking the handle is open.
    pub(crate) fn lock(
        &self,
    ) -> CoreResult<ReentrantMutexGuard<'_, RefCell<Connection>>> {
        self.ensure_open()?;
        Ok(self.conn.lock())
    }

    /// Runs `f` inside the current transaction if one is open, otherwise
    /// inside a transient one that commits on success.
    ///
    /// Multi-statement write operations use this to stay all-or-nothing in
    /// auto-commit mode without disturbing an explicit transaction.
    pub(crate) fn with_write_scope<T>(
        &self,
        f: impl FnOnce(&Connection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let guard = self.lock()?;
        let conn = guard.borrow();
        if self.txn.in_transaction() {
            return f(&conn);
        }
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    /// Database file size in bytes; 0 for in-memory databases.
    pub(crate) fn file_size(&self) -> u64 {
        self.path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len())
    }

    pub(crate) fn wal_mode(&self) -> bool {
        self.wal_mode
    }
}

/// The main database handle.
///
/// # Opening a database
///
/// ```rust,ignore
/// use jotdb_core::{Config, Database};
///
/// let db = Database::open("app.db")?;
/// let users = db.collection("users", &["email"])?;
///
/// let id = users.insert(&doc)?;
/// let hits = users.search("email", &"a@x".into(), None, None)?;
/// ```
///
/// For tests, `Database::open_in_memory()` gives a non-persistent database.
///
/// # Transactions
///
/// Writes outside a transaction commit immediately. `transaction()` gives a
/// scope that commits on `Ok` and rolls back on `Err`; entered while a
/// transaction is already open it degrades to a savepoint, so scopes nest.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Opens (or creates) a database file with default configuration.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens (or creates) a database file with custom configuration.
    ///
    /// Sets up WAL journaling, the busy timeout, and the `REGEXP` function,
    /// then opens the default `documents` collection with the configured
    /// indexed fields.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` when another process holds the file past
    /// the busy timeout, and `IndexSchemaMismatch` when the existing
    /// default collection carries a different indexed set.
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()), config)
    }

    /// Opens a fresh in-memory database for testing.
    ///
    /// In-memory databases cannot journal in WAL mode; everything else
    /// behaves identically.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None, Config::default())
    }

    /// Opens an in-memory database with custom configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None, config)
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        config: Config,
    ) -> CoreResult<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        // journal_mode returns the mode actually in effect; in-memory
        // databases report "memory" and that is fine.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        dialect::register_regexp(&conn)?;

        let shared = Arc::new(Shared {
            conn: ReentrantMutex::new(RefCell::new(conn)),
            path,
            wal_mode: mode.eq_ignore_ascii_case("wal"),
            txn: TransactionController::new(),
            stats: DatabaseStats::default(),
            registry: RwLock::new(HashMap::new()),
            open: AtomicBool::new(true),
        });

        let db = Self { shared };
        debug!(wal = db.shared.wal_mode, "database opened");

        // The default collection always exists.
        let indexed: Vec<&str> = config.indexed_fields.iter().map(String::as_str).collect();
        db.collection_inner(dialect::DEFAULT_COLLECTION, &indexed)?;
        Ok(db)
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Opens (or creates) a named collection with the given indexed fields.
    ///
    /// Construction is idempotent: repeated calls with the same declaration
    /// return handles onto the same cached state. Re-declaring an existing
    /// collection with a different indexed set fails with
    /// `IndexSchemaMismatch`; callers migrate instead.
    ///
    /// The name `documents` is reserved for the default collection.
    pub fn collection(&self, name: &str, indexed_fields: &[&str]) -> CoreResult<Collection> {
        if name == dialect::DEFAULT_COLLECTION {
            return Err(CoreError::invalid_field(
                "'documents' is reserved for the default collection",
            ));
        }
        self.collection_inner(name, indexed_fields)
    }

    fn collection_inner(&self, name: &str, indexed_fields: &[&str]) -> CoreResult<Collection> {
        self.shared.ensure_open()?;
        dialect::validate_ident(name, "collection name")?;

        if let Some(state) = self.shared.registry.read().get(name) {
            state.check_declaration(indexed_fields)?;
            return Ok(Collection::from_state(
                Arc::clone(&self.shared),
                Arc::clone(state),
            ));
        }

        let state = CollectionState::open(&self.shared, name, indexed_fields)?;
        let state = Arc::new(state);
        let mut registry = self.shared.registry.write();
        // Another thread may have raced us here; first writer wins.
        let state = registry
            .entry(name.to_string())
            .or_insert(state)
            .clone();
        drop(registry);
        state.check_declaration(indexed_fields)?;
        debug!(collection = name, "collection opened");
        Ok(Collection::from_state(Arc::clone(&self.shared), state))
    }

    /// Returns the default `documents` collection.
    pub fn default_collection(&self) -> CoreResult<Collection> {
        let state = self
            .shared
            .registry
            .read()
            .get(dialect::DEFAULT_COLLECTION)
            .cloned()
            .ok_or(CoreError::DatabaseClosed)?;
        Ok(Collection::from_state(Arc::clone(&self.shared), state))
    }

    /// Lists the names of all collections in the database file.
    pub fn collections(&self) -> CoreResult<Vec<String>> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ORDER BY name",
        )?;
        let prefix = format!("{}%", dialect::TABLE_PREFIX);
        let names = stmt
            .query_map([prefix], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names
            .into_iter()
            .map(|n| n[dialect::TABLE_PREFIX.len()..].to_string())
            .collect())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins an explicit transaction.
    ///
    /// Fails with `InvalidTransactionState` if one is already open.
    pub fn begin(&self) -> CoreResult<()> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.txn.begin(&conn)?;
        self.shared.stats.record_transaction_start();
        Ok(())
    }

    /// Commits the open transaction.
    pub fn commit(&self) -> CoreResult<()> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.txn.commit(&conn)?;
        self.shared.stats.record_transaction_commit();
        Ok(())
    }

    /// Rolls back the open transaction.
    pub fn rollback(&self) -> CoreResult<()> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.txn.rollback(&conn)?;
        self.shared.stats.record_transaction_rollback();
        Ok(())
    }

    /// Pushes a savepoint inside the open transaction and returns its name.
    ///
    /// With `None` a fresh `sp_<n>` name is allocated.
    pub fn savepoint(&self, name: Option<&str>) -> CoreResult<String> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.txn.savepoint(&conn, name)
    }

    /// Rolls back to a savepoint, discarding everything since it.
    pub fn rollback_to(&self, name: &str) -> CoreResult<()> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.txn.rollback_to(&conn, name)
    }

    /// Releases (commits) a savepoint.
    pub fn release(&self, name: &str) -> CoreResult<()> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.txn.release(&conn, name)
    }

    /// Whether an explicit transaction is open on this handle.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.shared.txn.in_transaction()
    }

    /// Runs `f` in a transaction scope.
    ///
    /// On `Ok` the scope commits; on `Err` it rolls back and the error is
    /// returned. Entered while a transaction is already open, the scope
    /// transparently degrades to a savepoint, so nested scopes behave like
    /// nested transactions.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Database) -> CoreResult<T>,
    ) -> CoreResult<T> {
        // Hold the connection lock across the scope; it is reentrant, so
        // the closure's own operations lock again without deadlocking.
        let guard = self.shared.lock()?;
        let conn = guard.borrow();

        if self.shared.txn.in_transaction() {
            let sp = self.shared.txn.savepoint(&conn, None)?;
            return match f(self) {
                Ok(value) => {
                    self.shared.txn.release(&conn, &sp)?;
                    Ok(value)
                }
                Err(err) => {
                    self.shared.txn.rollback_to(&conn, &sp)?;
                    self.shared.txn.release(&conn, &sp)?;
                    Err(err)
                }
            };
        }

        self.shared.txn.begin(&conn)?;
        self.shared.stats.record_transaction_start();
        match f(self) {
            Ok(value) => {
                self.shared.txn.commit(&conn)?;
                self.shared.stats.record_transaction_commit();
                Ok(value)
            }
            Err(err) => {
                self.shared.txn.rollback(&conn)?;
                self.shared.stats.record_transaction_rollback();
                Err(err)
            }
        }
    }

    // ========================================================================
    // Default-collection forwarding
    // ========================================================================

    /// Inserts a document into the default collection.
    pub fn insert(&self, doc: &Document) -> CoreResult<DocId> {
        self.default_collection()?.insert(doc)
    }

    /// Inserts many documents into the default collection, all-or-nothing.
    pub fn insert_many(&self, docs: &[Document]) -> CoreResult<Vec<DocId>> {
        self.default_collection()?.insert_many(docs)
    }

    /// Searches the default collection by exact value.
    pub fn search(
        &self,
        key: &str,
        value: &Value,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> CoreResult<Vec<Record>> {
        self.default_collection()?.search(key, value, limit, offset)
    }

    /// Multi-field equality search on the default collection.
    pub fn search_optimized(&self, pairs: &[(&str, Value)]) -> CoreResult<Vec<Record>> {
        self.default_collection()?.search_optimized(pairs)
    }

    /// Regex search on the default collection.
    pub fn search_pattern(
        &self,
        key: &str,
        pattern: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> CoreResult<Vec<Record>> {
        self.default_collection()?
            .search_pattern(key, pattern, limit, offset)
    }

    /// Set-membership search on the default collection.
    pub fn find_any(&self, key: &str, values: &[Value]) -> CoreResult<Vec<Record>> {
        self.default_collection()?.find_any(key, values)
    }

    /// Array-subset search on the default collection.
    pub fn find_all(&self, key: &str, values: &[Value]) -> CoreResult<Vec<Record>> {
        self.default_collection()?.find_all(key, values)
    }

    /// Shallow-merges `patch` into default-collection rows matching
    /// `key = value`.
    pub fn update(&self, key: &str, value: &Value, patch: &Document) -> CoreResult<bool> {
        self.default_collection()?.update(key, value, patch)
    }

    /// Removes default-collection rows matching `key = value`.
    pub fn remove(&self, key: &str, value: &Value) -> CoreResult<usize> {
        self.default_collection()?.remove(key, value)
    }

    /// Removes all rows from the default collection.
    pub fn purge(&self) -> CoreResult<usize> {
        self.default_collection()?.purge()
    }

    /// Retrieves default-collection rows in id order.
    pub fn all(&self, limit: Option<u64>, offset: Option<u64>) -> CoreResult<Vec<Record>> {
        self.default_collection()?.all(limit, offset)
    }

    /// Cursor-paginates the default collection.
    pub fn all_cursor(&self, after_id: Option<DocId>, limit: u64) -> CoreResult<Page> {
        self.default_collection()?.all_cursor(after_id, limit)
    }

    /// Fetches a default-collection document by id.
    pub fn get_by_id(&self, id: DocId) -> CoreResult<Option<Record>> {
        self.default_collection()?.get_by_id(id)
    }

    /// Storage statistics of the default collection.
    pub fn stats(&self) -> CoreResult<CollectionStats> {
        self.default_collection()?.stats()
    }

    /// Query plan for an exact search on the default collection.
    pub fn explain_search(&self, key: &str, value: &Value) -> CoreResult<Vec<String>> {
        self.default_collection()?.explain_search(key, value)
    }

    /// Query plan for a full retrieval of the default collection.
    pub fn explain_all(&self) -> CoreResult<Vec<String>> {
        self.default_collection()?.explain_all()
    }

    /// Indexed fields of the default collection.
    pub fn get_indexed_fields(&self) -> CoreResult<Vec<String>> {
        Ok(self.default_collection()?.get_indexed_fields())
    }

    // ========================================================================
    // Lifecycle and telemetry
    // ========================================================================

    /// Operation counters for this handle.
    #[must_use]
    pub fn metrics(&self) -> &DatabaseStats {
        &self.shared.stats
    }

    /// Closes the handle. Idempotent; later operations fail with
    /// `DatabaseClosed`. The connection itself is released when the last
    /// clone drops.
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
    }

    /// Whether the handle is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.path)
            .field("wal_mode", &self.shared.wal_mode)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}
