//! Collections: the unit of document storage.
//!
//! Each collection owns one physical table
//! `collection_<name>(id INTEGER PRIMARY KEY, data TEXT NOT NULL)` plus one
//! virtual generated column per indexed JSON path and a B-tree index on
//! each. The generated columns cost nothing on write; only the indexes
//! materialise the extracted values.
//!
//! All CRUD and query operations live here; predicates are compiled by
//! [`crate::query`] and SQL fragments come from [`crate::dialect`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::database::Shared;
use crate::dialect;
use crate::error::{CoreError, CoreResult};
use crate::query::{self, CmpOp, Predicate};
use crate::stats::{CollectionStats, Page};
use crate::{DocId, Document, Record};

/// Shared per-collection state: name, table, and the live indexed set.
pub(crate) struct CollectionState {
    name: String,
    table: String,
    indexed: RwLock<Vec<String>>,
}

impl CollectionState {
    /// Opens or creates the backing table for `name` with the declared
    /// indexed fields.
    ///
    /// An existing table is reused only when its generated-column set
    /// equals the declaration; otherwise `IndexSchemaMismatch` is returned
    /// and the caller must migrate. In-place alteration does exist, but
    /// only through [`Collection::create_index`].
    pub(crate) fn open(shared: &Shared, name: &str, declared: &[&str]) -> CoreResult<Self> {
        let mut seen = HashSet::new();
        for field in declared {
            dialect::validate_indexed_field(field)?;
            if !seen.insert(*field) {
                return Err(CoreError::invalid_field(format!(
                    "indexed field '{field}' declared twice"
                )));
            }
        }

        let table = dialect::table_name(name);
        let guard = shared.lock()?;
        let conn = guard.borrow();

        let existing = existing_generated_columns(&conn, &table)?;
        let indexed = match existing {
            Some(existing) => {
                let declared_set: HashSet<&str> = declared.iter().copied().collect();
                let existing_set: HashSet<&str> =
                    existing.iter().map(String::as_str).collect();
                if declared_set != existing_set {
                    return Err(CoreError::index_schema_mismatch(
                        name,
                        &existing,
                        &declared.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
                    ));
                }
                existing
            }
            None => {
                create_table(shared, &conn, &table, declared)?;
                debug!(collection = name, table = %table, "collection table created");
                declared.iter().map(|s| (*s).to_string()).collect()
            }
        };

        Ok(Self {
            name: name.to_string(),
            table,
            indexed: RwLock::new(indexed),
        })
    }

    /// Verifies a (re-)declaration against the live indexed set.
    pub(crate) fn check_declaration(&self, declared: &[&str]) -> CoreResult<()> {
        let current = self.indexed.read();
        let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
        let declared_set: HashSet<&str> = declared.iter().copied().collect();
        if current_set != declared_set {
            return Err(CoreError::index_schema_mismatch(
                &self.name,
                &current,
                &declared.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
            ));
        }
        Ok(())
    }
}

/// Reads the virtual generated columns of `table`, or `None` when the table
/// does not exist.
fn existing_generated_columns(
    conn: &Connection,
    table: &str,
) -> CoreResult<Option<Vec<String>>> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(None);
    }

    // table_xinfo lists hidden columns too; flag 2 marks VIRTUAL generated.
    let mut stmt = conn.prepare(&format!("PRAGMA table_xinfo(\"{table}\")"))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get("name")?;
            let hidden: i64 = row.get("hidden")?;
            Ok((name, hidden))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(
        columns
            .into_iter()
            .filter(|(_, hidden)| *hidden == 2)
            .map(|(name, _)| name)
            .collect(),
    ))
}

fn create_table(
    shared: &Shared,
    conn: &Connection,
    table: &str,
    indexed: &[&str],
) -> CoreResult<()> {
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "data TEXT NOT NULL".to_string(),
    ];
    columns.extend(indexed.iter().map(|f| dialect::generated_column(f)));

    let mut ddl = format!("CREATE TABLE \"{table}\" ({});", columns.join(", "));
    for field in indexed {
        let index = dialect::index_name(table, field);
        ddl.push_str(&format!(
            "CREATE INDEX \"{index}\" ON \"{table}\" ({});",
            dialect::column_ref(field)
        ));
    }
    shared.stats.record_statement();
    conn.execute_batch(&ddl)?;
    Ok(())
}

/// A named collection of documents.
///
/// Handles are cheap to clone; all clones of one name share state through
/// the database's registry. Obtained from [`crate::Database::collection`].
#[derive(Clone)]
pub struct Collection {
    shared: Arc<Shared>,
    state: Arc<CollectionState>,
}

impl Collection {
    pub(crate) fn from_state(shared: Arc<Shared>, state: Arc<CollectionState>) -> Self {
        Self { shared, state }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Indexed JSON paths, in column order.
    #[must_use]
    pub fn get_indexed_fields(&self) -> Vec<String> {
        self.state.indexed.read().clone()
    }

    fn indexed_set(&self) -> HashSet<String> {
        self.state.indexed.read().iter().cloned().collect()
    }

    fn table(&self) -> &str {
        &self.state.table
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts a document and returns its assigned id.
    pub fn insert(&self, doc: &Document) -> CoreResult<DocId> {
        let text = serde_json::to_string(doc)
            .map_err(|e| CoreError::invalid_document(e.to_string()))?;
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO \"{}\" (data) VALUES (?1)",
            self.table()
        ))?;
        stmt.execute([&text])?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts an arbitrary JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// `InvalidDocument` when the value is not a JSON object.
    pub fn insert_value(&self, value: &Value) -> CoreResult<DocId> {
        match value.as_object() {
            Some(doc) => self.insert(doc),
            None => Err(CoreError::invalid_document(
                "documents must be JSON objects",
            )),
        }
    }

    /// Inserts many documents, all-or-nothing, returning ids in input order.
    ///
    /// Runs inside the current transaction when one is open, otherwise
    /// inside a transient one.
    pub fn insert_many(&self, docs: &[Document]) -> CoreResult<Vec<DocId>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let mut texts = Vec::with_capacity(docs.len());
        for doc in docs {
            texts.push(
                serde_json::to_string(doc)
                    .map_err(|e| CoreError::invalid_document(e.to_string()))?,
            );
        }

        let sql = format!("INSERT INTO \"{}\" (data) VALUES (?1)", self.table());
        self.shared.with_write_scope(|conn| {
            let mut ids = Vec::with_capacity(texts.len());
            let mut stmt = conn.prepare_cached(&sql)?;
            for text in &texts {
                self.shared.stats.record_statement();
                stmt.execute([text])?;
                ids.push(conn.last_insert_rowid());
            }
            Ok(ids)
        })
    }

    /// Shallow-merges `patch` into every row where `key = value`.
    ///
    /// The merge happens at the top level only: patch values overwrite,
    /// nested objects are replaced wholesale. Returns whether any row
    /// matched.
    pub fn update(&self, key: &str, value: &Value, patch: &Document) -> CoreResult<bool> {
        dialect::validate_field(key)?;
        if value.is_null() {
            return Err(CoreError::invalid_field("update value must not be null"));
        }

        let compiled = query::compile(
            &[Predicate::eq(key, value.clone())],
            &self.indexed_set(),
        )?;
        let select = format!(
            "SELECT id, data FROM \"{}\" WHERE {}",
            self.table(),
            compiled.where_clause
        );
        let write = format!("UPDATE \"{}\" SET data = ?1 WHERE id = ?2", self.table());

        self.shared.with_write_scope(|conn| {
            self.shared.stats.record_statement();
            let mut stmt = conn.prepare_cached(&select)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(compiled.params.iter()), |row| {
                    Ok((row.get::<_, DocId>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            if rows.is_empty() {
                return Ok(false);
            }

            let mut update_stmt = conn.prepare_cached(&write)?;
            for (id, text) in rows {
                let mut doc = parse_document(id, &text)?;
                for (k, v) in patch {
                    doc.insert(k.clone(), v.clone());
                }
                let merged = serde_json::to_string(&doc)
                    .map_err(|e| CoreError::invalid_document(e.to_string()))?;
                self.shared.stats.record_statement();
                update_stmt.execute(rusqlite::params![merged, id])?;
            }
            Ok(true)
        })
    }

    /// Replaces the payload of the row with the given id.
    ///
    /// Returns whether the row existed.
    pub fn replace(&self, id: DocId, doc: &Document) -> CoreResult<bool> {
        let text = serde_json::to_string(doc)
            .map_err(|e| CoreError::invalid_document(e.to_string()))?;
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&format!(
            "UPDATE \"{}\" SET data = ?1 WHERE id = ?2",
            self.table()
        ))?;
        Ok(stmt.execute(rusqlite::params![text, id])? > 0)
    }

    /// Removes rows where `key = value`, returning how many were removed.
    pub fn remove(&self, key: &str, value: &Value) -> CoreResult<usize> {
        dialect::validate_field(key)?;
        if value.is_null() {
            return Err(CoreError::invalid_field("remove value must not be null"));
        }
        let compiled =
            query::compile(&[Predicate::eq(key, value.clone())], &self.indexed_set())?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE {}",
            self.table(),
            compiled.where_clause
        );
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.execute(rusqlite::params_from_iter(compiled.params.iter()))?)
    }

    /// Removes the row with the given id. Returns whether it existed.
    pub fn remove_by_id(&self, id: DocId) -> CoreResult<bool> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&format!(
            "DELETE FROM \"{}\" WHERE id = ?1",
            self.table()
        ))?;
        Ok(stmt.execute([id])? > 0)
    }

    /// Deletes rows matching a non-empty predicate conjunction, returning
    /// the count removed.
    pub fn delete_where(&self, predicates: &[Predicate]) -> CoreResult<usize> {
        if predicates.is_empty() {
            return Err(CoreError::invalid_field(
                "delete_where requires at least one predicate",
            ));
        }
        let compiled = query::compile(predicates, &self.indexed_set())?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE {}",
            self.table(),
            compiled.where_clause
        );
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.execute(rusqlite::params_from_iter(compiled.params.iter()))?)
    }

    /// Removes every row. The table and its indexes persist.
    pub fn purge(&self) -> CoreResult<usize> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt =
            conn.prepare_cached(&format!("DELETE FROM \"{}\"", self.table()))?;
        Ok(stmt.execute([])?)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetches a document by id.
    pub fn get_by_id(&self, id: DocId) -> CoreResult<Option<Record>> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT data FROM \"{}\" WHERE id = ?1",
            self.table()
        ))?;
        let text = match stmt.query_row([id], |row| row.get::<_, String>(0)) {
            Ok(text) => text,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        drop(stmt);
        Ok(Some(Record {
            id,
            doc: parse_document(id, &text)?,
        }))
    }

    /// Searches by exact value on one key.
    ///
    /// Routed to the generated column when `key` is indexed, otherwise to a
    /// JSON-extract scan.
    pub fn search(
        &self,
        key: &str,
        value: &Value,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> CoreResult<Vec<Record>> {
        dialect::validate_field(key)?;
        self.find(&[Predicate::eq(key, value.clone())], limit, offset)
    }

    /// AND of equality predicates over several fields.
    ///
    /// Generated-column and JSON-extract conditions mix freely in one
    /// statement; index selection is left to the engine. With no pairs this
    /// degrades to `all()`.
    pub fn search_optimized(&self, pairs: &[(&str, Value)]) -> CoreResult<Vec<Record>> {
        if pairs.is_empty() {
            return self.all(None, None);
        }
        let predicates: Vec<Predicate> = pairs
            .iter()
            .map(|(key, value)| Predicate::eq(*key, value.clone()))
            .collect();
        self.find(&predicates, None, None)
    }

    /// Regex search on one key. Always a full scan.
    pub fn search_pattern(
        &self,
        key: &str,
        pattern: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> CoreResult<Vec<Record>> {
        dialect::validate_field(key)?;
        dialect::validate_pattern(pattern)?;

        let mut sql = format!(
            "SELECT id, data FROM \"{}\" WHERE {} REGEXP ?1",
            self.table(),
            dialect::json_extract(key)
        );
        let mut params = vec![rusqlite::types::Value::Text(pattern.to_string())];
        query::push_limit_offset(&mut sql, &mut params, limit, offset);
        self.query_records(&sql, &params)
    }

    /// Rows whose `key` equals any of `values`. Indexed when `key` is.
    pub fn find_any(&self, key: &str, values: &[Value]) -> CoreResult<Vec<Record>> {
        dialect::validate_field(key)?;
        if values.is_empty() {
            return Ok(Vec::new());
        }
        self.find(
            &[Predicate::new(key, CmpOp::In, Value::Array(values.to_vec()))],
            None,
            None,
        )
    }

    /// Rows whose `key` holds a JSON array containing every element of
    /// `values`.
    ///
    /// Candidates with a non-null value at the key are fetched, then
    /// filtered in memory; rows whose value is not an array silently do not
    /// match.
    pub fn find_all(&self, key: &str, values: &[Value]) -> CoreResult<Vec<Record>> {
        dialect::validate_field(key)?;
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, data FROM \"{}\" WHERE {} IS NOT NULL",
            self.table(),
            dialect::json_extract(key)
        );
        let candidates = self.query_records(&sql, &[])?;
        Ok(candidates
            .into_iter()
            .filter(|record| match record.doc.get(key) {
                Some(Value::Array(items)) => values.iter().all(|v| items.contains(v)),
                _ => false,
            })
            .collect())
    }

    /// Runs a compiled predicate conjunction. The entry point the ODM uses.
    pub fn find(
        &self,
        predicates: &[Predicate],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> CoreResult<Vec<Record>> {
        let compiled = query::compile(predicates, &self.indexed_set())?;
        let mut sql = format!("SELECT id, data FROM \"{}\"", self.table());
        if !compiled.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compiled.where_clause);
        }
        let mut params = compiled.params;
        query::push_limit_offset(&mut sql, &mut params, limit, offset);
        self.query_records(&sql, &params)
    }

    /// Counts rows matching a predicate conjunction.
    pub fn count(&self, predicates: &[Predicate]) -> CoreResult<u64> {
        let compiled = query::compile(predicates, &self.indexed_set())?;
        let mut sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table());
        if !compiled.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compiled.where_clause);
        }
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(&sql)?;
        let n: i64 = stmt.query_row(
            rusqlite::params_from_iter(compiled.params.iter()),
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Retrieves rows in ascending id order.
    pub fn all(&self, limit: Option<u64>, offset: Option<u64>) -> CoreResult<Vec<Record>> {
        let mut sql = format!("SELECT id, data FROM \"{}\" ORDER BY id", self.table());
        let mut params = Vec::new();
        query::push_limit_offset(&mut sql, &mut params, limit, offset);
        self.query_records(&sql, &params)
    }

    /// Cursor-based pagination: rows with `id > after_id`, ascending.
    ///
    /// Stable under concurrent inserts and O(log n) per page, unlike
    /// growing offsets.
    pub fn all_cursor(&self, after_id: Option<DocId>, limit: u64) -> CoreResult<Page> {
        if limit == 0 {
            return Err(CoreError::invalid_field("cursor limit must be positive"));
        }
        let sql = format!(
            "SELECT id, data FROM \"{}\" WHERE id > ?1 ORDER BY id LIMIT ?2",
            self.table()
        );
        let params = [
            rusqlite::types::Value::Integer(after_id.unwrap_or(0)),
            rusqlite::types::Value::Integer(limit as i64),
        ];
        let documents = self.query_records(&sql, &params)?;
        let next_cursor = documents.last().map(|r| r.id);
        let has_more = documents.len() as u64 == limit;
        Ok(Page {
            documents,
            next_cursor,
            has_more,
        })
    }

    // ========================================================================
    // Indexing, stats, explain
    // ========================================================================

    /// Adds an index on a new field, backfilling via a generated column.
    ///
    /// Returns `false` when the field is already indexed. The virtual
    /// column costs nothing for existing rows; only the index build reads
    /// them.
    pub fn create_index(&self, field: &str) -> CoreResult<bool> {
        dialect::validate_indexed_field(field)?;
        let mut indexed = self.state.indexed.write();
        if indexed.iter().any(|f| f == field) {
            return Ok(false);
        }

        let table = self.table();
        let index = dialect::index_name(table, field);
        let ddl = format!(
            "ALTER TABLE \"{table}\" ADD COLUMN {};\
             CREATE INDEX \"{index}\" ON \"{table}\" ({});",
            dialect::generated_column(field),
            dialect::column_ref(field)
        );
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        conn.execute_batch(&ddl)?;
        indexed.push(field.to_string());
        debug!(collection = %self.state.name, field, "index created");
        Ok(true)
    }

    /// Storage statistics for this collection.
    pub fn stats(&self) -> CoreResult<CollectionStats> {
        Ok(CollectionStats {
            collection: self.state.name.clone(),
            document_count: self.count(&[])?,
            database_size_bytes: self.shared.file_size(),
            indexed_fields: self.get_indexed_fields(),
            wal_mode: self.shared.wal_mode(),
        })
    }

    /// Query plan for an exact search, as the engine reports it.
    pub fn explain_search(&self, key: &str, value: &Value) -> CoreResult<Vec<String>> {
        dialect::validate_field(key)?;
        let compiled =
            query::compile(&[Predicate::eq(key, value.clone())], &self.indexed_set())?;
        let sql = format!(
            "EXPLAIN QUERY PLAN SELECT id, data FROM \"{}\" WHERE {}",
            self.table(),
            compiled.where_clause
        );
        self.query_plan(&sql, &compiled.params)
    }

    /// Query plan for a full retrieval.
    pub fn explain_all(&self) -> CoreResult<Vec<String>> {
        let sql = format!(
            "EXPLAIN QUERY PLAN SELECT id, data FROM \"{}\" ORDER BY id",
            self.table()
        );
        self.query_plan(&sql, &[])
    }

    fn query_plan(
        &self,
        sql: &str,
        params: &[rusqlite::types::Value],
    ) -> CoreResult<Vec<String>> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                // (id, parent, notused, detail)
                row.get::<_, String>(3)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[rusqlite::types::Value],
    ) -> CoreResult<Vec<Record>> {
        let guard = self.shared.lock()?;
        let conn = guard.borrow();
        self.shared.stats.record_statement();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, DocId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, text) in rows {
            records.push(Record {
                id,
                doc: parse_document(id, &text)?,
            });
        }
        Ok(records)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.state.name)
            .field("indexed_fields", &self.get_indexed_fields())
            .finish_non_exhaustive()
    }
}

/// Parses a stored JSON payload back into a document.
fn parse_document(id: DocId, text: &str) -> CoreResult<Document> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CoreError::CorruptDocument {
            id,
            message: e.to_string(),
        })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CoreError::CorruptDocument {
            id,
            message: "payload is not a JSON object".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn users(db: &Database) -> Collection {
        db.collection("users", &["name", "age", "email"]).unwrap()
    }

    #[test]
    fn insert_assigns_monotonic_ids() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        let a = users.insert(&doc(json!({"name": "Alice"}))).unwrap();
        let b = users.insert(&doc(json!({"name": "Bob"}))).unwrap();
        assert!(b > a);
    }

    #[test]
    fn insert_value_rejects_non_objects() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        assert!(matches!(
            users.insert_value(&json!(0.1234)),
            Err(CoreError::InvalidDocument { .. })
        ));
        assert!(matches!(
            users.insert_value(&Value::Null),
            Err(CoreError::InvalidDocument { .. })
        ));
        assert!(users.insert_value(&json!({"key": "value"})).is_ok());
    }

    #[test]
    fn round_trip_preserves_document() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        let original = doc(json!({
            "name": "Alice",
            "age": 30,
            "active": true,
            "score": 1.25,
            "tags": ["a", "b"],
            "address": {"city": "NYC", "zip": "10001"},
            "note": null
        }));
        let id = users.insert(&original).unwrap();
        let loaded = users.get_by_id(id).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.doc, original);
    }

    #[test]
    fn search_exact_indexed_and_not() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"name": "Alice", "city": "NYC"})),
                doc(json!({"name": "Bob", "city": "LA"})),
            ])
            .unwrap();

        // Indexed key.
        let hits = users.search("name", &json!("Alice"), None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc["city"], json!("NYC"));

        // Non-indexed key goes through json_extract and agrees.
        let hits = users.search("city", &json!("NYC"), None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc["name"], json!("Alice"));
    }

    #[test]
    fn index_transparency() {
        let db = Database::open_in_memory().unwrap();
        let indexed = db.collection("a", &["k"]).unwrap();
        let scanned = db.collection("b", &[]).unwrap();
        for i in 0..20 {
            let d = doc(json!({"k": i % 5, "i": i}));
            indexed.insert(&d).unwrap();
            scanned.insert(&d).unwrap();
        }
        let from_index: Vec<_> = indexed
            .search("k", &json!(3), None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.doc)
            .collect();
        let from_scan: Vec<_> = scanned
            .search("k", &json!(3), None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.doc)
            .collect();
        assert_eq!(from_index, from_scan);
    }

    #[test]
    fn search_by_id_key_uses_extract() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"id": 1, "name": "Alice"})),
                doc(json!({"id": 2, "name": "Bob"})),
            ])
            .unwrap();

        // The payload's own "id" key, not the rowid.
        let hits = users.search("id", &json!(2), None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc["name"], json!("Bob"));
    }

    #[test]
    fn search_rejects_bad_keys() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        assert!(matches!(
            users.search("", &json!(1), None, None),
            Err(CoreError::InvalidField { .. })
        ));
        assert!(matches!(
            users.search("a b", &json!(1), None, None),
            Err(CoreError::InvalidField { .. })
        ));
    }

    #[test]
    fn parameters_are_bound_not_spliced() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users.insert(&doc(json!({"key": "value"}))).unwrap();
        let hits = users
            .search("key", &json!("value OR 1=1"), None, None)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_optimized_multi_field() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"name": "Alice", "age": 30, "city": "NYC"})),
                doc(json!({"name": "Bob", "age": 30, "city": "LA"})),
                doc(json!({"name": "Alice", "age": 25, "city": "NYC"})),
            ])
            .unwrap();

        let hits = users
            .search_optimized(&[("name", json!("Alice")), ("age", json!(30))])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc["city"], json!("NYC"));

        // Mixing indexed and non-indexed fields in one statement.
        let hits = users
            .search_optimized(&[
                ("name", json!("Alice")),
                ("age", json!(25)),
                ("city", json!("NYC")),
            ])
            .unwrap();
        assert_eq!(hits.len(), 1);

        // No pairs degrades to all().
        assert_eq!(users.search_optimized(&[]).unwrap().len(), 3);
    }

    #[test]
    fn search_pattern_regex() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"email": "alice@example.com"})),
                doc(json!({"email": "bob@example.com"})),
                doc(json!({"email": "alice@test.org"})),
            ])
            .unwrap();

        let hits = users
            .search_pattern("email", r".*@example\.com$", None, None)
            .unwrap();
        assert_eq!(hits.len(), 2);

        let none = users
            .search_pattern("email", r".*@nowhere\.net$", None, None)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn search_pattern_validates_inputs() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        assert!(matches!(
            users.search_pattern("", "x", None, None),
            Err(CoreError::InvalidField { .. })
        ));
        assert!(matches!(
            users.search_pattern("name", "", None, None),
            Err(CoreError::InvalidField { .. })
        ));
        assert!(matches!(
            users.search_pattern("name", "(unclosed", None, None),
            Err(CoreError::InvalidField { .. })
        ));
    }

    #[test]
    fn find_any_membership() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        for i in 1..=4 {
            users.insert(&doc(json!({"key": format!("value{i}")}))).unwrap();
        }
        // "key" is not indexed here; membership still works through extract.
        let hits = users
            .find_any(
                "key",
                &[json!("value1"), json!("value3"), json!("value5")],
            )
            .unwrap();
        assert_eq!(hits.len(), 2);

        assert!(users.find_any("key", &[]).unwrap().is_empty());
    }

    #[test]
    fn find_all_subset_match() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"tags": ["rust", "database", "sqlite"]})),
                doc(json!({"tags": ["rust", "web"]})),
                doc(json!({"tags": ["database", "nosql"]})),
                doc(json!({"tags": ["rust", "database"]})),
                doc(json!({"tags": "not-an-array"})),
            ])
            .unwrap();

        let hits = users
            .find_all("tags", &[json!("rust"), json!("database")])
            .unwrap();
        assert_eq!(hits.len(), 2);

        assert!(users.find_all("tags", &[]).unwrap().is_empty());
    }

    #[test]
    fn update_merges_top_level() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert(&doc(json!({"name": "Alice", "age": 30, "address": {"city": "NYC"}})))
            .unwrap();

        let changed = users
            .update(
                "name",
                &json!("Alice"),
                &doc(json!({"age": 31, "address": {"zip": "10001"}})),
            )
            .unwrap();
        assert!(changed);

        let alice = &users.search("name", &json!("Alice"), None, None).unwrap()[0];
        assert_eq!(alice.doc["age"], json!(31));
        // Nested objects are replaced, not merged.
        assert_eq!(alice.doc["address"], json!({"zip": "10001"}));

        // No match returns false, not an error.
        let changed = users
            .update("name", &json!("Nobody"), &doc(json!({"age": 1})))
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn update_validates_inputs() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users.insert(&doc(json!({"id": 1, "key": "value"}))).unwrap();
        assert!(matches!(
            users.update("", &json!(1), &doc(json!({"key": "v"}))),
            Err(CoreError::InvalidField { .. })
        ));
        assert!(matches!(
            users.update("id", &Value::Null, &doc(json!({"key": "v"}))),
            Err(CoreError::InvalidField { .. })
        ));
    }

    #[test]
    fn remove_and_purge() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"name": "Alice"})),
                doc(json!({"name": "Bob"})),
                doc(json!({"name": "Alice"})),
            ])
            .unwrap();

        assert_eq!(users.remove("name", &json!("Alice")).unwrap(), 2);
        assert!(matches!(
            users.remove("name", &Value::Null),
            Err(CoreError::InvalidField { .. })
        ));
        assert_eq!(users.purge().unwrap(), 1);
        assert!(users.all(None, None).unwrap().is_empty());
    }

    #[test]
    fn all_pagination() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        let docs: Vec<Document> = (0..10)
            .map(|i| doc(json!({"key": format!("value{i}")})))
            .collect();
        users.insert_many(&docs).unwrap();

        let page = users.all(Some(5), Some(0)).unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].doc["key"], json!("value0"));

        let rest = users.all(Some(5), Some(5)).unwrap();
        assert_eq!(rest[0].doc["key"], json!("value5"));

        let offset_only = users.all(None, Some(8)).unwrap();
        assert_eq!(offset_only.len(), 2);
    }

    #[test]
    fn cursor_pagination_pages_through() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        let docs: Vec<Document> = (0..250).map(|i| doc(json!({"n": i}))).collect();
        users.insert_many(&docs).unwrap();

        let first = users.all_cursor(None, 100).unwrap();
        assert_eq!(first.documents.len(), 100);
        assert!(first.has_more);

        let second = users.all_cursor(first.next_cursor, 100).unwrap();
        assert_eq!(second.documents.len(), 100);
        assert!(second.has_more);

        let third = users.all_cursor(second.next_cursor, 100).unwrap();
        assert_eq!(third.documents.len(), 50);
        assert!(!third.has_more);

        // Every row exactly once, ascending.
        let mut seen = Vec::new();
        for page in [&first, &second, &third] {
            seen.extend(page.documents.iter().map(|r| r.id));
        }
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seen, sorted);
        assert_eq!(seen.len(), 250);
    }

    #[test]
    fn cursor_pagination_empty() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        let page = users.all_cursor(None, 10).unwrap();
        assert!(page.documents.is_empty());
        assert_eq!(page.next_cursor, None);
        assert!(!page.has_more);

        assert!(matches!(
            users.all_cursor(None, 0),
            Err(CoreError::InvalidField { .. })
        ));
    }

    #[test]
    fn count_matches_filter_length() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        for age in [17, 18, 19, 20, 21] {
            users.insert(&doc(json!({"age": age}))).unwrap();
        }
        let preds = [
            Predicate::new("age", CmpOp::Gte, json!(18)),
            Predicate::new("age", CmpOp::Lt, json!(21)),
        ];
        let found = users.find(&preds, None, None).unwrap();
        assert_eq!(users.count(&preds).unwrap(), found.len() as u64);
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn delete_where_requires_predicates() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users.insert(&doc(json!({"name": "Alice"}))).unwrap();
        assert!(matches!(
            users.delete_where(&[]),
            Err(CoreError::InvalidField { .. })
        ));
        let removed = users
            .delete_where(&[Predicate::eq("name", json!("Alice"))])
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn explain_mentions_index_for_indexed_key() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users.insert(&doc(json!({"name": "Alice", "email": "a@x"}))).unwrap();

        let plan = users.explain_search("email", &json!("a@x")).unwrap().join("\n");
        assert!(
            plan.contains("idx_collection_users_email") || plan.contains("SEARCH"),
            "plan should use the index: {plan}"
        );

        // Non-indexed key scans.
        let plan = users.explain_search("city", &json!("NYC")).unwrap().join("\n");
        assert!(plan.contains("SCAN"), "plan should scan: {plan}");
    }

    #[test]
    fn dynamic_index_creation() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("people", &[]).unwrap();
        c.insert_many(&[
            doc(json!({"name": "Alice", "email": "alice@example.com"})),
            doc(json!({"name": "Bob", "email": "bob@example.com"})),
        ])
        .unwrap();

        assert!(!c.get_indexed_fields().contains(&"email".to_string()));
        assert!(c.create_index("email").unwrap());
        assert!(c.get_indexed_fields().contains(&"email".to_string()));

        // Existing rows are visible through the new index.
        let hits = c.search("email", &json!("bob@example.com"), None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc["name"], json!("Bob"));

        let plan = c.explain_search("email", &json!("bob@example.com")).unwrap().join("\n");
        assert!(plan.contains("idx_") || plan.contains("SEARCH"));

        // Second creation is a no-op.
        assert!(!c.create_index("email").unwrap());
        assert!(matches!(
            c.create_index("id"),
            Err(CoreError::InvalidField { .. })
        ));
    }

    #[test]
    fn stats_report_state() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        let docs: Vec<Document> = (0..100)
            .map(|i| doc(json!({"name": format!("u{i}")})))
            .collect();
        users.insert_many(&docs).unwrap();

        let stats = users.stats().unwrap();
        assert_eq!(stats.collection, "users");
        assert_eq!(stats.document_count, 100);
        assert!(stats.indexed_fields.contains(&"name".to_string()));
        // In-memory databases have no file and no WAL.
        assert_eq!(stats.database_size_bytes, 0);
        assert!(!stats.wal_mode);
    }

    #[test]
    fn null_equality_matches_stored_null() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users
            .insert_many(&[
                doc(json!({"name": "Alice", "note": null})),
                doc(json!({"name": "Bob", "note": "hi"})),
            ])
            .unwrap();

        let hits = users.search("note", &Value::Null, None, None).unwrap();
        // Stored null matches; Alice only (Bob has a value).
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc["name"], json!("Alice"));
    }

    #[test]
    fn collections_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let users = db.collection("users", &["user_id"]).unwrap();
        let orders = db.collection("orders", &["order_id"]).unwrap();

        users.insert(&doc(json!({"user_id": 1, "name": "Alice"}))).unwrap();
        orders.insert(&doc(json!({"order_id": 101, "amount": 99.99}))).unwrap();

        assert_eq!(users.all(None, None).unwrap().len(), 1);
        assert_eq!(orders.all(None, None).unwrap().len(), 1);
        assert!(users.all(None, None).unwrap()[0].doc.contains_key("name"));
        assert!(!users.all(None, None).unwrap()[0].doc.contains_key("amount"));
    }

    #[test]
    fn float_equality_is_exact() {
        let db = Database::open_in_memory().unwrap();
        let users = users(&db);
        users.insert(&doc(json!({"score": 0.1}))).unwrap();
        assert_eq!(users.search("score", &json!(0.1), None, None).unwrap().len(), 1);
        assert!(users.search("score", &json!(0.2), None, None).unwrap().is_empty());
    }
}
