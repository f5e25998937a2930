//! Statistics, counters, and pagination result types.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{DocId, Record};

/// Per-handle operation counters.
///
/// All counters are atomic and monotonically increasing; they can be read
/// while operations are in progress. The statement counter in particular
/// makes caching behaviour observable in tests (a cached read issues no new
/// statement).
#[derive(Debug, Default)]
pub struct DatabaseStats {
    /// Total SQL statements executed.
    statements: AtomicU64,
    /// Total transactions started (explicit `begin` or scope entry).
    transactions_started: AtomicU64,
    /// Total transactions committed.
    transactions_committed: AtomicU64,
    /// Total transactions rolled back.
    transactions_rolled_back: AtomicU64,
}

impl DatabaseStats {
    pub(crate) fn record_statement(&self) {
        self.statements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Total SQL statements executed on this handle.
    #[must_use]
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Total transactions started.
    #[must_use]
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Total transactions committed.
    #[must_use]
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Total transactions rolled back.
    #[must_use]
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }
}

/// A snapshot of one collection's storage state.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStats {
    /// Collection name.
    pub collection: String,
    /// Number of documents stored.
    pub document_count: u64,
    /// Size of the database file in bytes (0 for in-memory databases).
    pub database_size_bytes: u64,
    /// Indexed JSON paths, in declaration order.
    pub indexed_fields: Vec<String>,
    /// Whether the database is journaling in WAL mode.
    pub wal_mode: bool,
}

/// One page of cursor-based pagination.
///
/// `next_cursor` is the last returned id, suitable to pass as `after_id`
/// for the following page; `has_more` is set when the page came back full.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Documents in ascending id order.
    pub documents: Vec<Record>,
    /// Cursor for the next page, `None` when this page was empty.
    pub next_cursor: Option<DocId>,
    /// Whether another page may exist.
    pub has_more: bool,
}
