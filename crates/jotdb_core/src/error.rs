//! Error types for the jotdb core engine.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A value given to insert or update was not a JSON object or could not
    /// be serialised.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of what was wrong with the value.
        message: String,
    },

    /// An empty or malformed key, collection, or savepoint name, or a null
    /// value where one is not allowed.
    #[error("invalid field: {message}")]
    InvalidField {
        /// Description of the offending name or value.
        message: String,
    },

    /// A collection was reopened with a different indexed-field set than its
    /// existing table carries.
    #[error(
        "index schema mismatch for collection '{collection}': \
         table has [{existing}], declared [{declared}]"
    )]
    IndexSchemaMismatch {
        /// Name of the collection.
        collection: String,
        /// Comma-joined indexed fields found on the existing table.
        existing: String,
        /// Comma-joined indexed fields in the declaration.
        declared: String,
    },

    /// A transaction operation was issued in the wrong state.
    #[error("invalid transaction state: {message}")]
    InvalidTransactionState {
        /// Description of the state violation.
        message: String,
    },

    /// The engine reported busy after the configured timeout.
    #[error("database locked: busy timeout expired")]
    DatabaseLocked,

    /// The database handle has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// The underlying SQL engine reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// A stored document could not be parsed back into JSON.
    #[error("corrupt document in row {id}: {message}")]
    CorruptDocument {
        /// Row identifier of the unparseable document.
        id: i64,
        /// Parse error description.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::InvalidField {
            message: message.into(),
        }
    }

    /// Creates an invalid transaction state error.
    pub fn invalid_transaction_state(message: impl Into<String>) -> Self {
        Self::InvalidTransactionState {
            message: message.into(),
        }
    }

    /// Creates an index schema mismatch error.
    pub fn index_schema_mismatch(
        collection: impl Into<String>,
        existing: &[String],
        declared: &[String],
    ) -> Self {
        Self::IndexSchemaMismatch {
            collection: collection.into(),
            existing: existing.join(", "),
            declared: declared.join(", "),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    /// Maps engine errors, translating busy/locked signals to
    /// [`CoreError::DatabaseLocked`] so callers can retry.
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                return Self::DatabaseLocked;
            }
        }
        Self::Sqlite(err)
    }
}
