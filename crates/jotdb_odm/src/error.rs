//! Error types for the ODM layer.

use jotdb_core::CoreError;
use thiserror::Error;

/// Result type for ODM operations.
pub type OdmResult<T> = Result<T, OdmError>;

/// Errors raised by the ODM layer.
#[derive(Debug, Error)]
pub enum OdmError {
    /// An operation was attempted before a database was bound.
    #[error("no database bound: call bind_database first")]
    DatabaseNotBound,

    /// `delete` was called on an instance that was never saved.
    #[error("cannot delete an unsaved instance")]
    UnsavedInstance,

    /// A required related document was absent or its key was null.
    #[error("missing relation: {message}")]
    MissingRelation {
        /// Description of the missing target.
        message: String,
    },

    /// `null` was assigned to a required relationship.
    #[error("invalid assignment: {message}")]
    InvalidAssignment {
        /// Description of the rejected assignment.
        message: String,
    },

    /// A filter key carried an unrecognised `__op` suffix.
    #[error("unknown lookup operator '__{op}'")]
    UnknownLookup {
        /// The unrecognised suffix.
        op: String,
    },

    /// `delete_many` was called without any filter.
    #[error("delete_many requires at least one filter")]
    MissingPredicate,

    /// Structural coercion between a document and a typed instance failed.
    #[error("serialization error: {message}")]
    SerializationError {
        /// Description of the coercion failure.
        message: String,
    },

    /// A relationship manager operation that the model's shape cannot
    /// support.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description of the unsupported operation.
        message: String,
    },

    /// An error propagated from the core engine.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl OdmError {
    /// Creates a missing relation error.
    pub fn missing_relation(message: impl Into<String>) -> Self {
        Self::MissingRelation {
            message: message.into(),
        }
    }

    /// Creates an invalid assignment error.
    pub fn invalid_assignment(message: impl Into<String>) -> Self {
        Self::InvalidAssignment {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }
}
