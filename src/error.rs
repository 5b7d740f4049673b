//! # Error Handling
//!
//! Unified error taxonomy for the repository engine and migration tracker.
//! Every backend error is wrapped with a stable kind and a human-readable
//! message so callers can branch on kind without knowing SeaORM's native
//! error shape.

use thiserror::Error;

/// Errors produced by repository and migration operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The caller supplied a nil/zero/empty required argument. Never
    /// retried; always a caller bug to fix.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Zero rows matched an identity/version predicate. Expected in normal
    /// operation and not logged at error level by itself.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The backend call failed for any reason not covered above. Safe to
    /// retry only if the operation was idempotent.
    #[error("query execution failed: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<sea_orm::DbErr>,
    },

    /// The migration tracker is in the dirty state and requires an explicit
    /// `force` before further automatic migration.
    #[error("migration state is dirty at version {version}; force a version to recover")]
    MigrationDirty { version: u64 },
}

impl RepositoryError {
    /// Wrap a caller-input problem.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// A zero-rows-matched condition for the given entity and identity.
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{entity} with id {id}"))
    }

    /// Wrap a SeaORM database error with a stable kind.
    pub fn database_error(source: sea_orm::DbErr) -> Self {
        Self::Query {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// A query-execution failure with no underlying database error, e.g.
    /// a migration source that cannot be read.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error is the not-found kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
