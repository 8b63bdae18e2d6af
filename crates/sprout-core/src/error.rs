//! Core error types for sprout-core.
//!
//! This module defines the error hierarchy used across the progression
//! engine. Every fallible public operation returns [`ProgressionError`];
//! the narrower enums below describe where a failure originated.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for sprout-core.
#[derive(Error, Debug)]
pub enum ProgressionError {
    /// Static content is broken (prerequisite cycle, dangling reference).
    /// Never shown to a child; surfaced to developers.
    #[error("Content graph error: {0}")]
    ContentGraph(#[from] ContentGraphError),

    /// The storage collaborator failed. The whole transaction was aborted.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Caller supplied malformed data. Rejected before any state mutation.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// Unknown child, activity, subject or achievement id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
}

impl ProgressionError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        ProgressionError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller should retry (or queue) the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProgressionError::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Kind of entity referenced by a [`ProgressionError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Child,
    Activity,
    Subject,
    Achievement,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Child => "Child",
            EntityKind::Activity => "Activity",
            EntityKind::Subject => "Subject",
            EntityKind::Achievement => "Achievement",
        };
        f.write_str(name)
    }
}

/// Content-authoring errors detected while building the prerequisite graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentGraphError {
    /// Prerequisite edges form a cycle. `path` lists the activities involved.
    #[error("Prerequisite cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// An activity lists a prerequisite that does not exist.
    #[error("Activity '{activity}' requires unknown activity '{missing}'")]
    DanglingPrerequisite { activity: String, missing: String },

    /// A subject sequence references an activity that does not exist.
    #[error("Subject '{subject}' lists unknown activity '{activity}'")]
    UnknownSequenceEntry { subject: String, activity: String },

    /// An activity points at a subject that does not exist.
    #[error("Activity '{activity}' belongs to unknown subject '{subject}'")]
    UnknownSubject { activity: String, subject: String },

    /// Two entries share the same id.
    #[error("Duplicate id '{0}' in content pack")]
    DuplicateId(String),

    /// The content pack itself could not be read or parsed.
    #[error("Failed to load content pack: {0}")]
    Load(String),
}

/// Storage-collaborator errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked by another writer
    #[error("Database is locked")]
    Locked,

    /// The transaction was rolled back; nothing was written.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// A stored row could not be decoded.
    #[error("Corrupt record in '{table}': {message}")]
    Corrupt { table: String, message: String },

    /// Failed to access the data directory
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

impl StorageError {
    /// Transient failures are worth retrying; corrupt data and migration
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::QueryFailed(_)
                | StorageError::Locked
                | StorageError::TransactionAborted(_)
        )
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown or mistyped configuration key
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to access the data directory
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Validation errors for caller-supplied data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Star rating outside 1..=3
    #[error("Star rating {0} out of range (expected 1-3)")]
    StarsOutOfRange(u8),
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ProgressionError {
    fn from(err: rusqlite::Error) -> Self {
        ProgressionError::Storage(err.into())
    }
}

/// Result type alias for ProgressionError
pub type Result<T, E = ProgressionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_retryability() {
        assert!(StorageError::Locked.is_retryable());
        assert!(StorageError::QueryFailed("disk".into()).is_retryable());
        assert!(!StorageError::MigrationFailed("v2".into()).is_retryable());
        assert!(!StorageError::Corrupt {
            table: "attempts".into(),
            message: "bad stars".into()
        }
        .is_retryable());
    }

    #[test]
    fn progression_error_retryable_only_for_storage() {
        let err: ProgressionError = StorageError::Locked.into();
        assert!(err.is_retryable());

        let err = ProgressionError::not_found(EntityKind::Child, "kid-1");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Child not found: kid-1");
    }

    #[test]
    fn cycle_message_lists_path() {
        let err = ContentGraphError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Prerequisite cycle detected: a -> b -> a");
    }
}
