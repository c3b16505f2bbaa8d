//! Error types for the migration runner
//!
//! Every fatal condition the runner can hit is a variant of [`MigrationError`].
//! The tolerated conditions (missing journal file, "already exists" statement
//! errors, verification misses) never surface here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Migrations directory not found at {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Migration journal not found at {}", .0.display())]
    JournalNotFound(PathBuf),

    #[error("Failed to parse migration journal {}: {source}", path.display())]
    Journal {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {tag} failed at statement {}: {source}", index + 1)]
    Statement {
        tag: String,
        /// Zero-based position of the failing statement
        index: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to record migration {tag} in the ledger: {source}")]
    Ledger {
        tag: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Transaction error for migration {tag}: {source}")]
    Transaction {
        tag: String,
        #[source]
        source: sqlx::Error,
    },
}

impl MigrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before any database interaction took place
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MigrationError::Configuration(_)
                | MigrationError::DirectoryNotFound(_)
                | MigrationError::JournalNotFound(_)
                | MigrationError::Journal { .. }
        )
    }

    /// Tag of the migration this error belongs to, if any
    pub fn migration_tag(&self) -> Option<&str> {
        match self {
            MigrationError::Statement { tag, .. }
            | MigrationError::Ledger { tag, .. }
            | MigrationError::Transaction { tag, .. } => Some(tag),
            _ => None,
        }
    }
}
