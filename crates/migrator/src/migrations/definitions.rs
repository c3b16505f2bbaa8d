//! Migration Definitions - Core types shared by the loader, ledger and engine
//!
//! Defines the in-memory migration descriptor, the persisted ledger entry,
//! the migration configuration, and the results reported by the apply engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::parser;
use super::verify::VerificationReport;
use crate::error::{MigrationError, MigrationResult};

/// Sequence index offset for custom migrations
pub const CUSTOM_BASE: i64 = 1000;

/// Prefix that keeps custom tags apart from journal tags
pub const CUSTOM_TAG_PREFIX: &str = "custom_";

/// Where a migration was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationSource {
    /// Listed in the journal manifest
    Journal,
    /// Loose SQL file in the custom directory
    Custom,
}

/// A migration as read from disk. Rebuilt on every run, never persisted.
#[derive(Debug, Clone)]
pub struct MigrationDescriptor {
    /// Unique identifier, also the ledger key
    pub tag: String,
    /// Ordering key; custom migrations always sort after journal ones
    pub sequence_index: i64,
    /// Epoch milliseconds, display only
    pub created_at_ms: i64,
    /// Full original SQL text
    pub raw_sql: String,
    /// Executable statements, in order
    pub statements: Vec<String>,
    pub source: MigrationSource,
    pub path: PathBuf,
}

impl MigrationDescriptor {
    /// Build a descriptor, splitting the SQL into statements
    pub fn new(
        tag: impl Into<String>,
        sequence_index: i64,
        created_at_ms: i64,
        raw_sql: impl Into<String>,
        source: MigrationSource,
        path: impl Into<PathBuf>,
    ) -> Self {
        let raw_sql = raw_sql.into();
        let statements = parser::split_statements(&raw_sql);
        Self {
            tag: tag.into(),
            sequence_index,
            created_at_ms,
            raw_sql,
            statements,
            source,
            path: path.into(),
        }
    }

    /// Drift indicator recorded in the ledger
    pub fn content_hash(&self) -> String {
        parser::content_hash(&self.raw_sql)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at_ms)
    }
}

/// One row of the ledger table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i32,
    pub tag: String,
    pub hash: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: i32,
    pub statements_count: i32,
    /// Nullable in the table so rows written by older tooling still load
    pub rollback_order: Option<i32>,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding the journal and the journal-driven SQL files
    pub migrations_dir: PathBuf,
    /// Table name for tracking applied migrations
    pub migrations_table: String,
    /// How many ledger entries the rollback listing shows
    pub rollback_limit: i64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("drizzle"),
            migrations_table: "_drizzle_migrations".to_string(),
            rollback_limit: 10,
        }
    }
}

impl MigrationConfig {
    /// Defaults overridden by `MIGRATIONS_DIR` and `MIGRATIONS_TABLE`
    pub fn from_env() -> MigrationResult<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
            if !dir.trim().is_empty() {
                config.migrations_dir = PathBuf::from(dir);
            }
        }
        if let Ok(table) = std::env::var("MIGRATIONS_TABLE") {
            if !table.trim().is_empty() {
                config.migrations_table = table.trim().to_string();
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    /// The ledger table name is interpolated into SQL, so it must be a bare identifier
    pub fn validate(&self) -> MigrationResult<()> {
        if !is_plain_identifier(&self.migrations_table) {
            return Err(MigrationError::Configuration(format!(
                "Invalid migrations table name '{}': expected letters, digits and underscores",
                self.migrations_table
            )));
        }
        if self.rollback_limit <= 0 {
            return Err(MigrationError::Configuration(
                "Rollback listing limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn journal_path(&self) -> PathBuf {
        self.migrations_dir.join("meta").join("_journal.json")
    }

    pub fn custom_dir(&self) -> PathBuf {
        self.migrations_dir.join("migrations")
    }

    pub fn migration_file(&self, tag: &str) -> PathBuf {
        self.migrations_dir.join(format!("{}.sql", tag))
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }
}

pub(crate) fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Options controlling how the engine applies migrations
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Report only, never touch the database
    pub dry_run: bool,
}

/// Result of applying (or previewing) one migration
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub tag: String,
    pub dry_run: bool,
    /// Wall-clock time of the apply, zero for dry runs
    pub execution_time_ms: u64,
    pub statements_executed: usize,
    /// Statements that hit an "already exists" error and were tolerated
    pub statements_skipped: usize,
    /// Rollback order assigned by the ledger, `None` for dry runs
    pub rollback_order: Option<i32>,
    pub verification: VerificationReport,
}

/// A migration that stopped the batch
#[derive(Debug)]
pub struct FailedMigration {
    pub tag: String,
    pub error: MigrationError,
    pub execution_time_ms: u64,
}

/// Result of running a batch of pending migrations
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub dry_run: bool,
    pub succeeded: Vec<ApplyOutcome>,
    pub failed: Option<FailedMigration>,
    pub total_time_ms: u64,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        usize::from(self.failed.is_some())
    }

    /// Exit status of the run: true when nothing failed
    pub fn exit_ok(&self) -> bool {
        self.failed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_paths() {
        let config = MigrationConfig::default();
        assert_eq!(config.migrations_table, "_drizzle_migrations");
        assert_eq!(config.rollback_limit, 10);
        assert_eq!(
            config.journal_path(),
            PathBuf::from("drizzle").join("meta").join("_journal.json")
        );
        assert_eq!(config.custom_dir(), PathBuf::from("drizzle").join("migrations"));
        assert_eq!(
            config.migration_file("0001_init"),
            PathBuf::from("drizzle").join("0001_init.sql")
        );
    }

    #[test]
    fn test_table_name_validation() {
        assert!(MigrationConfig::default().validate().is_ok());

        let injected = MigrationConfig::default()
            .with_migrations_table("_drizzle_migrations; DROP TABLE users");
        assert!(matches!(
            injected.validate(),
            Err(MigrationError::Configuration(_))
        ));

        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("1ledger"));
        assert!(is_plain_identifier("schema_ledger_2"));
    }

    #[test]
    fn test_descriptor_splits_statements_on_construction() {
        let descriptor = MigrationDescriptor::new(
            "0001_init",
            0,
            1_700_000_000_000,
            "CREATE TABLE widgets (id serial);\nCREATE INDEX widgets_id_idx ON widgets (id);",
            MigrationSource::Journal,
            "drizzle/0001_init.sql",
        );

        assert_eq!(descriptor.statements.len(), 2);
        assert_eq!(descriptor.content_hash().len(), 8);
        assert_eq!(
            descriptor.created_at().map(|d| d.format("%Y-%m-%d").to_string()),
            Some("2023-11-14".to_string())
        );
    }

    #[test]
    fn test_batch_summary_counts() {
        let mut summary = BatchSummary::default();
        assert!(summary.exit_ok());
        assert_eq!(summary.failure_count(), 0);

        summary.failed = Some(FailedMigration {
            tag: "0002_policies".to_string(),
            error: MigrationError::Connection("reset by peer".to_string()),
            execution_time_ms: 12,
        });
        assert!(!summary.exit_ok());
        assert_eq!(summary.failure_count(), 1);
    }
}
