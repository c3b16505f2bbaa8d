//! Migration System
//!
//! Journal-driven migrations applied in sequence order, each in its own
//! transaction, with an append-only ledger of what has been applied.

pub mod definitions;
pub mod ledger;
pub mod loader;
pub mod parser;
pub mod report;
pub mod runner;
pub mod verify;

pub use definitions::*;
pub use ledger::{Ledger, RecordedApplication};
pub use loader::{Journal, JournalEntry, LoadedMigrations, MigrationLoader};
pub use parser::{content_hash, split_statements, statement_preview, BREAKPOINT_DELIMITER};
pub use report::{pending_migrations, HashDrift, RollbackPlan, StatusReport, ROLLBACK_DISCLAIMER};
pub use runner::{
    is_already_exists, run_statements, ApplyEngine, BatchEvent, Migrator, StatementExecutor,
    StatementStats,
};
pub use verify::{expected_objects, ExpectedObject, ObjectKind, VerificationReport};
