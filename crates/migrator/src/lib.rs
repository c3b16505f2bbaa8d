//! # drizzle-migrator: PostgreSQL migration runner
//!
//! Loads Drizzle-style journal migrations plus loose custom SQL files,
//! applies the pending ones in order and records each in a ledger table.

pub mod database;
pub mod error;
pub mod migrations;

pub use database::*;
pub use error::*;
pub use migrations::*;
