//! Migration Ledger - Append-only record of applied migrations
//!
//! The ledger table is the only durable state the runner owns. Rows are
//! inserted once, inside the transaction that applied the migration, and
//! never updated or deleted.

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use super::definitions::{LedgerEntry, MigrationConfig};
use crate::error::{MigrationError, MigrationResult};

/// Values assigned by the database when a ledger row is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedApplication {
    pub id: i32,
    pub rollback_order: i32,
}

/// Access to the ledger table
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(config: &MigrationConfig) -> MigrationResult<Self> {
        config.validate()?;
        Ok(Self {
            table: config.migrations_table.clone(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table and its tag index if they are missing
    pub async fn ensure_storage_exists(&self, pool: &PgPool) -> MigrationResult<()> {
        sqlx::query(&self.create_table_sql()).execute(pool).await?;
        sqlx::query(&self.create_index_sql()).execute(pool).await?;
        Ok(())
    }

    /// All ledger rows ordered by id
    pub async fn get_applied(&self, pool: &PgPool) -> MigrationResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&self.select_applied_sql()).fetch_all(pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Most recently applied first, by rollback order
    pub async fn recent(&self, pool: &PgPool, limit: i64) -> MigrationResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&self.select_recent_sql())
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn count(&self, pool: &PgPool) -> MigrationResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Insert the ledger row for an applied migration.
    ///
    /// Runs on the migration's own transaction. The rollback order is
    /// computed by the insert statement itself.
    pub async fn record_application(
        &self,
        conn: &mut PgConnection,
        tag: &str,
        hash: &str,
        execution_time_ms: u64,
        statements_count: usize,
    ) -> MigrationResult<RecordedApplication> {
        let row = sqlx::query(&self.insert_sql())
            .bind(tag)
            .bind(hash)
            .bind(i32::try_from(execution_time_ms).unwrap_or(i32::MAX))
            .bind(i32::try_from(statements_count).unwrap_or(i32::MAX))
            .fetch_one(&mut *conn)
            .await
            .map_err(|source| MigrationError::Ledger {
                tag: tag.to_string(),
                source,
            })?;

        let recorded = RecordedApplication {
            id: row.try_get("id")?,
            rollback_order: row.try_get("rollback_order")?,
        };
        Ok(recorded)
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id SERIAL PRIMARY KEY,\n    \
                tag TEXT NOT NULL UNIQUE,\n    \
                hash TEXT NOT NULL,\n    \
                applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),\n    \
                execution_time_ms INTEGER NOT NULL DEFAULT 0,\n    \
                statements_count INTEGER NOT NULL DEFAULT 0,\n    \
                rollback_order INTEGER,\n    \
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()\n\
            )",
            self.table
        )
    }

    fn create_index_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS idx{}_tag ON {} (tag)",
            index_prefix(&self.table),
            self.table
        )
    }

    fn select_applied_sql(&self) -> String {
        format!(
            "SELECT id, tag, hash, applied_at, execution_time_ms, statements_count, rollback_order \
             FROM {} ORDER BY id ASC",
            self.table
        )
    }

    fn select_recent_sql(&self) -> String {
        format!(
            "SELECT id, tag, hash, applied_at, execution_time_ms, statements_count, rollback_order \
             FROM {} ORDER BY rollback_order DESC NULLS LAST, id DESC LIMIT $1",
            self.table
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {table} (tag, hash, execution_time_ms, statements_count, rollback_order) \
             SELECT $1, $2, $3, $4, COALESCE(MAX(rollback_order), 0) + 1 FROM {table} \
             RETURNING id, rollback_order",
            table = self.table
        )
    }
}

/// `_drizzle_migrations` becomes `_drizzle_migrations`, `ledger` becomes `_ledger`
fn index_prefix(table: &str) -> String {
    if table.starts_with('_') {
        table.to_string()
    } else {
        format!("_{}", table)
    }
}

fn entry_from_row(row: &PgRow) -> MigrationResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        tag: row.try_get("tag")?,
        hash: row.try_get("hash")?,
        applied_at: row.try_get("applied_at")?,
        execution_time_ms: row.try_get("execution_time_ms")?,
        statements_count: row.try_get("statements_count")?,
        rollback_order: row.try_get("rollback_order")?,
    })
}
