//! Migration Runner - Applies migrations against the database
//!
//! Each migration runs in one transaction: its statements, then its ledger
//! row. "Already exists" errors are tolerated per statement; anything else
//! rolls the whole migration back and stops the batch.

use async_trait::async_trait;
use sqlx::{Executor, PgConnection, PgPool};
use std::time::Instant;

use super::definitions::{
    ApplyOptions, ApplyOutcome, BatchSummary, FailedMigration, LedgerEntry, MigrationConfig,
    MigrationDescriptor,
};
use super::ledger::Ledger;
use super::loader::{LoadedMigrations, MigrationLoader};
use super::parser::statement_preview;
use super::report::{pending_migrations, RollbackPlan, StatusReport};
use super::verify::{self, VerificationReport};
use crate::database::{self, DatabaseConfig};
use crate::error::{MigrationError, MigrationResult};

/// SQLSTATE codes PostgreSQL raises when an object being created is already there
const ALREADY_EXISTS_CODES: &[&str] = &[
    "42P04", // duplicate_database
    "42P06", // duplicate_schema
    "42P07", // duplicate_table (also indexes, sequences, views)
    "42701", // duplicate_column
    "42710", // duplicate_object
    "42723", // duplicate_function
];

const STATEMENT_SAVEPOINT: &str = "drizzle_migrate_statement";

/// Whether a statement error means the object it creates already exists.
///
/// Matches PostgreSQL's duplicate-object SQLSTATEs, and falls back to the
/// message text for drivers or errors that carry no code.
pub fn is_already_exists(error: &sqlx::Error) -> bool {
    if let Some(db_error) = error.as_database_error() {
        if db_error.code().map_or(false, |code| {
            ALREADY_EXISTS_CODES.iter().any(|known| code == *known)
        }) {
            return true;
        }
        return db_error.message().contains("already exists");
    }
    error.to_string().contains("already exists")
}

/// Runs raw SQL on the migration's transaction
#[async_trait]
pub trait StatementExecutor: Send {
    async fn execute_statement(&mut self, sql: &str) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl StatementExecutor for PgConnection {
    async fn execute_statement(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        (&mut *self).execute(sql).await?;
        Ok(())
    }
}

/// Counts from running one migration's statements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementStats {
    pub executed: usize,
    pub skipped: usize,
}

/// Execute a migration's statements in order.
///
/// Each statement runs behind a savepoint so that an "already exists" error
/// can be rolled back without aborting the surrounding transaction.
pub async fn run_statements<E>(
    executor: &mut E,
    migration: &MigrationDescriptor,
) -> MigrationResult<StatementStats>
where
    E: StatementExecutor + ?Sized,
{
    let total = migration.statements.len();
    let mut stats = StatementStats::default();

    for (index, statement) in migration.statements.iter().enumerate() {
        let fail = |source: sqlx::Error| MigrationError::Statement {
            tag: migration.tag.clone(),
            index,
            source,
        };

        tracing::debug!(
            tag = %migration.tag,
            "Executing {}/{}: {}",
            index + 1,
            total,
            statement_preview(statement, 80)
        );

        executor
            .execute_statement(&format!("SAVEPOINT {}", STATEMENT_SAVEPOINT))
            .await
            .map_err(fail)?;

        match executor.execute_statement(statement).await {
            Ok(()) => {
                stats.executed += 1;
            }
            Err(e) if is_already_exists(&e) => {
                tracing::debug!(
                    tag = %migration.tag,
                    "Skipped (already exists): {}",
                    statement_preview(statement, 50)
                );
                executor
                    .execute_statement(&format!("ROLLBACK TO SAVEPOINT {}", STATEMENT_SAVEPOINT))
                    .await
                    .map_err(fail)?;
                stats.skipped += 1;
            }
            Err(e) => return Err(fail(e)),
        }

        executor
            .execute_statement(&format!("RELEASE SAVEPOINT {}", STATEMENT_SAVEPOINT))
            .await
            .map_err(fail)?;
    }

    Ok(stats)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Applies one migration, all or nothing
pub struct ApplyEngine<'a> {
    pool: &'a PgPool,
    ledger: &'a Ledger,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(pool: &'a PgPool, ledger: &'a Ledger) -> Self {
        Self { pool, ledger }
    }

    pub async fn apply(
        &self,
        migration: &MigrationDescriptor,
        options: ApplyOptions,
    ) -> MigrationResult<ApplyOutcome> {
        let start = Instant::now();

        if options.dry_run {
            return Ok(ApplyOutcome {
                tag: migration.tag.clone(),
                dry_run: true,
                execution_time_ms: 0,
                statements_executed: 0,
                statements_skipped: 0,
                rollback_order: None,
                verification: VerificationReport::default(),
            });
        }

        let transaction_error = |source: sqlx::Error| MigrationError::Transaction {
            tag: migration.tag.clone(),
            source,
        };

        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await.map_err(transaction_error)?;

        let stats = run_statements(&mut *tx, migration).await?;

        let recorded = self
            .ledger
            .record_application(
                &mut tx,
                &migration.tag,
                &migration.content_hash(),
                elapsed_ms(start),
                migration.statements.len(),
            )
            .await?;

        tx.commit().await.map_err(transaction_error)?;

        let verification = verify::verify(self.pool, migration).await;
        if !verification.is_clean() {
            tracing::warn!(
                tag = %migration.tag,
                "Migration applied but verification had warnings"
            );
        }

        let execution_time_ms = elapsed_ms(start);
        tracing::info!(
            tag = %migration.tag,
            execution_time_ms,
            statements = stats.executed,
            skipped = stats.skipped,
            rollback_order = recorded.rollback_order,
            "Migration applied"
        );

        Ok(ApplyOutcome {
            tag: migration.tag.clone(),
            dry_run: false,
            execution_time_ms,
            statements_executed: stats.executed,
            statements_skipped: stats.skipped,
            rollback_order: Some(recorded.rollback_order),
            verification,
        })
    }
}

/// Progress notifications emitted while a batch runs
#[derive(Debug)]
pub enum BatchEvent<'a> {
    Starting(&'a MigrationDescriptor),
    Applied(&'a MigrationDescriptor, &'a ApplyOutcome),
    Failed(&'a MigrationDescriptor, &'a MigrationError),
}

/// Ties the loader, ledger and engine together over one pool
pub struct Migrator {
    pool: PgPool,
    loader: MigrationLoader,
    ledger: Ledger,
}

impl Migrator {
    pub fn new(pool: PgPool, config: MigrationConfig) -> MigrationResult<Self> {
        let ledger = Ledger::new(&config)?;
        Ok(Self {
            pool,
            loader: MigrationLoader::new(config),
            ledger,
        })
    }

    /// Connect with the single-connection pool
    pub async fn connect(database: &DatabaseConfig, config: MigrationConfig) -> MigrationResult<Self> {
        let pool = database::connect(database).await?;
        Self::new(pool, config)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &MigrationConfig {
        self.loader.config()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn engine(&self) -> ApplyEngine<'_> {
        ApplyEngine::new(&self.pool, &self.ledger)
    }

    /// Create the ledger table if needed
    pub async fn prepare(&self) -> MigrationResult<()> {
        self.ledger.ensure_storage_exists(&self.pool).await
    }

    /// Read all migrations from disk
    pub fn load(&self) -> MigrationResult<LoadedMigrations> {
        self.loader.load()
    }

    pub async fn applied(&self) -> MigrationResult<Vec<LedgerEntry>> {
        self.ledger.get_applied(&self.pool).await
    }

    pub async fn status(&self, loaded: &LoadedMigrations) -> MigrationResult<StatusReport> {
        let applied = self.applied().await?;
        Ok(StatusReport::build(&loaded.migrations, applied))
    }

    pub async fn rollback_plan(&self) -> MigrationResult<RollbackPlan> {
        let entries = self
            .ledger
            .recent(&self.pool, self.config().rollback_limit)
            .await?;
        Ok(RollbackPlan::new(entries))
    }

    /// Apply migrations in order, stopping at the first failure
    pub async fn apply_batch<F>(
        &self,
        pending: &[&MigrationDescriptor],
        options: ApplyOptions,
        mut observer: F,
    ) -> BatchSummary
    where
        F: FnMut(BatchEvent<'_>),
    {
        let engine = self.engine();
        let mut summary = BatchSummary {
            dry_run: options.dry_run,
            ..BatchSummary::default()
        };

        for &migration in pending {
            observer(BatchEvent::Starting(migration));
            let start = Instant::now();

            match engine.apply(migration, options).await {
                Ok(outcome) => {
                    observer(BatchEvent::Applied(migration, &outcome));
                    summary.total_time_ms += outcome.execution_time_ms;
                    summary.succeeded.push(outcome);
                }
                Err(error) => {
                    tracing::error!(tag = %migration.tag, error = %error, "Migration failed");
                    observer(BatchEvent::Failed(migration, &error));
                    summary.failed = Some(FailedMigration {
                        tag: migration.tag.clone(),
                        error,
                        execution_time_ms: elapsed_ms(start),
                    });
                    break;
                }
            }
        }

        summary
    }

    /// Load, diff against the ledger and apply everything pending
    pub async fn run_pending(&self, options: ApplyOptions) -> MigrationResult<BatchSummary> {
        self.prepare().await?;
        let loaded = self.load()?;
        let applied = self.applied().await?;
        let pending = pending_migrations(&loaded.migrations, &applied);
        Ok(self.apply_batch(&pending, options, |_| {}).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::definitions::MigrationSource;

    /// Records every statement and fails the ones matching a rule
    struct ScriptedExecutor {
        log: Vec<String>,
        failures: Vec<(&'static str, &'static str)>,
    }

    impl ScriptedExecutor {
        fn new(failures: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                log: Vec::new(),
                failures,
            }
        }
    }

    #[async_trait]
    impl StatementExecutor for ScriptedExecutor {
        async fn execute_statement(&mut self, sql: &str) -> Result<(), sqlx::Error> {
            self.log.push(sql.to_string());
            match self.failures.iter().find(|(pattern, _)| sql.contains(pattern)) {
                Some((_, message)) => Err(sqlx::Error::Protocol(message.to_string())),
                None => Ok(()),
            }
        }
    }

    fn migration(sql: &str) -> MigrationDescriptor {
        MigrationDescriptor::new(
            "0001_init",
            1,
            0,
            sql,
            MigrationSource::Journal,
            "drizzle/0001_init.sql",
        )
    }

    #[tokio::test]
    async fn test_statements_run_in_order_behind_savepoints() {
        let mut executor = ScriptedExecutor::new(vec![]);
        let migration = migration("CREATE TABLE a (id int);\nCREATE TABLE b (id int);");

        let stats = run_statements(&mut executor, &migration).await.unwrap();

        assert_eq!(stats, StatementStats { executed: 2, skipped: 0 });
        assert_eq!(
            executor.log,
            vec![
                "SAVEPOINT drizzle_migrate_statement",
                "CREATE TABLE a (id int);",
                "RELEASE SAVEPOINT drizzle_migrate_statement",
                "SAVEPOINT drizzle_migrate_statement",
                "CREATE TABLE b (id int);",
                "RELEASE SAVEPOINT drizzle_migrate_statement",
            ]
        );
    }

    #[tokio::test]
    async fn test_already_exists_is_tolerated() {
        let mut executor = ScriptedExecutor::new(vec![(
            "CREATE TABLE foo",
            "relation \"foo\" already exists",
        )]);
        let migration = migration("CREATE TABLE foo (id int);\nCREATE INDEX foo_idx ON foo (id);");

        let stats = run_statements(&mut executor, &migration).await.unwrap();

        assert_eq!(stats, StatementStats { executed: 1, skipped: 1 });
        assert!(executor
            .log
            .contains(&"ROLLBACK TO SAVEPOINT drizzle_migrate_statement".to_string()));
        assert_eq!(executor.log.last().unwrap(), "RELEASE SAVEPOINT drizzle_migrate_statement");
    }

    #[tokio::test]
    async fn test_other_errors_stop_at_the_failing_statement() {
        let mut executor = ScriptedExecutor::new(vec![(
            "CREAT TABLE",
            "syntax error at or near \"CREAT\"",
        )]);
        let migration = migration(
            "CREATE TABLE a (id int);\nCREAT TABLE b (id int);\nCREATE TABLE c (id int);",
        );

        let error = run_statements(&mut executor, &migration).await.unwrap_err();

        match error {
            MigrationError::Statement { tag, index, .. } => {
                assert_eq!(tag, "0001_init");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!executor.log.iter().any(|sql| sql.contains("TABLE c")));
    }

    #[tokio::test]
    async fn test_empty_migration_executes_nothing() {
        let mut executor = ScriptedExecutor::new(vec![]);
        let stats = run_statements(&mut executor, &migration("-- nothing yet\n"))
            .await
            .unwrap();

        assert_eq!(stats, StatementStats::default());
        assert!(executor.log.is_empty());
    }

    #[test]
    fn test_already_exists_predicate() {
        assert!(is_already_exists(&sqlx::Error::Protocol(
            "relation \"widgets\" already exists".to_string()
        )));
        assert!(!is_already_exists(&sqlx::Error::Protocol(
            "syntax error at end of input".to_string()
        )));
        assert!(!is_already_exists(&sqlx::Error::RowNotFound));
    }
}
