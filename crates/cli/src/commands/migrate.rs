//! The migrate command: status, rollback listing, dry run and apply

use console::style;
use drizzle_migrator::{
    pending_migrations, statement_preview, ApplyOptions, BatchEvent, BatchSummary, DatabaseConfig,
    LoadedMigrations, MigrationConfig, MigrationError, MigrationLoader, MigrationResult, Migrator,
    MigrationDescriptor, RollbackPlan, StatusReport,
};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::output;

const PREVIEW_WIDTH: usize = 100;
const BACKUP_COMMAND: &str = "pg_dump -Fc $DATABASE_URL > backup.dump";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Status,
    Rollback,
    DryRun,
    Apply,
}

impl Mode {
    /// Status wins over rollback, rollback over dry run
    pub fn select(status: bool, rollback: bool, dry_run: bool) -> Self {
        if status {
            Mode::Status
        } else if rollback {
            Mode::Rollback
        } else if dry_run {
            Mode::DryRun
        } else {
            Mode::Apply
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Status => "STATUS",
            Mode::Rollback => "ROLLBACK INFO",
            Mode::DryRun => "DRY RUN",
            Mode::Apply => "APPLY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub mode: Mode,
    pub force: bool,
    pub verbose: bool,
    /// Overrides `MIGRATIONS_DIR`
    pub dir: Option<PathBuf>,
}

/// Run the command. `Ok(false)` means a migration failed.
pub async fn run(options: &MigrateOptions) -> MigrationResult<bool> {
    run_with_input(options, BufReader::new(tokio::io::stdin())).await
}

/// Run the command, reading the confirmation answer from `input`
pub async fn run_with_input<R>(options: &MigrateOptions, input: R) -> MigrationResult<bool>
where
    R: AsyncBufRead + Unpin,
{
    output::header("Database Migration Runner");
    output::info(format!("Mode: {}", options.mode.label()));

    // Configuration and migration files are checked before any database access
    let database = DatabaseConfig::from_env()?;
    let config = migration_config(options)?;

    output::step(format!(
        "Loading migrations from {}",
        config.migrations_dir.display()
    ));
    let loaded = MigrationLoader::new(config.clone()).load()?;
    output::info(format!(
        "Found {} journal migrations and {} custom migrations",
        loaded.journal_count, loaded.custom_count
    ));

    output::step("Connecting to database...");
    let migrator = Migrator::connect(&database, config).await?;
    output::success(format!("Connected to {}", database.masked_url()));

    migrator.prepare().await?;
    tracing::debug!(table = migrator.ledger().table(), "Ledger table ready");

    match options.mode {
        Mode::Status => {
            let report = migrator.status(&loaded).await?;
            print_status(&report);
            Ok(true)
        }
        Mode::Rollback => {
            let plan = migrator.rollback_plan().await?;
            print_rollback(&plan);
            Ok(true)
        }
        Mode::DryRun | Mode::Apply => apply_pending(&migrator, &loaded, options, input).await,
    }
}

/// `MIGRATIONS_DIR`/`MIGRATIONS_TABLE` from the environment, then `--dir`
fn migration_config(options: &MigrateOptions) -> MigrationResult<MigrationConfig> {
    let config = MigrationConfig::from_env()?;
    Ok(match &options.dir {
        Some(dir) => config.with_migrations_dir(dir),
        None => config,
    })
}

async fn apply_pending<R>(
    migrator: &Migrator,
    loaded: &LoadedMigrations,
    options: &MigrateOptions,
    input: R,
) -> MigrationResult<bool>
where
    R: AsyncBufRead + Unpin,
{
    let applied = migrator.applied().await?;
    let pending = pending_migrations(&loaded.migrations, &applied);

    if pending.is_empty() {
        output::success("All migrations are up to date!");
        return Ok(true);
    }

    output::header(format!("Pending Migrations ({})", pending.len()));
    for migration in &pending {
        println!(
            "  {} {} ({})",
            style("-").dim(),
            migration.tag,
            statement_count(migration.statements.len())
        );
    }

    let dry_run = options.mode == Mode::DryRun;
    if !dry_run {
        output::blank();
        output::warn("Make sure you have a recent database backup before applying migrations:");
        output::detail(BACKUP_COMMAND);

        if !options.force {
            let question = format!("Apply {} pending migration(s)? (y/N) ", pending.len());
            if !confirm(&question, input).await {
                output::warn("Migration cancelled");
                return Ok(true);
            }
        }
    }

    output::header(if dry_run {
        "Dry Run"
    } else {
        "Applying Migrations"
    });

    let verbose = options.verbose;
    let summary = migrator
        .apply_batch(&pending, ApplyOptions { dry_run }, |event| {
            report_progress(&event, dry_run, verbose)
        })
        .await;

    print_summary(&summary);
    Ok(summary.exit_ok())
}

fn report_progress(event: &BatchEvent<'_>, dry_run: bool, verbose: bool) {
    match event {
        BatchEvent::Starting(migration) => {
            output::step(format!(
                "{} {} ({} statements)",
                if dry_run { "Would apply" } else { "Applying" },
                migration.tag,
                migration.statements.len()
            ));
            if dry_run || verbose {
                for (index, statement) in migration.statements.iter().enumerate() {
                    output::detail(format!(
                        "{}. {}",
                        index + 1,
                        statement_preview(statement, PREVIEW_WIDTH)
                    ));
                }
            }
        }
        BatchEvent::Applied(migration, outcome) => {
            if outcome.dry_run {
                return;
            }
            output::success(format!(
                "Applied {} in {}ms",
                migration.tag, outcome.execution_time_ms
            ));
            if outcome.statements_skipped > 0 {
                output::detail(format!(
                    "{} statement(s) skipped, objects already exist",
                    outcome.statements_skipped
                ));
            }
            for object in &outcome.verification.missing {
                output::warn(format!("Verification: {} was not found", object));
            }
            if let Some(error) = &outcome.verification.error {
                output::warn(format!("Verification could not complete: {}", error));
            }
        }
        BatchEvent::Failed(migration, error) => {
            output::error(format!("Failed to apply {}: {}", migration.tag, error));
            if verbose {
                print_error_chain(*error);
            }
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    output::header("Migration Summary");
    output::info(format!(
        "Mode: {}",
        if summary.dry_run { "DRY RUN" } else { "APPLY" }
    ));
    output::info(format!("Successful: {}", summary.success_count()));
    output::info(format!("Failed: {}", summary.failure_count()));
    output::info(format!("Total time: {}ms", summary.total_time_ms));

    if let Some(failed) = &summary.failed {
        output::blank();
        output::error(format!(
            "Database is partially migrated: stopped at {}",
            failed.tag
        ));
        output::warn("Automatic rollback is not available.");
        output::warn("Fix the failing migration and run again, or restore from your backup.");
    } else if summary.dry_run {
        output::info("Dry run complete. No changes were made.");
    } else {
        output::success("All migrations applied successfully!");
    }
}

fn print_status(report: &StatusReport) {
    output::header("Migration Status");
    output::info(format!("Total migrations: {}", report.total));
    output::info(format!("Applied: {}", report.applied_count()));
    output::info(format!("Pending: {}", report.pending_count()));

    if !report.applied.is_empty() {
        output::header("Applied Migrations");
        for entry in &report.applied {
            println!(
                "  {} {}  {}  ({}ms, {} statements)",
                style("✓").green(),
                entry.tag,
                entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
                entry.execution_time_ms,
                entry.statements_count
            );
        }
    }

    if !report.pending.is_empty() {
        output::header("Pending Migrations");
        for migration in &report.pending {
            println!(
                "  {} {}  {}",
                style("○").yellow(),
                migration.tag,
                pending_detail(migration)
            );
        }
    }

    if !report.orphaned.is_empty() || !report.drifted.is_empty() {
        output::blank();
    }
    for entry in &report.orphaned {
        output::warn(format!(
            "{} is recorded as applied but has no migration file",
            entry.tag
        ));
    }
    for drift in &report.drifted {
        output::warn(format!(
            "{} changed after it was applied (recorded hash {}, current {})",
            drift.tag, drift.recorded, drift.current
        ));
    }

    if report.is_up_to_date() {
        output::blank();
        output::success("Database is up to date");
    }
}

fn print_rollback(plan: &RollbackPlan) {
    output::header("Rollback Information");

    if plan.is_empty() {
        output::info("No migrations have been applied");
    } else {
        output::info("Most recently applied migrations:");
        for entry in &plan.entries {
            println!(
                "  [{}] {}  applied {}",
                entry.id,
                entry.tag,
                entry.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    output::blank();
    for line in plan.disclaimer() {
        output::warn(*line);
    }
}

/// Creation date and size of a pending migration
fn pending_detail(migration: &MigrationDescriptor) -> String {
    let created = migration
        .created_at()
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "(created {}, {})",
        created,
        statement_count(migration.statements.len())
    )
}

fn statement_count(count: usize) -> String {
    if count == 1 {
        "1 statement".to_string()
    } else {
        format!("{} statements", count)
    }
}

/// Only an explicit yes proceeds
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

async fn confirm<R>(question: &str, input: R) -> bool
where
    R: AsyncBufRead + Unpin,
{
    print!("{} {}", style("?").yellow().bold(), question);
    let _ = std::io::stdout().flush();

    let mut lines = input.lines();
    match lines.next_line().await {
        Ok(Some(answer)) => is_affirmative(&answer),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!("Failed to read confirmation: {}", e);
            false
        }
    }
}

/// A follow-up line for errors the operator can fix directly
pub fn hint(error: &MigrationError) -> Option<&'static str> {
    match error {
        MigrationError::Configuration(message) if message.contains("DATABASE_URL") => {
            Some("Set DATABASE_URL in your environment or in .env.local")
        }
        MigrationError::DirectoryNotFound(_) | MigrationError::JournalNotFound(_) => {
            Some("Generate migrations with drizzle-kit first, or point --dir at the migrations folder")
        }
        MigrationError::Connection(_) => Some("Check that the database server is running and reachable"),
        _ => None,
    }
}

pub fn print_error_chain(error: &dyn std::error::Error) {
    let mut source = error.source();
    while let Some(cause) = source {
        output::detail(format!("caused by: {}", cause));
        source = cause.source();
    }
}
