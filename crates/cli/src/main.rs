mod commands;
mod logging;
mod output;

use clap::error::ErrorKind;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use commands::migrate::{self, MigrateOptions, Mode};
use logging::{init_logging, LoggingConfig};

const AFTER_HELP: &str = "\
Examples:
  drizzle-migrate                 Apply pending migrations (asks for confirmation)
  drizzle-migrate --force         Apply without confirmation
  drizzle-migrate --dry-run       Show what would be applied
  drizzle-migrate --status        Show applied and pending migrations
  drizzle-migrate --rollback      Show the most recently applied migrations

Environment:
  DATABASE_URL       PostgreSQL connection string (required)
  MIGRATIONS_DIR     Migrations directory (default: drizzle)
  MIGRATIONS_TABLE   Ledger table name (default: _drizzle_migrations)";

#[derive(Parser, Debug)]
#[command(name = "drizzle-migrate")]
#[command(version, about = "Apply Drizzle journal migrations to PostgreSQL")]
#[command(after_help = AFTER_HELP)]
struct Cli {
    /// Show migration status without applying anything
    #[arg(long)]
    status: bool,

    /// Show the most recently applied migrations and how to reverse them
    #[arg(long)]
    rollback: bool,

    /// Show what would be applied without executing it
    #[arg(long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    force: bool,

    /// Print statement previews and debug diagnostics
    #[arg(long)]
    verbose: bool,

    /// Migrations directory [env: MIGRATIONS_DIR] [default: drizzle]
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Environment file loaded before reading configuration
    #[arg(long, value_name = "PATH", default_value = ".env.local")]
    env_file: PathBuf,
}

impl Cli {
    fn options(&self) -> MigrateOptions {
        MigrateOptions {
            mode: Mode::select(self.status, self.rollback, self.dry_run),
            force: self.force,
            verbose: self.verbose,
            dir: self.dir.clone(),
        }
    }
}

/// Load the env file, then `.env`; variables already set are kept
fn load_env_files(env_file: &Path) -> Vec<PathBuf> {
    let mut loaded = Vec::new();
    for path in [env_file, Path::new(".env")] {
        match dotenvy::from_path(path) {
            Ok(()) => loaded.push(path.to_path_buf()),
            Err(e) if e.not_found() => {}
            Err(e) => output::warn(format!("Could not load {}: {}", path.display(), e)),
        }
    }
    loaded
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let env_files = load_env_files(&cli.env_file);

    if let Err(e) = init_logging(LoggingConfig::for_cli(cli.verbose)) {
        output::warn(format!("Logging disabled: {}", e));
    }
    for path in &env_files {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let options = cli.options();
    match migrate::run(&options).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            output::error(error.to_string());
            if let Some(hint) = migrate::hint(&error) {
                output::info(hint);
            }
            if options.verbose {
                migrate::print_error_chain(&error);
            }
            ExitCode::FAILURE
        }
    }
}
