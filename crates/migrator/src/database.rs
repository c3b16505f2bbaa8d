//! Database connectivity for the migration runner
//!
//! Migrations must apply in a strict total order and the ledger's rollback
//! order is computed from the table contents, so the pool is capped at a
//! single connection.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use url::Url;

use crate::error::{MigrationError, MigrationResult};

/// Connection settings for the migration pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Seconds to wait for the connection
    pub acquire_timeout: u64,
    /// Seconds before an idle connection is closed
    pub idle_timeout: u64,
}

impl DatabaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 1,
            acquire_timeout: 10,
            idle_timeout: 20,
        }
    }

    /// Read `DATABASE_URL`; its absence is a configuration error
    pub fn from_env() -> MigrationResult<Self> {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Ok(Self::new(url.trim())),
            _ => Err(MigrationError::Configuration(
                "DATABASE_URL environment variable is not set".to_string(),
            )),
        }
    }

    /// The connection URL with any password replaced, safe to print
    pub fn masked_url(&self) -> String {
        mask_database_url(&self.database_url)
    }
}

/// Open the single-connection pool and make sure the server answers
pub async fn connect(config: &DatabaseConfig) -> MigrationResult<PgPool> {
    tracing::debug!(
        "Creating migration pool: max={}, acquire_timeout={}s, idle_timeout={}s",
        config.max_connections,
        config.acquire_timeout,
        config.idle_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            MigrationError::Connection(format!(
                "Failed to connect to {}: {}",
                config.masked_url(),
                e
            ))
        })?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| MigrationError::Connection(format!("Connection test failed: {}", e)))?;

    Ok(pool)
}

pub fn mask_database_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "postgresql://****".to_string();
            }
            url.to_string()
        }
        Err(_) => "postgresql://****".to_string(),
    }
}
