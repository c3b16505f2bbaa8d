//! Diagnostic logging for the migration CLI
//!
//! Operator output goes to stdout through `output`; tracing diagnostics go to
//! stderr so they never interleave with the report.

use serde_json::{json, Value};
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the migration CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of compact text
    pub json_format: bool,
    pub include_timestamp: bool,
    /// Directive-style filter (e.g. "drizzle_migrator=debug")
    pub env_filter: Option<String>,
    /// Fields attached to the initialization event
    pub global_fields: serde_json::Map<String, Value>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json_format: false,
            include_timestamp: false,
            env_filter: Some("drizzle_migrator=warn,drizzle_migrate=warn".to_string()),
            global_fields: serde_json::Map::new(),
        }
    }
}

impl LoggingConfig {
    /// Debug diagnostics from both the runner and the CLI
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            env_filter: Some("drizzle_migrator=debug,drizzle_migrate=debug".to_string()),
            ..Self::default()
        }
    }

    pub fn for_cli(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }

    /// Switch to JSON output, for log collectors
    pub fn json(mut self) -> Self {
        self.json_format = true;
        self.include_timestamp = true;
        self
    }

    pub fn with_global_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.global_fields.insert(key.into(), value.into());
        self
    }

    /// The filter directives actually used when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Install the global tracing subscriber
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else if config.include_timestamp {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .compact()
                    .without_time()
                    .with_target(false),
            )
            .try_init()?;
    }

    let mut init = json!({
        "json_format": config.json_format,
        "filter": config.filter_directives(),
    });
    for (key, value) in config.global_fields {
        init[key] = value;
    }
    tracing::debug!("Logging initialized: {}", init);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_quiet() {
        let config = LoggingConfig::default();
        assert!(!config.json_format);
        assert_eq!(
            config.filter_directives(),
            "drizzle_migrator=warn,drizzle_migrate=warn"
        );
    }

    #[test]
    fn test_verbose_enables_debug_for_both_crates() {
        let config = LoggingConfig::for_cli(true);
        assert_eq!(
            config.filter_directives(),
            "drizzle_migrator=debug,drizzle_migrate=debug"
        );
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_json_and_fields() {
        let config = LoggingConfig::default()
            .json()
            .with_global_field("command", "migrate");
        assert!(config.json_format);
        assert!(config.include_timestamp);
        assert_eq!(config.global_fields["command"], "migrate");

        let no_filter = LoggingConfig {
            env_filter: None,
            ..LoggingConfig::default()
        };
        assert_eq!(no_filter.filter_directives(), "warn");
    }
}
