//! Migration Loader - Builds the ordered migration list from disk
//!
//! Journal-driven migrations come first, in journal index order. Loose SQL
//! files from the custom directory follow, sorted by filename. Nothing here
//! is cached; every run reads the filesystem again.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::definitions::{
    MigrationConfig, MigrationDescriptor, MigrationSource, CUSTOM_BASE, CUSTOM_TAG_PREFIX,
};
use crate::error::{MigrationError, MigrationResult};

/// Drizzle journal manifest (`meta/_journal.json`)
#[derive(Debug, Clone, Deserialize)]
pub struct Journal {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dialect: String,
    pub entries: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalEntry {
    pub idx: i64,
    #[serde(default)]
    pub version: String,
    /// Creation time in epoch milliseconds
    pub when: i64,
    pub tag: String,
    #[serde(default)]
    pub breakpoints: bool,
}

/// Everything found on disk for one run
#[derive(Debug, Clone, Default)]
pub struct LoadedMigrations {
    /// All migrations ordered by sequence index
    pub migrations: Vec<MigrationDescriptor>,
    pub journal_count: usize,
    pub custom_count: usize,
}

/// Reads migration descriptors from the migrations directory
pub struct MigrationLoader {
    config: MigrationConfig,
}

impl MigrationLoader {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load journal and custom migrations as one ordered list.
    ///
    /// A missing migrations directory or journal fails the whole load.
    pub fn load(&self) -> MigrationResult<LoadedMigrations> {
        if !self.config.migrations_dir.is_dir() {
            return Err(MigrationError::DirectoryNotFound(
                self.config.migrations_dir.clone(),
            ));
        }

        let journal = self.read_journal()?;
        let journal_migrations = self.load_journal_migrations(&journal)?;

        let custom_base = journal
            .entries
            .iter()
            .map(|entry| entry.idx + 1)
            .max()
            .map_or(CUSTOM_BASE, |next| next.max(CUSTOM_BASE));
        let custom_migrations = self.load_custom_migrations(custom_base)?;

        let journal_count = journal_migrations.len();
        let custom_count = custom_migrations.len();

        let mut migrations = journal_migrations;
        migrations.extend(custom_migrations);
        migrations.sort_by_key(|m| m.sequence_index);

        Ok(LoadedMigrations {
            migrations,
            journal_count,
            custom_count,
        })
    }

    /// Parse the journal manifest
    pub fn read_journal(&self) -> MigrationResult<Journal> {
        let path = self.config.journal_path();
        if !path.is_file() {
            return Err(MigrationError::JournalNotFound(path));
        }

        let content = fs::read_to_string(&path).map_err(|e| MigrationError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|source| MigrationError::Journal { path, source })
    }

    fn load_journal_migrations(&self, journal: &Journal) -> MigrationResult<Vec<MigrationDescriptor>> {
        let mut migrations = Vec::with_capacity(journal.entries.len());

        for entry in &journal.entries {
            let path = self.config.migration_file(&entry.tag);
            if !path.is_file() {
                tracing::warn!(
                    tag = %entry.tag,
                    path = %path.display(),
                    "Migration file not found, skipping"
                );
                continue;
            }

            let sql = fs::read_to_string(&path).map_err(|e| MigrationError::io(&path, e))?;
            migrations.push(MigrationDescriptor::new(
                entry.tag.clone(),
                entry.idx,
                entry.when,
                sql,
                MigrationSource::Journal,
                path,
            ));
        }

        migrations.sort_by_key(|m| m.sequence_index);
        Ok(migrations)
    }

    /// Loose `*.sql` files, ordered by filename and indexed from `base`
    fn load_custom_migrations(&self, base: i64) -> MigrationResult<Vec<MigrationDescriptor>> {
        let dir = self.config.custom_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut filenames = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| MigrationError::io(&dir, e))? {
            let entry = entry.map_err(|e| MigrationError::io(&dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                filenames.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        filenames.sort();

        let mut migrations = Vec::with_capacity(filenames.len());
        for (position, filename) in filenames.iter().enumerate() {
            let path = dir.join(filename);
            let sql = fs::read_to_string(&path).map_err(|e| MigrationError::io(&path, e))?;
            let stem = filename.strip_suffix(".sql").unwrap_or(filename);

            migrations.push(MigrationDescriptor::new(
                format!("{}{}", CUSTOM_TAG_PREFIX, stem),
                base + position as i64,
                modified_millis(&path),
                sql,
                MigrationSource::Custom,
                path,
            ));
        }

        Ok(migrations)
    }
}

fn modified_millis(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_journal(dir: &Path, entries: &[(i64, &str)]) {
        let entries: Vec<serde_json::Value> = entries
            .iter()
            .map(|(idx, tag)| {
                serde_json::json!({
                    "idx": idx,
                    "version": "7",
                    "when": 1_714_000_000_000i64 + idx,
                    "tag": tag,
                    "breakpoints": true
                })
            })
            .collect();
        let journal = serde_json::json!({
            "version": "7",
            "dialect": "postgresql",
            "entries": entries
        });

        fs::create_dir_all(dir.join("meta")).unwrap();
        fs::write(dir.join("meta").join("_journal.json"), journal.to_string()).unwrap();
    }

    fn loader_for(dir: &TempDir) -> MigrationLoader {
        MigrationLoader::new(MigrationConfig::default().with_migrations_dir(dir.path()))
    }

    #[test]
    fn test_journal_then_custom_ordering() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        // Journal lists entries out of order on purpose
        write_journal(root, &[(2, "0002_claims"), (0, "0000_init"), (1, "0001_quotes")]);
        for tag in ["0000_init", "0001_quotes", "0002_claims"] {
            fs::write(root.join(format!("{}.sql", tag)), "SELECT 1;").unwrap();
        }

        let custom = root.join("migrations");
        fs::create_dir_all(&custom).unwrap();
        // Written b before a so directory order differs from filename order
        fs::write(custom.join("b.sql"), "SELECT 'b';").unwrap();
        fs::write(custom.join("a.sql"), "SELECT 'a';").unwrap();
        fs::write(custom.join("notes.txt"), "not a migration").unwrap();

        let loaded = loader_for(&temp_dir).load().unwrap();
        let tags: Vec<&str> = loaded.migrations.iter().map(|m| m.tag.as_str()).collect();

        assert_eq!(
            tags,
            vec!["0000_init", "0001_quotes", "0002_claims", "custom_a", "custom_b"]
        );
        assert_eq!(loaded.journal_count, 3);
        assert_eq!(loaded.custom_count, 2);
        assert_eq!(loaded.migrations[3].sequence_index, CUSTOM_BASE);
        assert_eq!(loaded.migrations[4].sequence_index, CUSTOM_BASE + 1);
        assert_eq!(loaded.migrations[3].source, MigrationSource::Custom);
    }

    #[test]
    fn test_custom_indices_stay_above_large_journal_indices() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write_journal(root, &[(1500, "1500_late")]);
        fs::write(root.join("1500_late.sql"), "SELECT 1;").unwrap();
        fs::create_dir_all(root.join("migrations")).unwrap();
        fs::write(root.join("migrations").join("x.sql"), "SELECT 2;").unwrap();

        let loaded = loader_for(&temp_dir).load().unwrap();
        assert_eq!(loaded.migrations.last().unwrap().tag, "custom_x");
        assert_eq!(loaded.migrations.last().unwrap().sequence_index, 1501);
    }

    #[test]
    fn test_missing_migration_file_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write_journal(root, &[(0, "0000_init"), (1, "0001_missing")]);
        fs::write(root.join("0000_init.sql"), "CREATE TABLE widgets (id int);").unwrap();

        let loaded = loader_for(&temp_dir).load().unwrap();
        assert_eq!(loaded.migrations.len(), 1);
        assert_eq!(loaded.migrations[0].tag, "0000_init");
        assert_eq!(loaded.migrations[0].statements.len(), 1);
        assert_eq!(loaded.custom_count, 0);
    }

    #[test]
    fn test_missing_journal_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let custom = temp_dir.path().join("migrations");
        fs::create_dir_all(&custom).unwrap();
        fs::write(custom.join("a.sql"), "SELECT 1;").unwrap();

        let result = loader_for(&temp_dir).load();
        assert!(matches!(result, Err(MigrationError::JournalNotFound(_))));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let loader = MigrationLoader::new(
            MigrationConfig::default().with_migrations_dir(temp_dir.path().join("nope")),
        );

        assert!(matches!(loader.load(), Err(MigrationError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_malformed_journal_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("meta")).unwrap();
        fs::write(temp_dir.path().join("meta").join("_journal.json"), "{ not json").unwrap();

        let result = loader_for(&temp_dir).load();
        assert!(matches!(result, Err(MigrationError::Journal { .. })));
    }

    #[test]
    fn test_journal_fields_are_carried_over() {
        let temp_dir = TempDir::new().unwrap();
        write_journal(temp_dir.path(), &[(0, "0000_init")]);
        fs::write(
            temp_dir.path().join("0000_init.sql"),
            "CREATE TABLE a (id int);\n--> statement-breakpoint\nCREATE TABLE b (id int);",
        )
        .unwrap();

        let loader = loader_for(&temp_dir);
        let journal = loader.read_journal().unwrap();
        assert_eq!(journal.dialect, "postgresql");
        assert!(journal.entries[0].breakpoints);

        let loaded = loader.load().unwrap();
        let migration = &loaded.migrations[0];
        assert_eq!(migration.created_at_ms, 1_714_000_000_000);
        assert_eq!(migration.statements.len(), 2);
        assert_eq!(migration.source, MigrationSource::Journal);
    }
}
