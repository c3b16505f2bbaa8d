//! Status and rollback reporting
//!
//! Read-only views over the ledger. The rollback plan lists what was applied
//! most recently; nothing here reverses a migration.

use std::collections::{HashMap, HashSet};

use super::definitions::{LedgerEntry, MigrationDescriptor};

/// Shown with every rollback listing
pub const ROLLBACK_DISCLAIMER: [&str; 3] = [
    "Note: Automatic rollback is not supported.",
    "To rollback, you must manually create a new migration with the reverse operations.",
    "Example: If migration created a table, the rollback migration would DROP that table.",
];

/// Descriptors with no ledger entry, in sequence order
pub fn pending_migrations<'a>(
    all: &'a [MigrationDescriptor],
    applied: &[LedgerEntry],
) -> Vec<&'a MigrationDescriptor> {
    let applied_tags: HashSet<&str> = applied.iter().map(|entry| entry.tag.as_str()).collect();
    let mut pending: Vec<&MigrationDescriptor> = all
        .iter()
        .filter(|migration| !applied_tags.contains(migration.tag.as_str()))
        .collect();
    pending.sort_by_key(|migration| migration.sequence_index);
    pending
}

/// A ledger row whose file content no longer hashes to the recorded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashDrift {
    pub tag: String,
    pub recorded: String,
    pub current: String,
}

/// Applied versus pending, as shown by `--status`
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Ledger entries that match a migration on disk, by id
    pub applied: Vec<LedgerEntry>,
    /// Migrations with no ledger entry, by sequence index
    pub pending: Vec<MigrationDescriptor>,
    /// Ledger entries whose migration file is gone
    pub orphaned: Vec<LedgerEntry>,
    pub drifted: Vec<HashDrift>,
    /// Number of migrations found on disk
    pub total: usize,
}

impl StatusReport {
    pub fn build(all: &[MigrationDescriptor], mut ledger: Vec<LedgerEntry>) -> Self {
        ledger.sort_by_key(|entry| entry.id);

        let by_tag: HashMap<&str, &MigrationDescriptor> = all
            .iter()
            .map(|migration| (migration.tag.as_str(), migration))
            .collect();

        let pending = pending_migrations(all, &ledger)
            .into_iter()
            .cloned()
            .collect();

        let mut applied = Vec::new();
        let mut orphaned = Vec::new();
        let mut drifted = Vec::new();

        for entry in ledger {
            match by_tag.get(entry.tag.as_str()) {
                Some(migration) => {
                    let current = migration.content_hash();
                    if current != entry.hash {
                        drifted.push(HashDrift {
                            tag: entry.tag.clone(),
                            recorded: entry.hash.clone(),
                            current,
                        });
                    }
                    applied.push(entry);
                }
                None => orphaned.push(entry),
            }
        }

        Self {
            applied,
            pending,
            orphaned,
            drifted,
            total: all.len(),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Most recently applied migrations first
#[derive(Debug, Clone, Default)]
pub struct RollbackPlan {
    pub entries: Vec<LedgerEntry>,
}

impl RollbackPlan {
    /// Entries are ordered by rollback order, highest first
    pub fn new(mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by(|a, b| {
            b.rollback_order
                .cmp(&a.rollback_order)
                .then_with(|| b.id.cmp(&a.id))
        });
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn disclaimer(&self) -> &'static [&'static str] {
        &ROLLBACK_DISCLAIMER
    }
}
