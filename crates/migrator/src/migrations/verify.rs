//! Post-apply verification
//!
//! Best-effort pattern matching over a migration's raw SQL for the tables and
//! indexes it creates, followed by catalog lookups. A miss is only ever a
//! warning: the migration is already committed when this runs, and valid DDL
//! variants the patterns do not recognize are expected.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sqlx::PgPool;
use std::fmt;

use super::definitions::MigrationDescriptor;
use crate::error::MigrationResult;

const IDENT: &str = r#"("[^"]+"|\w+)"#;

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\bCREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}(?:\s*\.\s*{IDENT})?"
    ))
    .expect("table pattern is valid")
});

static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\bCREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}\s+ON\s+(?:ONLY\s+)?{IDENT}(?:\s*\.\s*{IDENT})?"
    ))
    .expect("index pattern is valid")
});

const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Index,
}

/// A schema object a migration is expected to have created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedObject {
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
}

impl fmt::Display for ExpectedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ObjectKind::Table => "Table",
            ObjectKind::Index => "Index",
        };
        write!(f, "{} {}.{}", kind, self.schema, self.name)
    }
}

/// Outcome of verifying one migration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub checked: Vec<ExpectedObject>,
    pub missing: Vec<ExpectedObject>,
    /// Set when a catalog query failed; the report is then incomplete
    pub error: Option<String>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.error.is_none()
    }
}

/// Quoted identifiers keep their case, bare ones fold to lower case
fn normalize_identifier(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => quoted.to_string(),
        None => raw.to_lowercase(),
    }
}

/// Schema and name from an optionally schema-qualified pair of captures
fn qualified_name(caps: &Captures<'_>, first: usize) -> (String, String) {
    let head = normalize_identifier(&caps[first]);
    match caps.get(first + 1) {
        Some(name) => (head, normalize_identifier(name.as_str())),
        None => (DEFAULT_SCHEMA.to_string(), head),
    }
}

/// Tables and indexes the migration's SQL creates, in order of appearance
pub fn expected_objects(sql: &str) -> Vec<ExpectedObject> {
    let mut objects: Vec<ExpectedObject> = Vec::new();

    for caps in CREATE_TABLE.captures_iter(sql) {
        let (schema, name) = qualified_name(&caps, 1);
        let object = ExpectedObject {
            kind: ObjectKind::Table,
            schema,
            name,
        };
        if !objects.contains(&object) {
            objects.push(object);
        }
    }

    for caps in CREATE_INDEX.captures_iter(sql) {
        let raw = &caps[1];
        // Unnamed `CREATE INDEX [CONCURRENTLY] ON table (...)` has nothing to check
        if raw.eq_ignore_ascii_case("on") || raw.eq_ignore_ascii_case("concurrently") {
            continue;
        }
        // An index always lives in the schema of its table
        let (schema, _) = qualified_name(&caps, 2);
        let object = ExpectedObject {
            kind: ObjectKind::Index,
            schema,
            name: normalize_identifier(raw),
        };
        if !objects.contains(&object) {
            objects.push(object);
        }
    }

    objects
}

async fn object_exists(pool: &PgPool, object: &ExpectedObject) -> MigrationResult<bool> {
    let sql = match object.kind {
        ObjectKind::Table => {
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)"
        }
        ObjectKind::Index => {
            "SELECT EXISTS (SELECT 1 FROM pg_indexes \
             WHERE schemaname = $1 AND indexname = $2)"
        }
    };

    let exists: bool = sqlx::query_scalar(sql)
        .bind(&object.schema)
        .bind(&object.name)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Check the catalog for every object the migration should have created.
///
/// Never fails: query errors are folded into the report.
pub async fn verify(pool: &PgPool, migration: &MigrationDescriptor) -> VerificationReport {
    let mut report = VerificationReport::default();

    for object in expected_objects(&migration.raw_sql) {
        match object_exists(pool, &object).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(tag = %migration.tag, "Verification: {} was not created", object);
                report.missing.push(object.clone());
            }
            Err(e) => {
                tracing::warn!(tag = %migration.tag, error = %e, "Verification query failed");
                report.error = Some(e.to_string());
                report.checked.push(object);
                break;
            }
        }
        report.checked.push(object);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(schema: &str, name: &str) -> ExpectedObject {
        ExpectedObject {
            kind: ObjectKind::Table,
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    fn index(name: &str) -> ExpectedObject {
        ExpectedObject {
            kind: ObjectKind::Index,
            schema: "public".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_drizzle_style_ddl() {
        let sql = r#"CREATE TABLE IF NOT EXISTS "policies" (
	"id" serial PRIMARY KEY NOT NULL
);
--> statement-breakpoint
CREATE UNIQUE INDEX IF NOT EXISTS "policies_number_idx" ON "policies" USING btree ("number");"#;

        assert_eq!(
            expected_objects(sql),
            vec![table("public", "policies"), index("policies_number_idx")]
        );
    }

    #[test]
    fn test_case_folding_and_schema_qualification() {
        let sql = "create table Widgets (id int);\n\
                   CREATE TABLE billing.\"Invoices\" (id int);\n\
                   CREATE INDEX Widgets_Id_Idx ON Widgets (id);";

        assert_eq!(
            expected_objects(sql),
            vec![
                table("public", "widgets"),
                table("billing", "Invoices"),
                index("widgets_id_idx"),
            ]
        );
    }

    #[test]
    fn test_unnamed_and_concurrent_indexes() {
        let sql = "CREATE INDEX ON claims (status);\n\
                   CREATE INDEX CONCURRENTLY claims_created_idx ON claims (created_at);";

        assert_eq!(expected_objects(sql), vec![index("claims_created_idx")]);
    }

    #[test]
    fn test_index_schema_follows_its_table() {
        let sql = "CREATE INDEX invoices_due_idx ON billing.invoices (due_at);\n\
                   CREATE INDEX CONCURRENTLY ON billing.invoices (paid_at);\n\
                   CREATE UNIQUE INDEX \"Invoice_Number\" ON ONLY \"billing\".\"invoices\" (number);";

        assert_eq!(
            expected_objects(sql),
            vec![
                ExpectedObject {
                    kind: ObjectKind::Index,
                    schema: "billing".to_string(),
                    name: "invoices_due_idx".to_string(),
                },
                ExpectedObject {
                    kind: ObjectKind::Index,
                    schema: "billing".to_string(),
                    name: "Invoice_Number".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let sql = "CREATE TABLE IF NOT EXISTS a (id int);\nCREATE TABLE a (id int);";
        assert_eq!(expected_objects(sql), vec![table("public", "a")]);
    }

    #[test]
    fn test_non_ddl_yields_nothing() {
        assert!(expected_objects("ALTER TABLE a ADD COLUMN b int; DROP INDEX x;").is_empty());
    }

    #[test]
    fn test_report_state() {
        let mut report = VerificationReport::default();
        assert!(report.is_clean());

        report.missing.push(table("public", "widgets"));
        assert!(!report.is_clean());
        assert_eq!(report.missing[0].to_string(), "Table public.widgets");
    }
}
