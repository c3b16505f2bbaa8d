//! Statement Parser - Splits migration files into executable statements
//!
//! Drizzle separates statements with an explicit breakpoint marker. Files
//! without one (hand-written custom migrations) are split on semicolons that
//! sit outside quoted strings and line comments.

/// Marker Drizzle writes between independently executable statements
pub const BREAKPOINT_DELIMITER: &str = "--> statement-breakpoint";

/// Split raw migration SQL into an ordered list of statements.
///
/// Never returns an empty string; an empty or comment-only file yields an
/// empty list.
pub fn split_statements(sql: &str) -> Vec<String> {
    if sql.contains(BREAKPOINT_DELIMITER) {
        return sql
            .split(BREAKPOINT_DELIMITER)
            .map(str::trim)
            .filter(|piece| is_executable(piece))
            .map(str::to_string)
            .collect();
    }

    split_on_semicolons(sql)
}

fn split_on_semicolons(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_line_comment = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        match quote {
            Some(q) if c == q => {
                // A doubled quote is an escaped quote, not the end of the string
                if chars.peek() == Some(&q) {
                    chars.next();
                    current.push(q);
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '-' if chars.peek() == Some(&'-') => in_line_comment = true,
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                _ => {}
            },
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if is_executable(trimmed) {
        statements.push(trimmed.to_string());
    }
}

/// False for blank pieces, pure `--` comment blocks and a bare `;`
fn is_executable(piece: &str) -> bool {
    piece.lines().map(str::trim).any(|line| {
        !line.is_empty() && !line.starts_with("--") && line != ";"
    })
}

/// Single-line preview of a statement for dry-run and verbose output
pub fn statement_preview(statement: &str, width: usize) -> String {
    let flat: String = statement
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    if flat.chars().count() > width {
        let truncated: String = flat.chars().take(width).collect();
        format!("{}...", truncated)
    } else {
        flat
    }
}

/// Short deterministic hash of a migration's content.
///
/// 31-multiplier rolling hash over UTF-16 code units in wrapping 32-bit
/// arithmetic, rendered as the zero-padded hex of its absolute value. Ledger
/// rows written by the earlier JavaScript tooling use the same format.
pub fn content_hash(content: &str) -> String {
    let mut hash: i32 = 0;
    for unit in content.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    format!("{:08x}", i64::from(hash).abs())
}
