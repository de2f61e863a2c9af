//! SQL guards for backend adapters
//!
//! Table reads are assembled from caller-supplied identifiers, so every
//! identifier is validated before it is spliced into SQL text. Free-form
//! queries are only checked for being read-only.

use super::query::{QueryOptions, SortDirection};
use crate::error::{GatewayError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const DANGEROUS_PATTERNS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "exec", "execute",
    "union", "--", "/*", "*/", ";", "xp_", "sp_", "0x", "\\x",
];

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_\-\.]+$").expect("valid table regex"))
}

fn column_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("valid column regex"))
}

fn write_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE|MERGE)\b")
            .expect("valid keyword regex")
    })
}

fn quoted_literal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*""#).expect("valid literal regex")
    })
}

/// Returns true when `sql` starts with SELECT or WITH and names no write keyword.
///
/// Quoted literals and quoted identifiers are ignored, so `WHERE action = 'delete'`
/// is still read-only. An unterminated quote is scanned as plain text.
pub fn is_read_only_sql(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_ascii_uppercase();
    if !(trimmed.starts_with("SELECT") || trimmed.starts_with("WITH")) {
        return false;
    }
    let unquoted = quoted_literal_pattern().replace_all(sql, "''");
    !write_keyword_pattern().is_match(&unquoted)
}

/// Validates identifiers and builds table reads
#[derive(Debug, Clone, Default)]
pub struct SqlSanitizer {
    allowed_tables: HashSet<String>,
}

impl SqlSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict table reads to an explicit allow-list. An empty list allows any valid name.
    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate_table_name(&self, table: &str) -> Result<String> {
        let table = strip_quotes(table);

        if !self.allowed_tables.is_empty() && !self.allowed_tables.contains(&table) {
            return Err(GatewayError::InvalidRequest(format!(
                "table '{}' is not in allowed list",
                table
            )));
        }

        if !table_pattern().is_match(&table) {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid table name format: '{}'",
                table
            )));
        }

        let lower = table.to_ascii_lowercase();
        if DANGEROUS_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Err(GatewayError::InvalidRequest(format!(
                "potential SQL injection detected in table name: '{}'",
                table
            )));
        }

        Ok(table)
    }

    pub fn validate_column_name(&self, column: &str) -> Result<String> {
        let column = strip_quotes(column);
        if !column_pattern().is_match(&column) {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid column name: '{}'",
                column
            )));
        }
        Ok(column)
    }

    /// `SELECT * FROM <table> [ORDER BY <col> <dir>] [LIMIT n [OFFSET m]]`
    ///
    /// `quote` wraps the validated table name for dialects that need it.
    pub fn build_table_query(
        &self,
        table: &str,
        opts: &QueryOptions,
        quote: impl Fn(&str) -> String,
    ) -> Result<String> {
        let table = self.validate_table_name(table)?;
        let mut query = format!("SELECT * FROM {}", quote(&table));

        if let Some(order_by) = opts.order_by.as_deref().filter(|c| !c.is_empty()) {
            let column = self.validate_column_name(order_by)?;
            let dir = opts.order_dir.unwrap_or(SortDirection::Asc);
            query.push_str(&format!(" ORDER BY {} {}", column, dir.as_sql()));
        }

        if let Some(limit) = opts.limit.filter(|l| *l > 0) {
            query.push_str(&format!(" LIMIT {}", limit));
            if let Some(offset) = opts.offset.filter(|o| *o > 0) {
                query.push_str(&format!(" OFFSET {}", offset));
            }
        }

        Ok(query)
    }
}

fn strip_quotes(ident: &str) -> String {
    ident.chars().filter(|c| !matches!(c, '`' | '\'' | '"')).collect()
}
