//! Structural validation of generated SQL.
//!
//! Every query leaving the compiler goes through [`validate_and_prepare`]
//! before execution: exactly one statement, SELECT-only, no comments, no
//! mutating keywords, and a hard row-limit ceiling. The returned string is
//! the parser's canonical re-serialization, never the input text.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::plan::MAX_LIMIT;

use super::{FirewallError, FirewallResult};

static FORBIDDEN_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DELETE|UPDATE|INSERT|DROP|TRUNCATE|ALTER|GRANT|REVOKE)\b").unwrap()
});

static TRAILING_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+LIMIT\s+(\d+)(?:\s+OFFSET\s+\d+)?\s*$").unwrap());

static LIMIT_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\s+LIMIT\s+)\d+").unwrap());

/// Validate raw SQL structurally and return the canonical, limit-capped form.
pub fn validate_and_prepare(sql: &str) -> FirewallResult<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(FirewallError::Empty);
    }
    if trimmed.contains("--") || trimmed.contains("/*") || trimmed.contains("*/") {
        return Err(FirewallError::CommentsNotAllowed);
    }
    if let Some(m) = FORBIDDEN_KEYWORD_RE.find(trimmed) {
        return Err(FirewallError::ForbiddenKeyword(
            m.as_str().to_uppercase(),
        ));
    }

    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, trimmed)
        .map_err(|e| FirewallError::Unparseable(e.to_string()))?;
    if statements.is_empty() {
        return Err(FirewallError::Unparseable("no statement".to_string()));
    }
    if statements.len() > 1 {
        return Err(FirewallError::MultipleStatements(statements.len()));
    }
    let statement = &statements[0];
    let Statement::Query(query) = statement else {
        return Err(FirewallError::NotSelect);
    };
    if !set_expr_is_select(&query.body) {
        return Err(FirewallError::NotSelect);
    }

    Ok(enforce_limit(&statement.to_string(), MAX_LIMIT))
}

fn set_expr_is_select(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(_) => true,
        SetExpr::Query(query) => set_expr_is_select(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_select(left) && set_expr_is_select(right)
        }
        _ => false,
    }
}

/// Cap an existing trailing LIMIT at `max`, or append one when absent.
fn enforce_limit(sql: &str, max: i64) -> String {
    let sql = sql.trim().trim_end_matches(';').trim();
    if let Some(caps) = TRAILING_LIMIT_RE.captures(sql) {
        let current: i64 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(max);
        if current <= max {
            return sql.to_string();
        }
        return LIMIT_VALUE_RE
            .replace(sql, |caps: &regex::Captures<'_>| format!("{}{max}", &caps[1]))
            .into_owned();
    }
    format!("{sql} LIMIT {max}")
}
