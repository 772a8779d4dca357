//! Identifier and literal safety.
//!
//! Every string that ends up in SQL text passes through here: identifiers are
//! checked against a strict grammar, literals are escaped, and LLM-supplied
//! filter values are coerced or rejected before they reach the plan model.

use std::sync::LazyLock;

use regex::Regex;

use super::model::FilterValue;
use super::PlanError;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// SQL expression patterns the generator is allowed to emit as raw
/// (unquoted) SQL. Everything else is treated as a plain string literal.
static SQL_EXPR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(
            r"(?i)^(NOW\(\)|CURRENT_TIMESTAMP|CURRENT_DATE|CURRENT_TIME)(\s*[\+\-]\s*INTERVAL\s*'.+')?\s*$",
        )
        .unwrap(),
        Regex::new(r"(?i)^INTERVAL\s*'.+'$").unwrap(),
        Regex::new(r"(?i)^DATE_TRUNC\s*\(.*\)$").unwrap(),
    ]
});

/// Brace-delimited template placeholders like `{customer_id}` or
/// `{{customer_id}}`. A generator that did not substitute a real value must
/// fail loudly, never compile.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\{+[^}]+\}+$").unwrap());

/// Validate a table/column/alias name against the identifier grammar.
///
/// Returns the trimmed identifier, or a shape error. The literal wildcard
/// `*` is handled by callers and never passed here.
pub fn safe_ident(value: &str) -> Result<String, PlanError> {
    let token = value.trim();
    if !IDENT_RE.is_match(token) {
        return Err(PlanError::InvalidIdentifier(value.to_string()));
    }
    Ok(token.to_string())
}

/// Whether a string is one of the whitelisted SQL temporal expressions.
pub fn is_sql_expression(value: &str) -> bool {
    let trimmed = value.trim();
    SQL_EXPR_PATTERNS.iter().any(|p| p.is_match(trimmed))
}

/// Whether a string is an unresolved template placeholder.
pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_RE.is_match(value.trim())
}

/// Coerce an LLM-supplied filter value.
///
/// String values that are pure digits (optionally negative) become integers,
/// whitelisted temporal expressions are preserved verbatim, and unresolved
/// placeholders are rejected outright.
pub fn coerce_filter_value(value: FilterValue) -> Result<FilterValue, PlanError> {
    let FilterValue::Str(s) = value else {
        return Ok(value);
    };
    let stripped = s.trim();

    if is_placeholder(stripped) {
        return Err(PlanError::UnresolvedPlaceholder(s));
    }
    if is_sql_expression(&s) {
        return Ok(FilterValue::Str(s));
    }

    let digits = stripped.strip_prefix('-').unwrap_or(stripped);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = stripped.parse::<i64>() {
            return Ok(FilterValue::Int(n));
        }
    }
    Ok(FilterValue::Str(s))
}

/// Render a filter value as a SQL literal.
///
/// Strings are single-quote escaped unless they match the temporal expression
/// whitelist; booleans render as `TRUE`/`FALSE`; numbers pass through.
pub fn literal(value: &FilterValue) -> Result<String, PlanError> {
    match value {
        FilterValue::Null => Ok("NULL".to_string()),
        FilterValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        FilterValue::Int(n) => Ok(n.to_string()),
        FilterValue::Float(f) => Ok(f.to_string()),
        FilterValue::Str(s) => {
            if is_sql_expression(s) {
                Ok(s.clone())
            } else {
                Ok(format!("'{}'", s.replace('\'', "''")))
            }
        }
        FilterValue::List(_) => Err(PlanError::UnsupportedLiteral(
            "nested list literal".to_string(),
        )),
    }
}
