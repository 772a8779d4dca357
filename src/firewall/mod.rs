//! SQL firewall: the last line of defense before execution.
//!
//! ```text
//!   compiled SQL
//!        │
//!        ▼
//!   ┌────────────────────┐   canonical, limit-capped SQL
//!   │ validate_and_prepare│ ─────────────────────────────►
//!   └────────────────────┘
//!        │
//!        ▼
//!   ┌────────────────────┐   proves tenant filters exist
//!   │ enforce_scope      │   with the right literal values
//!   └────────────────────┘
//!        │
//!        ▼
//!   ┌────────────────────┐   forbidden tables, unscoped
//!   │ run_firewall       │   aggregates
//!   └────────────────────┘
//! ```
//!
//! All three passes operate on SQL text and re-parse it themselves, so they
//! hold no matter how the SQL was produced.

mod ast;
mod scope_check;
mod structural;

pub use scope_check::{enforce_scope, run_firewall};
pub use structural::validate_and_prepare;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("empty SQL")]
    Empty,

    #[error("SQL comments are not allowed")]
    CommentsNotAllowed,

    #[error("could not parse SQL: {0}")]
    Unparseable(String),

    #[error("expected a single statement, got {0}")]
    MultipleStatements(usize),

    #[error("only SELECT statements are allowed")]
    NotSelect,

    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("filtering on internal column '{0}' is not allowed")]
    BlockedFilterColumn(String),

    #[error("table '{line_item}' requires a join to '{parent}'")]
    LineItemWithoutParent { line_item: String, parent: String },

    #[error("no tenant context available for table '{0}'")]
    MissingTenantContext(String),

    #[error("no user context available for table '{0}'")]
    MissingUserContext(String),

    #[error("missing required filter {column} = {expected}")]
    MissingScopeFilter { column: String, expected: i64 },

    #[error("filter on {column} has value {found}, expected {expected}")]
    WrongScopeValue {
        column: String,
        expected: i64,
        found: i64,
    },

    #[error("access to table '{0}' is forbidden")]
    ForbiddenTable(String),

    #[error("aggregate query is not tenant-scoped: {0}")]
    UnscopedAggregate(String),
}

pub type FirewallResult<T> = Result<T, FirewallError>;
