//! # Sqlward
//!
//! Tenant-scoped natural-language-to-SQL planning, compilation, and firewalling.
//!
//! ## Architecture
//!
//! Sqlward turns a free-text question into exactly one provably tenant-scoped,
//! read-only SQL statement. The language model is treated as an untrusted
//! generator: everything it emits is re-parsed, re-validated, and re-scoped.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            LLM output (JSON plan, decorated)             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [extract + normalize]
//! ┌─────────────────────────────────────────────────────────┐
//! │              QueryPlan (typed, validated)                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [scope injector]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Scoped plan (mandatory tenant filters)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [corrector + compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │          SQL text (re-parsed via sqlparser)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [structural validator + firewall]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Execution (cached, one connection per attempt)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The firewall passes operate purely on the final SQL AST, never on the plan
//! that produced it, so a buggy compiler cannot bypass them.

pub mod agent;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod firewall;
pub mod memory;
pub mod plan;
pub mod scope;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::agent::provider::{
        ChatMessage, ProviderError, QueryExecutor, Row, SchemaProvider, TextGenerator,
    };
    pub use crate::agent::{AgentError, QueryMetadata, QueryOutcome, SqlAgent};
    pub use crate::cache::ResultCache;
    pub use crate::compiler::{build_sql, correct_aggregates};
    pub use crate::firewall::{enforce_scope, run_firewall, validate_and_prepare};
    pub use crate::memory::SqlQueryMemory;
    pub use crate::plan::{parse_query_plan, PlanError, QueryPlan, MAX_LIMIT};
    pub use crate::scope::{inject_scope, ScopePolicy, TenantScope};
}

pub use agent::SqlAgent;
pub use plan::{parse_query_plan, QueryPlan};
pub use scope::{ScopePolicy, TenantScope};
