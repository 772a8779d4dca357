//! Query plan model, extraction, and normalization.
//!
//! The plan is the typed intermediate representation of one SELECT query,
//! produced before any SQL text exists. `parse_query_plan` is the entry
//! point: it extracts candidate JSON objects from raw generator output,
//! normalizes each, and returns the first candidate that validates against
//! the model.

mod extract;
pub mod ident;
mod model;
mod normalize;

pub use extract::extract_json_objects;
pub use ident::{coerce_filter_value, is_placeholder, is_sql_expression, literal, safe_ident};
pub use model::{
    AggFunc, AggregateSpec, AliasMap, CompareOp, FilterOp, FilterSpec, FilterValue, GroupByField,
    HavingSpec, JoinCondition, JoinKind, JoinSpec, QueryPlan, SelectField, SortDir, SortSpec,
    MAX_LIMIT,
};
pub use normalize::normalize_payload;

use tracing::debug;

/// Errors raised while extracting, normalizing, or validating a plan.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    /// The generator returned nothing at all.
    #[error("query plan was empty")]
    EmptyResponse,

    /// No candidate parsed as a JSON object.
    #[error("query plan response did not contain a JSON object")]
    NoJsonObject,

    /// An identifier field failed the identifier grammar.
    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A filter value still contains an unsubstituted template.
    #[error("filter value contains unresolved placeholder: {0:?}")]
    UnresolvedPlaceholder(String),

    /// A literal type the compiler cannot render.
    #[error("unsupported filter literal: {0}")]
    UnsupportedLiteral(String),

    /// The payload failed model validation.
    #[error("invalid query plan: {0}")]
    InvalidPlan(String),
}

impl PlanError {
    /// Whether this is an extraction failure (no plan found at all) rather
    /// than a shape failure of a found plan.
    pub fn is_extraction(&self) -> bool {
        matches!(self, PlanError::EmptyResponse | PlanError::NoJsonObject)
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Parse and validate a generator-produced query plan blob.
///
/// Each extracted candidate is normalized and validated in order; the first
/// valid plan wins. A placeholder value aborts the whole parse — a generator
/// that did not substitute a real value must fail loudly.
pub fn parse_query_plan(raw: &str) -> PlanResult<QueryPlan> {
    let payloads = extract_json_objects(raw)?;
    let mut last_error: Option<PlanError> = None;
    for payload in payloads {
        let normalized = normalize_payload(payload)?;
        match QueryPlan::from_value(normalized) {
            Ok(plan) => {
                debug!(
                    base_table = %plan.base_table,
                    filters = plan.filters.len(),
                    "parsed query plan"
                );
                return Ok(plan);
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or(PlanError::NoJsonObject))
}
