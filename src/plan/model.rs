//! The typed query plan model.
//!
//! `QueryPlan` is the canonical intermediate representation of one read
//! query. It is deserialized from an already-normalized JSON payload and
//! every identifier field is validated at construction time; a bad
//! identifier is a rejection, never a silent drop.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ident::safe_ident;
use super::PlanError;

/// Hard ceiling on row counts. Every compiled query carries a LIMIT in
/// `[1, MAX_LIMIT]` regardless of what was requested.
pub const MAX_LIMIT: i64 = 50;

fn default_limit() -> i64 {
    MAX_LIMIT
}

// =============================================================================
// Closed vocabularies
// =============================================================================

/// Aggregate functions the plan may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl Default for JoinKind {
    fn default() -> Self {
        JoinKind::Inner
    }
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
        }
    }
}

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    ILike,
    #[serde(rename = "is null")]
    IsNull,
    #[serde(rename = "is not null")]
    IsNotNull,
}

impl FilterOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
            FilterOp::Like => "LIKE",
            FilterOp::ILike => "ILIKE",
            FilterOp::IsNull => "IS NULL",
            FilterOp::IsNotNull => "IS NOT NULL",
        }
    }
}

/// Comparison operators allowed in HAVING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl Default for SortDir {
    fn default() -> Self {
        SortDir::Asc
    }
}

impl SortDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

// =============================================================================
// Filter values
// =============================================================================

/// A literal filter value as supplied by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FilterValue>),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Null
    }
}

// =============================================================================
// Plan records
// =============================================================================

/// One equality condition of a JOIN's ON list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

impl JoinCondition {
    fn validate(&self) -> Result<(), PlanError> {
        safe_ident(&self.left_table)?;
        safe_ident(&self.left_column)?;
        safe_ident(&self.right_table)?;
        safe_ident(&self.right_column)?;
        Ok(())
    }
}

/// A SELECT list entry. `column` may be the literal wildcard `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectField {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SelectField {
    fn validate(&self) -> Result<(), PlanError> {
        if self.table != "*" {
            safe_ident(&self.table)?;
        }
        if self.column != "*" {
            safe_ident(&self.column)?;
        }
        if let Some(alias) = &self.alias {
            safe_ident(alias)?;
        }
        Ok(())
    }
}

/// An aggregate entry: `func(table.column)` with optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default = "AggregateSpec::default_column")]
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub distinct: bool,
}

impl AggregateSpec {
    fn default_column() -> String {
        "*".to_string()
    }

    fn validate(&self) -> Result<(), PlanError> {
        if let Some(table) = &self.table {
            safe_ident(table)?;
        }
        if self.column != "*" {
            safe_ident(&self.column)?;
        }
        if let Some(alias) = &self.alias {
            safe_ident(alias)?;
        }
        Ok(())
    }
}

/// A JOIN entry. An empty `on` list is accepted by the model but rejected
/// by the compiler; the normalizer never fabricates conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub join_type: JoinKind,
    #[serde(default)]
    pub on: Vec<JoinCondition>,
}

impl JoinSpec {
    fn validate(&self) -> Result<(), PlanError> {
        safe_ident(&self.table)?;
        if let Some(alias) = &self.alias {
            safe_ident(alias)?;
        }
        for cond in &self.on {
            cond.validate()?;
        }
        Ok(())
    }
}

/// A WHERE filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub table: String,
    pub column: String,
    pub operator: FilterOp,
    #[serde(default)]
    pub value: FilterValue,
}

impl FilterSpec {
    fn validate(&self) -> Result<(), PlanError> {
        safe_ident(&self.table)?;
        safe_ident(&self.column)?;
        Ok(())
    }
}

/// A HAVING entry: `func(table.column) op value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HavingSpec {
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default = "AggregateSpec::default_column")]
    pub column: String,
    pub operator: CompareOp,
    pub value: FilterValue,
}

impl HavingSpec {
    fn validate(&self) -> Result<(), PlanError> {
        if let Some(table) = &self.table {
            safe_ident(table)?;
        }
        if self.column != "*" {
            safe_ident(&self.column)?;
        }
        Ok(())
    }
}

/// A GROUP BY entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupByField {
    pub table: String,
    pub column: String,
}

impl GroupByField {
    fn validate(&self) -> Result<(), PlanError> {
        safe_ident(&self.table)?;
        safe_ident(&self.column)?;
        Ok(())
    }
}

/// An ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub direction: SortDir,
}

impl SortSpec {
    fn validate(&self) -> Result<(), PlanError> {
        safe_ident(&self.table)?;
        safe_ident(&self.column)?;
        Ok(())
    }
}

// =============================================================================
// QueryPlan
// =============================================================================

/// The canonical intermediate representation of one read query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub base_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_alias: Option<String>,
    #[serde(default)]
    pub select: Vec<SelectField>,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub group_by: Vec<GroupByField>,
    #[serde(default)]
    pub having: Vec<HavingSpec>,
    #[serde(default)]
    pub order_by: Vec<SortSpec>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl QueryPlan {
    /// Construct a plan from a normalized JSON payload, validating every
    /// identifier field and clamping the limit. This is the only supported
    /// way to build a plan from untrusted input.
    pub fn from_value(value: serde_json::Value) -> Result<Self, PlanError> {
        let mut plan: QueryPlan =
            serde_json::from_value(value).map_err(|e| PlanError::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Validate identifier fields and normalize limit/offset in place.
    pub fn validate(&mut self) -> Result<(), PlanError> {
        safe_ident(&self.base_table)?;
        if let Some(alias) = &self.base_alias {
            safe_ident(alias)?;
        }
        for item in &self.select {
            item.validate()?;
        }
        for item in &self.aggregates {
            item.validate()?;
        }
        for item in &self.joins {
            item.validate()?;
        }
        for item in &self.filters {
            item.validate()?;
        }
        for item in &self.group_by {
            item.validate()?;
        }
        for item in &self.having {
            item.validate()?;
        }
        for item in &self.order_by {
            item.validate()?;
        }
        self.limit = self.limit.clamp(1, MAX_LIMIT);
        if matches!(self.offset, Some(o) if o < 0) {
            self.offset = None;
        }
        Ok(())
    }

    /// Lowercased names of every table the plan references.
    pub fn tables(&self) -> std::collections::HashSet<String> {
        let mut tables = std::collections::HashSet::new();
        tables.insert(self.base_table.to_lowercase());
        for join in &self.joins {
            tables.insert(join.table.to_lowercase());
        }
        tables
    }
}

// =============================================================================
// Alias map
// =============================================================================

/// Per-plan mapping from lowercased table name to the alias used in the
/// compiled SQL. Built once per compile pass; every column reference is
/// resolved through it so aliasing never defeats scope detection.
#[derive(Debug, Clone)]
pub struct AliasMap {
    entries: HashMap<String, String>,
}

impl AliasMap {
    pub fn build(plan: &QueryPlan) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            plan.base_table.to_lowercase(),
            plan.base_alias
                .clone()
                .unwrap_or_else(|| plan.base_table.clone()),
        );
        for join in &plan.joins {
            entries.insert(
                join.table.to_lowercase(),
                join.alias.clone().unwrap_or_else(|| join.table.clone()),
            );
        }
        Self { entries }
    }

    /// Resolve a table reference (name or alias) to the alias in use.
    pub fn resolve<'a>(&'a self, table_ref: &'a str) -> &'a str {
        if let Some(alias) = self.entries.get(&table_ref.to_lowercase()) {
            return alias;
        }
        // Already an alias in use, or an unknown reference left as-is.
        table_ref
    }

    /// The alias for a table name, if the table is part of the plan.
    pub fn alias_for(&self, table: &str) -> Option<&str> {
        self.entries.get(&table.to_lowercase()).map(|s| s.as_str())
    }
}
