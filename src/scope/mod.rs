//! Mandatory tenant scope injection.
//!
//! The injector rewrites a structurally valid plan so that every
//! tenant-owned table reference carries the caller's tenant filter. It runs
//! unconditionally, even when the plan already looks correctly scoped — it
//! is a second, independent enforcement point, not a trust-the-caller
//! shortcut. The firewall re-verifies the same facts later, from the SQL
//! text alone.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::plan::{
    AliasMap, FilterOp, FilterSpec, FilterValue, JoinCondition, JoinKind, JoinSpec, QueryPlan,
};

/// Errors raised when a plan cannot be scoped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScopeError {
    /// A tenant-owned table is referenced but no tenant id was supplied.
    #[error("missing customer scope")]
    MissingCustomer,
}

pub type ScopeResult<T> = Result<T, ScopeError>;

/// The caller's authoritative identity. Never taken from generator output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantScope {
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl TenantScope {
    pub fn customer(customer_id: i64) -> Self {
        Self {
            customer_id: Some(customer_id),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Schema-specific scoping rules, shared by the injector and the firewall.
///
/// Defaults mirror the retail support schema: queries anchor on `ticket`
/// (alias `t`), line items and products are never query anchors, and every
/// tenant-owned table must carry `customer_id = <caller>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopePolicy {
    /// The table list/detail queries must anchor on.
    pub parent_table: String,
    pub parent_alias: String,
    pub parent_key: String,

    /// The line-item child table; never a query anchor.
    pub line_item_table: String,
    pub line_item_alias: String,
    /// Foreign key on the line-item table pointing at the parent.
    pub line_item_parent_fk: String,

    pub product_table: String,
    pub product_alias: String,
    /// Foreign key on the line-item table pointing at the product.
    pub product_fk: String,
    pub product_key: String,

    /// Tables whose presence means the product join chain is needed.
    pub detail_tables: Vec<String>,

    /// The tenant scope column on the parent and line-item tables.
    pub tenant_column: String,
    /// The customer account table, scoped by primary key.
    pub customer_table: String,
    /// The user table, scoped by primary key against the secondary user id.
    pub user_table: String,

    /// Table name prefixes the firewall rejects outright.
    pub forbidden_prefixes: Vec<String>,
    /// Internal reference columns that must never appear as WHERE filters.
    pub blocked_filter_columns: Vec<String>,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            parent_table: "ticket".into(),
            parent_alias: "t".into(),
            parent_key: "id".into(),
            line_item_table: "ticket_item".into(),
            line_item_alias: "ti".into(),
            line_item_parent_fk: "ticket_id".into(),
            product_table: "product".into(),
            product_alias: "p".into(),
            product_fk: "product_id".into(),
            product_key: "id".into(),
            detail_tables: vec![
                "product".into(),
                "brand".into(),
                "color".into(),
                "size".into(),
            ],
            tenant_column: "customer_id".into(),
            customer_table: "customer".into(),
            user_table: "user".into(),
            forbidden_prefixes: vec![
                "finance".into(),
                "hr".into(),
                "admin".into(),
                "analytics".into(),
                "knowledge".into(),
                "golden".into(),
                "canary".into(),
            ],
            blocked_filter_columns: vec![
                "ticket_id".into(),
                "product_id".into(),
                "numseq".into(),
                "ccexpdate".into(),
            ],
        }
    }
}

impl ScopePolicy {
    /// Tables that must carry the tenant filter when present in a query.
    pub fn scoped_tables(&self) -> [&str; 2] {
        [self.parent_table.as_str(), self.line_item_table.as_str()]
    }
}

/// Rewrite a plan so it is guaranteed to be tenant-scoped.
///
/// Forces the parent base table for child-anchored plans, inserts the
/// minimal join chain needed to keep referenced detail tables reachable,
/// strips every filter that is not the tenant-scope filter, and appends the
/// tenant filter where absent.
pub fn inject_scope(
    plan: &QueryPlan,
    policy: &ScopePolicy,
    scope: &TenantScope,
) -> ScopeResult<QueryPlan> {
    let mut scoped = plan.clone();
    let original_tables = scoped.tables();

    // Default missing aliases so later alias resolution stays unambiguous.
    if scoped.base_alias.is_none() {
        if scoped.base_table.eq_ignore_ascii_case(&policy.parent_table) {
            scoped.base_alias = Some(policy.parent_alias.clone());
        } else if scoped
            .base_table
            .eq_ignore_ascii_case(&policy.line_item_table)
        {
            scoped.base_alias = Some(policy.line_item_alias.clone());
        }
    }

    // Child tables never anchor a query; force the parent base table.
    let base_lower = scoped.base_table.to_lowercase();
    if base_lower == policy.line_item_table.to_lowercase()
        || base_lower == policy.product_table.to_lowercase()
    {
        warn!(
            from = %scoped.base_table,
            to = %policy.parent_table,
            "forcing parent base table"
        );
        scoped.base_table = policy.parent_table.clone();
        scoped.base_alias = Some(policy.parent_alias.clone());

        let needs_chain = policy
            .detail_tables
            .iter()
            .any(|t| original_tables.contains(&t.to_lowercase()));
        if needs_chain {
            ensure_join_chain(&mut scoped, policy);
        }
    }

    // Only the tenant-scope column is an honored filter; internal id and
    // expiry filters are references already covered by tenant scope.
    scoped.filters.retain(|f| {
        let keep = f.column.eq_ignore_ascii_case(&policy.tenant_column);
        if !keep {
            warn!(column = %f.column, operator = f.operator.as_sql(), "dropping invalid filter");
        }
        keep
    });

    let tables = scoped.tables();
    let alias_map = AliasMap::build(&scoped);

    // Tenant scope on the parent table whenever parent or line items appear.
    if tables.contains(&policy.parent_table.to_lowercase())
        || tables.contains(&policy.line_item_table.to_lowercase())
    {
        let customer_id = scope.customer_id.ok_or(ScopeError::MissingCustomer)?;
        let parent_ref = alias_map
            .alias_for(&policy.parent_table)
            .unwrap_or(&policy.parent_alias)
            .to_string();
        if !has_filter(&scoped, &alias_map, &parent_ref, &policy.tenant_column, customer_id) {
            scoped.filters.push(FilterSpec {
                table: parent_ref,
                column: policy.tenant_column.clone(),
                operator: FilterOp::Eq,
                value: FilterValue::Int(customer_id),
            });
            info!(customer_id, "injected tenant scope filter");
        }
    }

    // Customer account table is scoped by primary key.
    if tables.contains(&policy.customer_table.to_lowercase()) {
        if let Some(customer_id) = scope.customer_id {
            let customer_ref = alias_map
                .alias_for(&policy.customer_table)
                .unwrap_or(&policy.customer_table)
                .to_string();
            if !has_filter(&scoped, &alias_map, &customer_ref, "id", customer_id) {
                scoped.filters.push(FilterSpec {
                    table: customer_ref,
                    column: "id".into(),
                    operator: FilterOp::Eq,
                    value: FilterValue::Int(customer_id),
                });
            }
        }
    }

    // Secondary user scope.
    if tables.contains(&policy.user_table.to_lowercase()) {
        if let Some(user_id) = scope.user_id {
            let user_ref = alias_map
                .alias_for(&policy.user_table)
                .unwrap_or(&policy.user_table)
                .to_string();
            if !has_filter(&scoped, &alias_map, &user_ref, "id", user_id) {
                scoped.filters.push(FilterSpec {
                    table: user_ref,
                    column: "id".into(),
                    operator: FilterOp::Eq,
                    value: FilterValue::Int(user_id),
                });
            }
        }
    }

    Ok(scoped)
}

/// Insert the parent → line-item → product join chain, skipping joins the
/// plan already carries.
fn ensure_join_chain(plan: &mut QueryPlan, policy: &ScopePolicy) {
    let has_line_item = plan
        .joins
        .iter()
        .any(|j| j.table.eq_ignore_ascii_case(&policy.line_item_table));
    if !has_line_item {
        plan.joins.insert(
            0,
            JoinSpec {
                table: policy.line_item_table.clone(),
                alias: Some(policy.line_item_alias.clone()),
                join_type: JoinKind::Inner,
                on: vec![JoinCondition {
                    left_table: policy.parent_alias.clone(),
                    left_column: policy.parent_key.clone(),
                    right_table: policy.line_item_alias.clone(),
                    right_column: policy.line_item_parent_fk.clone(),
                }],
            },
        );
    }
    let has_product = plan
        .joins
        .iter()
        .any(|j| j.table.eq_ignore_ascii_case(&policy.product_table));
    if !has_product {
        plan.joins.push(JoinSpec {
            table: policy.product_table.clone(),
            alias: Some(policy.product_alias.clone()),
            join_type: JoinKind::Inner,
            on: vec![JoinCondition {
                left_table: policy.line_item_alias.clone(),
                left_column: policy.product_fk.clone(),
                right_table: policy.product_alias.clone(),
                right_column: policy.product_key.clone(),
            }],
        });
    }
}

/// Alias-aware check for an existing `table.column = value` equality filter.
fn has_filter(
    plan: &QueryPlan,
    alias_map: &AliasMap,
    table_ref: &str,
    column: &str,
    value: i64,
) -> bool {
    let resolved = alias_map.resolve(table_ref).to_lowercase();
    plan.filters.iter().any(|f| {
        alias_map.resolve(&f.table).to_lowercase() == resolved
            && f.column.eq_ignore_ascii_case(column)
            && f.operator == FilterOp::Eq
            && f.value == FilterValue::Int(value)
    })
}
