//! Tenant-scope enforcement over the parsed SQL AST.
//!
//! These passes never trust the plan that produced the SQL: they re-parse
//! the final string and prove that the required tenant filters are present
//! with the right literal values before anything reaches the database.

use std::collections::HashSet;

use sqlparser::ast::{BinaryOperator, Expr};
use tracing::debug;

use crate::scope::{ScopePolicy, TenantScope};

use super::ast::{
    column_matches, extract_int_literal, parse_single, table_aliases, walk_exprs,
};
use super::{FirewallError, FirewallResult};

/// Verify that the query carries the mandatory tenant filters.
///
/// Checks, in order: blocked filter columns in WHERE, line-item tables
/// without their parent, and an exact-value scope filter for the parent
/// table, the customer table, and the user table when each is present.
pub fn enforce_scope(
    sql: &str,
    policy: &ScopePolicy,
    scope: &TenantScope,
) -> FirewallResult<()> {
    let statement = parse_single(sql)?;
    let aliases = table_aliases(&statement);

    check_blocked_where_filters(&statement, policy)?;

    if aliases.contains_key(&policy.line_item_table)
        && !aliases.contains_key(&policy.parent_table)
    {
        return Err(FirewallError::LineItemWithoutParent {
            line_item: policy.line_item_table.clone(),
            parent: policy.parent_table.clone(),
        });
    }

    if let Some(refs) = aliases.get(&policy.parent_table) {
        let expected = scope
            .customer_id
            .ok_or_else(|| FirewallError::MissingTenantContext(policy.parent_table.clone()))?;
        assert_expected_filter(
            &statement,
            &policy.tenant_column,
            expected,
            refs,
            true,
        )?;
    }

    if let Some(refs) = aliases.get(&policy.customer_table) {
        let expected = scope
            .customer_id
            .ok_or_else(|| FirewallError::MissingTenantContext(policy.customer_table.clone()))?;
        // An unqualified `id` is only unambiguous when nothing else is joined.
        let allow_unqualified = aliases.len() == 1;
        assert_expected_filter(&statement, "id", expected, refs, allow_unqualified)?;
    }

    if let Some(refs) = aliases.get(&policy.user_table) {
        let expected = scope
            .user_id
            .ok_or_else(|| FirewallError::MissingUserContext(policy.user_table.clone()))?;
        let allow_unqualified = aliases.len() == 1;
        assert_expected_filter(&statement, "id", expected, refs, allow_unqualified)?;
    }

    Ok(())
}

/// Full firewall pass: forbidden tables, then scope checks for aggregate
/// queries touching tenant-owned tables.
pub fn run_firewall(
    sql: &str,
    policy: &ScopePolicy,
    scope: &TenantScope,
) -> FirewallResult<()> {
    let statement = parse_single(sql)?;
    let aliases = table_aliases(&statement);

    for table in aliases.keys() {
        if policy
            .forbidden_prefixes
            .iter()
            .any(|prefix| table.starts_with(prefix.as_str()))
        {
            return Err(FirewallError::ForbiddenTable(table.clone()));
        }
    }

    let touches_scoped = policy
        .scoped_tables()
        .iter()
        .any(|t| aliases.contains_key(*t))
        || aliases.contains_key(&policy.customer_table);
    if touches_scoped && has_aggregate(&statement) {
        debug!(sql, "aggregate over tenant-owned tables, re-checking scope");
        enforce_scope(&statement.to_string(), policy, scope)
            .map_err(|e| FirewallError::UnscopedAggregate(e.to_string()))?;
    }

    Ok(())
}

fn check_blocked_where_filters(
    statement: &sqlparser::ast::Statement,
    policy: &ScopePolicy,
) -> FirewallResult<()> {
    let selections = collect_selections(statement);
    let mut blocked: Option<String> = None;
    for selection in selections {
        walk_expr_local(selection, &mut |expr| {
            let Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } = expr
            else {
                return;
            };
            for side in [left.as_ref(), right.as_ref()] {
                if let Some(name) = column_name(side) {
                    if policy
                        .blocked_filter_columns
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(&name))
                        && blocked.is_none()
                    {
                        blocked = Some(name.clone());
                    }
                }
            }
        });
    }
    match blocked {
        Some(column) => Err(FirewallError::BlockedFilterColumn(column)),
        None => Ok(()),
    }
}

/// WHERE clauses of the statement, including nested subqueries' own WHERE
/// clauses (blocked filters are not allowed to hide one level down).
fn collect_selections(statement: &sqlparser::ast::Statement) -> Vec<&Expr> {
    let mut selections = Vec::new();
    if let sqlparser::ast::Statement::Query(query) = statement {
        collect_query_selections(query, &mut selections);
    }
    selections
}

fn collect_query_selections<'a>(
    query: &'a sqlparser::ast::Query,
    out: &mut Vec<&'a Expr>,
) {
    collect_set_expr_selections(&query.body, out);
}

fn collect_set_expr_selections<'a>(body: &'a sqlparser::ast::SetExpr, out: &mut Vec<&'a Expr>) {
    match body {
        sqlparser::ast::SetExpr::Select(select) => {
            if let Some(selection) = &select.selection {
                out.push(selection);
            }
        }
        sqlparser::ast::SetExpr::Query(query) => collect_query_selections(query, out),
        sqlparser::ast::SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_selections(left, out);
            collect_set_expr_selections(right, out);
        }
        _ => {}
    }
}

fn walk_expr_local<F: FnMut(&Expr)>(expr: &Expr, f: &mut F) {
    f(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr_local(left, f);
            walk_expr_local(right, f);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => walk_expr_local(expr, f),
        Expr::InList { expr, list, .. } => {
            walk_expr_local(expr, f);
            for item in list {
                walk_expr_local(item, f);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr_local(expr, f);
            walk_expr_local(low, f);
            walk_expr_local(high, f);
        }
        _ => {}
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Prove that a `column = expected` or `column IN (...)` filter exists for
/// the given table references, with the literal equal to `expected`.
fn assert_expected_filter(
    statement: &sqlparser::ast::Statement,
    column_name: &str,
    expected: i64,
    table_refs: &HashSet<String>,
    allow_unqualified: bool,
) -> FirewallResult<()> {
    let mut found = false;
    let mut wrong: Option<i64> = None;

    walk_exprs(statement, &mut |expr| match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let (column, value) =
                if column_matches(left, column_name, table_refs, allow_unqualified) {
                    (left, right)
                } else if column_matches(right, column_name, table_refs, allow_unqualified) {
                    (right, left)
                } else {
                    return;
                };
            let _ = column;
            match extract_int_literal(value) {
                Some(n) if n == expected => found = true,
                Some(n) => wrong = Some(n),
                // Non-literal comparison (column or parameter) does not count.
                None => {}
            }
        }
        Expr::InList {
            expr: target,
            list,
            negated: false,
        } => {
            if !column_matches(target, column_name, table_refs, allow_unqualified) {
                return;
            }
            let values: Vec<Option<i64>> = list.iter().map(extract_int_literal).collect();
            if values.iter().all(|v| *v == Some(expected)) && !values.is_empty() {
                found = true;
            } else if let Some(n) = values.iter().flatten().find(|n| **n != expected) {
                wrong = Some(*n);
            }
        }
        _ => {}
    });

    if let Some(value) = wrong {
        return Err(FirewallError::WrongScopeValue {
            column: column_name.to_string(),
            expected,
            found: value,
        });
    }
    if !found {
        return Err(FirewallError::MissingScopeFilter {
            column: column_name.to_string(),
            expected,
        });
    }
    Ok(())
}

fn has_aggregate(statement: &sqlparser::ast::Statement) -> bool {
    const AGGREGATES: [&str; 5] = ["count", "sum", "avg", "min", "max"];
    let mut found = false;
    walk_exprs(statement, &mut |expr| {
        if let Expr::Function(func) = expr {
            if let Some(last) = func.name.0.last() {
                if AGGREGATES.contains(&last.value.to_lowercase().as_str()) {
                    found = true;
                }
            }
        }
    });
    found
}
