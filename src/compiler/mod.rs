//! Plan-to-SQL compilation.
//!
//! Renders a normalized, scoped plan into literal SQL text using only
//! validated identifiers and escaped literals, then round-trips the text
//! through sqlparser to guarantee syntactic validity. Unparseable output is
//! a compiler failure, never something handed to the database.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use crate::plan::{
    ident, AggFunc, AliasMap, FilterOp, FilterValue, GroupByField, PlanError, QueryPlan, MAX_LIMIT,
};

/// Errors that can occur while compiling a plan to SQL.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    /// A join entry with no resolvable ON condition.
    #[error("JOIN on '{0}' has no ON conditions")]
    JoinWithoutOn(String),

    /// IN / NOT IN filters require a non-empty value list.
    #[error("{0} filter on '{1}' must have a non-empty list")]
    EmptyInList(&'static str, String),

    /// HAVING without aggregates or grouping is meaningless.
    #[error("HAVING requires GROUP BY or aggregates")]
    HavingWithoutGrouping,

    /// A HAVING aggregate over a named column needs a table reference.
    #[error("HAVING aggregate on '{0}' requires a table")]
    HavingWithoutTable(String),

    /// Literal rendering or identifier validation failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The rendered text failed AST re-parsing.
    #[error("generated SQL is invalid: {0}")]
    InvalidSql(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

// =============================================================================
// Aggregate / group-by corrector
// =============================================================================

/// Repair the two common aggregate shape violations before compilation.
///
/// A count/sum aggregate alongside a non-empty select list means the
/// generator confused a scalar aggregate with a projection: clear both
/// select and group-by. Otherwise every non-wildcard select column is added
/// to group-by. Idempotent; pure scalar aggregates pass through untouched.
pub fn correct_aggregates(plan: &QueryPlan) -> QueryPlan {
    if plan.aggregates.is_empty() {
        return plan.clone();
    }

    let has_count_or_sum = plan
        .aggregates
        .iter()
        .any(|a| matches!(a.func, AggFunc::Count | AggFunc::Sum));
    if has_count_or_sum && !plan.select.is_empty() {
        warn!("count/sum aggregate with non-empty select; clearing projection");
        let mut fixed = plan.clone();
        fixed.select.clear();
        fixed.group_by.clear();
        return fixed;
    }

    let non_agg_cols: Vec<GroupByField> = plan
        .select
        .iter()
        .filter(|s| s.column != "*")
        .map(|s| GroupByField {
            table: s.table.clone(),
            column: s.column.clone(),
        })
        .collect();
    if non_agg_cols.is_empty() {
        return plan.clone();
    }

    let existing: std::collections::HashSet<(String, String)> = plan
        .group_by
        .iter()
        .map(|g| (g.table.to_lowercase(), g.column.to_lowercase()))
        .collect();
    let missing: Vec<GroupByField> = non_agg_cols
        .into_iter()
        .filter(|c| !existing.contains(&(c.table.to_lowercase(), c.column.to_lowercase())))
        .collect();
    if missing.is_empty() {
        return plan.clone();
    }

    debug!(count = missing.len(), "adding missing GROUP BY columns");
    let mut fixed = plan.clone();
    fixed.group_by.extend(missing);
    fixed
}

// =============================================================================
// SQL rendering
// =============================================================================

fn qualified(alias_map: &AliasMap, table_ref: &str, column: &str) -> CompileResult<String> {
    let table = ident::safe_ident(alias_map.resolve(table_ref))?;
    let column = ident::safe_ident(column)?;
    Ok(format!("{table}.{column}"))
}

/// Render a plan as SQL text without the AST round trip.
///
/// Exposed separately so tests can snapshot the exact rendered form;
/// `build_sql` is the production entry point.
pub fn render(plan: &QueryPlan) -> CompileResult<String> {
    let alias_map = AliasMap::build(plan);

    let mut select_parts: Vec<String> = Vec::new();
    for item in &plan.select {
        let mut expr = if item.column == "*" {
            format!("{}.*", ident::safe_ident(alias_map.resolve(&item.table))?)
        } else {
            qualified(&alias_map, &item.table, &item.column)?
        };
        if let Some(alias) = &item.alias {
            expr.push_str(&format!(" AS {}", ident::safe_ident(alias)?));
        }
        select_parts.push(expr);
    }

    for item in &plan.aggregates {
        let target = if item.column == "*" {
            "*".to_string()
        } else {
            let table_ref = item
                .table
                .as_deref()
                .or(plan.base_alias.as_deref())
                .unwrap_or(&plan.base_table);
            qualified(&alias_map, table_ref, &item.column)?
        };
        let distinct = if item.distinct { "DISTINCT " } else { "" };
        let mut expr = format!("{}({distinct}{target})", item.func.as_sql());
        if let Some(alias) = &item.alias {
            expr.push_str(&format!(" AS {}", ident::safe_ident(alias)?));
        }
        select_parts.push(expr);
    }

    if select_parts.is_empty() {
        select_parts.push("*".to_string());
    }

    let base_alias = match &plan.base_alias {
        Some(alias) => format!(" {}", ident::safe_ident(alias)?),
        None => String::new(),
    };
    let mut parts: Vec<String> = vec![
        format!("SELECT {}", select_parts.join(", ")),
        format!("FROM {}{base_alias}", ident::safe_ident(&plan.base_table)?),
    ];

    for join in &plan.joins {
        if join.on.is_empty() {
            return Err(CompileError::JoinWithoutOn(join.table.clone()));
        }
        let alias = match &join.alias {
            Some(alias) => format!(" {}", ident::safe_ident(alias)?),
            None => String::new(),
        };
        let clauses: Vec<String> = join
            .on
            .iter()
            .map(|cond| {
                Ok(format!(
                    "{} = {}",
                    qualified(&alias_map, &cond.left_table, &cond.left_column)?,
                    qualified(&alias_map, &cond.right_table, &cond.right_column)?,
                ))
            })
            .collect::<CompileResult<_>>()?;
        parts.push(format!(
            "{} JOIN {}{alias} ON {}",
            join.join_type.as_sql(),
            ident::safe_ident(&join.table)?,
            clauses.join(" AND "),
        ));
    }

    if !plan.filters.is_empty() {
        let mut where_clauses: Vec<String> = Vec::new();
        for item in &plan.filters {
            let lhs = qualified(&alias_map, &item.table, &item.column)?;
            let clause = match item.operator {
                FilterOp::In | FilterOp::NotIn => {
                    let name = if item.operator == FilterOp::In {
                        "IN"
                    } else {
                        "NOT IN"
                    };
                    let FilterValue::List(values) = &item.value else {
                        return Err(CompileError::EmptyInList(name, item.column.clone()));
                    };
                    if values.is_empty() {
                        return Err(CompileError::EmptyInList(name, item.column.clone()));
                    }
                    let rhs: Vec<String> = values
                        .iter()
                        .map(ident::literal)
                        .collect::<Result<_, _>>()?;
                    format!("{lhs} {name} ({})", rhs.join(", "))
                }
                FilterOp::IsNull => format!("{lhs} IS NULL"),
                FilterOp::IsNotNull => format!("{lhs} IS NOT NULL"),
                op => format!("{lhs} {} {}", op.as_sql(), ident::literal(&item.value)?),
            };
            where_clauses.push(clause);
        }
        parts.push(format!("WHERE {}", where_clauses.join(" AND ")));
    }

    if !plan.group_by.is_empty() {
        let items: Vec<String> = plan
            .group_by
            .iter()
            .map(|g| qualified(&alias_map, &g.table, &g.column))
            .collect::<CompileResult<_>>()?;
        parts.push(format!("GROUP BY {}", items.join(", ")));
    }

    if !plan.having.is_empty() {
        if plan.group_by.is_empty() && plan.aggregates.is_empty() {
            return Err(CompileError::HavingWithoutGrouping);
        }
        let mut having_clauses: Vec<String> = Vec::new();
        for item in &plan.having {
            let target = if item.column == "*" {
                "*".to_string()
            } else {
                let table = item
                    .table
                    .as_deref()
                    .ok_or_else(|| CompileError::HavingWithoutTable(item.column.clone()))?;
                qualified(&alias_map, table, &item.column)?
            };
            having_clauses.push(format!(
                "{}({target}) {} {}",
                item.func.as_sql(),
                item.operator.as_sql(),
                ident::literal(&item.value)?,
            ));
        }
        parts.push(format!("HAVING {}", having_clauses.join(" AND ")));
    }

    if !plan.order_by.is_empty() {
        let items: Vec<String> = plan
            .order_by
            .iter()
            .map(|o| {
                Ok(format!(
                    "{} {}",
                    qualified(&alias_map, &o.table, &o.column)?,
                    o.direction.as_sql(),
                ))
            })
            .collect::<CompileResult<_>>()?;
        parts.push(format!("ORDER BY {}", items.join(", ")));
    }

    parts.push(format!("LIMIT {}", plan.limit.clamp(1, MAX_LIMIT)));
    if let Some(offset) = plan.offset {
        if offset > 0 {
            parts.push(format!("OFFSET {offset}"));
        }
    }

    Ok(parts.join(" "))
}

/// Compile a plan into validated SQL text.
///
/// Applies the aggregate corrector, renders, then re-parses the result with
/// sqlparser's Postgres dialect and re-serializes it. A parse failure here
/// means the compiler produced invalid SQL and the request must fail.
pub fn build_sql(plan: &QueryPlan) -> CompileResult<String> {
    let plan = correct_aggregates(plan);
    let sql = render(&plan)?;

    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, &sql)
        .map_err(|e| CompileError::InvalidSql(e.to_string()))?;
    let stmt = statements
        .first()
        .ok_or_else(|| CompileError::InvalidSql("no statement parsed".to_string()))?;
    let final_sql = stmt.to_string();
    debug!(sql = %final_sql, "compiled plan to SQL");
    Ok(final_sql)
}
