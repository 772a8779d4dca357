//! Shared sqlparser AST helpers for the firewall passes.
//!
//! The expression walker is deliberately conservative: variants it does not
//! recognize are not descended into. That can only cause a required scope
//! filter to go unfound, which makes the query fail closed — unknown syntax
//! is never a way through the firewall.

use std::collections::{HashMap, HashSet};

use sqlparser::ast::{
    Expr, Join, JoinConstraint, JoinOperator, Query, Select, SetExpr, Statement, TableFactor,
    UnaryOperator, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use super::FirewallError;

/// Parse SQL and return the single statement it must contain.
pub fn parse_single(sql: &str) -> Result<Statement, FirewallError> {
    let dialect = PostgreSqlDialect {};
    let mut statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| FirewallError::Unparseable(e.to_string()))?;
    if statements.is_empty() {
        return Err(FirewallError::Unparseable("no statement".to_string()));
    }
    Ok(statements.remove(0))
}

/// Map each lowercased table name to the set of names it may be referenced
/// by in column qualifiers: the table name itself plus its alias.
pub fn table_aliases(stmt: &Statement) -> HashMap<String, HashSet<String>> {
    let mut aliases = HashMap::new();
    if let Statement::Query(query) = stmt {
        collect_tables(query, &mut aliases);
    }
    aliases
}

fn collect_tables(query: &Query, aliases: &mut HashMap<String, HashSet<String>>) {
    collect_tables_in_set_expr(&query.body, aliases);
}

fn collect_tables_in_set_expr(body: &SetExpr, aliases: &mut HashMap<String, HashSet<String>>) {
    match body {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_table_factor(&twj.relation, aliases);
                for join in &twj.joins {
                    collect_table_factor(&join.relation, aliases);
                }
            }
        }
        SetExpr::Query(query) => collect_tables(query, aliases),
        SetExpr::SetOperation { left, right, .. } => {
            collect_tables_in_set_expr(left, aliases);
            collect_tables_in_set_expr(right, aliases);
        }
        _ => {}
    }
}

fn collect_table_factor(factor: &TableFactor, aliases: &mut HashMap<String, HashSet<String>>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let Some(last) = name.0.last() else {
                return;
            };
            let table_name = last.value.to_lowercase();
            let alias_name = alias
                .as_ref()
                .map(|a| a.name.value.to_lowercase())
                .unwrap_or_else(|| table_name.clone());
            aliases
                .entry(table_name.clone())
                .or_insert_with(HashSet::new)
                .extend([table_name, alias_name]);
        }
        TableFactor::Derived { subquery, .. } => collect_tables(subquery, aliases),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_table_factor(&table_with_joins.relation, aliases);
            for join in &table_with_joins.joins {
                collect_table_factor(&join.relation, aliases);
            }
        }
        _ => {}
    }
}

/// Visit every expression node reachable from the statement, including join
/// constraints, WHERE, GROUP BY, HAVING, ORDER BY, and subqueries.
pub fn walk_exprs<F: FnMut(&Expr)>(stmt: &Statement, f: &mut F) {
    if let Statement::Query(query) = stmt {
        walk_query(query, f);
    }
}

fn walk_query<F: FnMut(&Expr)>(query: &Query, f: &mut F) {
    walk_set_expr(&query.body, f);
    if let Some(order_by) = &query.order_by {
        for item in &order_by.exprs {
            walk_expr(&item.expr, f);
        }
    }
    if let Some(limit) = &query.limit {
        walk_expr(limit, f);
    }
}

fn walk_set_expr<F: FnMut(&Expr)>(body: &SetExpr, f: &mut F) {
    match body {
        SetExpr::Select(select) => walk_select(select, f),
        SetExpr::Query(query) => walk_query(query, f),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, f);
            walk_set_expr(right, f);
        }
        _ => {}
    }
}

fn walk_select<F: FnMut(&Expr)>(select: &Select, f: &mut F) {
    for item in &select.projection {
        match item {
            sqlparser::ast::SelectItem::UnnamedExpr(expr)
            | sqlparser::ast::SelectItem::ExprWithAlias { expr, .. } => walk_expr(expr, f),
            _ => {}
        }
    }
    for twj in &select.from {
        walk_table_factor(&twj.relation, f);
        for join in &twj.joins {
            walk_join(join, f);
        }
    }
    if let Some(selection) = &select.selection {
        walk_expr(selection, f);
    }
    if let sqlparser::ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
        for expr in exprs {
            walk_expr(expr, f);
        }
    }
    if let Some(having) = &select.having {
        walk_expr(having, f);
    }
}

fn walk_table_factor<F: FnMut(&Expr)>(factor: &TableFactor, f: &mut F) {
    match factor {
        TableFactor::Derived { subquery, .. } => walk_query(subquery, f),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            walk_table_factor(&table_with_joins.relation, f);
            for join in &table_with_joins.joins {
                walk_join(join, f);
            }
        }
        _ => {}
    }
}

fn walk_join<F: FnMut(&Expr)>(join: &Join, f: &mut F) {
    walk_table_factor(&join.relation, f);
    let constraint = match &join.join_operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => Some(c),
        _ => None,
    };
    if let Some(JoinConstraint::On(expr)) = constraint {
        walk_expr(expr, f);
    }
}

fn walk_expr<F: FnMut(&Expr)>(expr: &Expr, f: &mut F) {
    f(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => walk_expr(expr, f),
        Expr::IsNull(expr) | Expr::IsNotNull(expr) => walk_expr(expr, f),
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, f);
            for item in list {
                walk_expr(item, f);
            }
        }
        Expr::InSubquery { expr, subquery, .. } => {
            walk_expr(expr, f);
            walk_query(subquery, f);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, f);
            walk_expr(low, f);
            walk_expr(high, f);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            walk_expr(expr, f);
            walk_expr(pattern, f);
        }
        Expr::Cast { expr, .. } => walk_expr(expr, f),
        Expr::Function(func) => {
            if let sqlparser::ast::FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    if let sqlparser::ast::FunctionArg::Unnamed(
                        sqlparser::ast::FunctionArgExpr::Expr(expr),
                    ) = arg
                    {
                        walk_expr(expr, f);
                    }
                }
            }
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                walk_expr(operand, f);
            }
            for expr in conditions.iter().chain(results.iter()) {
                walk_expr(expr, f);
            }
            if let Some(else_result) = else_result {
                walk_expr(else_result, f);
            }
        }
        Expr::Subquery(query) => walk_query(query, f),
        _ => {}
    }
}

/// Whether a column expression names `column_name` under one of the given
/// table references.
pub fn column_matches(
    expr: &Expr,
    column_name: &str,
    table_refs: &HashSet<String>,
    allow_unqualified: bool,
) -> bool {
    match expr {
        Expr::Identifier(ident) => {
            allow_unqualified && ident.value.eq_ignore_ascii_case(column_name)
        }
        Expr::CompoundIdentifier(parts) => {
            let [qualifier, column] = parts.as_slice() else {
                return false;
            };
            column.value.eq_ignore_ascii_case(column_name)
                && table_refs.contains(&qualifier.value.to_lowercase())
        }
        _ => false,
    }
}

/// Extract an integer literal, looking through parens, casts, and negation.
pub fn extract_int_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Nested(inner) => extract_int_literal(inner),
        Expr::Cast { expr, .. } => extract_int_literal(expr),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => extract_int_literal(expr).map(|n| -n),
        Expr::Value(Value::Number(n, _)) => n.parse().ok(),
        Expr::Value(Value::SingleQuotedString(s)) => s.parse().ok(),
        _ => None,
    }
}
