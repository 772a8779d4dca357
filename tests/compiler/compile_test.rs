use serde_json::json;
use sqlward::compiler::{build_sql, correct_aggregates, render, CompileError};
use sqlward::plan::{QueryPlan, MAX_LIMIT};

fn plan_from(value: serde_json::Value) -> QueryPlan {
    QueryPlan::from_value(value).unwrap()
}

#[test]
fn test_render_minimal_plan() {
    let plan = plan_from(json!({"base_table": "ticket", "base_alias": "t"}));
    insta::assert_snapshot!(render(&plan).unwrap(), @"SELECT * FROM ticket t LIMIT 50");
}

#[test]
fn test_render_full_query() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [{"table": "p", "column": "product_name"}],
        "aggregates": [{"func": "sum", "table": "ti", "column": "product_amount",
                        "alias": "total_amount"}],
        "joins": [
            {"table": "ticket_item", "alias": "ti", "join_type": "inner", "on": [
                {"left_table": "t", "left_column": "id",
                 "right_table": "ti", "right_column": "ticket_id"}]},
            {"table": "product", "alias": "p", "join_type": "inner", "on": [
                {"left_table": "ti", "left_column": "product_id",
                 "right_table": "p", "right_column": "id"}]}
        ],
        "filters": [{"table": "t", "column": "customer_id", "operator": "=", "value": 42}],
        "group_by": [{"table": "p", "column": "product_name"}],
        "order_by": [{"table": "p", "column": "product_name", "direction": "desc"}],
        "limit": 10
    }));
    insta::assert_snapshot!(
        render(&plan).unwrap(),
        @"SELECT p.product_name, SUM(ti.product_amount) AS total_amount FROM ticket t INNER JOIN ticket_item ti ON t.id = ti.ticket_id INNER JOIN product p ON ti.product_id = p.id WHERE t.customer_id = 42 GROUP BY p.product_name ORDER BY p.product_name DESC LIMIT 10"
    );
}

#[test]
fn test_render_in_list_and_null_checks() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "filters": [
            {"table": "t", "column": "customer_id", "operator": "=", "value": 42},
            {"table": "t", "column": "status", "operator": "in",
             "value": ["open", "pending"]},
            {"table": "t", "column": "closed_at", "operator": "is null"}
        ]
    }));
    insta::assert_snapshot!(
        render(&plan).unwrap(),
        @"SELECT * FROM ticket t WHERE t.customer_id = 42 AND t.status IN ('open', 'pending') AND t.closed_at IS NULL LIMIT 50"
    );
}

#[test]
fn test_limit_ceiling_applies_at_render() {
    for (input, expected) in [(-5, 1), (0, 1), (1, 1), (50, 50), (51, 50), (10_000, 50)] {
        let mut plan = plan_from(json!({"base_table": "ticket"}));
        // Bypass model-level clamping to prove the renderer clamps too.
        plan.limit = input;
        let sql = render(&plan).unwrap();
        assert!(
            sql.ends_with(&format!("LIMIT {expected}")),
            "limit {input}: got {sql}"
        );
    }
}

#[test]
fn test_join_without_on_is_rejected() {
    let mut plan = plan_from(json!({"base_table": "ticket", "base_alias": "t"}));
    plan.joins.push(sqlward::plan::JoinSpec {
        table: "ticket_item".to_string(),
        alias: Some("ti".to_string()),
        join_type: Default::default(),
        on: vec![],
    });
    assert!(matches!(
        render(&plan),
        Err(CompileError::JoinWithoutOn(_))
    ));
}

#[test]
fn test_empty_in_list_is_rejected() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "filters": [{"table": "t", "column": "status", "operator": "in", "value": []}]
    }));
    assert!(matches!(
        render(&plan),
        Err(CompileError::EmptyInList(_, _))
    ));
}

#[test]
fn test_having_requires_grouping_context() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "having": [{"func": "count", "column": "*", "operator": ">", "value": 5}]
    }));
    assert!(matches!(
        render(&plan),
        Err(CompileError::HavingWithoutGrouping)
    ));
}

#[test]
fn test_having_named_column_requires_table() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "aggregates": [{"func": "count", "column": "*"}],
        "having": [{"func": "sum", "column": "amount", "operator": ">", "value": 100}]
    }));
    assert!(matches!(
        render(&plan),
        Err(CompileError::HavingWithoutTable(_))
    ));
}

#[test]
fn test_corrector_clears_select_for_plain_count() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [{"table": "t", "column": "id"}],
        "aggregates": [{"func": "count", "column": "*", "alias": "n"}]
    }));
    let fixed = correct_aggregates(&plan);
    assert!(fixed.select.is_empty());
    assert!(fixed.group_by.is_empty());
}

#[test]
fn test_corrector_completes_group_by_for_avg() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [{"table": "t", "column": "status"}],
        "aggregates": [{"func": "avg", "table": "t", "column": "amount"}],
        "group_by": []
    }));
    let fixed = correct_aggregates(&plan);
    assert_eq!(fixed.group_by.len(), 1);
    assert_eq!(fixed.group_by[0].column, "status");
}

#[test]
fn test_corrector_is_idempotent() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [{"table": "t", "column": "status"}],
        "aggregates": [{"func": "avg", "table": "t", "column": "amount"}]
    }));
    let once = correct_aggregates(&plan);
    let twice = correct_aggregates(&once);
    assert_eq!(once, twice);
}

#[test]
fn test_build_sql_round_trips_through_parser() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [{"table": "t", "column": "id"}, {"table": "t", "column": "status"}],
        "filters": [{"table": "t", "column": "customer_id", "operator": "=", "value": 42}],
        "limit": 10
    }));
    let sql = build_sql(&plan).unwrap();
    assert!(sql.starts_with("SELECT"));
    assert!(sql.contains("t.customer_id = 42"));
    assert!(sql.contains("LIMIT 10"));
}

#[test]
fn test_build_sql_count_query() {
    let plan = plan_from(json!({
        "base_table": "ticket",
        "base_alias": "t",
        "aggregates": [{"func": "count", "column": "*", "alias": "ticket_count"}],
        "filters": [{"table": "t", "column": "customer_id", "operator": "=", "value": 42}]
    }));
    let sql = build_sql(&plan).unwrap();
    assert!(sql.contains("COUNT(*)"));
    assert!(sql.contains("AS ticket_count"));
    assert!(!sql.contains("GROUP BY"));
}

#[test]
fn test_limit_always_present_in_final_sql() {
    let plan = plan_from(json!({"base_table": "ticket", "base_alias": "t"}));
    let sql = build_sql(&plan).unwrap();
    assert!(sql.contains(&format!("LIMIT {MAX_LIMIT}")));
}
