use sqlward::plan::{extract_json_objects, parse_query_plan, PlanError};

#[test]
fn test_bare_json_object() {
    // A bare object surfaces through several candidate passes; every one of
    // them must decode to the same payload.
    let objects = extract_json_objects(r#"{"base_table": "ticket"}"#).unwrap();
    assert!(!objects.is_empty());
    assert!(objects.iter().all(|o| o["base_table"] == "ticket"));
}

#[test]
fn test_fenced_json_block() {
    let raw = "Here is the plan:\n```json\n{\"base_table\": \"ticket\"}\n```\nDone.";
    let objects = extract_json_objects(raw).unwrap();
    assert!(objects.iter().any(|o| o["base_table"] == "ticket"));
}

#[test]
fn test_fence_without_language_tag() {
    let raw = "```\n{\"base_table\": \"ticket\"}\n```";
    let objects = extract_json_objects(raw).unwrap();
    assert!(objects.iter().any(|o| o["base_table"] == "ticket"));
}

#[test]
fn test_object_embedded_in_prose() {
    let raw = "Sure! The plan is {\"base_table\": \"ticket\", \"limit\": 10} as requested.";
    let objects = extract_json_objects(raw).unwrap();
    assert!(objects.iter().any(|o| o["limit"] == 10));
}

#[test]
fn test_trailing_commas_repaired() {
    let raw = r#"{"base_table": "ticket", "select": [{"table": "t", "column": "id"},],}"#;
    let objects = extract_json_objects(raw).unwrap();
    assert!(!objects.is_empty());
}

#[test]
fn test_line_comments_stripped() {
    let raw = "{\n  // the base table\n  \"base_table\": \"ticket\"\n}";
    let objects = extract_json_objects(raw).unwrap();
    assert!(objects.iter().any(|o| o["base_table"] == "ticket"));
}

#[test]
fn test_comment_markers_inside_strings_survive() {
    let raw = r#"{"base_table": "ticket", "note": "http://example.com"}"#;
    let objects = extract_json_objects(raw).unwrap();
    assert!(objects
        .iter()
        .any(|o| o["note"] == "http://example.com"));
}

#[test]
fn test_empty_response_is_distinct_error() {
    assert!(matches!(
        extract_json_objects("   "),
        Err(PlanError::EmptyResponse)
    ));
    assert!(matches!(
        extract_json_objects("no json here at all"),
        Err(PlanError::NoJsonObject)
    ));
}

#[test]
fn test_parse_query_plan_takes_first_valid_candidate() {
    let raw = r#"
Some reasoning first. {"not_a_plan": true}
```json
{"base_table": "ticket", "base_alias": "t", "limit": 5}
```
"#;
    let plan = parse_query_plan(raw).unwrap();
    assert_eq!(plan.base_table, "ticket");
    assert_eq!(plan.limit, 5);
}

#[test]
fn test_parse_query_plan_rejects_placeholder_values() {
    let raw = r#"{"base_table": "ticket", "filters": [
        {"table": "t", "column": "customer_id", "operator": "=", "value": "{customer_id}"}
    ]}"#;
    let result = parse_query_plan(raw);
    assert!(matches!(result, Err(PlanError::UnresolvedPlaceholder(_))));
}
