//! Payload normalization.
//!
//! The generator emits plans in several shorthand shapes: null lists, bare
//! scalars where lists belong, `"t.column"` strings in the select list, and
//! join conditions as freeform `"t.id = ti.ticket_id"` strings. This layer
//! rewrites all of them into the canonical plan shape before model
//! validation. Its output is still untrusted input to the typed model: the
//! repair step's job is recall, the model's job is precision.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::ident::coerce_filter_value;
use super::model::{FilterValue, MAX_LIMIT};
use super::PlanError;

static ON_COND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<lt>[A-Za-z_][A-Za-z0-9_]*)\.(?P<lc>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<rt>[A-Za-z_][A-Za-z0-9_]*)\.(?P<rc>[A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});

const LIST_KEYS: [&str; 7] = [
    "select",
    "aggregates",
    "joins",
    "filters",
    "group_by",
    "having",
    "order_by",
];

/// Normalize a parsed payload into the canonical plan shape.
///
/// Unresolved placeholder values abort normalization; an unrecognizable join
/// condition is dropped with a warning, never fabricated.
pub fn normalize_payload(payload: Map<String, Value>) -> Result<Value, PlanError> {
    let mut data = payload;

    for key in LIST_KEYS {
        let value = data.get(key).cloned().unwrap_or(Value::Null);
        let normalized = match value {
            Value::Null => Value::Array(vec![]),
            Value::Array(items) => Value::Array(items),
            scalar => Value::Array(vec![scalar]),
        };
        data.insert(key.to_string(), normalized);
    }

    let base_alias = data
        .get("base_alias")
        .and_then(Value::as_str)
        .map(str::to_string);

    normalize_joins(&mut data);
    normalize_select(&mut data, base_alias.as_deref());
    normalize_filters(&mut data, base_alias.as_deref())?;
    normalize_order_by(&mut data, base_alias.as_deref());

    // Wildcard GROUP BY entries are meaningless; drop them.
    if let Some(Value::Array(group_by)) = data.get_mut("group_by") {
        group_by.retain(|item| {
            item.get("column").and_then(Value::as_str).map(str::trim) != Some("*")
        });
    }

    let limit = coerce_int(data.get("limit")).unwrap_or(MAX_LIMIT);
    data.insert("limit".to_string(), json!(limit));
    match coerce_int(data.get("offset")) {
        Some(offset) => data.insert("offset".to_string(), json!(offset)),
        None => data.insert("offset".to_string(), Value::Null),
    };

    Ok(Value::Object(data))
}

fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Joins
// =============================================================================

fn normalize_joins(data: &mut Map<String, Value>) {
    let Some(Value::Array(joins)) = data.get_mut("joins") else {
        return;
    };
    let mut result = Vec::new();
    for join in joins.drain(..) {
        let Value::Object(mut join) = join else {
            continue;
        };
        let raw_on = match join.remove("on") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => vec![],
            Some(other) => vec![other],
        };
        let mut conditions = Vec::new();
        for cond in raw_on {
            match normalize_on_condition(&cond) {
                Some(fixed) => conditions.push(fixed),
                None => warn!(condition = %cond, "dropping unrecognised JOIN ON condition"),
            }
        }
        join.insert("on".to_string(), Value::Array(conditions));
        result.push(Value::Object(join));
    }
    *joins = result;
}

/// Accept either the explicit four-field form or anything containing an
/// `alias.column = alias.column` pattern.
fn normalize_on_condition(cond: &Value) -> Option<Value> {
    if let Value::Object(map) = cond {
        let explicit = ["left_table", "left_column", "right_table", "right_column"]
            .iter()
            .all(|k| map.contains_key(*k));
        if explicit {
            return Some(json!({
                "left_table": str_field(map, "left_table")?,
                "left_column": str_field(map, "left_column")?,
                "right_table": str_field(map, "right_table")?,
                "right_column": str_field(map, "right_column")?,
            }));
        }
        let raw_expr = ["condition", "on", "expr"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))?;
        return condition_from_expr(raw_expr);
    }
    if let Value::String(s) = cond {
        return condition_from_expr(s);
    }
    None
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn condition_from_expr(expr: &str) -> Option<Value> {
    let caps = ON_COND_RE.captures(expr)?;
    Some(json!({
        "left_table": &caps["lt"],
        "left_column": &caps["lc"],
        "right_table": &caps["rt"],
        "right_column": &caps["rc"],
    }))
}

// =============================================================================
// Select / filters / order by
// =============================================================================

fn normalize_select(data: &mut Map<String, Value>, base_alias: Option<&str>) {
    let Some(Value::Array(select)) = data.get_mut("select") else {
        return;
    };
    for item in select.iter_mut() {
        let Value::String(s) = item else {
            continue;
        };
        let parts: Vec<&str> = s.split('.').collect();
        *item = match parts.as_slice() {
            [table, column] => json!({"table": table, "column": column}),
            [column] if *column != "*" => {
                json!({"table": base_alias.unwrap_or("t"), "column": column})
            }
            _ => continue,
        };
    }
}

fn normalize_filters(
    data: &mut Map<String, Value>,
    base_alias: Option<&str>,
) -> Result<(), PlanError> {
    let Some(Value::Array(filters)) = data.get_mut("filters") else {
        return Ok(());
    };
    for item in filters.iter_mut() {
        let Value::Object(filter) = item else {
            continue;
        };
        if !filter.contains_key("table") {
            if let Some(alias) = base_alias {
                filter.insert("table".to_string(), json!(alias));
            }
        }
        if let Some(raw) = filter.remove("value") {
            let coerced = match raw {
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(coerce_value)
                        .collect::<Result<_, _>>()?,
                ),
                other => coerce_value(other)?,
            };
            filter.insert("value".to_string(), coerced);
        }
    }
    Ok(())
}

fn coerce_value(value: Value) -> Result<Value, PlanError> {
    let filter_value: FilterValue =
        serde_json::from_value(value).map_err(|e| PlanError::InvalidPlan(e.to_string()))?;
    let coerced = coerce_filter_value(filter_value)?;
    serde_json::to_value(coerced).map_err(|e| PlanError::InvalidPlan(e.to_string()))
}

fn normalize_order_by(data: &mut Map<String, Value>, base_alias: Option<&str>) {
    let Some(Value::Array(order_by)) = data.get_mut("order_by") else {
        return;
    };
    for item in order_by.iter_mut() {
        let Value::Object(entry) = item else {
            continue;
        };
        if !entry.contains_key("table") {
            if let Some(alias) = base_alias {
                entry.insert("table".to_string(), json!(alias));
            }
        }
        if let Some(Value::String(direction)) = entry.get("direction") {
            let lowered = direction.to_lowercase();
            entry.insert("direction".to_string(), json!(lowered));
        }
    }
}
