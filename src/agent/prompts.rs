//! Prompt construction for each workflow step.
//!
//! Schema context is truncated before interpolation so a large schema can
//! never blow up the prompt budget.

use crate::scope::ScopePolicy;

const SCHEMA_CONTEXT_LIMIT: usize = 8_000;
const CORRECTION_SCHEMA_LIMIT: usize = 6_000;
const ERROR_LIMIT: usize = 200;

fn truncated(text: &str, limit: usize) -> &str {
    let mut end = limit.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Step 1: ask for a short natural-language plan of attack.
pub fn logical_plan_prompt(question: &str, schema_context: &str) -> String {
    format!(
        "You are a SQL planning assistant. Based on the user's question and available \
         schema, create a logical plan in 2-3 sentences describing:\n\
         1. What data needs to be retrieved\n\
         2. Which tables should be queried\n\
         3. What filters/aggregations are needed\n\n\
         User question: {question}\n\n\
         Available schema:\n{schema}\n\n\
         Respond with ONLY the logical plan, no preamble.",
        question = question,
        schema = truncated(schema_context, SCHEMA_CONTEXT_LIMIT),
    )
}

/// Step 2: ask for a structured JSON query plan.
pub fn json_plan_prompt(
    question: &str,
    logical_plan: &str,
    schema_context: &str,
    memory_context: &str,
    policy: &ScopePolicy,
    customer_id: i64,
    user_id: Option<i64>,
) -> String {
    let user_id_str = user_id.map_or_else(|| "N/A".to_string(), |id| id.to_string());
    let memory_section = if memory_context.is_empty() {
        String::new()
    } else {
        format!("{memory_context}\n")
    };
    let parent = &policy.parent_table;
    let parent_alias = &policy.parent_alias;
    let tenant_column = &policy.tenant_column;
    let line_item = &policy.line_item_table;
    let line_item_alias = &policy.line_item_alias;
    let line_item_fk = &policy.line_item_parent_fk;
    format!(
        "You are a SQL query builder for PostgreSQL. You MUST follow these rules 100% \
         or the query will crash.\n\n\
         === CRITICAL SCOPING RULES ===\n\
         - ALWAYS filter by {parent}.{tenant_column} = {customer_id} (use this exact literal).\n\
         - NEVER filter on internal id columns taken from the user's question.\n\
         - base_table MUST be \"{parent}\" with base_alias \"{parent_alias}\" for \
         list/detail/aggregate queries.\n\n\
         === AGGREGATE RULES ===\n\
         - For \"how many\", \"count\", \"total\", \"sum\" -> \"select\": [], ONLY aggregates, \
         no group_by.\n\n\
         === JOIN FORMAT ===\n\
         - Each JOIN must have \"on\" with proper format:\n  \
         {{\"left_table\": \"{parent_alias}\", \"left_column\": \"{parent_key}\", \
         \"right_table\": \"{line_item_alias}\", \"right_column\": \"{line_item_fk}\"}}\n\
         - Example: To join {line_item}:\n  \
         {{\"table\": \"{line_item}\", \"alias\": \"{line_item_alias}\", \
         \"join_type\": \"inner\", \"on\": [{{\"left_table\": \"{parent_alias}\", \
         \"left_column\": \"{parent_key}\", \"right_table\": \"{line_item_alias}\", \
         \"right_column\": \"{line_item_fk}\"}}]}}\n\n\
         Schema (only these tables/columns are allowed):\n{schema}\n\n\
         Return ONLY valid JSON — no markdown, no explanation — exactly this format:\n\
         {{\n  \"base_table\": \"{parent}\",\n  \"base_alias\": \"{parent_alias}\",\n  \
         \"select\": [],\n  \"aggregates\": [],\n  \"joins\": [],\n  \
         \"filters\": [{{\"table\": \"{parent_alias}\", \"column\": \"{tenant_column}\", \
         \"operator\": \"=\", \"value\": {customer_id}}}],\n  \"group_by\": [],\n  \
         \"having\": [],\n  \"order_by\": [],\n  \"limit\": 50,\n  \"offset\": null\n}}\n\n\
         Scope rules: {tenant_column} = {customer_id}, user_id = {user_id_str}\n\n\
         {memory_section}\
         Logical Plan: {plan}\n\n\
         User question: {question}",
        parent_key = &policy.parent_key,
        schema = truncated(schema_context, SCHEMA_CONTEXT_LIMIT),
        plan = logical_plan,
    )
}

/// Correction step: feed the failure back and ask for a fixed plan.
pub fn correction_prompt(
    question: &str,
    failed_sql: &str,
    error_message: &str,
    schema_context: &str,
) -> String {
    format!(
        "Your previous SQL query failed with this error:\n{error}\n\n\
         Original question: {question}\n\
         Failed SQL: {failed_sql}\n\n\
         Schema context:\n{schema}\n\n\
         Analyze the error and generate a corrected JSON query plan. Use the same \
         format as before.\n\
         Return ONLY the JSON object — no markdown, no explanation.",
        error = truncated(error_message, ERROR_LIMIT),
        schema = truncated(schema_context, CORRECTION_SCHEMA_LIMIT),
    )
}

/// Step 4: turn rows into a short natural-language answer.
pub fn formatting_prompt(question: &str, results_json: &str) -> String {
    format!(
        "You are a friendly customer service assistant for a retail store.\n\n\
         The user asked: \"{question}\"\n\n\
         Here are the raw results from the database (JSON array):\n{results_json}\n\n\
         Write a natural, polite, concise response (1-4 sentences max) in plain English.\n\
         Do NOT mention tables, SQL, or technical terms. If results are empty: \
         \"Sorry, I couldn't find any records matching your request.\""
    )
}

/// Recovery: ask for a simpler rephrasing of a question that failed.
pub fn simplification_prompt(question: &str, error_message: &str) -> String {
    format!(
        "The user asked: \"{question}\"\n\n\
         This query failed with error: {error}\n\n\
         Rephrase this as a simpler, more specific database question about orders, \
         products, or purchases.\n\
         Use concrete terms like \"orders\", \"products\", \"total spent\" instead of \
         vague requests.\n\
         Respond with ONLY the rephrased question, nothing else.\n\n\
         Examples:\n\
         - \"What's going on with my account?\" → \"Show my recent orders\"\n\
         - \"Spending patterns?\" → \"What is my total spending?\"\n\
         - \"Product stuff\" → \"List products I purchased\"\n\n\
         Simplified question:",
        error = truncated(error_message, ERROR_LIMIT),
    )
}
