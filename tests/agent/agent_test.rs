use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use sqlward::agent::{
    ChatMessage, ProviderError, QueryExecutor, Row, SchemaProvider, SqlAgent, TextGenerator,
};
use sqlward::config::Settings;
use sqlward::scope::TenantScope;

const SCHEMA: &str = "ticket(id, customer_id, status, created_at)\n\
                      ticket_item(id, ticket_id, product_id, product_amount)";

fn valid_plan_json() -> String {
    json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [{"table": "t", "column": "id"}, {"table": "t", "column": "status"}],
        "limit": 10
    })
    .to_string()
}

fn sample_row() -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(1));
    row.insert("status".to_string(), json!("open"));
    row
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Generator that answers plan requests from a script and counts them.
struct ScriptedGenerator {
    plan_responses: Mutex<VecDeque<String>>,
    format_response: String,
    plan_calls: AtomicUsize,
    plan_prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(plans: Vec<String>) -> Self {
        Self {
            plan_responses: Mutex::new(plans.into_iter().collect()),
            format_response: "Here are your tickets.".to_string(),
            plan_calls: AtomicUsize::new(0),
            plan_prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _temperature: f64,
        _seed: Option<u64>,
    ) -> Result<String, ProviderError> {
        let prompt = &messages[0].content;
        if prompt.contains("SQL planning assistant") {
            return Ok("Retrieve the customer's tickets with their status.".to_string());
        }
        if prompt.contains("query builder") || prompt.contains("failed with this error") {
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            self.plan_prompts.lock().unwrap().push(prompt.clone());
            let mut responses = self.plan_responses.lock().unwrap();
            let next = responses.pop_front().unwrap_or_default();
            return Ok(next);
        }
        if prompt.contains("customer service assistant") {
            return Ok(self.format_response.clone());
        }
        // Simplification requests get no useful answer in tests.
        Ok(String::new())
    }
}

struct FixedSchema;

#[async_trait]
impl SchemaProvider for FixedSchema {
    async fn schema_context(&self, _question: &str) -> Result<String, ProviderError> {
        Ok(SCHEMA.to_string())
    }
}

/// Executor returning canned rows, optionally failing the first N calls.
struct ScriptedExecutor {
    rows: Vec<Row>,
    fail_first: AtomicUsize,
    calls: AtomicUsize,
    seen_sql: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            fail_first: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            seen_sql: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(rows: Vec<Row>, failures: usize) -> Self {
        let executor = Self::new(rows);
        executor.fail_first.store(failures, Ordering::SeqCst);
        executor
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        sql: &str,
        _customer_id: i64,
        _user_id: Option<i64>,
    ) -> Result<Vec<Row>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_sql.lock().unwrap().push(sql.to_string());
        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Err(ProviderError::Execution(
                "column \"bogus\" does not exist".to_string(),
            ));
        }
        Ok(self.rows.clone())
    }
}

fn agent(
    generator: Arc<ScriptedGenerator>,
    executor: Arc<ScriptedExecutor>,
) -> SqlAgent {
    SqlAgent::new(generator, Arc::new(FixedSchema), executor, Settings::default())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_happy_path_produces_scoped_sql_and_answer() {
    let generator = Arc::new(ScriptedGenerator::new(vec![valid_plan_json()]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator, executor.clone());

    let outcome = agent
        .run_query("show my recent tickets", &TenantScope::customer(42))
        .await;

    assert_eq!(outcome.content, "Here are your tickets.");
    let sql = outcome.sql.expect("sql produced");
    assert!(sql.contains("customer_id = 42"), "scoped sql: {sql}");
    assert!(sql.contains("LIMIT"), "limited sql: {sql}");
    assert_eq!(outcome.metadata.row_count, 1);
    assert!(outcome.metadata.error.is_none());
    assert!(!outcome.metadata.cache_hit);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_plan_corrected_on_retry() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        "I cannot produce JSON for that.".to_string(),
        valid_plan_json(),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator.clone(), executor);

    let outcome = agent
        .run_query("show my recent tickets", &TenantScope::customer(42))
        .await;

    assert!(outcome.metadata.error.is_none());
    assert!(outcome.sql.is_some());
    assert_eq!(generator.plan_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_plan_retries_are_bounded() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        "still not json".to_string(),
        "definitely not json".to_string(),
        "never json".to_string(),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator.clone(), executor.clone());

    let outcome = agent.run_query("tickets?", &TenantScope::customer(42)).await;

    // Initial attempt plus one correction, then give up.
    assert_eq!(generator.plan_calls.load(Ordering::SeqCst), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert!(outcome.sql.is_none());
    assert!(outcome.metadata.error.is_some());
    assert!(outcome.content.contains("rephrasing"), "{}", outcome.content);
}

#[tokio::test]
async fn test_execution_failure_triggers_corrected_retry() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        valid_plan_json(),
        valid_plan_json(),
    ]));
    let executor = Arc::new(ScriptedExecutor::failing_first(vec![sample_row()], 1));
    let agent = agent(generator, executor.clone());

    let outcome = agent
        .run_query("show my recent tickets", &TenantScope::customer(42))
        .await;

    assert!(outcome.metadata.error.is_none());
    assert_eq!(outcome.metadata.row_count, 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_persistent_execution_failure_reports_error_category() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        valid_plan_json(),
        valid_plan_json(),
        valid_plan_json(),
        valid_plan_json(),
    ]));
    let executor = Arc::new(ScriptedExecutor::failing_first(vec![sample_row()], 10));
    let agent = agent(generator, executor.clone());

    let outcome = agent
        .run_query("show my recent tickets", &TenantScope::customer(42))
        .await;

    assert!(outcome.metadata.error.is_some());
    // The executor fails with a missing-column error, so the answer carries
    // the missing-column guidance rather than a generic failure line.
    assert!(
        outcome.content.contains("field that doesn't exist"),
        "{}",
        outcome.content
    );
    assert!(outcome.metadata.total_time_ms > 0.0);
    assert!(outcome.metadata.execution_time_ms > 0.0);
    // Initial execution plus the configured number of corrected retries.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_second_identical_question_hits_cache() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        valid_plan_json(),
        valid_plan_json(),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator, executor.clone());

    let scope = TenantScope::customer(42);
    let first = agent.run_query("show my recent tickets", &scope).await;
    let second = agent.run_query("show my recent tickets", &scope).await;

    assert!(!first.metadata.cache_hit);
    assert!(second.metadata.cache_hit);
    assert_eq!(second.metadata.row_count, 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_customer_scope_is_refused() {
    let generator = Arc::new(ScriptedGenerator::new(vec![valid_plan_json()]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator, executor.clone());

    let outcome = agent
        .run_query("show my recent tickets", &TenantScope::default())
        .await;

    assert!(outcome.sql.is_none());
    assert!(outcome.metadata.error.is_some());
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_rows_still_answers_politely() {
    let mut generator = ScriptedGenerator::new(vec![valid_plan_json()]);
    generator.format_response = String::new();
    let generator = Arc::new(generator);
    let executor = Arc::new(ScriptedExecutor::new(vec![]));
    let agent = agent(generator, executor);

    let outcome = agent
        .run_query("show my recent tickets", &TenantScope::customer(42))
        .await;

    assert_eq!(outcome.metadata.row_count, 0);
    assert_eq!(outcome.content, "No records found.");
}

#[tokio::test]
async fn test_count_question_compiles_to_scoped_aggregate() {
    let count_plan = json!({
        "base_table": "ticket",
        "base_alias": "t",
        "select": [],
        "aggregates": [{"func": "count", "column": "*", "alias": "ticket_count"}],
        "limit": 50
    })
    .to_string();
    let generator = Arc::new(ScriptedGenerator::new(vec![count_plan]));
    let mut count_row = Row::new();
    count_row.insert("ticket_count".to_string(), json!(7));
    let executor = Arc::new(ScriptedExecutor::new(vec![count_row]));
    let agent = agent(generator, executor);

    let outcome = agent
        .run_query("How many tickets do I have?", &TenantScope::customer(123))
        .await;

    let sql = outcome.sql.expect("sql produced");
    assert!(sql.contains("COUNT(*)"), "{sql}");
    assert!(sql.contains("customer_id = 123"), "{sql}");
    assert!(!sql.contains("GROUP BY"), "{sql}");
    let plan = outcome.plan.expect("plan returned");
    assert!(plan.select.is_empty());
    assert_eq!(plan.aggregates.len(), 1);
}

#[tokio::test]
async fn test_followup_prompt_carries_recent_queries() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        valid_plan_json(),
        valid_plan_json(),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator.clone(), executor);

    let scope = TenantScope::customer(42);
    agent.run_query("show my recent tickets", &scope).await;
    agent.run_query("now only the open ones", &scope).await;

    let prompts = generator.plan_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Recent queries in this conversation"));
    assert!(prompts[1].contains("Recent queries in this conversation"));
    assert!(prompts[1].contains("show my recent tickets"));
}

#[tokio::test]
async fn test_firewall_blocks_cross_tenant_plan() {
    // The generator tries to smuggle in another tenant's id; the injector
    // strips it and pins the caller's scope instead.
    let cross_tenant_plan = json!({
        "base_table": "ticket",
        "base_alias": "t",
        "filters": [{"table": "t", "column": "status", "operator": "=", "value": "open"}],
        "limit": 10
    })
    .to_string();
    let generator = Arc::new(ScriptedGenerator::new(vec![cross_tenant_plan]));
    let executor = Arc::new(ScriptedExecutor::new(vec![sample_row()]));
    let agent = agent(generator, executor.clone());

    let outcome = agent
        .run_query("show all open tickets", &TenantScope::customer(42))
        .await;

    let sql = outcome.sql.expect("sql produced");
    assert!(sql.contains("customer_id = 42"));
    assert!(!sql.contains("status"), "non-tenant filter dropped: {sql}");
}
