//! Plan → Generate → Execute & Correct workflow.
//!
//! ```text
//!   question ──► schema context ──► logical plan ──► JSON plan
//!                                                      │
//!                    ┌─────────────────────────────────┘
//!                    ▼
//!        parse ► scope inject ► compile ► validate ► firewall
//!                    │ (bounded correction retries on failure)
//!                    ▼
//!              cache / execute ──► format ──► answer
//! ```
//!
//! `run_query` never returns an error to the caller: every failure path
//! produces a [`QueryOutcome`] whose content is something a user can read.

pub mod prompts;
pub mod provider;
pub mod recovery;

pub use provider::{ChatMessage, ProviderError, QueryExecutor, Row, SchemaProvider, TextGenerator};
pub use recovery::Recovery;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::compiler::{build_sql, CompileError};
use crate::config::Settings;
use crate::firewall::{enforce_scope, run_firewall, validate_and_prepare, FirewallError};
use crate::memory::SqlQueryMemory;
use crate::plan::{parse_query_plan, PlanError, QueryPlan};
use crate::scope::{inject_scope, ScopeError, TenantScope};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Firewall(#[from] FirewallError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryMetadata {
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: f64,
    pub total_time_ms: f64,
    pub cache_hit: bool,
}

/// Final result of one question, error paths included.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub content: String,
    pub sql: Option<String>,
    pub plan: Option<QueryPlan>,
    pub metadata: QueryMetadata,
}

impl QueryOutcome {
    fn failure(content: impl Into<String>, error: impl ToString) -> Self {
        Self {
            content: content.into(),
            sql: None,
            plan: None,
            metadata: QueryMetadata {
                error: Some(error.to_string()),
                ..QueryMetadata::default()
            },
        }
    }
}

/// The agent owns its providers, cache, and conversation memory. One
/// instance serves one conversation; the cache may be shared more widely.
pub struct SqlAgent {
    generator: Arc<dyn TextGenerator>,
    schema: Arc<dyn SchemaProvider>,
    executor: Arc<dyn QueryExecutor>,
    cache: Arc<ResultCache>,
    memory: Mutex<SqlQueryMemory>,
    settings: Settings,
}

impl SqlAgent {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        schema: Arc<dyn SchemaProvider>,
        executor: Arc<dyn QueryExecutor>,
        settings: Settings,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(
            settings.cache.ttl_seconds,
            settings.cache.max_entries,
        ));
        Self::with_cache(generator, schema, executor, cache, settings)
    }

    pub fn with_cache(
        generator: Arc<dyn TextGenerator>,
        schema: Arc<dyn SchemaProvider>,
        executor: Arc<dyn QueryExecutor>,
        cache: Arc<ResultCache>,
        settings: Settings,
    ) -> Self {
        Self {
            generator,
            schema,
            executor,
            cache,
            memory: Mutex::new(SqlQueryMemory::new()),
            settings,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Run the full workflow for one question.
    pub async fn run_query(&self, question: &str, scope: &TenantScope) -> QueryOutcome {
        let started = Instant::now();
        let Some(customer_id) = scope.customer_id else {
            return QueryOutcome::failure(
                "I can only answer questions for a signed-in customer.",
                "missing customer scope",
            );
        };

        let schema_context = match self.schema.schema_context(question).await {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %e, "schema retrieval failed");
                return QueryOutcome::failure(
                    "I couldn't look up the data layout for that question. Please try again.",
                    e,
                );
            }
        };

        let logical_plan = match self.generate_logical_plan(question, &schema_context).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "logical plan generation failed");
                return QueryOutcome::failure(
                    "I couldn't create a query plan for that. Please try rephrasing.",
                    e,
                );
            }
        };
        info!(plan = logical_plan.as_str(), "logical plan generated");

        // Generate and validate, correcting on failure up to the retry bound.
        let (mut plan, mut sql) = match self
            .generate_validated_sql(question, &logical_plan, &schema_context, scope, customer_id)
            .await
        {
            Ok(result) => result,
            Err(last_error) => return self.recover(question, &last_error.to_string()).await,
        };

        // Execute, with its own correction retries for runtime errors.
        let exec_started = Instant::now();
        let mut rows: Vec<Row> = Vec::new();
        let mut cache_hit = false;
        let mut exec_error: Option<String> = None;
        for attempt in 0..=self.settings.retry.max_exec_attempts {
            if let Some(cached) = self.cache.get(customer_id, &sql) {
                info!(rows = cached.len(), "cache hit");
                rows = cached;
                cache_hit = true;
                exec_error = None;
                break;
            }
            match self.executor.execute(&sql, customer_id, scope.user_id).await {
                Ok(result) => {
                    self.cache.set(customer_id, &sql, result.clone());
                    rows = result;
                    exec_error = None;
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "execution failed");
                    exec_error = Some(e.to_string());
                    if attempt == self.settings.retry.max_exec_attempts {
                        break;
                    }
                    match self
                        .correct_after_failure(question, &sql, &e.to_string(), &schema_context, scope)
                        .await
                    {
                        Ok((corrected_plan, corrected_sql)) => {
                            plan = corrected_plan;
                            sql = corrected_sql;
                        }
                        Err(retry_error) => {
                            warn!(error = %retry_error, "correction failed");
                            break;
                        }
                    }
                }
            }
        }
        if let Some(error) = exec_error {
            return QueryOutcome {
                content: recovery::helpful_message(&error).to_string(),
                sql: Some(sql),
                plan: Some(plan),
                metadata: QueryMetadata {
                    error: Some(error),
                    execution_time_ms: exec_started.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    ..QueryMetadata::default()
                },
            };
        }
        let execution_time_ms = exec_started.elapsed().as_secs_f64() * 1000.0;

        let content = self.format_response(question, &rows).await;

        if let Ok(mut memory) = self.memory.lock() {
            let mut tables: Vec<String> = plan.tables().into_iter().collect();
            tables.sort();
            memory.add_query(question, &sql, &tables, rows.len());
        }

        QueryOutcome {
            content,
            sql: Some(sql),
            plan: Some(plan),
            metadata: QueryMetadata {
                row_count: rows.len(),
                error: None,
                execution_time_ms,
                total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                cache_hit,
            },
        }
    }

    async fn generate_logical_plan(
        &self,
        question: &str,
        schema_context: &str,
    ) -> AgentResult<String> {
        let prompt = prompts::logical_plan_prompt(question, schema_context);
        let messages = [ChatMessage::system(prompt), ChatMessage::user(question)];
        let plan = self
            .generator
            .generate(
                &messages,
                self.settings.generation.temperature,
                Some(self.settings.generation.seed),
            )
            .await?;
        Ok(plan.trim().to_string())
    }

    /// Generate a plan, push it through scope injection, compilation, and
    /// the firewall. Failed attempts feed the error back for correction.
    async fn generate_validated_sql(
        &self,
        question: &str,
        logical_plan: &str,
        schema_context: &str,
        scope: &TenantScope,
        customer_id: i64,
    ) -> Result<(QueryPlan, String), AgentError> {
        let memory_context = self
            .memory
            .lock()
            .map(|memory| memory.context_prompt())
            .unwrap_or_default();
        let mut last_error: Option<AgentError> = None;
        let mut failed_sql = String::new();
        for attempt in 0..=self.settings.retry.max_plan_attempts {
            let generated = if attempt == 0 {
                let prompt = prompts::json_plan_prompt(
                    question,
                    logical_plan,
                    schema_context,
                    &memory_context,
                    &self.settings.scope,
                    customer_id,
                    scope.user_id,
                );
                let messages = [ChatMessage::system(prompt), ChatMessage::user(question)];
                self.generator
                    .generate(
                        &messages,
                        self.settings.generation.temperature,
                        Some(self.settings.generation.seed),
                    )
                    .await
            } else {
                let error = last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                info!(attempt, error = error.as_str(), "generating corrected plan");
                let prompt =
                    prompts::correction_prompt(question, &failed_sql, &error, schema_context);
                let messages = [ChatMessage::system(prompt), ChatMessage::user(question)];
                self.generator
                    .generate(
                        &messages,
                        self.settings.generation.temperature,
                        Some(self.settings.generation.seed),
                    )
                    .await
            };

            let result = match generated {
                Ok(raw) => self.validate_plan(&raw, scope, &mut failed_sql),
                Err(e) => Err(AgentError::from(e)),
            };
            match result {
                Ok(validated) => return Ok(validated),
                Err(e) => {
                    warn!(attempt, error = %e, "plan attempt failed");
                    last_error = Some(e);
                }
            }
        }
        // The loop always runs at least once, so last_error is set here.
        Err(last_error.unwrap_or_else(|| {
            AgentError::Plan(PlanError::InvalidPlan("no plan generated".to_string()))
        }))
    }

    fn validate_plan(
        &self,
        raw: &str,
        scope: &TenantScope,
        failed_sql: &mut String,
    ) -> Result<(QueryPlan, String), AgentError> {
        let parsed = parse_query_plan(raw)?;
        let plan = inject_scope(&parsed, &self.settings.scope, scope)?;
        let candidate = build_sql(&plan)?;
        *failed_sql = candidate.clone();
        let sql = validate_and_prepare(&candidate)?;
        enforce_scope(&sql, &self.settings.scope, scope)?;
        run_firewall(&sql, &self.settings.scope, scope)?;
        Ok((plan, sql))
    }

    async fn correct_after_failure(
        &self,
        question: &str,
        failed_sql: &str,
        error_message: &str,
        schema_context: &str,
        scope: &TenantScope,
    ) -> Result<(QueryPlan, String), AgentError> {
        let prompt =
            prompts::correction_prompt(question, failed_sql, error_message, schema_context);
        let messages = [ChatMessage::system(prompt), ChatMessage::user(question)];
        let raw = self
            .generator
            .generate(
                &messages,
                self.settings.generation.temperature,
                Some(self.settings.generation.seed),
            )
            .await?;
        let mut scratch = String::new();
        self.validate_plan(&raw, scope, &mut scratch)
    }

    /// Recovery path once the plan retries are exhausted. A simplification
    /// is offered back to the user rather than retried silently.
    async fn recover(&self, question: &str, error_message: &str) -> QueryOutcome {
        let memory = match self.memory.lock() {
            Ok(memory) => memory.clone(),
            Err(_) => SqlQueryMemory::new(),
        };
        let recovery = recovery::recover_from_error(
            question,
            error_message,
            &memory,
            self.generator.as_ref(),
        )
        .await;
        let content = match recovery {
            Recovery::Retry(simplified) => format!(
                "I couldn't answer that directly. Try asking: \"{simplified}\""
            ),
            Recovery::Respond(text) => text,
        };
        QueryOutcome::failure(content, error_message)
    }

    async fn format_response(&self, question: &str, rows: &[Row]) -> String {
        let results_json = match serde_json::to_string_pretty(rows) {
            Ok(json) => json,
            Err(_) => format!("{} row(s)", rows.len()),
        };
        let prompt = prompts::formatting_prompt(question, &results_json);
        let messages = [ChatMessage::system(prompt), ChatMessage::user(question)];
        match self.generator.generate(&messages, 0.0, None).await {
            Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
            _ => {
                if rows.is_empty() {
                    "No records found.".to_string()
                } else {
                    format!("Found {} row(s).", rows.len())
                }
            }
        }
    }
}
