//! External capability traits the agent is built against.
//!
//! The agent never talks to a model endpoint or a database directly: it goes
//! through these traits, which keeps every workflow decision testable with
//! in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of query results.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("schema retrieval failed: {0}")]
    Schema(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

/// Text generation backend (an LLM endpoint in production).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the chat transcript. `temperature` and
    /// `seed` pin down sampling for plan generation.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        seed: Option<u64>,
    ) -> Result<String, ProviderError>;
}

/// Source of schema context relevant to a question.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn schema_context(&self, question: &str) -> Result<String, ProviderError>;
}

/// Executes validated SQL under a tenant's session.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        customer_id: i64,
        user_id: Option<i64>,
    ) -> Result<Vec<Row>, ProviderError>;
}
