//! Multi-stage recovery for questions the agent could not answer.
//!
//! Stage 1 asks the model for a simpler rephrasing to retry. Stage 2 offers
//! similar questions that worked earlier in the conversation. Stage 3 falls
//! back to a category-specific message the user can act on.

use tracing::{info, warn};

use crate::memory::SqlQueryMemory;

use super::prompts;
use super::provider::{ChatMessage, TextGenerator};

/// What the caller should do with a failed question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Retry the workflow with this rephrased question.
    Retry(String),
    /// Give this text to the user as the final answer.
    Respond(String),
}

pub async fn recover_from_error(
    question: &str,
    error_message: &str,
    memory: &SqlQueryMemory,
    generator: &dyn TextGenerator,
) -> Recovery {
    info!(error = error_message, "starting error recovery");

    if let Some(simplified) = simplify_question(question, error_message, generator).await {
        info!(simplified, "retrying with simplified question");
        return Recovery::Retry(simplified);
    }

    let similar = memory.find_similar(question);
    if !similar.is_empty() {
        let mut text =
            String::from("I couldn't answer that. Here are similar questions that worked:\n");
        for entry in similar.iter().take(3) {
            text.push_str(&format!("- {}\n", entry.question));
        }
        return Recovery::Respond(text);
    }

    Recovery::Respond(helpful_message(error_message).to_string())
}

async fn simplify_question(
    question: &str,
    error_message: &str,
    generator: &dyn TextGenerator,
) -> Option<String> {
    // Very short questions cannot meaningfully be simplified.
    if question.split_whitespace().count() < 5 {
        return None;
    }
    let prompt = prompts::simplification_prompt(question, error_message);
    let messages = [ChatMessage::user(prompt)];
    let response = match generator.generate(&messages, 0.0, None).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "simplification call failed");
            return None;
        }
    };
    let simplified = response.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
    if simplified.is_empty() || simplified == question {
        return None;
    }
    // A "simplification" half again longer than the original is not one.
    if simplified.len() > question.len() * 3 / 2 {
        return None;
    }
    Some(simplified)
}

/// Category-specific guidance derived from the error text.
pub fn helpful_message(error_message: &str) -> &'static str {
    let error = error_message.to_lowercase();
    if error.contains("group by") || error.contains("aggregate function") {
        return "I had trouble structuring that query correctly. \
                Try asking: 'how many orders do I have?' or 'show my total spending'.";
    }
    if error.contains("column") && (error.contains("does not exist") || error.contains("not found"))
    {
        return "I tried to access a field that doesn't exist. \
                Try asking about: orders, products, prices, or dates.";
    }
    if error.contains("json") || error.contains("parse") {
        return "I had trouble understanding how to query that. \
                Try rephrasing with more specific terms like 'show my orders' or 'total spent'.";
    }
    if error.contains("validation") || error.contains("invalid") {
        return "I couldn't build a safe query for that request. \
                Please ask about your orders, products, or purchases specifically.";
    }
    if error.contains("scope") || error.contains("customer") || error.contains("tenant") {
        return "I can only show you information about your own account. \
                Try asking about 'my orders' or 'my purchases'.";
    }
    "I couldn't answer that question. \
     Try asking about your orders, products you've purchased, or spending totals."
}
