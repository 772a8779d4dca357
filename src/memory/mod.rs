//! Short-term memory of a conversation's recent queries.
//!
//! Keeps the most recent successful queries so the agent can resolve
//! follow-ups like "now only the red ones" against what was just asked.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const MAX_ENTRIES: usize = 5;
const CONTEXT_ENTRIES: usize = 3;

/// One remembered query. Only a summary of the SQL is kept so serialized
/// memory never carries a full statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberedQuery {
    pub question: String,
    pub sql_summary: String,
    pub tables: Vec<String>,
    pub row_count: usize,
    pub timestamp: u64,
}

/// Ring buffer of the most recent queries, newest last.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SqlQueryMemory {
    entries: VecDeque<RememberedQuery>,
}

impl SqlQueryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_query(&mut self, question: &str, sql: &str, tables: &[String], row_count: usize) {
        if self.entries.len() >= MAX_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(RememberedQuery {
            question: question.to_string(),
            sql_summary: summarize_sql(sql),
            tables: tables.to_vec(),
            row_count,
            timestamp: unix_now(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Prompt fragment describing the last few queries, oldest first.
    pub fn context_prompt(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut out = String::from("Recent queries in this conversation:\n");
        for entry in self.entries.iter().rev().take(CONTEXT_ENTRIES).rev() {
            out.push_str(&format!(
                "- Q: {} | SQL: {} | {} rows\n",
                entry.question, entry.sql_summary, entry.row_count
            ));
        }
        out
    }

    /// Past queries whose questions share at least two meaningful keywords
    /// with the new question, newest first.
    pub fn find_similar(&self, question: &str) -> Vec<&RememberedQuery> {
        let wanted = keywords(question);
        self.entries
            .iter()
            .rev()
            .filter(|entry| {
                keywords(&entry.question)
                    .iter()
                    .filter(|k| wanted.contains(*k))
                    .count()
                    >= 2
            })
            .collect()
    }
}

/// Shorten SQL for inclusion in a prompt: keep the shape, drop the bulk.
pub fn summarize_sql(sql: &str) -> String {
    let upper = sql.to_ascii_uppercase();
    let summary = match upper.find(" FROM ") {
        Some(pos) => {
            let mut end = (pos + 80).min(sql.len());
            while !sql.is_char_boundary(end) {
                end -= 1;
            }
            &sql[..end]
        }
        None => sql,
    };
    let mut summary = summary.trim().to_string();
    if summary.len() < sql.trim().len() {
        summary.push('…');
    }
    summary
}

fn keywords(text: &str) -> Vec<String> {
    const STOPWORDS: [&str; 12] = [
        "the", "a", "an", "of", "in", "on", "for", "to", "and", "or", "what", "how",
    ];
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
