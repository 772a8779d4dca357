//! Tenant-isolated cache for query results.
//!
//! Keys are `{customer_id}:{sha256(normalized_sql)}`, so two tenants running
//! the same SQL can never see each other's rows, and a whole tenant can be
//! purged by key prefix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::agent::Row;

pub const DEFAULT_TTL_SECONDS: u64 = 300;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static LINE_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--[^\n]*").unwrap());
static BLOCK_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

struct CacheEntry {
    rows: Vec<Row>,
    stored_at: Instant,
}

/// In-memory result cache with TTL expiry and oldest-entry eviction.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS, DEFAULT_MAX_ENTRIES)
    }
}

impl ResultCache {
    pub fn new(ttl_seconds: u64, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(ttl_seconds),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key for a tenant's query. Comments, a trailing semicolon,
    /// whitespace runs, and case differences all hash to the same key.
    fn key(customer_id: i64, sql: &str) -> String {
        let stripped = LINE_COMMENT_RE.replace_all(sql, "");
        let stripped = BLOCK_COMMENT_RE.replace_all(&stripped, " ");
        let normalized = WHITESPACE_RE
            .replace_all(stripped.trim().trim_end_matches(';').trim_end(), " ")
            .to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        format!("{customer_id}:{digest:x}")
    }

    pub fn get(&self, customer_id: i64, sql: &str) -> Option<Vec<Row>> {
        let key = Self::key(customer_id, sql);
        if let Some(entry) = self.entries.get(&key) {
            if entry.stored_at.elapsed() <= self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(customer_id, "cache hit");
                return Some(entry.rows.clone());
            }
        }
        // Expired entries are removed on access rather than by a sweeper.
        self.entries
            .remove_if(&key, |_, entry| entry.stored_at.elapsed() > self.ttl);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, customer_id: i64, sql: &str, rows: Vec<Row>) {
        let key = Self::key(customer_id, sql);
        // Overwriting an existing key does not grow the cache, so nothing
        // needs to be evicted for it.
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                rows,
                stored_at: Instant::now(),
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Drop every entry belonging to one tenant.
    pub fn clear_for_customer(&self, customer_id: i64) {
        let prefix = format!("{customer_id}:");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear_all(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
