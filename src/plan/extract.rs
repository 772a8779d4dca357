//! JSON extraction from noisy generator output.
//!
//! The generator is asked for a bare JSON object but routinely wraps it in
//! commentary, code fences, comments, or trailing commas. Extraction is
//! tuned for recall: every plausible candidate is collected and cleaned, and
//! the caller tries each in order. Zero parseable objects is a hard error,
//! never "no query needed".

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::PlanError;

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)```").unwrap());
static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?\s*").unwrap());
static FENCE_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*```$").unwrap());
static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Extract every candidate JSON object from a raw text blob.
///
/// Candidates are returned in preference order: the whole text, fenced code
/// blocks, the first balanced `{...}` span, then all top-level balanced
/// spans. Each is cleaned before parsing.
pub fn extract_json_objects(raw: &str) -> Result<Vec<Map<String, Value>>, PlanError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PlanError::EmptyResponse);
    }

    let mut parsed = Vec::new();
    for candidate in candidates(text) {
        let cleaned = cleanup_candidate(&candidate);
        if cleaned.is_empty() {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
            parsed.push(map);
        }
    }
    if parsed.is_empty() {
        return Err(PlanError::NoJsonObject);
    }
    Ok(parsed)
}

fn candidates(text: &str) -> Vec<String> {
    let mut out = vec![text.to_string()];
    for cap in FENCED_RE.captures_iter(text) {
        let inner = cap[1].trim();
        if !inner.is_empty() {
            out.push(inner.to_string());
        }
    }
    if let Some(balanced) = first_balanced_object(text) {
        out.push(balanced);
    }
    out.extend(all_balanced_objects(text));
    out
}

/// The first balanced `{...}` span, respecting quoted strings and escapes so
/// braces inside string literals do not break balancing.
fn first_balanced_object(text: &str) -> Option<String> {
    let bytes: Vec<char> = text.chars().collect();
    let start = bytes.iter().position(|&c| c == '{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &ch) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[start..=i].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

/// All top-level balanced `{...}` spans (a response may contain several
/// candidate objects).
fn all_balanced_objects(text: &str) -> Vec<String> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start: Option<usize> = None;
    let chars: Vec<char> = text.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(chars[s..=i].iter().collect());
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn cleanup_candidate(candidate: &str) -> String {
    let mut text = candidate.trim().to_string();
    if text.is_empty() {
        return text;
    }
    if text.starts_with("```") {
        text = FENCE_OPEN_RE.replace(&text, "").to_string();
        text = FENCE_CLOSE_RE.replace(&text, "").to_string();
    }
    text = strip_comments(&text);
    text = TRAILING_COMMA_RE.replace_all(&text, "$1").to_string();
    text.trim().to_string()
}

/// Strip `//` and `#` line comments, again respecting string boundaries.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        if (ch == '/' && next == Some('/')) || ch == '#' {
            while i < chars.len() && chars[i] != '\n' && chars[i] != '\r' {
                i += 1;
            }
            continue;
        }
        out.push(ch);
        i += 1;
    }
    out
}
