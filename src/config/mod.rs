//! TOML-based configuration.
//!
//! Supports a config file (sqlward.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [cache]
//! ttl_seconds = 300
//! max_entries = 1000
//!
//! [retry]
//! max_plan_attempts = 1
//! max_exec_attempts = 2
//!
//! [generation]
//! temperature = 0.0
//! seed = 42
//!
//! [scope]
//! tenant_column = "customer_id"
//! forbidden_prefixes = ["finance", "hr", "admin"]
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scope::ScopePolicy;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub generation: GenerationSettings,
    pub scope: ScopePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: crate::cache::DEFAULT_TTL_SECONDS,
            max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Extra correction attempts after the first failure, per stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_plan_attempts: u32,
    pub max_exec_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_plan_attempts: 1,
            max_exec_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub seed: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            seed: 42,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self, SettingsError> {
        let expanded = expand_env_vars(contents)?;
        Ok(toml::from_str(&expanded)?)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SQLWARD_CONFIG`
    /// 2. `./sqlward.toml`
    ///
    /// Falls back to defaults when no config file is found.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SQLWARD_CONFIG") {
            return Self::from_file(&path);
        }
        let local_config = PathBuf::from("sqlward.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }
        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next();
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
