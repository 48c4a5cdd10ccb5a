//! Layered pipeline configuration: a single TOML file plus `${VAR}`
//! environment-variable expansion. Simplified from the teacher's full
//! System/Team/Project/User hierarchy since this crate has no
//! multi-stakeholder deployment story — one project-level file is
//! enough, with environment overrides for secrets like API keys.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f32 {
    0.3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_article_semaphore")]
    pub article_semaphore: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

fn default_article_semaphore() -> usize {
    5
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            article_semaphore: default_article_semaphore(),
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    #[serde(default = "default_max_top_picks")]
    pub max_top_picks: usize,
    #[serde(default = "default_max_quick_reads")]
    pub max_quick_reads: usize,
    #[serde(default = "default_max_total")]
    pub max_total: usize,
}

fn default_max_top_picks() -> usize {
    8
}
fn default_max_quick_reads() -> usize {
    15
}
fn default_max_total() -> usize {
    20
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            max_top_picks: default_max_top_picks(),
            max_quick_reads: default_max_quick_reads(),
            max_total: default_max_total(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "data/pipeline.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_telemetry_path")]
    pub storage_path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

fn default_true() -> bool {
    true
}
fn default_telemetry_path() -> String {
    "data/telemetry".to_string()
}
fn default_retention_days() -> u32 {
    30
}
fn default_max_content_length() -> usize {
    200
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            storage_path: default_telemetry_path(),
            retention_days: default_retention_days(),
            max_content_length: default_max_content_length(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub curator: CuratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl PipelineConfig {
    /// Loads a TOML file and expands `${VAR}` references against the
    /// process environment, missing variables resolving to an empty
    /// string (matching the upstream loader's behavior rather than
    /// failing the whole load over one unset secret).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&raw);
        let config: PipelineConfig = toml::from_str(&expanded)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(Error::Configuration(
                "llm.api_key is required (set directly or via ${ENV_VAR})".to_string(),
            ));
        }
        if self.concurrency.article_semaphore == 0 {
            return Err(Error::Configuration(
                "concurrency.article_semaphore must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recursively expands `${VAR_NAME}` substrings in `input` against the
/// process environment. Ported from the upstream config loader's
/// `_expand_env_vars`, operating on raw text before TOML parsing since
/// Rust's `toml` crate has no expansion hook of its own.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' && input[i..].starts_with("${") {
            if let Some(end) = input[i + 2..].find('}') {
                let var_name = &input[i + 2..i + 2 + end];
                let value = std::env::var(var_name).unwrap_or_default();
                out.push_str(&value);
                for _ in 0..(end + 2) {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}
