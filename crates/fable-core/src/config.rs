//! Configuration for the Fable pipeline
//!
//! The caps and thresholds below (retry budget, pass count, tranche size,
//! heartbeat timeout) are empirically chosen constants carried over from
//! production tuning. They are exposed as named, overridable configuration
//! rather than re-derived.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{FableError, Result};

/// Top-level configuration, loaded from `fable.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FableConfig {
    /// Chapter revision loop settings
    #[serde(default)]
    pub revision: RevisionConfig,

    /// Full-manuscript review settings
    #[serde(default)]
    pub review: ReviewConfig,

    /// Long-running job settings
    #[serde(default)]
    pub jobs: JobConfig,

    /// Completion service settings
    #[serde(default)]
    pub model: ModelConfig,
}

/// Chapter revision loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionConfig {
    /// Writer re-invocations allowed before force-approving a chapter
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Editor score (1-10) at or above which a draft is approved
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f32,

    /// Run a consistency checkpoint every N completed chapters
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Number of recent chapters included in a checkpoint pass
    #[serde(default = "default_checkpoint_window")]
    pub checkpoint_window: usize,
}

/// Full-manuscript review settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Maximum units per review tranche (completion input is bounded)
    #[serde(default = "default_tranche_size")]
    pub tranche_size: usize,

    /// Review passes over the manuscript; the final pass cannot demand revision
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,

    /// Issues retained when deriving units to rewrite
    #[serde(default = "default_max_retained_issues")]
    pub max_retained_issues: usize,

    /// Keyword-overlap ratio at or above which two same-category issues
    /// are considered duplicates (heuristic, tunable)
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f32,
}

/// Long-running job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Seconds without a heartbeat after which a running job counts as frozen
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

/// Completion service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier sent to the completion service
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per completion response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value providers
fn default_retry_budget() -> u32 {
    3
}

fn default_approval_threshold() -> f32 {
    7.0
}

fn default_checkpoint_interval() -> usize {
    5
}

fn default_checkpoint_window() -> usize {
    5
}

fn default_tranche_size() -> usize {
    8
}

fn default_max_passes() -> u32 {
    3
}

fn default_max_retained_issues() -> usize {
    10
}

fn default_dedup_similarity() -> f32 {
    0.5
}

fn default_heartbeat_timeout_secs() -> u64 {
    180
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

fn default_temperature() -> f32 {
    0.8
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl FableConfig {
    /// Load configuration from a TOML file, or use defaults if absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| FableError::Config(format!("Failed to parse {}: {}", path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            approval_threshold: default_approval_threshold(),
            checkpoint_interval: default_checkpoint_interval(),
            checkpoint_window: default_checkpoint_window(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            tranche_size: default_tranche_size(),
            max_passes: default_max_passes(),
            max_retained_issues: default_max_retained_issues(),
            dedup_similarity: default_dedup_similarity(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FableConfig::default();
        assert_eq!(config.revision.retry_budget, 3);
        assert_eq!(config.review.tranche_size, 8);
        assert_eq!(config.review.max_passes, 3);
        assert_eq!(config.jobs.heartbeat_timeout_secs, 180);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: FableConfig = toml::from_str(
            r#"
[review]
tranche_size = 4
"#,
        )
        .unwrap();
        assert_eq!(config.review.tranche_size, 4);
        assert_eq!(config.review.max_passes, 3);
        assert_eq!(config.revision.retry_budget, 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FableConfig::load_or_default(&dir.path().join("fable.toml")).unwrap();
        assert_eq!(config.revision.approval_threshold, 7.0);
    }
}
