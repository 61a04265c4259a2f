use serde::{Deserialize, Serialize};

use crate::stage::Domain;

/// Top-level configuration for tradegraph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradegraphConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Run archive. Runs are not persisted when absent.
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,
    /// Situation memory. Stages run without precedent when absent.
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// Stage sequencing and loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Analyst domains in execution order, or `["unified"]`.
    #[serde(default = "default_analysts")]
    pub analysts: Vec<String>,
    /// Advocate turns are bounded by twice this value.
    #[serde(default = "default_one")]
    pub max_debate_rounds: u32,
    /// Risk advocate turns are bounded by three times this value.
    #[serde(default = "default_one")]
    pub max_risk_cycles: u32,
    /// Tool-call rounds allowed per analyst per run.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    /// Number of past situations retrieved for advocates and judges.
    #[serde(default = "default_memory_matches")]
    pub memory_matches: usize,
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,
    /// Whole-run budget, checked at stage boundaries.
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
    /// Minimum step budget. The engine raises it to the longest run the
    /// bounds above allow.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Unified analyst: raw domain data longer than this is summarized first.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            analysts: default_analysts(),
            max_debate_rounds: default_one(),
            max_risk_cycles: default_one(),
            max_tool_calls: default_max_tool_calls(),
            memory_matches: default_memory_matches(),
            stage_timeout_seconds: default_stage_timeout(),
            run_timeout_seconds: None,
            max_steps: default_max_steps(),
            summarize_threshold_chars: default_summarize_threshold(),
        }
    }
}

/// Reasoning backend (Claude CLI) models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Model for analysts, advocates and the trader.
    #[serde(default = "default_quick_model")]
    pub quick_model: String,
    /// Model for the research judge and the risk judge.
    #[serde(default = "default_deep_model")]
    pub deep_model: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            quick_model: default_quick_model(),
            deep_model: default_deep_model(),
            timeout_seconds: default_backend_timeout(),
        }
    }
}

/// Configuration for the run archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    pub sqlite_path: String,
    /// Maximum number of responses kept in the in-memory moka cache.
    #[serde(default = "default_memory_capacity")]
    pub memory_max_capacity: u64,
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    pub sqlite_path: String,
}

/// An external data tool backed by a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    pub name: String,
    pub domain: Domain,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,
}

fn default_analysts() -> Vec<String> {
    Domain::ALL.iter().map(|d| d.to_string()).collect()
}
fn default_one() -> u32 {
    1
}
fn default_max_tool_calls() -> u32 {
    3
}
fn default_memory_matches() -> usize {
    2
}
fn default_stage_timeout() -> u64 {
    180
}
fn default_max_steps() -> u32 {
    256
}
fn default_summarize_threshold() -> usize {
    3000
}
fn default_quick_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_deep_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_backend_timeout() -> u64 {
    120
}
fn default_memory_capacity() -> u64 {
    1_000
}
fn default_memory_ttl() -> u64 {
    300
}
fn default_tool_timeout() -> u64 {
    60
}
