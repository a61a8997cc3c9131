use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Absolute ceiling on faithfulness retries, whatever the caller asks for.
pub const HARD_MAX_STEPS: u32 = 10;

/// Top-level ragloop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Azure OpenAI resource name (`<resource>.openai.azure.com`).
    #[serde(default)]
    pub azure_resource: Option<String>,
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 8000 }

/// Feature flags, limits and timeouts of the answering graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Classify intent / web need with the LLM (otherwise echo state).
    #[serde(default = "default_true")]
    pub use_router_classifier: bool,
    /// Filter evidence with a per-item relevance classifier.
    #[serde(default = "default_true")]
    pub use_grader_classifier: bool,
    /// Use the LLM faithfulness judge. Follows `use_grader_classifier` when unset.
    #[serde(default)]
    pub use_faithfulness_judge: Option<bool>,
    /// Retry bound used when the caller does not pass one.
    #[serde(default = "default_max_steps")]
    pub default_max_steps: u32,
    #[serde(default = "default_top_k")]
    pub kb_top_k: usize,
    #[serde(default = "default_top_k")]
    pub web_top_k: usize,
    /// Evidence items kept by the grader.
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,
    /// Evidence items rendered into the generation prompt.
    #[serde(default = "default_max_prompt_items")]
    pub max_prompt_items: usize,
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    /// Timeout for each external call made by a node.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Timeout for a node as a whole.
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    /// Timeout for the whole run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Executor superstep ceiling.
    #[serde(default = "default_max_supersteps")]
    pub max_supersteps: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_router_classifier: true,
            use_grader_classifier: true,
            use_faithfulness_judge: None,
            default_max_steps: default_max_steps(),
            kb_top_k: default_top_k(),
            web_top_k: default_top_k(),
            max_evidence: default_max_evidence(),
            max_prompt_items: default_max_prompt_items(),
            max_snippet_chars: default_max_snippet_chars(),
            max_query_chars: default_max_query_chars(),
            call_timeout_secs: default_call_timeout(),
            node_timeout_secs: default_node_timeout(),
            run_timeout_secs: default_run_timeout(),
            max_supersteps: default_max_supersteps(),
        }
    }
}

impl PipelineConfig {
    pub fn faithfulness_judge_enabled(&self) -> bool {
        self.use_faithfulness_judge
            .unwrap_or(self.use_grader_classifier)
    }

    /// Effective retry bound for a run: the caller's value or the default,
    /// never above [`HARD_MAX_STEPS`] and never below 1.
    pub fn resolve_max_steps(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_steps)
            .clamp(1, HARD_MAX_STEPS)
    }
}

fn default_true() -> bool { true }
fn default_max_steps() -> u32 { 3 }
fn default_top_k() -> usize { 5 }
fn default_max_evidence() -> usize { 6 }
fn default_max_prompt_items() -> usize { 8 }
fn default_max_snippet_chars() -> usize { 500 }
fn default_max_query_chars() -> usize { 256 }
fn default_call_timeout() -> u64 { 30 }
fn default_node_timeout() -> u64 { 120 }
fn default_run_timeout() -> u64 { 300 }
fn default_max_supersteps() -> usize { 64 }

/// SQLite knowledge base and markdown ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Folder scanned by `ragloop ingest`.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters carried over from the previous chunk.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            docs_dir: default_docs_dir(),
            extensions: default_extensions(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl KnowledgeBaseConfig {
    /// Resolve the database path (expand ~).
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    pub fn docs_dir(&self) -> PathBuf {
        expand_home(&self.docs_dir)
    }
}

fn default_db_path() -> String { "~/.ragloop/kb.sqlite".to_string() }
fn default_docs_dir() -> String { "ground_docs".to_string() }
fn default_extensions() -> Vec<String> { vec!["md".to_string()] }
fn default_chunk_size() -> usize { 512 }
fn default_chunk_overlap() -> usize { 50 }

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_search_provider() -> String { "tavily".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RagError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| RagError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var_name = &after[..end];
                match std::env::var(var_name) {
                    Ok(val) => result.push_str(&val),
                    // Keep the reference when the variable is unset
                    Err(_) => result.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
