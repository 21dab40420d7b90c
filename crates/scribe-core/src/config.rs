use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScribeError};
use crate::types::Stage;

/// Top-level Scribe configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub stages: StageTuning,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            retry: None,
        }
    }
}

impl ModelConfig {
    /// Environment variable holding this provider's key.
    pub fn api_key_env(&self) -> &'static str {
        match self.provider.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o".to_string() }
fn default_max_tokens() -> u32 { 4096 }

/// Retry configuration for generation requests.
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

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Per-stage sampling temperatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTuning {
    #[serde(default = "default_planner_temp")]
    pub planner: f32,
    #[serde(default)]
    pub researcher: f32,
    #[serde(default = "default_writer_temp")]
    pub writer: f32,
    #[serde(default = "default_editor_temp")]
    pub editor: f32,
    #[serde(default = "default_seo_temp")]
    pub seo: f32,
}

impl Default for StageTuning {
    fn default() -> Self {
        Self {
            planner: default_planner_temp(),
            researcher: 0.0,
            writer: default_writer_temp(),
            editor: default_editor_temp(),
            seo: default_seo_temp(),
        }
    }
}

impl StageTuning {
    pub fn temperature(&self, stage: Stage) -> f32 {
        match stage {
            Stage::Planner => self.planner,
            Stage::Researcher => self.researcher,
            Stage::Writer => self.writer,
            Stage::Editor => self.editor,
            Stage::Seo => self.seo,
        }
    }
}

fn default_planner_temp() -> f32 { 0.2 }
fn default_writer_temp() -> f32 { 0.7 }
fn default_editor_temp() -> f32 { 0.1 }
fn default_seo_temp() -> f32 { 0.2 }

/// Similarity-search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results per research query.
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_context_k")]
    pub style_k: usize,
    #[serde(default = "default_context_k")]
    pub seo_k: usize,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            style_k: default_context_k(),
            seo_k: default_context_k(),
            db_path: default_db_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embedding: None,
        }
    }
}

fn default_k() -> usize { 5 }
fn default_context_k() -> usize { 2 }
fn default_db_path() -> String { "data/vectordb/scribe.db".to_string() }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 200 }

/// Embedding model configuration for the similarity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" (hosted, default), "ollama" (local), or any OpenAI-compatible
    /// API given a `base_url`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL for the embedding API (e.g., "http://localhost:11434/v1").
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
    /// Texts per embeddings request.
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: None,
            api_key: None,
            dimensions: default_embedding_dims(),
            batch_size: default_embedding_batch(),
        }
    }
}

fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dims() -> usize { 1536 }
fn default_embedding_batch() -> usize { 64 }

/// Orchestrator limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum invocations of any single stage in one run.
    #[serde(default = "default_max_stage_visits")]
    pub max_stage_visits: usize,
    /// Per-stage wall clock limit. 0 disables the limit.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// A draft shorter than this fraction of the brief's word count is rewritten.
    #[serde(default = "default_min_word_ratio")]
    pub min_word_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_stage_visits: default_max_stage_visits(),
            stage_timeout_secs: default_stage_timeout(),
            min_word_ratio: default_min_word_ratio(),
        }
    }
}

fn default_max_stage_visits() -> usize { 5 }
fn default_stage_timeout() -> u64 { 300 }
fn default_min_word_ratio() -> f64 { 0.1 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String { "outputs".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ScribeError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let mut config: Self =
            toml::from_str(&expanded).map_err(|e| ScribeError::Config(e.to_string()))?;
        config.fill_api_key_from_env();
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults plus the provider key from the environment.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.fill_api_key_from_env();
        Ok(config)
    }

    fn fill_api_key_from_env(&mut self) {
        if self.model.api_key.is_none() {
            self.model.api_key = std::env::var(self.model.api_key_env()).ok();
        }
    }

    /// Directory where run artifacts are written.
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.output.dir)
    }

    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.retrieval.db_path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    tracing::debug!(var = %var_name, "Config references unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
