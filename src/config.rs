/// Configuration module for the ChurnIQ copilot core.
///
/// Handles loading, validating, and providing default configuration values.
/// The completion-provider API key is read from the environment; its
/// presence is the sole switch between "LLM available" and deterministic
/// fallback mode.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_corpus_path() -> String {
    "./rag/v2/churn_corpus.json".to_string()
}

fn default_top_k() -> usize {
    6
}

fn default_min_score() -> f32 {
    0.5
}

fn default_target_tokens() -> usize {
    800
}

fn default_overlap_tokens() -> usize {
    120
}

fn default_embed_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_planner_timeout_ms() -> u64 {
    5000
}

fn default_embed_batch_size() -> usize {
    10
}

fn default_embed_batch_delay_ms() -> u64 {
    1000
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Path to the persisted corpus artifact (JSON).
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,

    #[serde(default = "default_top_k")]
    pub retrieval_top_k: usize,

    /// Minimum cosine similarity for a chunk to count as relevant.
    #[serde(default = "default_min_score")]
    pub retrieval_min_score: f32,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,

    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chunks embedded per batch during corpus builds.
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,

    /// Pause between batches to respect provider rate limits.
    #[serde(default = "default_embed_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_planner_timeout_ms")]
    pub planner_timeout_ms: u64,

    /// Never serialized; populated from OPENAI_API_KEY at load time.
    #[serde(skip)]
    pub api_key: Option<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            retrieval_top_k: default_top_k(),
            retrieval_min_score: default_min_score(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embed_model(),
            base_url: default_base_url(),
            batch_size: default_embed_batch_size(),
            batch_delay_ms: default_embed_batch_delay_ms(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_completion_model(),
            base_url: default_base_url(),
            planner_timeout_ms: default_planner_timeout_ms(),
            api_key: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Whether a completion provider is configured.
    ///
    /// Key presence is the only switch between the LLM pipeline and the
    /// deterministic keyword fallback.
    #[must_use]
    pub fn has_llm(&self) -> bool {
        self.completion
            .api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty())
    }

    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`. A missing
    /// file yields the default config; invalid JSON is logged and replaced
    /// with defaults rather than aborting.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        let mut cfg = if Path::new(path).exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;

            match serde_json::from_str(&data) {
                Ok(c) => {
                    info!("Loaded configuration from {path}");
                    c
                }
                Err(e) => {
                    warn!("Invalid JSON in {path}: {e}");
                    warn!("Using default configuration");
                    Self::default()
                }
            }
        } else {
            info!("{path} not found, using defaults");
            Self::default()
        };

        cfg.apply_env();
        Ok(cfg)
    }

    /// Pull provider credentials and overrides from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.completion.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL_ID") {
            if !model.is_empty() {
                self.completion.model = model;
            }
        }
        if let Ok(base) = std::env::var("OPENAI_BASE_URL") {
            if !base.is_empty() {
                self.completion.base_url.clone_from(&base);
                self.embedding.base_url = base;
            }
        }
        if let Ok(model) = std::env::var("OPENAI_EMBED_MODEL") {
            if !model.is_empty() {
                self.embedding.model = model;
            }
        }
        if let Ok(top_k) = std::env::var("RAG_TOP_K") {
            if let Ok(n) = top_k.parse() {
                self.retrieval_top_k = n;
            }
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.retrieval_top_k > 0, "retrieval_top_k must be positive");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval_min_score),
            "retrieval_min_score must be within [0, 1]"
        );
        anyhow::ensure!(
            self.chunking.target_tokens > 0,
            "chunking.target_tokens must be positive"
        );
        anyhow::ensure!(
            self.chunking.overlap_tokens < self.chunking.target_tokens,
            "chunking.overlap_tokens must be smaller than target_tokens"
        );
        anyhow::ensure!(
            self.completion.planner_timeout_ms > 0,
            "completion.planner_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.embedding.batch_size > 0,
            "embedding.batch_size must be positive"
        );
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
