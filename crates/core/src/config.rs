//! # Pipeline Configuration
//!
//! Budgets, retry policy, retrieval settings, and model selection.
//! Loaded from `.primer/config.json` when present; `PRIMER_*` environment
//! variables override individual fields.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::{LlmProvider, ModelConfig};
use crate::tools::chunking::ChunkingConfig;

pub const DEFAULT_CONFIG_PATH: &str = ".primer/config.json";

/// Stage identifiers used for per-stage model overrides
pub const DRAFTER: &str = "drafter";
pub const CRITIC: &str = "critic";
pub const QA: &str = "qa";

/// Global model plus per-stage overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default)]
    pub global_provider: LlmProvider,
    /// Falls back to the provider's default model
    #[serde(default)]
    pub global_model: Option<String>,
    #[serde(default)]
    pub global_base_url: Option<String>,
    /// Per-stage model overrides (stage -> model)
    #[serde(default)]
    pub per_stage_models: HashMap<String, String>,
    /// Per-stage provider overrides (stage -> provider)
    #[serde(default)]
    pub per_stage_providers: HashMap<String, LlmProvider>,
    /// Per-stage base URL overrides (stage -> base_url, for OpenAI)
    #[serde(default)]
    pub per_stage_base_urls: HashMap<String, String>,
}

impl ModelSelection {
    /// Resolve the model for a stage: per-stage override -> global -> provider default
    pub fn for_stage(&self, stage: &str) -> ModelConfig {
        let provider = self
            .per_stage_providers
            .get(stage)
            .copied()
            .unwrap_or(self.global_provider);

        // a global model only applies when the stage uses the global provider
        let global_model = (provider == self.global_provider)
            .then(|| self.global_model.clone())
            .flatten();
        let model = self
            .per_stage_models
            .get(stage)
            .cloned()
            .or(global_model)
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = self
            .per_stage_base_urls
            .get(stage)
            .or(self.global_base_url.as_ref())
            .filter(|_| provider.supports_base_url())
            .cloned();

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

/// Critique stage options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueSettings {
    /// Ask the critic model for additional advisory findings
    #[serde(default)]
    pub llm_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_revisions: u32,
    /// Wall-clock budget for a whole run
    pub run_budget_secs: u64,
    pub registry_timeout_secs: u64,
    /// Per source kind in the research fan-out
    pub source_timeout_secs: u64,
    /// Per generator call
    pub generation_timeout_secs: u64,
    pub draft_retries: u32,
    pub index_retries: u32,
    /// Base delay of the exponential backoff
    pub retry_backoff_ms: u64,
    pub top_k: usize,
    /// Prose chunk size in words
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Jaccard similarity above which two documents count as the same
    pub dedup_threshold: f64,
    /// Pages followed per documentation site
    pub max_doc_pages: usize,
    pub models: ModelSelection,
    pub critique: CritiqueSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_revisions: 3,
            run_budget_secs: 600,
            registry_timeout_secs: 15,
            source_timeout_secs: 30,
            generation_timeout_secs: 120,
            draft_retries: 3,
            index_retries: 2,
            retry_backoff_ms: 500,
            top_k: 5,
            chunk_size: 512,
            chunk_overlap: 50,
            dedup_threshold: 0.9,
            max_doc_pages: 5,
            models: ModelSelection::default(),
            critique: CritiqueSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file (defaults when absent), then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PRIMER_*` overrides from an arbitrary lookup
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> anyhow::Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }

        macro_rules! override_field {
            ($key:literal, $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = parse($key, value)?;
                }
            };
        }

        override_field!("PRIMER_MAX_REVISIONS", self.max_revisions);
        override_field!("PRIMER_RUN_BUDGET_SECS", self.run_budget_secs);
        override_field!("PRIMER_REGISTRY_TIMEOUT_SECS", self.registry_timeout_secs);
        override_field!("PRIMER_SOURCE_TIMEOUT_SECS", self.source_timeout_secs);
        override_field!("PRIMER_GENERATION_TIMEOUT_SECS", self.generation_timeout_secs);
        override_field!("PRIMER_DRAFT_RETRIES", self.draft_retries);
        override_field!("PRIMER_INDEX_RETRIES", self.index_retries);
        override_field!("PRIMER_RETRY_BACKOFF_MS", self.retry_backoff_ms);
        override_field!("PRIMER_TOP_K", self.top_k);
        override_field!("PRIMER_DEDUP_THRESHOLD", self.dedup_threshold);
        override_field!("PRIMER_MAX_DOC_PAGES", self.max_doc_pages);
        override_field!("PRIMER_LLM_REVIEW", self.critique.llm_review);
        override_field!("PRIMER_PROVIDER", self.models.global_provider);

        if let Some(model) = lookup("PRIMER_MODEL").filter(|m| !m.trim().is_empty()) {
            self.models.global_model = Some(model.trim().to_string());
        }
        if let Some(url) = lookup("PRIMER_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.models.global_base_url = Some(url.trim().to_string());
        }
        Ok(())
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            ..ChunkingConfig::default()
        }
    }
}
