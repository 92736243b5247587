//! # Collaborators
//!
//! Capability traits for everything the pipeline reaches outside itself,
//! plus the concrete adapters used by the `primer` binary.
//!
//! ## Modules
//!
//! - `registry` - PyPI / npm version lookups
//! - `fetchers` - official docs, GitHub examples, changelog sources
//! - `index` - retrieval index over a radkit memory service
//! - `chunking` - prose and code chunkers used by the index
//! - `generator` - LLM text generation through radkit
//! - `html` - HTML to text and markdown helpers
//! - `search` - Tavily web search for sources the registry does not list

pub mod chunking;
pub mod fetchers;
pub mod generator;
pub mod html;
pub mod index;
pub mod registry;
pub mod search;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::error::ToolError;
use crate::config::PipelineConfig;
use crate::state::{Document, Language, PackageManager, RegistryMetadata, SourceKind};

pub use fetchers::{ChangelogFetcher, GithubExamplesFetcher, OfficialDocsFetcher};
pub use generator::RadkitGenerator;
pub use index::InMemoryIndex;
pub use registry::HttpRegistry;
pub use search::TavilySearch;

/// Latest published release of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub version: String,
    pub package_manager: PackageManager,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub docs_url: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub changelog_url: Option<String>,
    #[serde(default)]
    pub readme: Option<String>,
}

impl RegistryRecord {
    /// Side-channel metadata for the answering ecosystem
    pub fn metadata(&self, ecosystem: Language) -> RegistryMetadata {
        RegistryMetadata {
            ecosystem,
            package_manager: self.package_manager,
            release_date: self.release_date,
            deprecated: self.deprecated,
            docs_url: self.docs_url.clone(),
            repository_url: self.repository_url.clone(),
            changelog_url: self.changelog_url.clone(),
            readme: self.readme.clone(),
        }
    }
}

/// Package registry lookup. `Ok(None)` means the package does not exist.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    async fn get_latest_version(
        &self,
        name: &str,
        language: Language,
    ) -> Result<Option<RegistryRecord>, ToolError>;
}

/// Input to a document source
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub library: String,
    pub version: Option<String>,
    pub language: Language,
    pub metadata: Option<RegistryMetadata>,
    pub source_kind: SourceKind,
    /// Upper bound on pages/documents a fetcher should return
    pub max_documents: usize,
}

/// Raw text pulled from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub url: String,
    pub raw_text: String,
}

impl RawDocument {
    pub fn new(url: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            raw_text: raw_text.into(),
        }
    }
}

/// One of the three independent research sources
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawDocument>, ToolError>;
}

/// One web search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// Page excerpt returned by the search provider
    pub snippet: String,
}

/// Web search used to discover sources the registry does not link
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;
}

/// Opaque reference to a built index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHandle {
    pub id: String,
    /// Human-readable name, `{library}_{language}_{version}`
    pub name: String,
    pub chunk_count: usize,
}

/// A retrieved chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_url: String,
    pub source_kind: SourceKind,
    pub score: f32,
}

/// Similarity-searchable store of chunked documents
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    async fn build(&self, name: &str, documents: &[Document]) -> Result<IndexHandle, ToolError>;

    /// Ordered by descending relevance. `kind` restricts results to one source kind.
    async fn query(
        &self,
        handle: &IndexHandle,
        text: &str,
        top_k: usize,
        kind: Option<SourceKind>,
    ) -> Result<Vec<Passage>, ToolError>;

    /// Free the chunks behind a handle
    async fn release(&self, _handle: &IndexHandle) {}
}

/// What a generation call is for; selects model and system prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPurpose {
    Draft,
    Critique,
    Answer,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub purpose: GenerationPurpose,
    pub prompt: String,
    pub context_passages: Vec<Passage>,
}

/// LLM text generation
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ToolError>;
}

/// Render passages as a numbered reference block
pub fn render_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "[{}] ({}) {}\n{}",
                i + 1,
                p.source_kind.as_str(),
                p.source_url,
                p.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The full set of collaborators a coordinator needs
#[derive(Clone)]
pub struct Toolbox {
    pub registry: Arc<dyn PackageRegistry>,
    pub official_docs: Arc<dyn DocumentFetcher>,
    pub examples: Arc<dyn DocumentFetcher>,
    pub changelog: Arc<dyn DocumentFetcher>,
    pub index: Arc<dyn RetrievalIndex>,
    pub generator: Arc<dyn Generator>,
}

impl Toolbox {
    /// HTTP sources, in-memory index, and the configured LLM provider
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("primer/", env!("CARGO_PKG_VERSION")))
            .timeout(config.source_timeout())
            .build()?;
        let github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        let search = TavilySearch::from_env(client.clone())
            .map(|s| Arc::new(s) as Arc<dyn WebSearch>);
        if search.is_none() {
            tracing::debug!("TAVILY_API_KEY not set; web search fallback disabled");
        }

        Ok(Self {
            registry: Arc::new(HttpRegistry::new(client.clone())),
            official_docs: Arc::new(
                OfficialDocsFetcher::new(client.clone()).with_search(search.clone()),
            ),
            examples: Arc::new(GithubExamplesFetcher::new(client.clone(), github_token.clone())),
            changelog: Arc::new(ChangelogFetcher::new(client, github_token).with_search(search)),
            index: Arc::new(InMemoryIndex::new(config.chunking())),
            generator: Arc::new(RadkitGenerator::new(&config.models)),
        })
    }

    /// Fetcher responsible for a source kind
    pub fn fetcher(&self, kind: SourceKind) -> &Arc<dyn DocumentFetcher> {
        match kind {
            SourceKind::OfficialDoc => &self.official_docs,
            SourceKind::GithubExample => &self.examples,
            SourceKind::Changelog => &self.changelog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_passages_numbers_sources() {
        let passages = vec![
            Passage {
                text: "  pip install requests ".into(),
                source_url: "https://docs.example/install".into(),
                source_kind: SourceKind::OfficialDoc,
                score: 0.9,
            },
            Passage {
                text: "requests.get(url)".into(),
                source_url: "https://github.com/a/b".into(),
                source_kind: SourceKind::GithubExample,
                score: 0.5,
            },
        ];
        let rendered = render_passages(&passages);
        assert!(rendered.starts_with("[1] (official_doc) https://docs.example/install\npip install requests"));
        assert!(rendered.contains("[2] (github_example)"));
    }

    #[test]
    fn test_record_metadata_carries_ecosystem() {
        let record = RegistryRecord {
            version: "2.32.0".into(),
            package_manager: PackageManager::Pip,
            release_date: None,
            deprecated: true,
            docs_url: Some("https://requests.readthedocs.io".into()),
            repository_url: None,
            changelog_url: None,
            readme: None,
        };
        let meta = record.metadata(Language::Python);
        assert_eq!(meta.ecosystem, Language::Python);
        assert!(meta.deprecated);
        assert_eq!(meta.docs_url.as_deref(), Some("https://requests.readthedocs.io"));
    }
}
