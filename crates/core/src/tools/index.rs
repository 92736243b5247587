//! # Retrieval Index
//!
//! Chunks documents into a radkit `MemoryService`. Each build gets its own
//! namespace keyed by a fresh handle id, so concurrent runs never see each
//! other's chunks. The default backend is radkit's keyword-matching
//! `InMemoryMemoryService`; an embedding-backed service can be swapped in
//! through `with_service`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use radkit::errors::AgentError;
use radkit::runtime::context::AuthContext;
use radkit::runtime::memory::{
    ContentSource, InMemoryMemoryService, MemoryContent, MemoryEntry, MemoryService, SearchOptions,
};
use serde_json::Value;
use tokio::sync::RwLock;

use super::chunking::{chunk_document, ChunkingConfig};
use super::{IndexHandle, Passage, RetrievalIndex, ToolError};
use crate::state::{Document, SourceKind};

const APP_NAME: &str = "primer";

/// Metadata keys stored on every chunk
const KIND_KEY: &str = "source_kind";
const URL_KEY: &str = "source_url";
const ORDINAL_KEY: &str = "ordinal";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "with", "you", "your",
];

/// Query text reduced to lowercased terms without stopwords
pub fn search_terms(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn namespace(handle_id: &str) -> AuthContext {
    AuthContext {
        app_name: APP_NAME.to_string(),
        user_name: handle_id.to_string(),
    }
}

fn memory_error(err: AgentError) -> ToolError {
    ToolError::Other(anyhow::Error::new(err).context("memory service"))
}

fn ordinal(entry: &MemoryEntry) -> u64 {
    entry
        .metadata
        .get(ORDINAL_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX)
}

fn to_passage(entry: MemoryEntry) -> Option<Passage> {
    let kind = entry.metadata.get(KIND_KEY).and_then(Value::as_str)?;
    let source_kind = SourceKind::ALL.into_iter().find(|k| k.as_str() == kind)?;
    let source_url = entry.metadata.get(URL_KEY).and_then(Value::as_str)?.to_string();
    Some(Passage {
        text: entry.text,
        source_url,
        source_kind,
        score: entry.score,
    })
}

/// Index store over a radkit memory service
pub struct InMemoryIndex {
    config: ChunkingConfig,
    service: Arc<dyn MemoryService>,
    /// Handle id → memory entry ids
    live: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryIndex {
    pub fn new(config: ChunkingConfig) -> Self {
        Self::with_service(config, Arc::new(InMemoryMemoryService::new()))
    }

    pub fn with_service(config: ChunkingConfig, service: Arc<dyn MemoryService>) -> Self {
        Self {
            config,
            service,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live indexes
    pub async fn live_indexes(&self) -> usize {
        self.live.read().await.len()
    }

    fn chunk_contents(&self, documents: &[Document]) -> Vec<MemoryContent> {
        let mut contents = Vec::new();
        for (doc_index, doc) in documents.iter().enumerate() {
            let chunks = chunk_document(doc, &self.config);
            let total_chunks = chunks.len();
            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                let metadata = HashMap::from([
                    (KIND_KEY.to_string(), Value::from(chunk.source_kind.as_str())),
                    (URL_KEY.to_string(), Value::from(chunk.source_url)),
                    (ORDINAL_KEY.to_string(), Value::from(contents.len() as u64)),
                ]);
                contents.push(MemoryContent {
                    text: chunk.text,
                    source: ContentSource::Document {
                        document_id: format!("doc-{}", doc_index),
                        name: doc.source_url.clone(),
                        chunk_index,
                        total_chunks,
                    },
                    metadata,
                });
            }
        }
        contents
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

#[async_trait]
impl RetrievalIndex for InMemoryIndex {
    async fn build(&self, name: &str, documents: &[Document]) -> Result<IndexHandle, ToolError> {
        let contents = self.chunk_contents(documents);
        if contents.is_empty() {
            return Err(ToolError::InvalidResponse(format!(
                "no indexable text in {} document(s)",
                documents.len()
            )));
        }

        let handle = IndexHandle {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            chunk_count: contents.len(),
        };
        let ids = self
            .service
            .add_batch(&namespace(&handle.id), contents)
            .await
            .map_err(memory_error)?;
        self.live.write().await.insert(handle.id.clone(), ids);

        tracing::debug!(index = %handle.name, chunks = handle.chunk_count, "Built retrieval index");
        Ok(handle)
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        text: &str,
        top_k: usize,
        kind: Option<SourceKind>,
    ) -> Result<Vec<Passage>, ToolError> {
        let stored = self
            .live
            .read()
            .await
            .get(&handle.id)
            .map(Vec::len)
            .ok_or_else(|| ToolError::UnknownIndex(handle.id.clone()))?;

        let terms = search_terms(text);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // every match comes back so ties can be broken by chunk order before truncating
        let mut options = SearchOptions::documents_only()
            .with_limit(stored)
            .with_min_score(f32::MIN_POSITIVE);
        if let Some(kind) = kind {
            options.metadata_filter = Some(HashMap::from([(
                KIND_KEY.to_string(),
                Value::from(kind.as_str()),
            )]));
        }

        let mut entries = self
            .service
            .search(&namespace(&handle.id), &terms, options)
            .await
            .map_err(memory_error)?;
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| ordinal(a).cmp(&ordinal(b)))
        });

        Ok(entries
            .into_iter()
            .filter_map(to_passage)
            .take(top_k)
            .collect())
    }

    async fn release(&self, handle: &IndexHandle) {
        let Some(ids) = self.live.write().await.remove(&handle.id) else {
            return;
        };
        if let Err(e) = self.service.delete_batch(&namespace(&handle.id), &ids).await {
            tracing::warn!(index = %handle.name, "Failed to release index: {}", e);
        }
    }
}
