//! # Research Skill
//!
//! Fans out to the three document sources, merges and deduplicates their
//! output, and builds the retrieval index.
//!
//! Two documents are duplicates when their URLs normalize to the same
//! string, or when the Jaccard similarity of their word 3-shingles reaches
//! the configured threshold. The first occurrence in merge order wins.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::state::{Document, Language, RegistryMetadata, ResearchCoverage, SourceKind};
use crate::tools::{DocumentFetcher, FetchRequest, IndexHandle, RawDocument, ToolError, Toolbox};

use super::backoff_delay;

/// What the research stage hands back to the coordinator
#[derive(Debug, Clone)]
pub struct ResearchOutput {
    pub documents: Vec<Document>,
    pub coverage: ResearchCoverage,
    pub index_handle: IndexHandle,
    pub warnings: Vec<String>,
}

pub struct ResearchSkill;

impl ResearchSkill {
    pub async fn run(
        tools: &Toolbox,
        config: &PipelineConfig,
        library: &str,
        version: Option<&str>,
        language: Language,
        metadata: Option<&RegistryMetadata>,
    ) -> Result<ResearchOutput, StageError> {
        let request = |kind: SourceKind| FetchRequest {
            library: library.to_string(),
            version: version.map(str::to_string),
            language,
            metadata: metadata.cloned(),
            source_kind: kind,
            max_documents: config.max_doc_pages,
        };
        let timeout = config.source_timeout();

        // each source writes its own vector; merged below in fixed kind order
        let (official, examples, changelog) = tokio::join!(
            fetch_kind(tools.fetcher(SourceKind::OfficialDoc), request(SourceKind::OfficialDoc), timeout),
            fetch_kind(tools.fetcher(SourceKind::GithubExample), request(SourceKind::GithubExample), timeout),
            fetch_kind(tools.fetcher(SourceKind::Changelog), request(SourceKind::Changelog), timeout),
        );

        let mut warnings = Vec::new();
        let mut coverage = ResearchCoverage::default();
        let mut merged = Vec::new();
        for (kind, result) in SourceKind::ALL.into_iter().zip([official, examples, changelog]) {
            match result {
                Ok(raw) => merged.extend(raw.into_iter().map(|doc| Document {
                    source_url: doc.url,
                    content: doc.raw_text.trim().to_string(),
                    source_kind: kind,
                })),
                Err(e) => {
                    tracing::warn!(source = kind.as_str(), "Source failed: {}", e);
                    warnings.push(format!("{} source failed: {}", kind.as_str(), e));
                    coverage.failed_kinds.push(kind);
                }
            }
        }

        let (documents, dropped) = dedup_documents(merged, config.dedup_threshold);
        coverage.duplicates_dropped = dropped;
        for kind in SourceKind::ALL {
            let count = documents.iter().filter(|d| d.source_kind == kind).count();
            coverage.documents_per_kind.insert(kind, count);
            if count == 0 && !coverage.failed_kinds.contains(&kind) {
                coverage.empty_kinds.push(kind);
                warnings.push(format!("no {} documents found", kind.as_str()));
            }
        }

        if documents.is_empty() {
            return Err(StageError::InsufficientResearch {
                library: library.to_string(),
            });
        }

        let name = index_name(library, language, version);
        let index_handle = build_with_retries(tools, config, &name, &documents).await?;

        tracing::info!(
            library,
            documents = documents.len(),
            duplicates = dropped,
            chunks = index_handle.chunk_count,
            "Research complete"
        );

        Ok(ResearchOutput {
            documents,
            coverage,
            index_handle,
            warnings,
        })
    }
}

async fn fetch_kind(
    fetcher: &Arc<dyn DocumentFetcher>,
    request: FetchRequest,
    timeout: Duration,
) -> Result<Vec<RawDocument>, ToolError> {
    tokio::time::timeout(timeout, fetcher.fetch(&request))
        .await
        .map_err(|_| ToolError::Timeout(timeout))?
}

async fn build_with_retries(
    tools: &Toolbox,
    config: &PipelineConfig,
    name: &str,
    documents: &[Document],
) -> Result<IndexHandle, StageError> {
    let attempts = config.index_retries + 1;
    let mut attempt = 1;
    loop {
        match tools.index.build(name, documents).await {
            Ok(handle) => return Ok(handle),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, "Index build failed, retrying: {}", e);
                tokio::time::sleep(backoff_delay(config.retry_backoff(), attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(StageError::IndexingFailed {
                    attempts,
                    source: e,
                })
            }
        }
    }
}

/// `{library}_{language}_{version}` with non-alphanumerics replaced
pub fn index_name(library: &str, language: Language, version: Option<&str>) -> String {
    format!("{}_{}_{}", library, language.as_str(), version.unwrap_or("latest"))
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Dedup key for a source URL: the lowercased host, then `:port` for any
/// port other than 80 or 443, then the path without trailing slashes, then
/// `?query` verbatim. The scheme and fragment are ignored, so `http://` and
/// `https://` forms of a page match. Unparseable URLs are compared by their
/// trimmed text.
pub fn normalize_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    let mut key = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port().filter(|p| ![80, 443].contains(p)) {
        key.push_str(&format!(":{}", port));
    }
    key.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Word 3-shingles; shorter texts are a single shingle
pub fn shingles(text: &str) -> HashSet<String> {
    let words = normalized_words(text);
    if words.len() < 3 {
        return std::iter::once(words.join(" "))
            .filter(|s| !s.is_empty())
            .collect();
    }
    words.windows(3).map(|w| w.join(" ")).collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Drop empty documents, repeated URLs, and near-identical content.
/// Returns the kept documents and how many were dropped.
pub fn dedup_documents(documents: Vec<Document>, threshold: f64) -> (Vec<Document>, usize) {
    let total = documents.len();
    let mut seen_urls = HashSet::new();
    let mut kept: Vec<Document> = Vec::new();
    let mut kept_shingles: Vec<HashSet<String>> = Vec::new();

    for doc in documents {
        if doc.content.trim().is_empty() {
            continue;
        }
        if !seen_urls.insert(normalize_url(&doc.source_url)) {
            continue;
        }
        let doc_shingles = shingles(&doc.content);
        if kept_shingles
            .iter()
            .any(|other| jaccard(&doc_shingles, other) >= threshold)
        {
            continue;
        }
        kept_shingles.push(doc_shingles);
        kept.push(doc);
    }

    let dropped = total - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{GenerationRequest, Generator, InMemoryIndex, PackageRegistry, RegistryRecord, RetrievalIndex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticFetcher(Result<Vec<RawDocument>, String>);

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawDocument>, ToolError> {
            self.0.clone().map_err(ToolError::Transport)
        }
    }

    struct HangingFetcher;

    #[async_trait]
    impl DocumentFetcher for HangingFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawDocument>, ToolError> {
            std::future::pending().await
        }
    }

    struct FlakyIndex {
        failures_left: AtomicU32,
        inner: InMemoryIndex,
    }

    #[async_trait]
    impl RetrievalIndex for FlakyIndex {
        async fn build(&self, name: &str, documents: &[Document]) -> Result<IndexHandle, ToolError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ToolError::Transport("embedding service down".into()));
            }
            self.inner.build(name, documents).await
        }

        async fn query(
            &self,
            handle: &IndexHandle,
            text: &str,
            top_k: usize,
            kind: Option<SourceKind>,
        ) -> Result<Vec<crate::tools::Passage>, ToolError> {
            self.inner.query(handle, text, top_k, kind).await
        }
    }

    struct NoRegistry;

    #[async_trait]
    impl PackageRegistry for NoRegistry {
        async fn get_latest_version(&self, _: &str, _: Language) -> Result<Option<RegistryRecord>, ToolError> {
            Ok(None)
        }
    }

    struct NoGenerator;

    #[async_trait]
    impl Generator for NoGenerator {
        async fn generate(&self, _: &GenerationRequest) -> Result<String, ToolError> {
            Err(ToolError::Generation("unused".into()))
        }
    }

    fn toolbox(
        official: Arc<dyn DocumentFetcher>,
        examples: Arc<dyn DocumentFetcher>,
        changelog: Arc<dyn DocumentFetcher>,
        index: Arc<dyn RetrievalIndex>,
    ) -> Toolbox {
        Toolbox {
            registry: Arc::new(NoRegistry),
            official_docs: official,
            examples,
            changelog,
            index,
            generator: Arc::new(NoGenerator),
        }
    }

    fn docs(items: &[(&str, &str)]) -> Arc<dyn DocumentFetcher> {
        Arc::new(StaticFetcher(Ok(items
            .iter()
            .map(|(url, text)| RawDocument::new(*url, *text))
            .collect())))
    }

    fn failing(msg: &str) -> Arc<dyn DocumentFetcher> {
        Arc::new(StaticFetcher(Err(msg.to_string())))
    }

    fn doc(url: &str, content: &str) -> Document {
        Document {
            source_url: url.into(),
            content: content.into(),
            source_kind: SourceKind::OfficialDoc,
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://Docs.Example.com/Guide/#install"),
            "docs.example.com/Guide"
        );
        assert_eq!(
            normalize_url("http://docs.example.com/Guide"),
            normalize_url("https://docs.example.com/Guide/")
        );
        assert_eq!(normalize_url("https://a.io:443/x"), normalize_url("https://a.io/x"));
        assert_eq!(normalize_url("https://a.io:8443/x"), "a.io:8443/x");
        assert_eq!(normalize_url("http://a.io:443/x"), "a.io/x");
    }

    #[test]
    fn test_normalize_url_keeps_queries_distinct() {
        assert_eq!(normalize_url("https://a.io/search?path=/"), "a.io/search?path=/");
        assert_ne!(
            normalize_url("https://a.io/search?path=/"),
            normalize_url("https://a.io/search?path=")
        );
        assert_eq!(normalize_url("  not a url "), "not a url");
    }

    #[test]
    fn test_dedup_by_url_and_content() {
        let body = "Requests is an elegant and simple HTTP library for Python, built for human beings.";
        let documents = vec![
            doc("https://a.io/x", body),
            doc("http://a.io/x/", "different text entirely here"),
            doc("https://b.io/mirror", &format!("{} ", body)),
            doc("https://c.io/other", "Session objects persist cookies across requests."),
            doc("https://d.io/empty", "   "),
        ];
        let (kept, dropped) = dedup_documents(documents, 0.9);
        assert_eq!(dropped, 3);
        let urls: Vec<_> = kept.iter().map(|d| d.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.io/x", "https://c.io/other"]);
    }

    #[test]
    fn test_similar_but_distinct_documents_survive() {
        let a = "one two three four five six seven eight nine ten";
        let b = "one two three four five six seven eight nine eleven";
        assert!(jaccard(&shingles(a), &shingles(b)) < 0.9);
        let (kept, _) = dedup_documents(vec![doc("https://a", a), doc("https://b", b)], 0.9);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_index_name() {
        assert_eq!(
            index_name("requests", Language::Python, Some("2.32.0")),
            "requests_python_2_32_0"
        );
        assert_eq!(
            index_name("@types/node", Language::Javascript, None),
            "_types_node_javascript_latest"
        );
    }

    #[tokio::test]
    async fn test_partial_sources_are_tolerated() {
        let tools = toolbox(
            docs(&[("https://docs.example/quickstart", "pip install requests then import requests")]),
            failing("rate limited"),
            docs(&[]),
            Arc::new(InMemoryIndex::default()),
        );
        let out = ResearchSkill::run(&tools, &PipelineConfig::default(), "requests", Some("2.32.0"), Language::Python, None)
            .await
            .unwrap();

        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.coverage.failed_kinds, vec![SourceKind::GithubExample]);
        assert_eq!(out.coverage.empty_kinds, vec![SourceKind::Changelog]);
        assert_eq!(out.coverage.documents_per_kind[&SourceKind::OfficialDoc], 1);
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.index_handle.name, "requests_python_2_32_0");
    }

    #[tokio::test]
    async fn test_no_documents_is_insufficient_research() {
        let tools = toolbox(docs(&[]), docs(&[]), failing("down"), Arc::new(InMemoryIndex::default()));
        let err = ResearchSkill::run(&tools, &PipelineConfig::default(), "left-pad", None, Language::Javascript, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::InsufficientResearch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_alone() {
        let tools = toolbox(
            docs(&[("https://docs.example", "install the library with pip")]),
            Arc::new(HangingFetcher),
            docs(&[("https://docs.example/changes", "2.0 removed the legacy api")]),
            Arc::new(InMemoryIndex::default()),
        );
        let out = ResearchSkill::run(&tools, &PipelineConfig::default(), "lib", None, Language::Python, None)
            .await
            .unwrap();
        assert_eq!(out.documents.len(), 2);
        assert_eq!(out.coverage.failed_kinds, vec![SourceKind::GithubExample]);
        assert!(out.warnings[0].contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_build_is_retried() {
        let index = Arc::new(FlakyIndex {
            failures_left: AtomicU32::new(2),
            inner: InMemoryIndex::default(),
        });
        let tools = toolbox(docs(&[("https://d", "install with pip")]), docs(&[]), docs(&[]), index.clone());
        let out = ResearchSkill::run(&tools, &PipelineConfig::default(), "lib", None, Language::Python, None).await;
        assert!(out.is_ok());

        index.failures_left.store(3, Ordering::SeqCst);
        let err = ResearchSkill::run(&tools, &PipelineConfig::default(), "lib", None, Language::Python, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::IndexingFailed { attempts: 3, .. }));
    }
}
