//! # Q&A Skill
//!
//! Answers follow-up questions against a finished run's retrieval index.

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::tools::{GenerationPurpose, GenerationRequest, IndexHandle, ToolError, Toolbox};

/// Tutorial excerpt length included in the prompt, in characters
pub const DRAFT_EXCERPT_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum QaError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("run has no retrieval index to answer from")]
    NoIndex,

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] ToolError),

    #[error("answer generation failed: {0}")]
    Generation(#[source] ToolError),
}

pub struct QaSkill;

impl QaSkill {
    pub async fn run(
        tools: &Toolbox,
        config: &PipelineConfig,
        question: &str,
        library: &str,
        draft: Option<&str>,
        handle: Option<&IndexHandle>,
    ) -> Result<String, QaError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::EmptyQuestion);
        }
        let handle = handle.ok_or(QaError::NoIndex)?;

        let passages = tools
            .index
            .query(handle, question, config.top_k, None)
            .await
            .map_err(QaError::Retrieval)?;
        tracing::debug!(library, passages = passages.len(), "Answering follow-up question");

        let mut prompt = format!("Library: {}\n\n## Question\n\n{}\n", library, question);
        if let Some(draft) = draft {
            prompt.push_str("\n## Tutorial excerpt\n\n");
            prompt.push_str(&excerpt(draft, DRAFT_EXCERPT_CHARS));
            prompt.push('\n');
        }

        let request = GenerationRequest {
            purpose: GenerationPurpose::Answer,
            prompt,
            context_passages: passages,
        };
        let answer = tokio::time::timeout(config.generation_timeout(), tools.generator.generate(&request))
            .await
            .map_err(|_| QaError::Generation(ToolError::Timeout(config.generation_timeout())))?
            .map_err(QaError::Generation)?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(QaError::Generation(ToolError::InvalidResponse(
                "empty answer".to_string(),
            )));
        }
        Ok(answer.to_string())
    }
}

/// First `max_chars` characters, cut on a char boundary
fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Document, Language, SourceKind};
    use crate::tools::{
        DocumentFetcher, FetchRequest, Generator, InMemoryIndex, PackageRegistry, RawDocument,
        RegistryRecord, RetrievalIndex,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct Unused;

    #[async_trait]
    impl DocumentFetcher for Unused {
        async fn fetch(&self, _: &FetchRequest) -> Result<Vec<RawDocument>, ToolError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl PackageRegistry for Unused {
        async fn get_latest_version(&self, _: &str, _: Language) -> Result<Option<RegistryRecord>, ToolError> {
            Ok(None)
        }
    }

    /// Echoes a fixed answer and keeps the last request
    #[derive(Default)]
    struct Recorder {
        last: Mutex<Option<GenerationRequest>>,
    }

    #[async_trait]
    impl Generator for Recorder {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ToolError> {
            *self.last.lock().unwrap() = Some(request.clone());
            Ok("  Pass `timeout=5` [1].  ".to_string())
        }
    }

    async fn setup() -> (Toolbox, Arc<Recorder>, IndexHandle) {
        let index = Arc::new(InMemoryIndex::default());
        let handle = index
            .build(
                "requests_python_2_32_0",
                &[Document {
                    source_url: "https://docs.example/timeouts".into(),
                    content: "Set a timeout on every request: requests.get(url, timeout=5)".into(),
                    source_kind: SourceKind::OfficialDoc,
                }],
            )
            .await
            .unwrap();
        let generator = Arc::new(Recorder::default());
        let tools = Toolbox {
            registry: Arc::new(Unused),
            official_docs: Arc::new(Unused),
            examples: Arc::new(Unused),
            changelog: Arc::new(Unused),
            index,
            generator: generator.clone(),
        };
        (tools, generator, handle)
    }

    #[tokio::test]
    async fn test_answers_from_index_with_excerpt() {
        let (tools, generator, handle) = setup().await;
        let draft = "x".repeat(1500);
        let answer = QaSkill::run(
            &tools,
            &PipelineConfig::default(),
            "How do I set a timeout?",
            "requests",
            Some(&draft),
            Some(&handle),
        )
        .await
        .unwrap();
        assert_eq!(answer, "Pass `timeout=5` [1].");

        let request = generator.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.purpose, GenerationPurpose::Answer);
        assert_eq!(request.context_passages.len(), 1);
        assert!(request.prompt.contains("How do I set a timeout?"));
        assert!(request.prompt.contains(&format!("{}...", "x".repeat(1000))));
        assert!(!request.prompt.contains(&"x".repeat(1001)));
    }

    #[tokio::test]
    async fn test_rejects_empty_question_and_missing_index() {
        let (tools, generator, handle) = setup().await;
        let config = PipelineConfig::default();

        let err = QaSkill::run(&tools, &config, "   ", "requests", None, Some(&handle))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::EmptyQuestion));

        let err = QaSkill::run(&tools, &config, "what?", "requests", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::NoIndex));
        assert!(generator.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_released_index_is_a_retrieval_error() {
        let (tools, _, handle) = setup().await;
        tools.index.release(&handle).await;
        let err = QaSkill::run(&tools, &PipelineConfig::default(), "timeout?", "requests", None, Some(&handle))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::Retrieval(ToolError::UnknownIndex(_))));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé...");
        assert_eq!(excerpt("short", 10), "short");
    }
}
