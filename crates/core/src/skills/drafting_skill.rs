//! # Drafting Skill
//!
//! Retrieval-augmented tutorial writer. Retrieves passages for each
//! canonical section, then asks the generator for a grounded draft. On
//! revision passes every blocking note is listed as a must-fix item.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::state::{CritiqueNote, Language, PackageManager, RegistryMetadata};
use crate::tools::{GenerationPurpose, GenerationRequest, IndexHandle, Passage, ToolError, Toolbox};

use super::{backoff_delay, TUTORIAL_SECTIONS};

/// Everything the drafter reads from the run state
#[derive(Debug, Clone, Copy)]
pub struct DraftInput<'a> {
    pub library: &'a str,
    pub version: Option<&'a str>,
    pub language: Language,
    pub metadata: Option<&'a RegistryMetadata>,
    pub index_handle: Option<&'a IndexHandle>,
    /// Set on revision passes
    pub previous_draft: Option<&'a str>,
    pub blocking_notes: &'a [CritiqueNote],
}

impl DraftInput<'_> {
    pub fn is_revision(&self) -> bool {
        self.previous_draft.is_some() && !self.blocking_notes.is_empty()
    }

    fn package_manager(&self) -> Option<PackageManager> {
        self.metadata
            .map(|m| m.package_manager)
            .or_else(|| self.language.package_manager())
    }
}

/// Passages retrieved for one section, as indices into the shared passage list
struct SectionContext {
    heading: &'static str,
    passage_numbers: Vec<usize>,
}

pub struct DraftingSkill;

impl DraftingSkill {
    pub async fn run(
        tools: &Toolbox,
        config: &PipelineConfig,
        input: DraftInput<'_>,
    ) -> Result<String, StageError> {
        let Some(handle) = input.index_handle else {
            return Err(StageError::DraftGenerationFailed {
                attempts: 0,
                reason: "retrieval index has not been built".to_string(),
            });
        };

        let (passages, sections) = retrieve(tools, config, handle, input.library)
            .await
            .map_err(|e| StageError::DraftGenerationFailed {
                attempts: 0,
                reason: format!("retrieval failed: {}", e),
            })?;

        let request = GenerationRequest {
            purpose: GenerationPurpose::Draft,
            prompt: build_prompt(&input, &sections),
            context_passages: passages,
        };

        let attempts = config.draft_retries + 1;
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(
                config.generation_timeout(),
                tools.generator.generate(&request),
            )
            .await
            .map_err(|_| ToolError::Timeout(config.generation_timeout()))
            .and_then(|r| r);

            match outcome {
                Ok(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        last_failure = "generator returned an empty draft".to_string();
                    } else if input.previous_draft.map(str::trim) == Some(text) {
                        last_failure = "revision returned the previous draft unchanged".to_string();
                    } else {
                        tracing::info!(
                            library = input.library,
                            attempt,
                            revision = input.is_revision(),
                            chars = text.len(),
                            "Draft generated"
                        );
                        return Ok(text.to_string());
                    }
                }
                Err(e) => last_failure = e.to_string(),
            }

            tracing::warn!(attempt, attempts, "Draft attempt failed: {}", last_failure);
            if attempt < attempts {
                tokio::time::sleep(backoff_delay(config.retry_backoff(), attempt)).await;
            }
        }

        Err(StageError::DraftGenerationFailed {
            attempts,
            reason: last_failure,
        })
    }
}

/// Section-by-section retrieval. Kind-filtered first, unfiltered when that finds nothing.
async fn retrieve(
    tools: &Toolbox,
    config: &PipelineConfig,
    handle: &IndexHandle,
    library: &str,
) -> Result<(Vec<Passage>, Vec<SectionContext>), ToolError> {
    let mut passages: Vec<Passage> = Vec::new();
    let mut sections = Vec::new();

    for section in TUTORIAL_SECTIONS {
        let query = section.query_for(library);
        let mut found = match section.preferred_kind {
            Some(kind) => tools.index.query(handle, &query, config.top_k, Some(kind)).await?,
            None => Vec::new(),
        };
        if found.is_empty() {
            found = tools.index.query(handle, &query, config.top_k, None).await?;
        }

        let mut numbers = Vec::new();
        for passage in found {
            let existing = passages
                .iter()
                .position(|p| p.source_url == passage.source_url && p.text == passage.text);
            let index = match existing {
                Some(i) => i,
                None => {
                    passages.push(passage);
                    passages.len() - 1
                }
            };
            numbers.push(index + 1);
        }
        sections.push(SectionContext {
            heading: section.heading,
            passage_numbers: numbers,
        });
    }
    Ok((passages, sections))
}

fn build_prompt(input: &DraftInput<'_>, sections: &[SectionContext]) -> String {
    let mut prompt = String::new();

    let target = match input.version {
        Some(v) => format!("{} version {}", input.library, v),
        None => format!("{} (latest release; exact version unknown)", input.library),
    };
    prompt.push_str(&format!("Write a Getting Started tutorial for {}.\n", target));
    if input.language != Language::Unknown {
        prompt.push_str(&format!("Language: {}\n", input.language.as_str()));
    }
    if let Some(pm) = input.package_manager() {
        prompt.push_str(&format!(
            "Install command: `{}`\n",
            pm.install_command(input.library, input.version)
        ));
    }
    if input.metadata.is_some_and(|m| m.deprecated) {
        prompt.push_str("Note: the registry marks this release as deprecated. Say so in the tutorial.\n");
    }

    prompt.push_str("\n## Sections\n\n");
    for section in sections {
        let refs = if section.passage_numbers.is_empty() {
            "no passages; keep this section minimal".to_string()
        } else {
            section
                .passage_numbers
                .iter()
                .map(|n| format!("[{}]", n))
                .collect::<Vec<_>>()
                .join(", ")
        };
        prompt.push_str(&format!("- {}: {}\n", section.heading, refs));
    }

    if let (Some(previous), true) = (input.previous_draft, input.is_revision()) {
        prompt.push_str("\n## Must fix\n\n");
        for (i, note) in input.blocking_notes.iter().enumerate() {
            prompt.push_str(&format!("{}. [{}] {}\n", i + 1, note.location_hint, note.message));
        }
        prompt.push_str("\n## Previous draft\n\n");
        prompt.push_str(previous);
        prompt.push('\n');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Document, SourceKind};
    use crate::tools::{
        DocumentFetcher, FetchRequest, Generator, InMemoryIndex, PackageRegistry, RawDocument,
        RegistryRecord, RetrievalIndex,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Replays scripted responses and records prompts
    struct ScriptedGenerator {
        responses: Mutex<Vec<Result<String, ToolError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String, ToolError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ToolError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ToolError::Generation("script exhausted".into())))
        }
    }

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

    fn toolbox(generator: Arc<ScriptedGenerator>, index: Arc<InMemoryIndex>) -> Toolbox {
        Toolbox {
            registry: Arc::new(Unused),
            official_docs: Arc::new(Unused),
            examples: Arc::new(Unused),
            changelog: Arc::new(Unused),
            index,
            generator,
        }
    }

    async fn built_index() -> (Arc<InMemoryIndex>, IndexHandle) {
        let index = Arc::new(InMemoryIndex::default());
        let docs = vec![
            Document {
                source_url: "https://docs.example/install".into(),
                content: "Install requests with pip install requests==2.32.0".into(),
                source_kind: SourceKind::OfficialDoc,
            },
            Document {
                source_url: "https://github.com/a/b".into(),
                content: "import requests\nr = requests.get('https://example.com')\nprint(r.status_code)".into(),
                source_kind: SourceKind::GithubExample,
            },
        ];
        let handle = index.build("requests_python_2_32_0", &docs).await.unwrap();
        (index, handle)
    }

    fn input<'a>(handle: Option<&'a IndexHandle>) -> DraftInput<'a> {
        DraftInput {
            library: "requests",
            version: Some("2.32.0"),
            language: Language::Python,
            metadata: None,
            index_handle: handle,
            previous_draft: None,
            blocking_notes: &[],
        }
    }

    #[tokio::test]
    async fn test_missing_index_fails_fast() {
        let generator = ScriptedGenerator::new(vec![]);
        let tools = toolbox(generator.clone(), Arc::new(InMemoryIndex::default()));
        let err = DraftingSkill::run(&tools, &PipelineConfig::default(), input(None))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::DraftGenerationFailed { attempts: 0, .. }));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_draft_prompt_is_grounded() {
        let (index, handle) = built_index().await;
        let generator = ScriptedGenerator::new(vec![Ok("# requests 2.32.0\n".into())]);
        let tools = toolbox(generator.clone(), index);

        let draft = DraftingSkill::run(&tools, &PipelineConfig::default(), input(Some(&handle)))
            .await
            .unwrap();
        assert_eq!(draft, "# requests 2.32.0");

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("requests version 2.32.0"));
        assert!(prompts[0].contains("`pip install requests==2.32.0`"));
        assert!(prompts[0].contains("- Installation: [1]"));
        assert!(!prompts[0].contains("Must fix"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revision_lists_blocking_notes_and_rejects_unchanged_output() {
        let (index, handle) = built_index().await;
        let generator = ScriptedGenerator::new(vec![
            Ok("old draft".into()),
            Err(ToolError::Generation("overloaded".into())),
            Ok("new draft".into()),
        ]);
        let tools = toolbox(generator.clone(), index);
        let notes = vec![CritiqueNote::blocking("structure", "missing section 'Common Pitfalls'")];

        let mut revision = input(Some(&handle));
        revision.previous_draft = Some("old draft");
        revision.blocking_notes = &notes[..];

        let draft = DraftingSkill::run(&tools, &PipelineConfig::default(), revision)
            .await
            .unwrap();
        assert_eq!(draft, "new draft");

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("## Must fix\n\n1. [structure] missing section 'Common Pitfalls'"));
        assert!(prompts[0].contains("## Previous draft\n\nold draft"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let (index, handle) = built_index().await;
        let generator = ScriptedGenerator::new(vec![Ok("   ".into())]);
        let tools = toolbox(generator.clone(), index);
        let config = PipelineConfig {
            draft_retries: 2,
            ..PipelineConfig::default()
        };

        let err = DraftingSkill::run(&tools, &config, input(Some(&handle)))
            .await
            .unwrap_err();
        match err {
            StageError::DraftGenerationFailed { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("script exhausted"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(generator.prompts.lock().unwrap().len(), 3);
    }
}
