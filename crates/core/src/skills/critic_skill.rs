//! # Critic Skill
//!
//! Reviews a draft against the research set. Rule checks produce every
//! blocking note, so the verdict is reproducible for the same inputs. An
//! optional model review can add advisory notes on top.
//!
//! Rules:
//! - structure: required sections, code examples, balanced fences
//! - version: the resolved version must appear in the draft
//! - deprecated APIs: identifiers the changelog marks as deprecated or removed
//!   must not be used in code blocks
//! - unsourced versions: version numbers must come from the resolved version
//!   or a research document
//! - stage warnings surface as advisory notes

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::PipelineConfig;
use crate::state::{CritiqueNote, Document, RegistryMetadata, SourceKind, StageWarning};
use crate::tools::{GenerationPurpose, GenerationRequest, IndexHandle, ToolError, Toolbox};

use super::TUTORIAL_SECTIONS;

/// Code examples below this count get an advisory note
const MIN_CODE_BLOCKS: usize = 3;

/// Markers that end the "deprecated" part of a changelog line
const REPLACEMENT_MARKERS: &[&str] = &[
    "in favor of",
    "in favour of",
    "instead",
    "replaced by",
    "superseded by",
    "use ",
    "=>",
    "->",
];

fn deprecation_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)deprecat|\bremoved\b|no longer (?:supported|available)|drop(?:ped)? support")
            .expect("valid regex")
    })
}

fn backtick_ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([A-Za-z_][A-Za-z0-9_.]*)(?:\(\))?`").expect("valid regex"))
}

fn version_claim_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\bversion\s+|\bv)?(\d+\.\d+(?:\.\d+)?)").expect("valid regex")
    })
}

/// Everything the critic reads from the run state
#[derive(Debug, Clone, Copy)]
pub struct CritiqueInput<'a> {
    pub library: &'a str,
    pub draft: &'a str,
    pub documents: &'a [Document],
    pub resolved_version: Option<&'a str>,
    pub metadata: Option<&'a RegistryMetadata>,
    pub warnings: &'a [StageWarning],
    /// Used only by the model review
    pub index_handle: Option<&'a IndexHandle>,
}

pub struct CriticSkill;

impl CriticSkill {
    /// Rule checks plus, when enabled, the advisory model review.
    /// Never fails: review errors are logged and dropped.
    pub async fn run(
        tools: &Toolbox,
        config: &PipelineConfig,
        input: CritiqueInput<'_>,
    ) -> Vec<CritiqueNote> {
        let mut notes = Self::evaluate(&input);

        if config.critique.llm_review {
            match review(tools, config, &input).await {
                Ok(findings) => {
                    tracing::debug!(findings = findings.len(), "Model review finished");
                    notes.extend(findings);
                    notes = finalize(notes);
                }
                Err(e) => tracing::warn!("Model review skipped: {}", e),
            }
        }

        tracing::info!(
            blocking = notes.iter().filter(|n| n.is_blocking()).count(),
            advisory = notes.iter().filter(|n| !n.is_blocking()).count(),
            "Critique finished"
        );
        notes
    }

    /// Deterministic rule checks. Sorted and de-duplicated.
    pub fn evaluate(input: &CritiqueInput<'_>) -> Vec<CritiqueNote> {
        let outline = Outline::parse(input.draft);
        let mut notes = Vec::new();

        check_structure(&outline, &mut notes);
        check_version(input, &mut notes);
        check_deprecated_apis(input, &outline, &mut notes);
        check_unsourced_versions(input, &mut notes);

        for warning in input.warnings {
            notes.push(CritiqueNote::advisory(
                format!("{} stage", warning.stage),
                warning.message.clone(),
            ));
        }

        finalize(notes)
    }
}

fn finalize(notes: Vec<CritiqueNote>) -> Vec<CritiqueNote> {
    notes.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// A fenced code block; `line` is the 1-based line of the opening fence
#[derive(Debug)]
struct CodeBlock {
    line: usize,
    body: String,
}

/// Headings and code blocks of a markdown draft
#[derive(Debug, Default)]
struct Outline {
    headings: Vec<String>,
    code_blocks: Vec<CodeBlock>,
    /// Line of a fence that is never closed
    unclosed_fence: Option<usize>,
    first_line: Option<(usize, String)>,
}

impl Outline {
    fn parse(draft: &str) -> Self {
        let mut outline = Outline::default();
        let mut open: Option<(&str, CodeBlock)> = None;

        for (i, line) in draft.lines().enumerate() {
            let number = i + 1;
            let trimmed = line.trim();
            if outline.first_line.is_none() && !trimmed.is_empty() {
                outline.first_line = Some((number, trimmed.to_string()));
            }

            let marker = ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(m));
            match (open.take(), marker) {
                (Some((fence, block)), Some(m)) if m == fence => outline.code_blocks.push(block),
                (Some((fence, mut block)), _) => {
                    block.body.push_str(line);
                    block.body.push('\n');
                    open = Some((fence, block));
                }
                (None, Some(m)) => {
                    open = Some((
                        m,
                        CodeBlock {
                            line: number,
                            body: String::new(),
                        },
                    ))
                }
                (None, None) => {
                    if trimmed.starts_with('#') {
                        outline
                            .headings
                            .push(trimmed.trim_start_matches('#').trim().to_lowercase());
                    }
                }
            }
        }

        outline.unclosed_fence = open.map(|(_, block)| block.line);
        outline
    }
}

fn check_structure(outline: &Outline, notes: &mut Vec<CritiqueNote>) {
    for section in TUTORIAL_SECTIONS {
        if !outline.headings.iter().any(|h| section.matches_heading(h)) {
            notes.push(CritiqueNote::blocking(
                "structure",
                format!("missing required section '## {}'", section.heading),
            ));
        }
    }

    if let Some(line) = outline.unclosed_fence {
        notes.push(CritiqueNote::blocking(
            format!("line {}", line),
            "code fence is never closed",
        ));
    }

    match outline.code_blocks.len() {
        0 => notes.push(CritiqueNote::blocking("structure", "draft has no fenced code examples")),
        n if n < MIN_CODE_BLOCKS => notes.push(CritiqueNote::advisory(
            "structure",
            format!("only {} code example(s); aim for at least {}", n, MIN_CODE_BLOCKS),
        )),
        _ => {}
    }

    if let Some((line, text)) = &outline.first_line {
        if is_horizontal_rule(text) {
            notes.push(CritiqueNote::advisory(
                format!("line {}", line),
                "draft opens with a horizontal rule; start with the title",
            ));
        }
    }
}

fn is_horizontal_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|&c| compact.chars().all(|x| x == c))
}

fn check_version(input: &CritiqueInput<'_>, notes: &mut Vec<CritiqueNote>) {
    match input.resolved_version {
        Some(version) if !contains_version(input.draft, version) => {
            notes.push(CritiqueNote::blocking(
                "version",
                format!("draft never states the target version {}", version),
            ));
        }
        Some(_) => {}
        None => notes.push(CritiqueNote::advisory(
            "version",
            "version could not be resolved; the tutorial targets the latest release",
        )),
    }

    if input.metadata.is_some_and(|m| m.deprecated) {
        notes.push(CritiqueNote::advisory(
            "version",
            "the registry marks this release as deprecated; tell the reader",
        ));
    }
}

fn check_deprecated_apis(input: &CritiqueInput<'_>, outline: &Outline, notes: &mut Vec<CritiqueNote>) {
    let deprecated = deprecated_identifiers(input.documents, input.library);
    if deprecated.is_empty() {
        return;
    }

    for (n, block) in outline.code_blocks.iter().enumerate() {
        for (ident, source) in &deprecated {
            if contains_identifier(&block.body, ident) {
                notes.push(CritiqueNote::blocking(
                    format!("code block {}", n + 1),
                    format!(
                        "uses `{}`, which the changelog marks as deprecated or removed ({})",
                        ident, source
                    ),
                ));
            }
        }
    }
}

/// Identifiers a changelog line marks as deprecated or removed, with the
/// first document that says so
fn deprecated_identifiers(documents: &[Document], library: &str) -> BTreeMap<String, String> {
    let mut found = BTreeMap::new();
    for doc in documents.iter().filter(|d| d.source_kind == SourceKind::Changelog) {
        for line in doc.content.lines() {
            if !deprecation_line_re().is_match(line) {
                continue;
            }
            let lower = line.to_lowercase();
            let end = REPLACEMENT_MARKERS
                .iter()
                .filter_map(|m| lower.find(m))
                .min()
                .unwrap_or(line.len());
            // markers are ASCII, so byte offsets line up with the original
            let deprecated_part = line.get(..end).unwrap_or(line);

            for cap in backtick_ident_re().captures_iter(deprecated_part) {
                let ident = &cap[1];
                if ident.len() < 3 || ident.eq_ignore_ascii_case(library) {
                    continue;
                }
                found
                    .entry(ident.to_string())
                    .or_insert_with(|| doc.source_url.clone());
            }
        }
    }
    found
}

fn check_unsourced_versions(input: &CritiqueInput<'_>, notes: &mut Vec<CritiqueNote>) {
    let mut seen = BTreeSet::new();
    for (line, version) in version_claims(input.draft) {
        if !seen.insert(version.clone()) {
            continue;
        }
        let matches_resolved = input.resolved_version.is_some_and(|resolved| {
            resolved == version || resolved.starts_with(&format!("{}.", version))
        });
        if matches_resolved {
            continue;
        }
        if input.documents.iter().any(|d| contains_version(&d.content, &version)) {
            continue;
        }
        notes.push(CritiqueNote::blocking(
            format!("line {}", line),
            format!("version {} is not supported by any research source", version),
        ));
    }
}

/// Version numbers the draft states: any `x.y.z`, or `x.y` written as `vX.Y`
/// or `version X.Y`. Bare two-part numbers are treated as ordinary numbers.
fn version_claims(text: &str) -> Vec<(usize, String)> {
    let mut claims = Vec::new();
    for (i, line) in text.lines().enumerate() {
        for cap in version_claim_re().captures_iter(line) {
            let (Some(full), Some(number)) = (cap.get(0), cap.get(2)) else {
                continue;
            };
            let prefixed = cap.get(1).is_some();
            let three_part = number.as_str().matches('.').count() == 2;
            if !(prefixed || three_part) {
                continue;
            }
            if has_version_boundaries(line, full.start(), number.end()) {
                claims.push((i + 1, number.as_str().to_string()));
            }
        }
    }
    claims
}

/// Start must not continue a word or number; end must not continue a
/// number (`1.2.3.4`) or word.
fn has_version_boundaries(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let mut after = text[end..].chars();
    let before_ok = before.map_or(true, |c| !(c.is_alphanumeric() || c == '.'));
    let after_ok = match after.next() {
        None => true,
        Some('.') => !after.next().is_some_and(|c| c.is_ascii_digit()),
        Some(c) => !(c.is_alphanumeric() || c == '-' || c == '+'),
    };
    before_ok && after_ok
}

fn contains_version(text: &str, version: &str) -> bool {
    text.match_indices(version).any(|(start, _)| {
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_ascii_digit() || c == '.'));
        let mut after = text[start + version.len()..].chars();
        let after_ok = match after.next() {
            None => true,
            Some('.') => !after.next().is_some_and(|c| c.is_ascii_digit()),
            Some(c) => !c.is_ascii_digit(),
        };
        before_ok && after_ok
    })
}

fn contains_identifier(code: &str, ident: &str) -> bool {
    let is_ident_char = |c: char| c.is_alphanumeric() || c == '_';
    code.match_indices(ident).any(|(start, _)| {
        let before_ok = !code[..start].chars().next_back().is_some_and(is_ident_char);
        let after_ok = !code[start + ident.len()..].chars().next().is_some_and(is_ident_char);
        before_ok && after_ok
    })
}

async fn review(
    tools: &Toolbox,
    config: &PipelineConfig,
    input: &CritiqueInput<'_>,
) -> Result<Vec<CritiqueNote>, ToolError> {
    let context_passages = match input.index_handle {
        Some(handle) => {
            let query = format!("{} getting started usage example", input.library);
            tools.index.query(handle, &query, config.top_k, None).await?
        }
        None => Vec::new(),
    };

    let mut prompt = format!("Library: {}\n", input.library);
    if let Some(version) = input.resolved_version {
        prompt.push_str(&format!("Version: {}\n", version));
    }
    prompt.push_str("\n## Draft\n\n");
    prompt.push_str(input.draft);

    let request = GenerationRequest {
        purpose: GenerationPurpose::Critique,
        prompt,
        context_passages,
    };
    let text = tokio::time::timeout(config.generation_timeout(), tools.generator.generate(&request))
        .await
        .map_err(|_| ToolError::Timeout(config.generation_timeout()))??;

    Ok(parse_review(&text))
}

/// `- [Location] finding` lines; `- none` means no findings
fn parse_review(text: &str) -> Vec<CritiqueNote> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.eq_ignore_ascii_case("none"))
        .map(|item| {
            let located = item
                .strip_prefix('[')
                .and_then(|rest| rest.split_once(']'))
                .map(|(loc, msg)| (loc.trim(), msg.trim()));
            match located {
                Some((loc, msg)) if !loc.is_empty() && !msg.is_empty() => {
                    CritiqueNote::advisory(format!("review: {}", loc), msg)
                }
                _ => CritiqueNote::advisory("review", item),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Language, PackageManager, Severity};
    use crate::tools::{
        DocumentFetcher, FetchRequest, Generator, InMemoryIndex, PackageRegistry, RawDocument,
        RegistryRecord,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    const GOOD_DRAFT: &str = r#"# Getting Started with requests 2.32.0

## Installation

```bash
pip install requests==2.32.0
```

## Basic Usage

```python
import requests

r = requests.get("https://httpbin.org/get", timeout=5)
print(r.status_code)
```

## Common Pitfalls

Always pass a timeout; the default waits forever.

```python
requests.get(url, timeout=(3.05, 27))
```

## API Reference Highlights

- `requests.get(url, params=None, **kwargs)`
"#;

    fn docs() -> Vec<Document> {
        vec![
            Document {
                source_url: "https://requests.readthedocs.io/en/latest/".into(),
                content: "Requests 2.32.0 supports Python 3.8+. Install with pip.".into(),
                source_kind: SourceKind::OfficialDoc,
            },
            Document {
                source_url: "https://github.com/psf/requests/blob/main/HISTORY.md".into(),
                content: "2.32.0\n- `Session.mount_all` is deprecated, use `Session.mount` instead.\n\
                          - Removed `requests.compat.urlparse_legacy()`.\n- v2.31 added typing."
                    .into(),
                source_kind: SourceKind::Changelog,
            },
        ]
    }

    fn input<'a>(draft: &'a str, documents: &'a [Document]) -> CritiqueInput<'a> {
        CritiqueInput {
            library: "requests",
            draft,
            documents,
            resolved_version: Some("2.32.0"),
            metadata: None,
            warnings: &[],
            index_handle: None,
        }
    }

    fn blocking(notes: &[CritiqueNote]) -> Vec<&CritiqueNote> {
        notes.iter().filter(|n| n.is_blocking()).collect()
    }

    #[test]
    fn test_good_draft_has_no_blocking_notes() {
        let docs = docs();
        let notes = CriticSkill::evaluate(&input(GOOD_DRAFT, &docs));
        assert!(blocking(&notes).is_empty(), "unexpected: {:?}", notes);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let docs = docs();
        let draft = "## Installation\n\nUse requests 3.0.0\n";
        let first = CriticSkill::evaluate(&input(draft, &docs));
        let second = CriticSkill::evaluate(&input(draft, &docs));
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_notes_sorted_blocking_first() {
        let docs = docs();
        let warnings = vec![StageWarning {
            stage: "research".into(),
            message: "no changelog documents found".into(),
        }];
        let mut i = input("no headings at all", &docs);
        i.warnings = &warnings;
        let notes = CriticSkill::evaluate(&i);
        let first_advisory = notes.iter().position(|n| n.severity == Severity::Advisory).unwrap();
        assert!(notes[..first_advisory].iter().all(|n| n.is_blocking()));
        assert!(notes[first_advisory..].iter().all(|n| !n.is_blocking()));
        assert!(notes.contains(&CritiqueNote::advisory("research stage", "no changelog documents found")));
    }

    #[test]
    fn test_missing_section_is_blocking() {
        let docs = docs();
        let draft = GOOD_DRAFT.replace("## Common Pitfalls", "## Notes");
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        assert_eq!(
            blocking(&notes),
            vec![&CritiqueNote::blocking("structure", "missing required section '## Common Pitfalls'")]
        );
    }

    #[test]
    fn test_code_block_rules() {
        let docs = docs();
        let prose_only = "# requests 2.32.0\n## Installation\n## Basic Usage\n## Common Pitfalls\n## API\n";
        let notes = CriticSkill::evaluate(&input(prose_only, &docs));
        assert!(notes.contains(&CritiqueNote::blocking("structure", "draft has no fenced code examples")));

        let unclosed = format!("{}\n```python\nimport requests\n", prose_only);
        let notes = CriticSkill::evaluate(&input(&unclosed, &docs));
        assert!(notes.contains(&CritiqueNote::blocking("line 7", "code fence is never closed")));

        let one_block = format!("{}\n```python\nimport requests\n```\n", prose_only);
        let notes = CriticSkill::evaluate(&input(&one_block, &docs));
        assert!(blocking(&notes).is_empty());
        assert!(notes.iter().any(|n| n.message.starts_with("only 1 code example")));
    }

    #[test]
    fn test_headings_inside_code_are_ignored() {
        let docs = docs();
        let draft = GOOD_DRAFT.replace("## Installation\n", "```text\n## Installation\n```\n");
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        assert!(notes.contains(&CritiqueNote::blocking("structure", "missing required section '## Installation'")));
    }

    #[test]
    fn test_section_keyword_inside_another_word_does_not_count() {
        let docs = docs();
        let draft = GOOD_DRAFT
            .replace("## API Reference Highlights", "## Rapid Prototyping")
            .replace("## Installation", "## Uninstalling Old Versions");
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        assert!(notes.contains(&CritiqueNote::blocking(
            "structure",
            "missing required section '## API Reference Highlights'"
        )));
        assert!(notes.contains(&CritiqueNote::blocking(
            "structure",
            "missing required section '## Installation'"
        )));
    }

    #[test]
    fn test_leading_rule_is_advisory() {
        let docs = docs();
        let draft = format!("---\n{}", GOOD_DRAFT);
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        assert!(blocking(&notes).is_empty());
        assert!(notes.iter().any(|n| n.location_hint == "line 1" && n.message.contains("horizontal rule")));
    }

    #[test]
    fn test_version_rules() {
        let docs = docs();
        let draft = GOOD_DRAFT.replace("2.32.0", "latest");
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        assert!(notes.contains(&CritiqueNote::blocking("version", "draft never states the target version 2.32.0")));

        let mut unresolved = input(&draft, &docs);
        unresolved.resolved_version = None;
        let notes = CriticSkill::evaluate(&unresolved);
        assert!(blocking(&notes).is_empty());
        assert!(notes.iter().any(|n| n.location_hint == "version" && !n.is_blocking()));
    }

    #[test]
    fn test_registry_deprecation_is_advisory() {
        let docs = docs();
        let metadata = RegistryMetadata {
            ecosystem: Language::Python,
            package_manager: PackageManager::Pip,
            release_date: None,
            deprecated: true,
            docs_url: None,
            repository_url: None,
            changelog_url: None,
            readme: None,
        };
        let mut i = input(GOOD_DRAFT, &docs);
        i.metadata = Some(&metadata);
        let notes = CriticSkill::evaluate(&i);
        assert!(blocking(&notes).is_empty());
        assert!(notes.iter().any(|n| n.message.contains("deprecated")));
    }

    #[test]
    fn test_deprecated_api_in_code_is_blocking() {
        let docs = docs();
        let draft = GOOD_DRAFT.replace(
            "print(r.status_code)",
            "s = requests.Session()\nrequests.Session.mount_all(s)\nrequests.Session.mount(s)",
        );
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        let blocking = blocking(&notes);
        assert_eq!(blocking.len(), 1, "{:?}", blocking);
        assert_eq!(blocking[0].location_hint, "code block 2");
        assert!(blocking[0].message.contains("`Session.mount_all`"));
    }

    #[test]
    fn test_deprecated_identifiers_skip_replacements() {
        let found = deprecated_identifiers(&docs(), "requests");
        let idents: Vec<&str> = found.keys().map(String::as_str).collect();
        assert_eq!(idents, vec!["Session.mount_all", "requests.compat.urlparse_legacy"]);
    }

    #[test]
    fn test_unsourced_version_is_blocking() {
        let docs = docs();
        let draft = GOOD_DRAFT.replace(
            "Always pass a timeout;",
            "Since v2.31 (and again in 2.33.1) always pass a timeout;",
        );
        let notes = CriticSkill::evaluate(&input(&draft, &docs));
        assert_eq!(
            blocking(&notes),
            vec![&CritiqueNote::blocking(
                "line 20",
                "version 2.33.1 is not supported by any research source"
            )]
        );
    }

    #[test]
    fn test_version_claims() {
        let claims = version_claims("pip install x==1.2.3\nvalue 3.05 here\nv2.1 and 10.0.0.1\nversion 4.5.");
        assert_eq!(
            claims,
            vec![(1, "1.2.3".to_string()), (3, "2.1".to_string()), (4, "4.5".to_string())]
        );
        assert!(contains_version("requests 2.32.0 is out", "2.32.0"));
        assert!(!contains_version("requests 2.32.01", "2.32.0"));
        assert!(!contains_version("12.32.0", "2.32.0"));
    }

    #[test]
    fn test_parse_review() {
        let notes = parse_review("Findings:\n- [Basic Usage] Close the session.\n- none\n- Explain timeouts\n");
        assert_eq!(
            notes,
            vec![
                CritiqueNote::advisory("review: Basic Usage", "Close the session."),
                CritiqueNote::advisory("review", "Explain timeouts"),
            ]
        );
        assert!(parse_review("- none").is_empty());
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

    struct FixedReview(Result<String, String>);

    #[async_trait]
    impl Generator for FixedReview {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ToolError> {
            assert_eq!(request.purpose, GenerationPurpose::Critique);
            self.0.clone().map_err(ToolError::Generation)
        }
    }

    fn toolbox(review: Result<String, String>) -> Toolbox {
        Toolbox {
            registry: Arc::new(Unused),
            official_docs: Arc::new(Unused),
            examples: Arc::new(Unused),
            changelog: Arc::new(Unused),
            index: Arc::new(InMemoryIndex::default()),
            generator: Arc::new(FixedReview(review)),
        }
    }

    #[tokio::test]
    async fn test_model_review_adds_only_advisory_notes() {
        let docs = docs();
        let mut config = PipelineConfig::default();
        config.critique.llm_review = true;

        let tools = toolbox(Ok("- [Basic Usage] The example is blocking, fix it now.".into()));
        let notes = CriticSkill::run(&tools, &config, input(GOOD_DRAFT, &docs)).await;
        assert!(blocking(&notes).is_empty());
        assert!(notes.iter().any(|n| n.location_hint == "review: Basic Usage"));
    }

    #[tokio::test]
    async fn test_review_failure_and_disabled_review_match_rules() {
        let docs = docs();
        let expected = CriticSkill::evaluate(&input(GOOD_DRAFT, &docs));

        let mut config = PipelineConfig::default();
        config.critique.llm_review = true;
        let tools = toolbox(Err("overloaded".into()));
        assert_eq!(CriticSkill::run(&tools, &config, input(GOOD_DRAFT, &docs)).await, expected);

        let tools = toolbox(Ok("- [Intro] never asked".into()));
        let notes = CriticSkill::run(&tools, &PipelineConfig::default(), input(GOOD_DRAFT, &docs)).await;
        assert_eq!(notes, expected);
    }
}
