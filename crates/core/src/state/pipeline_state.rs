//! # Pipeline State
//!
//! The single record threaded through every stage of a tutorial run.
//!
//! Write ownership:
//!
//! | Field                                   | Writer       |
//! |-----------------------------------------|--------------|
//! | `library_name`, `language`              | Intent       |
//! | `resolved_version`, `registry_metadata` | Version      |
//! | `research_*`, `index_handle`            | Research     |
//! | `draft`                                 | Draft        |
//! | `critique_feedback`, `feedback_history` | Critique     |
//! | `revision_count`, `status`, `failure`   | Orchestrator |
//!
//! Every stage may read every field. `warnings` is append-only for all stages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureReason, StateError};
use crate::tools::IndexHandle;
use crate::workflow::PipelineEvent;

/// Language ecosystem of the target library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Javascript,
    #[default]
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Unknown => "unknown",
        }
    }

    /// Package manager of the ecosystem, if known
    pub fn package_manager(&self) -> Option<PackageManager> {
        match self {
            Language::Python => Some(PackageManager::Pip),
            Language::Javascript => Some(PackageManager::Npm),
            Language::Unknown => None,
        }
    }
}

/// Installer used in generated install commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Pip,
    Npm,
}

impl PackageManager {
    /// Version-pinned install command, or an unpinned one for "latest"
    pub fn install_command(&self, package: &str, version: Option<&str>) -> String {
        match (self, version) {
            (PackageManager::Pip, Some(v)) => format!("pip install {}=={}", package, v),
            (PackageManager::Pip, None) => format!("pip install {}", package),
            (PackageManager::Npm, Some(v)) => format!("npm install {}@{}", package, v),
            (PackageManager::Npm, None) => format!("npm install {}", package),
        }
    }
}

/// Where a research document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    OfficialDoc,
    GithubExample,
    Changelog,
}

impl SourceKind {
    /// Fixed merge order of the research fan-out
    pub const ALL: [SourceKind; 3] = [
        SourceKind::OfficialDoc,
        SourceKind::GithubExample,
        SourceKind::Changelog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::OfficialDoc => "official_doc",
            SourceKind::GithubExample => "github_example",
            SourceKind::Changelog => "changelog",
        }
    }
}

/// A gathered reference document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub source_url: String,
    pub content: String,
    pub source_kind: SourceKind,
}

/// Critique note severity. Ordered so blocking notes sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Advisory,
}

/// A single critique finding
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CritiqueNote {
    pub severity: Severity,
    /// Where in the draft the problem is ("line 12", "code block 2", "structure")
    pub location_hint: String,
    pub message: String,
}

impl CritiqueNote {
    pub fn blocking(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Blocking,
            location_hint: location.into(),
            message: message.into(),
        }
    }

    pub fn advisory(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Advisory,
            location_hint: location.into(),
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Notes produced by one critique pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueRound {
    /// 1-based pass number
    pub pass: u32,
    pub notes: Vec<CritiqueNote>,
}

impl CritiqueRound {
    pub fn blocking_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_blocking()).count()
    }
}

/// Registry side channel, consumed by Research, Draft, and Critique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    /// Registry that answered (differs from the requested language when it was unknown)
    pub ecosystem: Language,
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
    /// Long description / README published with the package
    #[serde(default, skip_serializing)]
    pub readme: Option<String>,
}

/// Which source kinds contributed to the research set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchCoverage {
    pub documents_per_kind: BTreeMap<SourceKind, usize>,
    /// Kinds whose fetcher succeeded but returned nothing usable
    pub empty_kinds: Vec<SourceKind>,
    /// Kinds whose fetcher errored or timed out
    pub failed_kinds: Vec<SourceKind>,
    pub duplicates_dropped: usize,
}

/// Non-fatal condition recorded by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWarning {
    pub stage: String,
    pub message: String,
}

/// Overall run status. Terminal once not `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Approved,
    Failed,
    RevisionLimitExceeded,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Approved => "approved",
            RunStatus::Failed => "failed",
            RunStatus::RevisionLimitExceeded => "revision_limit_exceeded",
        }
    }
}

/// Terminal failure details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
}

/// Mutable record for one tutorial run
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub run_id: String,
    pub raw_request: String,
    pub started_at: DateTime<Utc>,

    pub library_name: String,
    pub language: Language,

    pub resolved_version: Option<String>,
    pub registry_metadata: Option<RegistryMetadata>,

    pub research_documents: Vec<Document>,
    pub research_coverage: ResearchCoverage,
    pub index_handle: Option<IndexHandle>,

    pub draft: Option<String>,

    pub critique_feedback: Vec<CritiqueNote>,
    pub feedback_history: Vec<CritiqueRound>,

    pub revision_count: u32,
    pub max_revisions: u32,

    pub warnings: Vec<StageWarning>,

    status: RunStatus,
    failure: Option<Failure>,
}

impl PipelineState {
    pub fn new(raw_request: &str, max_revisions: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            raw_request: raw_request.to_string(),
            started_at: Utc::now(),
            library_name: String::new(),
            language: Language::Unknown,
            resolved_version: None,
            registry_metadata: None,
            research_documents: Vec::new(),
            research_coverage: ResearchCoverage::default(),
            index_handle: None,
            draft: None,
            critique_feedback: Vec::new(),
            feedback_history: Vec::new(),
            revision_count: 0,
            max_revisions,
            warnings: Vec::new(),
            status: RunStatus::InProgress,
            failure: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Move to a terminal status. Only `in_progress → terminal` is allowed.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::AlreadyTerminal(self.status));
        }
        if !next.is_terminal() {
            return Err(StateError::BackwardTransition);
        }
        if matches!(next, RunStatus::Approved | RunStatus::RevisionLimitExceeded)
            && !self.has_draft()
        {
            return Err(StateError::MissingDraft(next));
        }
        self.status = next;
        Ok(())
    }

    /// Terminate the run as failed
    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) -> Result<(), StateError> {
        self.transition(RunStatus::Failed)?;
        self.failure = Some(Failure {
            reason,
            message: message.into(),
        });
        Ok(())
    }

    pub fn has_draft(&self) -> bool {
        self.draft.as_deref().is_some_and(|d| !d.trim().is_empty())
    }

    pub fn can_revise(&self) -> bool {
        self.revision_count < self.max_revisions
    }

    /// Count one critique → draft loop iteration
    pub fn record_revision(&mut self) -> Result<(), StateError> {
        if !self.can_revise() {
            return Err(StateError::RevisionBudgetExhausted(self.max_revisions));
        }
        self.revision_count += 1;
        Ok(())
    }

    /// Replace the current feedback and append it to the audit history
    pub fn apply_critique(&mut self, notes: Vec<CritiqueNote>) {
        let pass = self.feedback_history.len() as u32 + 1;
        self.feedback_history.push(CritiqueRound {
            pass,
            notes: notes.clone(),
        });
        self.critique_feedback = notes;
    }

    pub fn blocking_notes(&self) -> impl Iterator<Item = &CritiqueNote> {
        self.critique_feedback.iter().filter(|n| n.is_blocking())
    }

    pub fn warn(&mut self, stage: &str, message: impl Into<String>) {
        self.warnings.push(StageWarning {
            stage: stage.to_string(),
            message: message.into(),
        });
    }
}

/// Structured outcome delivered to the caller for every terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorialResult {
    pub run_id: String,
    pub request: String,
    pub status: RunStatus,
    #[serde(default)]
    pub failure: Option<Failure>,
    pub library_name: String,
    pub language: Language,
    #[serde(default)]
    pub resolved_version: Option<String>,
    #[serde(default)]
    pub registry_metadata: Option<RegistryMetadata>,
    #[serde(default)]
    pub draft: Option<String>,
    pub feedback_history: Vec<CritiqueRound>,
    pub revision_count: u32,
    pub max_revisions: u32,
    pub warnings: Vec<StageWarning>,
    pub research_coverage: ResearchCoverage,
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub index_handle: Option<IndexHandle>,
    pub events: Vec<PipelineEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TutorialResult {
    pub fn from_state(state: PipelineState, events: Vec<PipelineEvent>) -> Self {
        Self {
            run_id: state.run_id,
            request: state.raw_request,
            status: state.status,
            failure: state.failure,
            library_name: state.library_name,
            language: state.language,
            resolved_version: state.resolved_version,
            registry_metadata: state.registry_metadata,
            draft: state.draft,
            feedback_history: state.feedback_history,
            revision_count: state.revision_count,
            max_revisions: state.max_revisions,
            warnings: state.warnings,
            research_coverage: state.research_coverage,
            source_urls: state
                .research_documents
                .into_iter()
                .map(|d| d.source_url)
                .collect(),
            index_handle: state.index_handle,
            events,
            started_at: state.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Approved
    }

    /// Notes from the last critique pass
    pub fn latest_feedback(&self) -> &[CritiqueNote] {
        self.feedback_history
            .last()
            .map(|r| r.notes.as_slice())
            .unwrap_or(&[])
    }
}
