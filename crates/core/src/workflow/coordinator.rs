//! # Coordinator
//!
//! Drives one run through the stage machine. Stages read the state and
//! return their output; the coordinator applies it once the stage future
//! has finished, so a stage cancelled by the run budget leaves no partial
//! writes behind.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{FailureReason, StageError};
use crate::skills::critic_skill::CritiqueInput;
use crate::skills::{
    CriticSkill, DraftInput, DraftingSkill, IntentOutput, IntentSkill, QaError, QaSkill,
    ResearchOutput, ResearchSkill, VersionOutput, VersionSkill,
};
use crate::state::{CritiqueNote, PipelineState, RunStatus, TutorialResult};
use crate::tools::Toolbox;

use super::audit::{AuditSink, TracingAuditSink};
use super::events::{PipelineEvent, PipelineEventKind};
use super::pipeline::{route_after_critique, CritiqueRoute, Pipeline, PipelineStage};

/// What a stage produced, applied to the state after the stage returns
enum StageOutput {
    Intent(IntentOutput),
    Version(VersionOutput),
    Research(ResearchOutput),
    Draft(String),
    Critique(Vec<CritiqueNote>),
    Finished,
}

/// Event log of a single run, fanned out to every sink
struct RunLog<'a> {
    run_id: String,
    sinks: &'a [Arc<dyn AuditSink>],
    events: Vec<PipelineEvent>,
}

impl<'a> RunLog<'a> {
    fn new(run_id: &str, sinks: &'a [Arc<dyn AuditSink>]) -> Self {
        Self {
            run_id: run_id.to_string(),
            sinks,
            events: Vec::new(),
        }
    }

    fn event(&self, kind: PipelineEventKind, stage: PipelineStage) -> PipelineEvent {
        PipelineEvent::new(&self.run_id, kind, stage)
    }

    fn emit(&mut self, event: PipelineEvent) {
        for sink in self.sinks {
            sink.record(&event);
        }
        self.events.push(event);
    }
}

/// Runs tutorials. Holds only immutable collaborators, so one coordinator
/// can serve concurrent runs.
#[derive(Clone)]
pub struct Coordinator {
    config: PipelineConfig,
    tools: Toolbox,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl Coordinator {
    pub fn new(config: PipelineConfig, tools: Toolbox) -> Self {
        Self {
            config,
            tools,
            sinks: vec![Arc::new(TracingAuditSink)],
        }
    }

    /// Coordinator over the HTTP sources and configured LLM provider
    pub fn from_config(config: PipelineConfig) -> anyhow::Result<Self> {
        let tools = Toolbox::from_config(&config)?;
        Ok(Self::new(config, tools))
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tools(&self) -> &Toolbox {
        &self.tools
    }

    /// Run with the configured revision budget
    pub async fn run_default(&self, raw_request: &str) -> TutorialResult {
        self.run(raw_request, self.config.max_revisions).await
    }

    /// Run the full pipeline. Every outcome, including failures, comes back
    /// as a `TutorialResult`.
    #[tracing::instrument(
        skip(self, raw_request),
        fields(
            request = %raw_request.chars().take(50).collect::<String>(),
            run_id = tracing::field::Empty
        )
    )]
    pub async fn run(&self, raw_request: &str, max_revisions: u32) -> TutorialResult {
        let mut state = PipelineState::new(raw_request, max_revisions);
        tracing::Span::current().record("run_id", state.run_id.as_str());

        let budget = self.config.run_budget();
        let run_started = Instant::now();
        let mut pipeline = Pipeline::new();
        let mut log = RunLog::new(&state.run_id, &self.sinks);

        log.emit(
            log.event(PipelineEventKind::RunStarted, pipeline.stage)
                .with_data(serde_json::json!({
                    "request": raw_request,
                    "max_revisions": max_revisions,
                })),
        );

        while !pipeline.is_done() {
            let stage = pipeline.stage;
            let stage_started = Instant::now();
            let remaining = remaining_budget(run_started, budget);

            let outcome = match tokio::time::timeout(remaining, self.step(stage, &state)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::Timeout {
                    stage: stage.as_str().to_string(),
                    budget,
                }),
            };

            match outcome {
                Ok(output) => {
                    self.apply(&mut state, stage, output, &mut log);
                    self.route(&mut state, &mut pipeline, &mut log);
                }
                Err(e) => {
                    tracing::warn!(stage = %stage, reason = e.reason().as_str(), "Stage failed: {}", e);
                    settle(&mut state, Err(e));
                    pipeline.finish();
                }
            }

            let next = pipeline.stage;
            log.emit(
                log.event(PipelineEventKind::StageTransition, stage)
                    .with_next_stage(next)
                    .with_duration(stage_started.elapsed())
                    .with_status(state.status()),
            );
        }

        let total = run_started.elapsed();
        tracing::info!(
            status = state.status().as_str(),
            library = %state.library_name,
            revisions = state.revision_count,
            elapsed_ms = total.as_millis() as u64,
            "Run finished"
        );
        log.emit(
            log.event(PipelineEventKind::RunFinished, PipelineStage::Done)
                .with_duration(total)
                .with_status(state.status())
                .with_data(serde_json::json!({
                    "revision_count": state.revision_count,
                    "failure": state.failure(),
                })),
        );

        TutorialResult::from_state(state, log.events)
    }

    /// Answer a follow-up question using a finished run's index
    pub async fn ask(&self, result: &TutorialResult, question: &str) -> Result<String, QaError> {
        QaSkill::run(
            &self.tools,
            &self.config,
            question,
            &result.library_name,
            result.draft.as_deref(),
            result.index_handle.as_ref(),
        )
        .await
    }

    /// Free the retrieval index a result points at
    pub async fn release(&self, result: &TutorialResult) {
        if let Some(handle) = &result.index_handle {
            self.tools.index.release(handle).await;
        }
    }

    /// Execute one stage against a read-only view of the state
    async fn step(&self, stage: PipelineStage, state: &PipelineState) -> Result<StageOutput, StageError> {
        match stage {
            PipelineStage::Intent => IntentSkill::run(&state.raw_request).map(StageOutput::Intent),

            PipelineStage::Version => Ok(StageOutput::Version(
                VersionSkill::run(
                    self.tools.registry.as_ref(),
                    &state.library_name,
                    state.language,
                    self.config.registry_timeout(),
                )
                .await,
            )),

            PipelineStage::Research => ResearchSkill::run(
                &self.tools,
                &self.config,
                &state.library_name,
                state.resolved_version.as_deref(),
                state.language,
                state.registry_metadata.as_ref(),
            )
            .await
            .map(StageOutput::Research),

            PipelineStage::Draft => {
                let blocking: Vec<CritiqueNote> = state.blocking_notes().cloned().collect();
                let input = DraftInput {
                    library: &state.library_name,
                    version: state.resolved_version.as_deref(),
                    language: state.language,
                    metadata: state.registry_metadata.as_ref(),
                    index_handle: state.index_handle.as_ref(),
                    previous_draft: state.draft.as_deref(),
                    blocking_notes: &blocking,
                };
                DraftingSkill::run(&self.tools, &self.config, input)
                    .await
                    .map(StageOutput::Draft)
            }

            PipelineStage::Critique => {
                let input = CritiqueInput {
                    library: &state.library_name,
                    draft: state.draft.as_deref().unwrap_or_default(),
                    documents: &state.research_documents,
                    resolved_version: state.resolved_version.as_deref(),
                    metadata: state.registry_metadata.as_ref(),
                    warnings: &state.warnings,
                    index_handle: state.index_handle.as_ref(),
                };
                Ok(StageOutput::Critique(
                    CriticSkill::run(&self.tools, &self.config, input).await,
                ))
            }

            PipelineStage::Done => Ok(StageOutput::Finished),
        }
    }

    /// Write a stage's output into the fields that stage owns
    fn apply(&self, state: &mut PipelineState, stage: PipelineStage, output: StageOutput, log: &mut RunLog<'_>) {
        let mut warnings = Vec::new();
        match output {
            StageOutput::Intent(out) => {
                tracing::info!(library = %out.library_name, language = out.language.as_str(), "Intent resolved");
                state.library_name = out.library_name;
                state.language = out.language;
            }
            StageOutput::Version(out) => {
                tracing::info!(version = ?out.resolved_version, "Version resolved");
                state.resolved_version = out.resolved_version;
                state.registry_metadata = out.metadata;
                warnings.extend(out.warning);
            }
            StageOutput::Research(out) => {
                tracing::info!(
                    documents = out.documents.len(),
                    chunks = out.index_handle.chunk_count,
                    "Research finished"
                );
                state.research_documents = out.documents;
                state.research_coverage = out.coverage;
                state.index_handle = Some(out.index_handle);
                warnings = out.warnings;
            }
            StageOutput::Draft(text) => state.draft = Some(text),
            StageOutput::Critique(notes) => state.apply_critique(notes),
            StageOutput::Finished => {}
        }

        for message in warnings {
            log.emit(
                log.event(PipelineEventKind::Warning, stage)
                    .with_status(state.status())
                    .with_data(serde_json::json!({ "message": message })),
            );
            state.warn(stage.as_str(), message);
        }
    }

    /// Move the cursor after a successful stage
    fn route(&self, state: &mut PipelineState, pipeline: &mut Pipeline, log: &mut RunLog<'_>) {
        if pipeline.stage != PipelineStage::Critique {
            pipeline.advance();
            return;
        }

        match route_after_critique(state) {
            CritiqueRoute::Approve => {
                settle(state, Ok(RunStatus::Approved));
                pipeline.finish();
            }
            CritiqueRoute::Revise => {
                if let Err(e) = state.record_revision() {
                    tracing::error!("Revision refused: {}", e);
                    settle(state, Ok(RunStatus::RevisionLimitExceeded));
                    pipeline.finish();
                    return;
                }
                log.emit(
                    log.event(PipelineEventKind::RevisionRequested, PipelineStage::Critique)
                        .with_next_stage(PipelineStage::Draft)
                        .with_status(state.status())
                        .with_data(serde_json::json!({
                            "revision": state.revision_count,
                            "blocking_notes": state.blocking_notes().collect::<Vec<_>>(),
                        })),
                );
                pipeline.revise();
            }
            CritiqueRoute::LimitReached => {
                settle(state, Ok(RunStatus::RevisionLimitExceeded));
                pipeline.finish();
            }
        }
    }
}

/// Apply a terminal outcome. A rejected transition becomes a draft failure
/// so the run still ends.
fn settle(state: &mut PipelineState, outcome: Result<RunStatus, StageError>) {
    let applied = match outcome {
        Ok(status) => state.transition(status),
        Err(e) => state.fail(e.reason(), e.to_string()),
    };
    if let Err(e) = applied {
        tracing::error!("Illegal status transition: {}", e);
        if !state.status().is_terminal() {
            let _ = state.fail(FailureReason::DraftGenerationFailed, e.to_string());
        }
    }
}

/// Time left before `started + budget`
fn remaining_budget(started: Instant, budget: Duration) -> Duration {
    budget.saturating_sub(started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_rejects_approval_without_draft() {
        let mut state = PipelineState::new("requests", 1);
        settle(&mut state, Ok(RunStatus::Approved));
        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(
            state.failure().map(|f| f.reason),
            Some(FailureReason::DraftGenerationFailed)
        );
    }

    #[test]
    fn test_settle_records_stage_failure() {
        let mut state = PipelineState::new("", 1);
        settle(&mut state, Err(StageError::InvalidIntent("request is empty".into())));
        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.failure().map(|f| f.reason), Some(FailureReason::InvalidIntent));
        assert!(state.draft.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_budget_saturates() {
        let started = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(remaining_budget(started, Duration::from_secs(3)), Duration::ZERO);
        assert_eq!(remaining_budget(started, Duration::from_secs(8)), Duration::from_secs(3));
    }
}
