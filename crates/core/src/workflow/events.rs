//! # Pipeline Events
//!
//! Audit records emitted by the coordinator, one per stage transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pipeline::PipelineStage;
use crate::state::RunStatus;

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    /// Run accepted
    RunStarted,
    /// A stage finished and the cursor moved
    StageTransition,
    /// Critique sent the draft back
    RevisionRequested,
    /// A stage recorded a non-fatal warning
    Warning,
    /// Run reached a terminal status
    RunFinished,
}

impl PipelineEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEventKind::RunStarted => "run_started",
            PipelineEventKind::StageTransition => "stage_transition",
            PipelineEventKind::RevisionRequested => "revision_requested",
            PipelineEventKind::Warning => "warning",
            PipelineEventKind::RunFinished => "run_finished",
        }
    }
}

/// An audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Unique event ID
    pub id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
    /// Stage that produced the event
    pub stage: PipelineStage,
    /// Stage the cursor moved to, for transitions
    #[serde(default)]
    pub next_stage: Option<PipelineStage>,
    /// Wall time spent in `stage`
    #[serde(default)]
    pub duration_ms: u64,
    /// Run status after the event
    pub status: RunStatus,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(run_id: &str, kind: PipelineEventKind, stage: PipelineStage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            kind,
            stage,
            next_stage: None,
            duration_ms: 0,
            status: RunStatus::InProgress,
            data: None,
        }
    }

    pub fn with_next_stage(mut self, next: PipelineStage) -> Self {
        self.next_stage = Some(next);
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
