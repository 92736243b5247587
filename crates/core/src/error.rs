//! # Errors
//!
//! Failure taxonomy for the tutorial pipeline.
//!
//! - `StageError` - a stage could not produce its output (terminal for the run)
//! - `ToolError` - a collaborator call failed (absorbed or retried by stages)
//! - `StateError` - an illegal write to `PipelineState`
//!
//! `FailureReason` is the serializable tag delivered to callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::RunStatus;

/// Why a run ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The request did not name exactly one library
    InvalidIntent,
    /// No reference material was gathered from any source kind
    InsufficientResearch,
    /// The retrieval index could not be built
    IndexingFailed,
    /// The generator kept failing until retries ran out
    DraftGenerationFailed,
    /// The run exceeded its wall-clock budget
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidIntent => "invalid_intent",
            FailureReason::InsufficientResearch => "insufficient_research",
            FailureReason::IndexingFailed => "indexing_failed",
            FailureReason::DraftGenerationFailed => "draft_generation_failed",
            FailureReason::Timeout => "timeout",
        }
    }
}

/// A stage failure that ends the run
#[derive(Debug, Error)]
pub enum StageError {
    #[error("could not identify a library in the request: {0}")]
    InvalidIntent(String),

    #[error("no reference material found for '{library}' in any source")]
    InsufficientResearch { library: String },

    #[error("failed to build the retrieval index after {attempts} attempt(s): {source}")]
    IndexingFailed {
        attempts: u32,
        #[source]
        source: ToolError,
    },

    #[error("draft generation failed after {attempts} attempt(s): {reason}")]
    DraftGenerationFailed { attempts: u32, reason: String },

    #[error("stage '{stage}' was cancelled: run budget of {budget:?} exceeded")]
    Timeout { stage: String, budget: Duration },
}

impl StageError {
    /// Terminal reason reported to the caller
    pub fn reason(&self) -> FailureReason {
        match self {
            StageError::InvalidIntent(_) => FailureReason::InvalidIntent,
            StageError::InsufficientResearch { .. } => FailureReason::InsufficientResearch,
            StageError::IndexingFailed { .. } => FailureReason::IndexingFailed,
            StageError::DraftGenerationFailed { .. } => FailureReason::DraftGenerationFailed,
            StageError::Timeout { .. } => FailureReason::Timeout,
        }
    }
}

/// A failed call to an external collaborator
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("unknown index handle '{0}'")]
    UnknownIndex(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ToolError::Transport(format!("timeout: {}", err))
        } else if err.is_decode() {
            ToolError::InvalidResponse(err.to_string())
        } else {
            ToolError::Transport(err.to_string())
        }
    }
}

/// Rejected write to `PipelineState`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("run already finished with status {0:?}")]
    AlreadyTerminal(RunStatus),

    #[error("a run cannot move back to in_progress")]
    BackwardTransition,

    #[error("status {0:?} requires a non-empty draft")]
    MissingDraft(RunStatus),

    #[error("revision budget of {0} exhausted")]
    RevisionBudgetExhausted(u32),
}
