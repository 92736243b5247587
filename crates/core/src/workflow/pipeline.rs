//! # Pipeline Stages
//!
//! Stage enum and transition rules of the tutorial state machine.
//!
//! ```text
//! Intent → Version → Research → Draft → Critique ─┬─▶ Done
//!                                 ▲               │
//!                                 └── revise ─────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::state::PipelineState;

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Parsing the request into a library name and language
    Intent,
    /// Resolving the latest published version
    Version,
    /// Gathering sources and building the retrieval index
    Research,
    /// Writing (or rewriting) the tutorial
    Draft,
    /// Reviewing the draft
    Critique,
    /// Terminal
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Intent => "intent",
            PipelineStage::Version => "version",
            PipelineStage::Research => "research",
            PipelineStage::Draft => "draft",
            PipelineStage::Critique => "critique",
            PipelineStage::Done => "done",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the run goes after a critique pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueRoute {
    /// No blocking notes
    Approve,
    /// Blocking notes and budget left
    Revise,
    /// Blocking notes and the revision budget is spent
    LimitReached,
}

/// Decide the critique edge from the current feedback and revision budget
pub fn route_after_critique(state: &PipelineState) -> CritiqueRoute {
    if state.blocking_notes().next().is_none() {
        CritiqueRoute::Approve
    } else if state.can_revise() {
        CritiqueRoute::Revise
    } else {
        CritiqueRoute::LimitReached
    }
}

/// The pipeline state machine cursor
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current stage
    pub stage: PipelineStage,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Intent,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stage that follows `stage` on the forward path
    pub fn successor(stage: PipelineStage) -> PipelineStage {
        match stage {
            PipelineStage::Intent => PipelineStage::Version,
            PipelineStage::Version => PipelineStage::Research,
            PipelineStage::Research => PipelineStage::Draft,
            PipelineStage::Draft => PipelineStage::Critique,
            PipelineStage::Critique => PipelineStage::Done,
            PipelineStage::Done => PipelineStage::Done,
        }
    }

    /// Advance along the forward path
    pub fn advance(&mut self) {
        self.stage = Self::successor(self.stage);
    }

    /// Loop back from critique to draft
    pub fn revise(&mut self) {
        self.stage = PipelineStage::Draft;
    }

    pub fn finish(&mut self) {
        self.stage = PipelineStage::Done;
    }

    pub fn is_done(&self) -> bool {
        self.stage == PipelineStage::Done
    }
}
