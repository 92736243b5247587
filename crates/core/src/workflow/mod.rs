//! # Workflow
//!
//! The tutorial state machine and its audit trail.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Request → Intent → Version → Research → Draft ⟷ Critique → TutorialResult
//! ```

pub mod audit;
pub mod coordinator;
pub mod events;
pub mod pipeline;

pub use audit::{AuditSink, ChannelAuditSink, SqliteAuditSink, TracingAuditSink};
pub use coordinator::Coordinator;
pub use events::{PipelineEvent, PipelineEventKind};
pub use pipeline::{route_after_critique, CritiqueRoute, Pipeline, PipelineStage};
