//! # Primer Core
//!
//! Generates "Getting Started" tutorials for PyPI and npm libraries. A run
//! moves through five stages, with a bounded loop between drafting and
//! critique:
//!
//! ```text
//! Intent → Version → Research → Draft ⟷ Critique → TutorialResult
//! ```
//!
//! ## Architecture
//!
//! - `workflow/` - stage machine, coordinator, audit events and sinks
//! - `skills/` - one skill per stage, plus follow-up Q&A
//! - `tools/` - collaborator traits (registry, fetchers, index, generator) and their HTTP/LLM adapters
//! - `state/` - run state, results, and SQLite persistence
//! - `models` - LLM provider configuration
//! - `config` - pipeline configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use primer_core::config::PipelineConfig;
//! use primer_core::workflow::Coordinator;
//!
//! let coordinator = Coordinator::from_config(PipelineConfig::default())?;
//! let result = coordinator.run("getting started with requests", 3).await;
//! println!("{}", result.draft.unwrap_or_default());
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod tools;
pub mod workflow;

pub use config::PipelineConfig;
pub use error::{FailureReason, StageError, StateError, ToolError};
pub use state::{RunStatus, TutorialResult};
pub use workflow::Coordinator;
