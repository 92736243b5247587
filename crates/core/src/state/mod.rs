pub mod db;
pub mod pipeline_state;
pub mod runs;

pub use db::PrimerDb;

pub use pipeline_state::{
    CritiqueNote, CritiqueRound, Document, Failure, Language, PackageManager, PipelineState,
    RegistryMetadata, ResearchCoverage, RunStatus, Severity, SourceKind, StageWarning,
    TutorialResult,
};
pub use runs::{RunStore, RunSummary};
