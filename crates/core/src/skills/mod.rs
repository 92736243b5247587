//! # Stage Skills
//!
//! One skill per pipeline stage. Each skill reads the inputs it needs and
//! returns its output; only the coordinator writes `PipelineState`.
//!
//! ```text
//! IntentSkill → VersionSkill → ResearchSkill → DraftingSkill → CriticSkill
//!                                                    ▲              │
//!                                                    └── revise ────┘
//! ```
//!
//! `QaSkill` answers follow-up questions after a run.

pub mod llm_helpers;
pub mod prompts;

pub mod critic_skill;
pub mod drafting_skill;
pub mod intent_skill;
pub mod qa_skill;
pub mod research_skill;
pub mod version_skill;

use std::time::Duration;

use crate::state::SourceKind;

pub use critic_skill::CriticSkill;
pub use drafting_skill::{DraftInput, DraftingSkill};
pub use intent_skill::{IntentOutput, IntentSkill};
pub use qa_skill::{QaError, QaSkill};
pub use research_skill::{ResearchOutput, ResearchSkill};
pub use version_skill::{VersionOutput, VersionSkill};

/// A required tutorial section and how to retrieve material for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TutorialSection {
    pub heading: &'static str,
    /// Lowercase prefix of a heading word that marks this section
    pub keyword: &'static str,
    /// Retrieval query; `{library}` is replaced with the library name
    pub query: &'static str,
    /// Source kind tried first
    pub preferred_kind: Option<SourceKind>,
}

impl TutorialSection {
    pub fn query_for(&self, library: &str) -> String {
        self.query.replace("{library}", library)
    }

    /// Whether a lowercased heading has a word starting with the keyword
    pub fn matches_heading(&self, heading: &str) -> bool {
        heading
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word.starts_with(self.keyword))
    }
}

/// Canonical sections, in document order
pub const TUTORIAL_SECTIONS: [TutorialSection; 4] = [
    TutorialSection {
        heading: "Installation",
        keyword: "install",
        query: "install {library} installation requirements setup pip npm",
        preferred_kind: Some(SourceKind::OfficialDoc),
    },
    TutorialSection {
        heading: "Basic Usage",
        keyword: "usage",
        query: "{library} example usage import quickstart",
        preferred_kind: Some(SourceKind::GithubExample),
    },
    TutorialSection {
        heading: "Common Pitfalls",
        keyword: "pitfall",
        query: "{library} deprecated removed breaking change warning error",
        preferred_kind: Some(SourceKind::Changelog),
    },
    TutorialSection {
        heading: "API Reference Highlights",
        keyword: "api",
        query: "{library} api reference function class method parameters returns",
        preferred_kind: None,
    },
];

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at 30s
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 40), Duration::from_secs(30));
    }

    #[test]
    fn test_section_queries() {
        assert_eq!(TUTORIAL_SECTIONS.len(), 4);
        assert!(TUTORIAL_SECTIONS[0].query_for("requests").starts_with("install requests"));
    }

    #[test]
    fn test_section_heading_matches_whole_words() {
        let [install, usage, pitfalls, api] = TUTORIAL_SECTIONS;
        assert!(install.matches_heading("installation"));
        assert!(install.matches_heading("1. installing from pypi"));
        assert!(!install.matches_heading("uninstalling"));
        assert!(usage.matches_heading("basic usage"));
        assert!(pitfalls.matches_heading("common pitfalls"));
        assert!(api.matches_heading("api reference highlights"));
        assert!(api.matches_heading("rest-api basics"));
        assert!(!api.matches_heading("rapid prototyping"));
        assert!(!api.matches_heading("capabilities"));
    }
}
