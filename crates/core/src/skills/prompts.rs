//! Default system prompts bundled at compile time.

/// Drafter - writes and revises the tutorial
pub const DRAFTER: &str = include_str!("defaults/drafter.md");

/// Critic - optional advisory review
pub const CRITIC: &str = include_str!("defaults/critic.md");

/// QA - follow-up questions after a run
pub const QA: &str = include_str!("defaults/qa.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![("drafter", DRAFTER), ("critic", CRITIC), ("qa", QA)]
}
