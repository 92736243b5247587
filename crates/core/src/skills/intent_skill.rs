//! # Intent Skill
//!
//! Extracts the library name and language from a free-text request.
//! Deterministic; no model call.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::state::Language;

const PYTHON_HINTS: &[&str] = &["python", "python3", "py", "pip", "pypi"];
const JAVASCRIPT_HINTS: &[&str] = &[
    "javascript", "js", "node", "nodejs", "node.js", "npm", "typescript", "ts",
];

const FILLER: &[&str] = &[
    "a", "about", "an", "and", "basic", "basics", "beginner", "beginners", "build", "can", "create",
    "crate", "doc", "docs", "documentation", "example", "examples", "explain", "for", "framework",
    "generate", "get", "getting", "give", "guide", "hello", "help", "hi", "how", "i", "in", "intro",
    "introduction", "is", "latest", "learn", "lib", "library", "make", "me", "module", "my", "need",
    "new", "of", "on", "or", "package", "please", "quick", "quickstart", "sdk", "show", "start",
    "started", "teach", "the", "through", "to", "tutorial", "tutorials", "use", "using", "version",
    "walk", "want", "what", "with", "write", "you",
];

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"`([^`]+)`|"([^"]+)"|(?:^|\s)'([^'\s]+)'"#).expect("valid regex")
    })
}

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(@[a-z0-9][a-z0-9._-]*/)?[a-z0-9][a-z0-9._-]*$").expect("valid regex")
    })
}

fn version_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v?\d+(\.\d+)*$").expect("valid regex"))
}

/// Library and ecosystem named by a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentOutput {
    pub library_name: String,
    pub language: Language,
}

pub struct IntentSkill;

impl IntentSkill {
    pub fn run(raw_request: &str) -> Result<IntentOutput, StageError> {
        let request = raw_request.trim();
        if request.is_empty() {
            return Err(StageError::InvalidIntent("request is empty".to_string()));
        }

        let tokens: Vec<String> = request
            .split_whitespace()
            .map(clean_token)
            .filter(|t| !t.is_empty())
            .collect();
        let language = detect_language(&tokens);

        if let Some(quoted) = quoted_candidate(request) {
            return Ok(IntentOutput {
                library_name: quoted,
                language,
            });
        }

        let mut candidates: Vec<String> = Vec::new();
        for token in tokens {
            if FILLER.contains(&token.as_str())
                || is_hint(&token)
                || version_like_re().is_match(&token)
                || !package_name_re().is_match(&token)
            {
                continue;
            }
            if !candidates.contains(&token) {
                candidates.push(token);
            }
        }

        match candidates.len() {
            0 => Err(StageError::InvalidIntent(format!(
                "no library name found in '{}'",
                request
            ))),
            1 => Ok(IntentOutput {
                library_name: candidates.remove(0),
                language,
            }),
            _ => Err(StageError::InvalidIntent(format!(
                "ambiguous request, found several libraries: {}",
                candidates.join(", ")
            ))),
        }
    }
}

/// Lowercase and strip surrounding punctuation, keeping `@` scopes
fn clean_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !(c.is_alphanumeric() || c == '@'))
        .trim_end_matches("'s")
        .to_lowercase()
}

fn is_hint(token: &str) -> bool {
    PYTHON_HINTS.contains(&token) || JAVASCRIPT_HINTS.contains(&token)
}

fn detect_language(tokens: &[String]) -> Language {
    let python = tokens.iter().any(|t| PYTHON_HINTS.contains(&t.as_str()));
    let javascript = tokens.iter().any(|t| JAVASCRIPT_HINTS.contains(&t.as_str()));
    match (python, javascript) {
        (true, false) => Language::Python,
        (false, true) => Language::Javascript,
        // none, or conflicting hints
        _ => Language::Unknown,
    }
}

fn quoted_candidate(request: &str) -> Option<String> {
    quoted_re().captures_iter(request).find_map(|cap| {
        let inner = cap.get(1).or_else(|| cap.get(2)).or_else(|| cap.get(3))?;
        let name = inner.as_str().trim().to_lowercase();
        package_name_re().is_match(&name).then_some(name)
    })
}
