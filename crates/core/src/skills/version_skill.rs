//! # Version Skill
//!
//! Resolves the latest published version. Registry failures never fail the
//! run; they produce a warning and an unresolved version.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{Language, RegistryMetadata};
use crate::tools::{PackageRegistry, RegistryRecord, ToolError};

/// Result of version resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionOutput {
    pub resolved_version: Option<String>,
    pub metadata: Option<RegistryMetadata>,
    /// Why the version is unresolved, when it is
    pub warning: Option<String>,
}

impl VersionOutput {
    fn resolved(record: RegistryRecord, ecosystem: Language) -> Self {
        Self {
            metadata: Some(record.metadata(ecosystem)),
            resolved_version: Some(record.version),
            warning: None,
        }
    }

    fn unresolved(reason: impl std::fmt::Display) -> Self {
        Self {
            resolved_version: None,
            metadata: None,
            warning: Some(format!("version unresolved; falling back to latest ({})", reason)),
        }
    }
}

pub struct VersionSkill;

impl VersionSkill {
    pub async fn run(
        registry: &dyn PackageRegistry,
        library: &str,
        language: Language,
        timeout: Duration,
    ) -> VersionOutput {
        match language {
            Language::Python | Language::Javascript => {
                match lookup(registry, library, language, timeout).await {
                    Ok(Some(record)) => VersionOutput::resolved(record, language),
                    Ok(None) => VersionOutput::unresolved(format!(
                        "'{}' not found on {}",
                        library,
                        registry_name(language)
                    )),
                    Err(e) => VersionOutput::unresolved(format!("{}: {}", registry_name(language), e)),
                }
            }
            Language::Unknown => {
                let (python, javascript) = tokio::join!(
                    lookup(registry, library, Language::Python, timeout),
                    lookup(registry, library, Language::Javascript, timeout),
                );
                match (python, javascript) {
                    (Ok(Some(record)), _) => VersionOutput::resolved(record, Language::Python),
                    (_, Ok(Some(record))) => VersionOutput::resolved(record, Language::Javascript),
                    (Ok(None), Ok(None)) => VersionOutput::unresolved(format!(
                        "'{}' not found on PyPI or npm",
                        library
                    )),
                    (py, js) => {
                        let reasons: Vec<String> = [("PyPI", py), ("npm", js)]
                            .into_iter()
                            .filter_map(|(name, result)| result.err().map(|e| format!("{}: {}", name, e)))
                            .collect();
                        VersionOutput::unresolved(reasons.join("; "))
                    }
                }
            }
        }
    }
}

fn registry_name(language: Language) -> &'static str {
    match language {
        Language::Python => "PyPI",
        Language::Javascript => "npm",
        Language::Unknown => "registry",
    }
}

async fn lookup(
    registry: &dyn PackageRegistry,
    library: &str,
    language: Language,
    timeout: Duration,
) -> Result<Option<RegistryRecord>, ToolError> {
    tokio::time::timeout(timeout, registry.get_latest_version(library, language))
        .await
        .map_err(|_| ToolError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PackageManager;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Answers from a fixed table; `slow` packages never return
    struct TableRegistry {
        entries: HashMap<(String, Language), RegistryRecord>,
        slow: Vec<String>,
        broken: bool,
    }

    impl TableRegistry {
        fn new() -> Self {
            Self {
                entries: HashMap::new(),
                slow: Vec::new(),
                broken: false,
            }
        }

        fn with(mut self, name: &str, language: Language, version: &str) -> Self {
            let package_manager = language.package_manager().unwrap();
            self.entries.insert(
                (name.to_string(), language),
                RegistryRecord {
                    version: version.to_string(),
                    package_manager,
                    release_date: None,
                    deprecated: false,
                    docs_url: None,
                    repository_url: None,
                    changelog_url: None,
                    readme: None,
                },
            );
            self
        }
    }

    #[async_trait]
    impl PackageRegistry for TableRegistry {
        async fn get_latest_version(
            &self,
            name: &str,
            language: Language,
        ) -> Result<Option<RegistryRecord>, ToolError> {
            if self.broken {
                return Err(ToolError::Transport("connection refused".into()));
            }
            if self.slow.iter().any(|s| s == name) {
                std::future::pending::<()>().await;
            }
            Ok(self.entries.get(&(name.to_string(), language)).cloned())
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(15);

    #[tokio::test]
    async fn test_resolves_known_language() {
        let registry = TableRegistry::new().with("requests", Language::Python, "2.32.0");
        let out = VersionSkill::run(&registry, "requests", Language::Python, TIMEOUT).await;
        assert_eq!(out.resolved_version.as_deref(), Some("2.32.0"));
        assert_eq!(out.metadata.unwrap().package_manager, PackageManager::Pip);
        assert!(out.warning.is_none());
    }

    #[tokio::test]
    async fn test_unknown_language_prefers_python() {
        let registry = TableRegistry::new()
            .with("chalk", Language::Javascript, "5.3.0")
            .with("six", Language::Python, "1.16.0")
            .with("six", Language::Javascript, "0.0.1");

        let out = VersionSkill::run(&registry, "chalk", Language::Unknown, TIMEOUT).await;
        assert_eq!(out.resolved_version.as_deref(), Some("5.3.0"));
        assert_eq!(out.metadata.unwrap().ecosystem, Language::Javascript);

        let out = VersionSkill::run(&registry, "six", Language::Unknown, TIMEOUT).await;
        assert_eq!(out.resolved_version.as_deref(), Some("1.16.0"));
        assert_eq!(out.metadata.unwrap().ecosystem, Language::Python);
    }

    #[tokio::test]
    async fn test_not_found_is_a_warning() {
        let registry = TableRegistry::new();
        let out = VersionSkill::run(&registry, "nope", Language::Javascript, TIMEOUT).await;
        assert!(out.resolved_version.is_none());
        assert!(out.warning.unwrap().contains("not found on npm"));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_a_warning() {
        let mut registry = TableRegistry::new();
        registry.broken = true;
        let out = VersionSkill::run(&registry, "requests", Language::Unknown, TIMEOUT).await;
        let warning = out.warning.unwrap();
        assert!(warning.starts_with("version unresolved"));
        assert!(warning.contains("PyPI: request failed"));
        assert!(warning.contains("npm: request failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_registry_times_out() {
        let mut registry = TableRegistry::new().with("requests", Language::Python, "2.32.0");
        registry.slow.push("requests".into());
        let out = VersionSkill::run(&registry, "requests", Language::Python, TIMEOUT).await;
        assert!(out.resolved_version.is_none());
        assert!(out.warning.unwrap().contains("timed out"));
    }
}
