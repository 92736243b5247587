//! # Package Registries
//!
//! Latest-version lookups against the PyPI JSON API and the npm registry.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use super::{PackageRegistry, RegistryRecord, ToolError};
use crate::state::{Language, PackageManager};

const PYPI_BASE: &str = "https://pypi.org/pypi";
const NPM_BASE: &str = "https://registry.npmjs.org";

/// HTTP client for PyPI and npm
pub struct HttpRegistry {
    client: reqwest::Client,
    pypi_base: String,
    npm_base: String,
}

impl HttpRegistry {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            pypi_base: PYPI_BASE.to_string(),
            npm_base: NPM_BASE.to_string(),
        }
    }

    /// Point at mirrors (e.g. a private index)
    pub fn with_base_urls(mut self, pypi: impl Into<String>, npm: impl Into<String>) -> Self {
        self.pypi_base = pypi.into();
        self.npm_base = npm.into();
        self
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>, ToolError> {
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(Some(response.json::<Value>().await?))
    }
}

#[async_trait]
impl PackageRegistry for HttpRegistry {
    async fn get_latest_version(
        &self,
        name: &str,
        language: Language,
    ) -> Result<Option<RegistryRecord>, ToolError> {
        match language {
            Language::Python => {
                let url = format!("{}/{}/json", self.pypi_base, urlencoding::encode(name));
                match self.get_json(&url).await? {
                    Some(json) => parse_pypi(&json).map(Some),
                    None => Ok(None),
                }
            }
            Language::Javascript => {
                let url = format!("{}/{}", self.npm_base, npm_package_path(name));
                match self.get_json(&url).await? {
                    Some(json) => parse_npm(&json).map(Some),
                    None => Ok(None),
                }
            }
            Language::Unknown => Err(ToolError::InvalidResponse(
                "registry lookup needs a concrete language".to_string(),
            )),
        }
    }
}

/// `@scope/name` keeps its `@` but encodes the slash
fn npm_package_path(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(scoped) => format!("@{}", urlencoding::encode(scoped)),
        None => urlencoding::encode(name).into_owned(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First non-empty `project_urls` entry whose key matches one of `keys` (case-insensitive)
fn project_url(urls: Option<&Value>, keys: &[&str]) -> Option<String> {
    let urls = urls?.as_object()?;
    keys.iter().find_map(|wanted| {
        urls.iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(wanted) && v.as_str().is_some_and(|s| !s.is_empty()))
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string)
    })
}

/// Accepts RFC 3339 and PyPI's naive `upload_time` format
pub fn parse_release_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
}

/// Normalize `git+https://…/repo.git` style repository URLs
pub fn normalize_repository_url(raw: &str) -> String {
    let url = raw.trim().trim_start_matches("git+");
    let url = url
        .strip_prefix("git://")
        .map(|rest| format!("https://{}", rest))
        .unwrap_or_else(|| url.to_string());
    let url = url
        .strip_prefix("git@github.com:")
        .map(|rest| format!("https://github.com/{}", rest))
        .unwrap_or(url);
    url.trim_end_matches('/')
        .trim_end_matches(".git")
        .to_string()
}

/// Parse a PyPI `/pypi/{name}/json` document
pub fn parse_pypi(json: &Value) -> Result<RegistryRecord, ToolError> {
    let info = json
        .get("info")
        .ok_or_else(|| ToolError::InvalidResponse("PyPI response has no info".to_string()))?;
    let version = str_field(info, "version")
        .ok_or_else(|| ToolError::InvalidResponse("PyPI response has no version".to_string()))?
        .to_string();

    let release_date = json
        .get("releases")
        .and_then(|r| r.get(&version))
        .and_then(|files| files.as_array())
        .and_then(|files| files.first())
        .and_then(|file| str_field(file, "upload_time_iso_8601").or_else(|| str_field(file, "upload_time")))
        .and_then(parse_release_date);

    let inactive = info
        .get("classifiers")
        .and_then(|c| c.as_array())
        .is_some_and(|c| c.iter().any(|v| v.as_str() == Some("Development Status :: 7 - Inactive")));
    let yanked = info.get("yanked").and_then(|v| v.as_bool()).unwrap_or(false);

    let project_urls = info.get("project_urls");
    let docs_url = str_field(info, "docs_url")
        .map(str::to_string)
        .or_else(|| project_url(project_urls, &["Documentation", "Docs", "documentation"]))
        .or_else(|| str_field(info, "home_page").map(str::to_string))
        .or_else(|| project_url(project_urls, &["Homepage"]));
    let repository_url = project_url(project_urls, &["Repository", "Source", "Source Code", "Code", "GitHub"])
        .map(|u| normalize_repository_url(&u));
    let changelog_url =
        project_url(project_urls, &["Changelog", "Changes", "Release Notes", "History"]);

    Ok(RegistryRecord {
        version,
        package_manager: PackageManager::Pip,
        release_date,
        deprecated: inactive || yanked,
        docs_url,
        repository_url,
        changelog_url,
        readme: str_field(info, "description").map(str::to_string),
    })
}

/// Parse an npm registry packument
pub fn parse_npm(json: &Value) -> Result<RegistryRecord, ToolError> {
    let version = json
        .get("dist-tags")
        .and_then(|t| str_field(t, "latest"))
        .ok_or_else(|| ToolError::InvalidResponse("npm response has no latest dist-tag".to_string()))?
        .to_string();

    let manifest = json.get("versions").and_then(|v| v.get(&version));
    let release_date = json
        .get("time")
        .and_then(|t| str_field(t, &version))
        .and_then(parse_release_date);

    let deprecated = manifest.is_some_and(|m| m.get("deprecated").is_some_and(|d| !d.is_null()));

    let repository_url = manifest
        .and_then(|m| m.get("repository"))
        .or_else(|| json.get("repository"))
        .and_then(|repo| match repo {
            Value::String(url) => Some(url.clone()),
            other => str_field(other, "url").map(str::to_string),
        })
        .map(|u| normalize_repository_url(&u));

    // npm has no docs field; a homepage that is not the repository is the best guess
    let docs_url = manifest
        .and_then(|m| str_field(m, "homepage"))
        .or_else(|| str_field(json, "homepage"))
        .map(|u| u.split('#').next().unwrap_or(u).to_string())
        .filter(|home| {
            repository_url
                .as_deref()
                .map_or(true, |repo| home.trim_end_matches('/') != repo)
        });

    Ok(RegistryRecord {
        version,
        package_manager: PackageManager::Npm,
        release_date,
        deprecated,
        docs_url,
        repository_url,
        changelog_url: None,
        readme: str_field(json, "readme").map(str::to_string),
    })
}
