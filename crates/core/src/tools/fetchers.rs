//! # Document Sources
//!
//! The three research sources: official documentation, GitHub examples,
//! and the changelog. Each returns raw text; deduplication and indexing
//! happen in the research stage. The docs and changelog sources fall back
//! to web search when the registry links nothing usable.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::html::{fenced_code_blocks, html_to_text, looks_like_html, same_host_links};
use super::{DocumentFetcher, FetchRequest, RawDocument, ToolError, WebSearch};
use crate::state::{Language, PackageManager};

const GITHUB_API: &str = "https://api.github.com";

/// Path fragments that usually lead to tutorial-grade pages
const DOC_KEYWORDS: &[&str] = &[
    "quickstart",
    "quick-start",
    "getting-started",
    "getting_started",
    "install",
    "tutorial",
    "usage",
    "guide",
    "intro",
    "api",
    "user",
];

/// GET a page and return its text, `None` on 404
async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<Option<String>, ToolError> {
    let response = client.get(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(ToolError::Transport(format!("{} returned {}", url, response.status())));
    }
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("html"));
    let body = response.text().await?;
    let text = if is_html || looks_like_html(&body) {
        html_to_text(&body)
    } else {
        body
    };
    Ok((!text.trim().is_empty()).then_some(text))
}

fn github_url(url: &str) -> Option<Url> {
    let url = Url::parse(url.trim().trim_start_matches("git+")).ok()?;
    let on_github = matches!(url.host_str(), Some("github.com" | "www.github.com"));
    on_github.then_some(url)
}

/// `(owner, repo)` from a github.com URL in any of the forms npm and PyPI
/// publish (`https`, `git+https`, `git+ssh://git@`, `git://`)
pub fn parse_github_repo(url: &str) -> Option<(String, String)> {
    let url = github_url(url)?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?.trim_end_matches(".git");
    (!repo.is_empty()).then(|| (owner.to_string(), repo.to_string()))
}

/// `github.com/o/r/blob/ref/path` → `raw.githubusercontent.com/o/r/ref/path`
pub fn github_raw_url(url: &str) -> Option<String> {
    let url = github_url(url)?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    match segments.as_slice() {
        [owner, repo, "blob", file @ ..]
            if !owner.is_empty() && !file.is_empty() && file.iter().all(|s| !s.is_empty()) =>
        {
            Some(format!(
                "https://raw.githubusercontent.com/{}/{}/{}",
                owner,
                repo,
                file.join("/")
            ))
        }
        _ => None,
    }
}

fn search_query(request: &FetchRequest, topic: &str) -> String {
    match request.language {
        Language::Unknown => format!("{} {}", request.library, topic),
        language => format!("{} {} {}", request.library, language.as_str(), topic),
    }
}

/// Hits for `query` turned into documents: each page is fetched, and the
/// search excerpt stands in when the page cannot be read
async fn documents_from_search(
    client: &reqwest::Client,
    search: &dyn WebSearch,
    query: &str,
    limit: usize,
) -> Vec<RawDocument> {
    let hits = match search.search(query, limit).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::debug!(query = %query, "Web search failed: {}", e);
            return Vec::new();
        }
    };

    let mut documents = Vec::new();
    for hit in hits.into_iter().take(limit) {
        let text = match fetch_page(client, &hit.url).await {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(url = %hit.url, "Using search excerpt: {}", e);
                hit.snippet
            }
        };
        if !text.trim().is_empty() {
            documents.push(RawDocument::new(hit.url, text));
        }
    }
    documents
}

/// Registry landing page that hosts the published README
fn registry_page(library: &str, manager: PackageManager) -> String {
    match manager {
        PackageManager::Pip => format!("https://pypi.org/project/{}/", library),
        PackageManager::Npm => format!("https://www.npmjs.com/package/{}", library),
    }
}

/// Official documentation site plus the README published to the registry
pub struct OfficialDocsFetcher {
    client: reqwest::Client,
    search: Option<Arc<dyn WebSearch>>,
}

impl OfficialDocsFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, search: None }
    }

    pub fn with_search(mut self, search: Option<Arc<dyn WebSearch>>) -> Self {
        self.search = search;
        self
    }

    fn candidate_roots(request: &FetchRequest) -> Vec<String> {
        let mut roots = Vec::new();
        if let Some(url) = request.metadata.as_ref().and_then(|m| m.docs_url.clone()) {
            roots.push(url);
        }
        let python = request.language == Language::Python
            || request
                .metadata
                .as_ref()
                .is_some_and(|m| m.package_manager == PackageManager::Pip);
        if roots.is_empty() && python {
            roots.push(format!(
                "https://{}.readthedocs.io/en/latest/",
                request.library.replace(['_', '.'], "-")
            ));
        }
        roots
    }

    /// Rank same-host links by how tutorial-like their path looks
    fn pick_links(links: Vec<String>, limit: usize) -> Vec<String> {
        let mut scored: Vec<(usize, String)> = links
            .into_iter()
            .filter_map(|link| {
                let lower = Url::parse(&link).ok()?.path().to_ascii_lowercase();
                let hits = DOC_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
                (hits > 0).then_some((hits, link))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, l)| l).collect()
    }

    async fn fetch_html(&self, url: &str) -> Result<Option<String>, ToolError> {
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!("{} returned {}", url, response.status())));
        }
        Ok(Some(response.text().await?))
    }
}

#[async_trait]
impl DocumentFetcher for OfficialDocsFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawDocument>, ToolError> {
        let mut documents = Vec::new();
        let mut last_error = None;

        for root in Self::candidate_roots(request) {
            let html = match self.fetch_html(&root).await {
                Ok(Some(html)) => html,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(url = %root, "Docs root unavailable: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            let text = html_to_text(&html);
            if !text.is_empty() {
                documents.push(RawDocument::new(root.clone(), text));
            }

            let budget = request.max_documents.saturating_sub(documents.len());
            for link in Self::pick_links(same_host_links(&html, &root), budget) {
                match fetch_page(&self.client, &link).await {
                    Ok(Some(text)) => documents.push(RawDocument::new(link, text)),
                    Ok(None) => {}
                    Err(e) => tracing::debug!(url = %link, "Skipping docs page: {}", e),
                }
            }
            if !documents.is_empty() {
                break;
            }
        }

        if documents.is_empty() {
            if let Some(search) = &self.search {
                let query = search_query(request, "documentation");
                documents = documents_from_search(
                    &self.client,
                    search.as_ref(),
                    &query,
                    request.max_documents.max(1),
                )
                .await;
            }
        }

        if let Some(meta) = &request.metadata {
            if let Some(readme) = meta.readme.as_deref().filter(|r| !r.trim().is_empty()) {
                documents.push(RawDocument::new(
                    registry_page(&request.library, meta.package_manager),
                    readme,
                ));
            }
        }

        match (documents.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(documents),
        }
    }
}

/// Code examples from popular GitHub repositories that use the library
pub struct GithubExamplesFetcher {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

impl GithubExamplesFetcher {
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            token,
            api_base: GITHUB_API.to_string(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.get(url).header(ACCEPT, "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn search_repositories(&self, request: &FetchRequest) -> Result<Vec<(String, String)>, ToolError> {
        let mut query = format!("{} in:name,description,readme stars:>10", request.library);
        if request.language != Language::Unknown {
            query.push_str(&format!(" language:{}", request.language.as_str()));
        }
        let url = format!(
            "{}/search/repositories?q={}&sort=stars&order=desc&per_page={}",
            self.api_base,
            urlencoding::encode(&query),
            request.max_documents.max(1)
        );
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "GitHub search returned {}",
                response.status()
            )));
        }
        let json: Value = response.json().await?;
        Ok(parse_repository_search(&json))
    }

    async fn readme(&self, full_name: &str) -> Result<Option<String>, ToolError> {
        let url = format!("{}/repos/{}/readme", self.api_base, full_name);
        let response = self
            .get(&url)
            .header(ACCEPT, "application/vnd.github.raw")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "GitHub readme for {} returned {}",
                full_name,
                response.status()
            )));
        }
        Ok(Some(response.text().await?))
    }
}

/// `(full_name, html_url)` pairs from a repository search response
pub fn parse_repository_search(json: &Value) -> Vec<(String, String)> {
    json.get("items")
        .and_then(|items| items.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("full_name")?.as_str()?;
                    let url = item.get("html_url")?.as_str()?;
                    Some((name.to_string(), url.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Code blocks of a README that mention the library
pub fn example_blocks(readme: &str, library: &str) -> Vec<String> {
    let needle = library.to_ascii_lowercase();
    let bare = needle.rsplit('/').next().unwrap_or(&needle).to_string();
    fenced_code_blocks(readme)
        .into_iter()
        .filter(|block| {
            let lower = block.to_ascii_lowercase();
            lower.contains(&needle) || lower.contains(&bare)
        })
        .collect()
}

#[async_trait]
impl DocumentFetcher for GithubExamplesFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawDocument>, ToolError> {
        let mut repos: Vec<(String, String)> = Vec::new();
        if let Some((owner, repo)) = request
            .metadata
            .as_ref()
            .and_then(|m| m.repository_url.as_deref())
            .and_then(parse_github_repo)
        {
            repos.push((
                format!("{}/{}", owner, repo),
                format!("https://github.com/{}/{}", owner, repo),
            ));
        }

        match self.search_repositories(request).await {
            Ok(found) => {
                for repo in found {
                    if !repos.iter().any(|(name, _)| name.eq_ignore_ascii_case(&repo.0)) {
                        repos.push(repo);
                    }
                }
            }
            // the package's own repository is still worth reading
            Err(e) if !repos.is_empty() => tracing::debug!("GitHub search failed: {}", e),
            Err(e) => return Err(e),
        }

        let mut documents = Vec::new();
        for (full_name, html_url) in repos.into_iter().take(request.max_documents.max(1)) {
            let readme = match self.readme(&full_name).await {
                Ok(Some(readme)) => readme,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(repo = %full_name, "Skipping repository: {}", e);
                    continue;
                }
            };
            let blocks = example_blocks(&readme, &request.library);
            if !blocks.is_empty() {
                documents.push(RawDocument::new(html_url, blocks.join("\n\n")));
            }
        }
        Ok(documents)
    }
}

/// Changelog file, or GitHub release notes when none is published
pub struct ChangelogFetcher {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    search: Option<Arc<dyn WebSearch>>,
}

impl ChangelogFetcher {
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            token,
            api_base: GITHUB_API.to_string(),
            search: None,
        }
    }

    pub fn with_search(mut self, search: Option<Arc<dyn WebSearch>>) -> Self {
        self.search = search;
        self
    }

    async fn search_release_notes(&self, request: &FetchRequest) -> Vec<RawDocument> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        let query = search_query(request, "changelog release notes");
        documents_from_search(&self.client, search.as_ref(), &query, 1).await
    }

    async fn releases(&self, owner: &str, repo: &str) -> Result<Option<RawDocument>, ToolError> {
        let url = format!("{}/repos/{}/{}/releases?per_page=10", self.api_base, owner, repo);
        let mut builder = self.client.get(&url).header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "GitHub releases returned {}",
                response.status()
            )));
        }
        let json: Value = response.json().await?;
        let notes = render_releases(&json);
        Ok((!notes.is_empty()).then(|| {
            RawDocument::new(format!("https://github.com/{}/{}/releases", owner, repo), notes)
        }))
    }
}

/// Release notes as one markdown document, newest first
pub fn render_releases(json: &Value) -> String {
    json.as_array()
        .map(|releases| {
            releases
                .iter()
                .filter(|r| !r.get("draft").and_then(|d| d.as_bool()).unwrap_or(false))
                .filter_map(|r| {
                    let tag = r.get("tag_name")?.as_str()?;
                    let body = r.get("body").and_then(|b| b.as_str()).unwrap_or("").trim();
                    Some(format!("## {}\n\n{}", tag, body))
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default()
}

#[async_trait]
impl DocumentFetcher for ChangelogFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawDocument>, ToolError> {
        let Some(meta) = &request.metadata else {
            return Ok(self.search_release_notes(request).await);
        };

        if let Some(changelog) = &meta.changelog_url {
            let url = github_raw_url(changelog).unwrap_or_else(|| changelog.clone());
            match fetch_page(&self.client, &url).await {
                Ok(Some(text)) => return Ok(vec![RawDocument::new(changelog.clone(), text)]),
                Ok(None) => {}
                Err(e) => tracing::debug!(url = %url, "Changelog unavailable: {}", e),
            }
        }

        let Some((owner, repo)) = meta.repository_url.as_deref().and_then(parse_github_repo) else {
            return Ok(self.search_release_notes(request).await);
        };
        Ok(self.releases(&owner, &repo).await?.into_iter().collect())
    }
}
