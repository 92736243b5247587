//! # HTML and Markdown Helpers
//!
//! Regex-based extraction used by the document fetchers. Good enough for
//! documentation pages; not a general HTML parser.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript|svg|head)\b.*?</(script|style|noscript|svg|head)\s*>")
            .expect("valid regex")
    })
}

fn chrome_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(nav|footer|header)\b.*?</(nav|footer|header)\s*>").expect("valid regex")
    })
}

fn block_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)</?(p|div|br|li|ul|ol|pre|tr|table|section|article|h[1-6])\b[^>]*>")
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\b[^>]*?href\s*=\s*["']([^"'#]+)[^"']*["']"#).expect("valid regex"))
}

/// Strip markup and collapse whitespace
pub fn html_to_text(html: &str) -> String {
    let without_scripts = script_style_re().replace_all(html, " ");
    let without_chrome = chrome_re().replace_all(&without_scripts, " ");
    let with_breaks = block_tag_re().replace_all(&without_chrome, "\n");
    let text = tag_re().replace_all(&with_breaks, "");
    let decoded = decode_entities(&text);

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Heuristic check for HTML bodies served without a content type.
/// Only the first 512 characters are inspected.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start();
    let head = head
        .char_indices()
        .nth(512)
        .map_or(head, |(i, _)| &head[..i])
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body")
}

/// Absolute same-host http(s) links found in a page, resolved against
/// `base_url`, without fragments, in document order and without duplicates
pub fn same_host_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Some(base_host) = base.host_str() else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for cap in href_re().captures_iter(html) {
        let Ok(mut link) = base.join(cap[1].trim()) else {
            continue;
        };
        if !is_http(&link) || link.host_str() != Some(base_host) {
            continue;
        }
        link.set_fragment(None);
        let same_page = link.path().trim_end_matches('/') == base.path().trim_end_matches('/')
            && link.query() == base.query();
        let link = link.to_string();
        if !same_page && !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Host of an http(s) URL, lowercased
pub fn host_of(url: &str) -> Option<String> {
    let url = Url::parse(url.trim()).ok().filter(is_http)?;
    url.host_str().map(str::to_string)
}

/// Bodies of fenced code blocks in a markdown document
pub fn fenced_code_blocks(markdown: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(lines) => blocks.push(lines.join("\n")),
                None => current = Some(Vec::new()),
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_strips_markup() {
        let html = r#"<html><head><title>x</title></head><body>
            <nav><a href="/">Home</a></nav>
            <h1>Quickstart</h1><p>Install with <code>pip install requests</code> &amp; go.</p>
            <script>var a = 1;</script></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Quickstart"));
        assert!(text.contains("Install with pip install requests & go."));
        assert!(!text.contains("var a"));
        assert!(!text.contains("Home"));
    }

    #[test]
    fn test_same_host_links() {
        let html = r#"<a href="/en/latest/install.html">Install</a>
            <a href="quickstart.html#top">Quick</a>
            <a href="https://github.com/psf/requests">GitHub</a>
            <a href="/en/latest/install.html">Again</a>"#;
        let links = same_host_links(html, "https://requests.readthedocs.io/en/latest/");
        assert_eq!(
            links,
            vec![
                "https://requests.readthedocs.io/en/latest/install.html",
                "https://requests.readthedocs.io/en/latest/quickstart.html",
            ]
        );
    }

    #[test]
    fn test_same_host_links_resolves_relative_paths() {
        let html = r##"<a href="../api/index.html">API</a>
            <a href="./install.html?v=2#pip">Install</a>
            <a href="mailto:team@example.com">Mail</a>
            <a href="//docs.example.com/en/latest/faq/">FAQ</a>
            <a href="#section">Same page</a>"##;
        let links = same_host_links(html, "https://docs.example.com/en/latest/guide/");
        assert_eq!(
            links,
            vec![
                "https://docs.example.com/en/latest/api/index.html",
                "https://docs.example.com/en/latest/guide/install.html?v=2",
                "https://docs.example.com/en/latest/faq/",
            ]
        );
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://PyPI.org/project/x").as_deref(), Some("pypi.org"));
        assert_eq!(host_of("ftp://x"), None);
    }

    #[test]
    fn test_fenced_code_blocks() {
        let md = "intro\n```python\nimport requests\n```\ntext\n```\nnpm i x\n```\n";
        assert_eq!(fenced_code_blocks(md), vec!["import requests", "npm i x"]);
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("  <!DOCTYPE html><html>"));
        assert!(!looks_like_html("# Changelog\n\n## 2.0.0"));
    }

    #[test]
    fn test_looks_like_html_cuts_on_char_boundary() {
        let changelog = format!("{}— fixed a crash", "a".repeat(511));
        assert!(!looks_like_html(&changelog));
        let late_body = format!("{}<body>", "é".repeat(600));
        assert!(!looks_like_html(&late_body));
        assert!(looks_like_html(&format!("<html>{}", "ü".repeat(600))));
    }
}
