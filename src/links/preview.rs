//! Link-preview fetching and OG metadata extraction

use crate::error::{LinkSwipeError, Result};
use crate::links::types::OgPreview;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Fetches preview metadata for a URL
#[async_trait]
pub trait PreviewFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<OgPreview>;
}

/// Preview fetcher that downloads the page and reads its markup
pub struct HttpPreviewFetcher {
    client: Client,
}

impl HttpPreviewFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("linkswipe-preview")
            .build()
            .map_err(LinkSwipeError::Http)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PreviewFetcher for HttpPreviewFetcher {
    async fn fetch(&self, url: &str) -> Result<OgPreview> {
        let parsed = parse_http_url(url)?;
        debug!("Fetching preview for {}", parsed);

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;

        Ok(parse_preview(&parsed, &html))
    }
}

/// Parse `url`, accepting only http(s)
pub fn parse_http_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| LinkSwipeError::InvalidInput(format!("{}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(LinkSwipeError::InvalidInput(format!(
            "unsupported scheme '{}' in {}",
            scheme, url
        ))),
    }
}

fn meta_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("meta tag pattern"))
}

fn link_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").expect("link tag pattern"))
}

fn attribute() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)([a-zA-Z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute pattern")
    })
}

fn title_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern"))
}

fn attributes(tag: &str) -> HashMap<String, String> {
    attribute()
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((name, decode_entities(value.trim())))
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

/// Extract OG metadata from `html` fetched from `base`
///
/// Falls back to `<title>` and `description` meta tags, and to
/// `/favicon.ico` when the page declares no icon.
pub fn parse_preview(base: &Url, html: &str) -> OgPreview {
    let mut preview = OgPreview::placeholder(base.as_str());
    let mut fallback_description = None;

    for tag in meta_tag().find_iter(html) {
        let attrs = attributes(tag.as_str());
        let name = match attrs.get("property").or_else(|| attrs.get("name")) {
            Some(name) => name.to_ascii_lowercase(),
            None => continue,
        };
        let content = match attrs.get("content") {
            Some(content) if !content.is_empty() => content.clone(),
            _ => continue,
        };

        match name.as_str() {
            "og:title" => preview.title = Some(content),
            "og:description" => preview.description = Some(content),
            "description" => fallback_description = Some(content),
            "og:image" | "og:image:url" | "og:image:secure_url" => {
                if let Some(image) = resolve(base, &content) {
                    if !preview.images.contains(&image) {
                        preview.images.push(image);
                    }
                }
            }
            _ => {}
        }
    }

    if preview.title.is_none() {
        preview.title = title_tag()
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| decode_entities(m.as_str().trim()))
            .filter(|t| !t.is_empty());
    }
    if preview.description.is_none() {
        preview.description = fallback_description;
    }

    for tag in link_tag().find_iter(html) {
        let attrs = attributes(tag.as_str());
        let is_icon = attrs
            .get("rel")
            .is_some_and(|rel| {
                rel.to_ascii_lowercase()
                    .split_whitespace()
                    .any(|r| r == "icon" || r == "apple-touch-icon")
            });
        if !is_icon {
            continue;
        }
        if let Some(icon) = attrs.get("href").and_then(|href| resolve(base, href)) {
            preview.favicons.push(icon);
        }
    }
    if preview.favicons.is_empty() {
        if let Some(icon) = resolve(base, "/favicon.ico") {
            preview.favicons.push(icon);
        }
    }

    preview
}
