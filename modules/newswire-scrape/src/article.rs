// Article page fetching and body/metadata extraction.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use newswire_common::{NewswireError, ScrapedArticle};
use regex::Regex;
use serde_json::json;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::info;

const ARTICLE_TIMEOUT: Duration = Duration::from_secs(15);
/// Bodies above this are rejected as `payload_too_large`.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const USER_AGENT: &str = "newswire/0.1";

static META_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<meta\s[^>]*>").expect("valid meta regex"));
static ATTR_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:name|property)\s*=\s*["']([^"']+)["']"#).expect("valid key regex")
});
static ATTR_CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#).expect("valid content regex")
});

/// Fetches an article URL and extracts body, author, category, tags, images,
/// and meta fields, within size and timeout limits.
#[derive(Clone)]
pub struct ArticleScraper {
    client: reqwest::Client,
}

impl Default for ArticleScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl ArticleScraper {
    pub fn new() -> Self {
        Self::with_timeout(ARTICLE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build article HTTP client");
        Self { client }
    }

    pub async fn scrape(&self, url: &str) -> Result<ScrapedArticle, NewswireError> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_fetch_error(url, &e))?;

        if !resp.status().is_success() {
            return Err(NewswireError::TransientNetwork(format!(
                "{url}: HTTP {}",
                resp.status()
            )));
        }

        if let Some(len) = resp.content_length() {
            if len as usize > MAX_BODY_BYTES {
                return Err(NewswireError::PayloadTooLarge {
                    url: url.to_string(),
                    size: len,
                });
            }
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| classify_fetch_error(url, &e))?
        {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(NewswireError::PayloadTooLarge {
                    url: url.to_string(),
                    size: (body.len() + chunk.len()) as u64,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8(body)
            .map_err(|_| NewswireError::Parse(format!("{url}: body is not valid UTF-8")))?;

        let mut article = extract_meta(&html);
        article.full_text = extract_body(&html, url, &article.meta_description);
        article.content_html = html;

        info!(url, bytes = article.content_html.len(), "Article scraped");
        Ok(article)
    }
}

/// Readability pass over the fetched page. Falls back to the meta description
/// when the main-content transform comes back empty (paywalled or script-only
/// pages).
fn extract_body(html: &str, url: &str, meta_description: &str) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let body = transform_content_input(input, &config);
    let body = body.trim();
    if body.is_empty() {
        meta_description.to_string()
    } else {
        body.to_string()
    }
}

/// Pull author, category, tags, images, and meta fields out of the page head.
pub(crate) fn extract_meta(html: &str) -> ScrapedArticle {
    let mut article = ScrapedArticle::default();
    let mut og = serde_json::Map::new();
    let mut seen_images = HashSet::new();

    for tag in META_TAG_RE.find_iter(html) {
        let tag = tag.as_str();
        let Some(key) = ATTR_KEY_RE
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
        else {
            continue;
        };
        let Some(content) = ATTR_CONTENT_RE
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
        else {
            continue;
        };
        if content.is_empty() {
            continue;
        }

        if key.starts_with("og:") || key.starts_with("article:") {
            og.insert(key.clone(), json!(content));
        }

        match key.as_str() {
            "author" | "article:author" => {
                if article.author.is_empty() {
                    article.author = content;
                }
            }
            "article:section" => article.category = content,
            "article:tag" => article.tags.push(content),
            "og:image" | "twitter:image" => {
                if seen_images.insert(content.clone()) {
                    article.images.push(content);
                }
            }
            "keywords" => article.meta_keywords = content,
            "description" => article.meta_description = content,
            "og:description" => {
                if article.meta_description.is_empty() {
                    article.meta_description = content;
                }
            }
            _ => {}
        }
    }

    // Keywords double as tags when the page carries no explicit tag markup.
    if article.tags.is_empty() && !article.meta_keywords.is_empty() {
        article.tags = article
            .meta_keywords
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }

    article.meta_data = serde_json::Value::Object(og);
    article
}

fn classify_fetch_error(url: &str, e: &reqwest::Error) -> NewswireError {
    if e.is_timeout() {
        NewswireError::FetchTimeout(url.to_string())
    } else {
        NewswireError::TransientNetwork(format!("{url}: {e}"))
    }
}
