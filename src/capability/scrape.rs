//! `scrape_website`: fetch a page and reduce it to readable text.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::{str_param, Capability, CapabilitySchema, ParamKind, ParamSpec};
use crate::error::CapabilityError;

pub const DEFAULT_MAX_CHARS: usize = 20_000;
const NAME: &str = "scrape_website";

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|table|section|article|header|footer)\b[^>]*>")
        .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\f]+").unwrap());

pub struct ScrapeWebsite {
    client: reqwest::Client,
    max_chars: usize,
}

impl ScrapeWebsite {
    pub fn new(client: reqwest::Client, max_chars: usize) -> Self {
        Self { client, max_chars }
    }
}

#[async_trait]
impl Capability for ScrapeWebsite {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema::new(NAME, "Fetch a web page and return its readable text.")
            .param(ParamSpec::required("url", ParamKind::String, "http or https URL"))
    }

    async fn invoke(&self, input: &Map<String, Value>) -> Result<String, CapabilityError> {
        let url = str_param(NAME, input, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CapabilityError::invalid_input(
                NAME,
                format!("not an http(s) URL: {}", url),
            ));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CapabilityError::failed(NAME, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::failed(
                NAME,
                format!("{} returned {}", url, status),
            ));
        }
        let html = response
            .text()
            .await
            .map_err(|e| CapabilityError::failed(NAME, e))?;

        let text = extract_text(&html);
        tracing::debug!(url, chars = text.chars().count(), "scraped page");
        Ok(truncate(&text, self.max_chars))
    }
}

/// Strip markup, scripts and styles, keeping one line per block element.
pub fn extract_text(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = COMMENT_RE.replace_all(&text, " ");
    let text = BLOCK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = decode_entities(&text);

    text.lines()
        .map(|line| SPACE_RE.replace_all(line, " ").trim().to_string())
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
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}
