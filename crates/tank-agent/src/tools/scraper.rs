//! Fetch a web page and reduce it to readable text.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::errors::{AgentError, Result};
use crate::tools::{string_arg_schema, Tool};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TEXT_CHARS: usize = 2000;

pub struct FetchWebpageTool {
    http: reqwest::Client,
}

impl FetchWebpageTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Tool for FetchWebpageTool {
    fn name(&self) -> &'static str {
        "fetch_webpage"
    }

    fn description(&self) -> &'static str {
        "Fetch a web page and return its readable text content"
    }

    fn parameters_schema(&self) -> Value {
        string_arg_schema("url", "The http(s) URL of the page to fetch")
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Tool("`url` must be a string".to_string()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AgentError::Tool(format!("unsupported URL scheme in '{url}'")));
        }
        debug!(url, "fetching webpage");

        let response = self
            .http
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| AgentError::Tool(format!("fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AgentError::Tool(format!(
                "fetch returned status {}",
                response.status()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| AgentError::Tool(format!("failed to read body: {e}")))?;

        let text = extract_text(&html);
        if text.is_empty() {
            return Err(AgentError::Tool(format!("no readable text at '{url}'")));
        }
        Ok(text)
    }
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>")
            .expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"))
}

/// Strip script/style blocks and markup, collapse whitespace, cap length.
pub fn extract_text(html: &str) -> String {
    let without_blocks = block_re().replace_all(html, " ");
    let without_tags = tag_re().replace_all(&without_blocks, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    let mut text: String = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() > MAX_TEXT_CHARS {
        text = text.chars().take(MAX_TEXT_CHARS).collect::<String>() + "…";
    }
    text
}
