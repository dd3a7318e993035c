//! Web search through the serper.dev API. Registered only when an API key
//! is configured.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{AgentError, Result};
use crate::tools::{string_arg_schema, Tool};

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";
const MAX_RESULTS: usize = 3;

pub struct WebSearchTool {
    http: reqwest::Client,
    api_key: String,
}

impl WebSearchTool {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for up-to-date information"
    }

    fn parameters_schema(&self) -> Value {
        string_arg_schema("query", "The search query")
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Tool("`query` must be a string".to_string()))?;
        debug!(query, "web search");

        let response = self
            .http
            .post(SERPER_ENDPOINT)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query }))
            .send()
            .await
            .map_err(|e| AgentError::Tool(format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AgentError::Tool(format!(
                "search request returned status {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Tool(format!("invalid search response: {e}")))?;
        Ok(render_results(query, &parsed))
    }
}

fn render_results(query: &str, response: &SearchResponse) -> String {
    if response.organic.is_empty() {
        return format!("No results found for '{query}'.");
    }
    let mut lines = Vec::with_capacity(MAX_RESULTS);
    for result in response.organic.iter().take(MAX_RESULTS) {
        lines.push(format!(
            "{}: {} ({})",
            result.title, result.snippet, result.link
        ));
    }
    lines.join("\n")
}
