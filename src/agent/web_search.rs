//! Web search capability backed by the Exa API.
//!
//! Two tools share one [`ExaClient`]: `web_search` and `get_page_content`.
//! They are only registered when an Exa key is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use unicode_segmentation::UnicodeSegmentation;

use super::tool::{Tool, ToolDefinition};
use crate::error::ToolError;

const EXA_BASE_URL: &str = "https://api.exa.ai";
/// Snippet length per search hit, in graphemes.
const SNIPPET_LEN: usize = 300;
/// Page text kept by `get_page_content`, in graphemes.
const PAGE_TEXT_LEN: usize = 2000;

/// Minimal Exa HTTP client.
pub struct ExaClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl ExaClient {
    /// Creates a client for the public Exa endpoint.
    #[must_use]
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self::with_base_url(api_key, timeout, EXA_BASE_URL)
    }

    /// Creates a client against a custom endpoint.
    #[must_use]
    pub fn with_base_url(api_key: &str, timeout: Duration, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn post(&self, tool: &str, path: &str, body: Value) -> Result<ExaResponse, ToolError> {
        let fail = |message: String| ToolError::Execution {
            tool: tool.to_string(),
            message,
        };

        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(fail(format!("HTTP {}: {text}", status.as_u16())));
        }

        response
            .json::<ExaResponse>()
            .await
            .map_err(|e| fail(format!("invalid response: {e}")))
    }

    /// Runs a search and returns the raw hits.
    pub async fn search(&self, query: &str, num_results: u8) -> Result<Vec<ExaResult>, ToolError> {
        let body = json!({
            "query": query,
            "numResults": num_results,
            "contents": { "text": true, "highlights": true, "summary": true }
        });
        Ok(self.post("web_search", "/search", body).await?.results)
    }

    /// Fetches page contents for one URL.
    pub async fn contents(&self, url: &str) -> Result<Vec<ExaResult>, ToolError> {
        let body = json!({
            "ids": [url],
            "contents": { "text": true, "summary": true }
        });
        Ok(self.post("get_page_content", "/contents", body).await?.results)
    }
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

/// One search hit or page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExaResult {
    /// Page title.
    #[serde(default)]
    pub title: Option<String>,
    /// Page URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Page text.
    #[serde(default)]
    pub text: Option<String>,
    /// Highlighted passages.
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Short summary.
    #[serde(default)]
    pub summary: Option<String>,
}

fn truncate_graphemes(s: &str, max: usize) -> String {
    let mut graphemes = s.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Formats search hits as numbered entries.
#[must_use]
pub fn format_search_results(results: &[ExaResult], query: &str) -> String {
    let mut out = format!("Web search results for: '{query}'\n{}", "=".repeat(50));

    if results.is_empty() {
        out.push_str("\nNo results found for this query.");
        return out;
    }

    for (i, r) in results.iter().enumerate() {
        let snippet = match (&r.text, &r.summary) {
            (Some(text), _) if !text.is_empty() => truncate_graphemes(text, SNIPPET_LEN),
            _ if !r.highlights.is_empty() => r.highlights.iter().take(2).cloned().collect::<Vec<_>>().join(" "),
            (_, Some(summary)) if !summary.is_empty() => summary.clone(),
            _ => "No description available".to_string(),
        };
        out.push_str(&format!(
            "\n\n{}. {}\n   URL: {}\n   {snippet}",
            i + 1,
            r.title.as_deref().unwrap_or("No title"),
            r.url.as_deref().unwrap_or("No URL"),
        ));
    }
    out
}

/// Formats a fetched page.
pub fn format_page_content(results: &[ExaResult], url: &str) -> Result<String, ToolError> {
    let page = results.first().ok_or_else(|| ToolError::Execution {
        tool: "get_page_content".to_string(),
        message: format!("no content found for URL: {url}"),
    })?;

    let mut out = format!(
        "Title: {}\nURL: {url}\n\n",
        page.title.as_deref().unwrap_or("No title")
    );
    if let Some(summary) = page.summary.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("Summary: {summary}\n\n"));
    }
    if let Some(text) = page.text.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("Content: {}\n", truncate_graphemes(text, PAGE_TEXT_LEN)));
    }
    Ok(out)
}

/// `web_search` tool.
pub struct WebSearchTool {
    client: Arc<ExaClient>,
    default_results: u8,
}

impl WebSearchTool {
    /// Creates the tool over a shared client.
    #[must_use]
    pub const fn new(client: Arc<ExaClient>, default_results: u8) -> Self {
        Self {
            client,
            default_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web for current information using the Exa search engine."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    },
                    "num_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 10,
                        "description": "Number of results to return (1-10). Defaults to 5."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, args: &Value) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: "web_search".to_string(),
                reason: "search query cannot be empty".to_string(),
            });
        }
        let num_results = args
            .get("num_results")
            .and_then(Value::as_u64)
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(self.default_results);

        info!(query, num_results, "performing web search");
        let results = self.client.search(query, num_results).await?;
        Ok(format_search_results(&results, query))
    }
}

/// `get_page_content` tool.
pub struct PageContentTool {
    client: Arc<ExaClient>,
}

impl PageContentTool {
    /// Creates the tool over a shared client.
    #[must_use]
    pub const fn new(client: Arc<ExaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for PageContentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_page_content".to_string(),
            description: "Retrieve the text content of a specific web page.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "URL of the page to retrieve."
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, args: &Value) -> Result<String, ToolError> {
        let url = args.get("url").and_then(Value::as_str).unwrap_or_default();
        if url.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: "get_page_content".to_string(),
                reason: "URL cannot be empty".to_string(),
            });
        }

        info!(url, "retrieving page content");
        let results = self.client.contents(url).await?;
        format_page_content(&results, url)
    }
}
