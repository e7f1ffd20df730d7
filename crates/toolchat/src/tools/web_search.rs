use std::sync::Arc;

use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use toolchat_core::tool::{Error as ToolError, Tool, ToolResult};

/// The SerpAPI search endpoint.
pub const SERP_API_ENDPOINT: &str = "https://serpapi.com/search.json";

const MAX_RESULTS: usize = 3;

/// Input of [`WebSearchTool`].
#[derive(Deserialize, JsonSchema)]
pub struct WebSearchParameters {
    #[schemars(description = "The search query")]
    query: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

/// A tool for searching the web through SerpAPI's Google engine.
pub struct WebSearchTool {
    parameter_schema: Value,
    client: Client,
    api_key: Arc<str>,
    endpoint: Arc<str>,
}

impl WebSearchTool {
    /// Creates a new search tool with the given SerpAPI key.
    #[inline]
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        WebSearchTool {
            parameter_schema: schema_for!(WebSearchParameters).to_value(),
            client: Client::new(),
            api_key: api_key.into().into(),
            endpoint: SERP_API_ENDPOINT.into(),
        }
    }

    /// Sends the queries to another endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into().into();
        self
    }
}

impl Tool for WebSearchTool {
    type Input = WebSearchParameters;

    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web for current information"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let api_key = Arc::clone(&self.api_key);
        let endpoint = Arc::clone(&self.endpoint);
        async move {
            if api_key.trim().is_empty() {
                return Err(ToolError::execution_error()
                    .with_reason("SerpAPI key not set"));
            }

            let url = Url::parse_with_params(
                &endpoint,
                [
                    ("engine", "google"),
                    ("q", input.query.as_str()),
                    ("api_key", &*api_key),
                    ("num", "3"),
                ],
            )
            .map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("invalid search endpoint: {err}"))
            })?;

            debug!("searching the web for {:?}", input.query);
            // The URL carries the key, keep it out of logs and results.
            let resp = client.get(url).send().await.map_err(|err| {
                let err = err.without_url();
                warn!("search request failed: {err}");
                ToolError::execution_error()
                    .with_reason(format!("search request failed: {err}"))
            })?;

            let status = resp.status();
            let body: SearchResponse = match resp.json().await {
                Ok(body) => body,
                Err(_) if !status.is_success() => {
                    return Err(ToolError::execution_error().with_reason(
                        format!("search service responded with {status}"),
                    ));
                }
                Err(err) => {
                    return Err(ToolError::execution_error().with_reason(
                        format!("unreadable search results: {}", err.without_url()),
                    ));
                }
            };
            if let Some(error) = body.error {
                return Err(ToolError::execution_error().with_reason(error));
            }
            if !status.is_success() {
                return Err(ToolError::execution_error().with_reason(format!(
                    "search service responded with {status}"
                )));
            }

            Ok(format_results(&body.organic_results))
        }
    }
}

fn format_results(results: &[OrganicResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_owned();
    }
    results
        .iter()
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(idx, result)| {
            format!(
                "[Result {}] {}\n{}\nSource: {}",
                idx + 1,
                result.title,
                result.snippet,
                result.link
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
