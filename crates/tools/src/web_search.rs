//! Web search tool — stub that returns mock search results.
//!
//! A real deployment would plug a search API behind the same trait; the
//! stub derives repeatable results from the query text.

use async_trait::async_trait;
use prism_core::{Tool, ToolError, ToolResult};

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns relevant results with titles, URLs, and snippets."
    }

    fn category(&self) -> &str {
        "information"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 3, max 5)",
                    "default": 3
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, parameters: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = parameters["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParameters {
                tool: "web_search".into(),
                reason: "missing 'query' argument".into(),
            })?;
        let count = parameters["num_results"].as_u64().unwrap_or(3).min(5) as usize;

        let results = mock_results(query, count);
        let output = results
            .iter()
            .map(|r| format!("{} — {} ({})", r.title, r.snippet, r.url))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolResult::ok(
            output,
            serde_json::to_value(&results).ok(),
        ))
    }
}

#[derive(serde::Serialize)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

fn mock_results(query: &str, count: usize) -> Vec<SearchHit> {
    let slug: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();

    (1..=count.max(1))
        .map(|i| SearchHit {
            title: format!("Result {i} for \"{query}\""),
            url: format!("https://example.com/{}/{}", slug.trim_matches('-'), i),
            snippet: format!("An overview of {query}, part {i} of the indexed coverage."),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_returns_requested_count() {
        let tool = WebSearchTool;
        let result = tool
            .execute(serde_json::json!({"query": "rust async", "num_results": 2}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output.lines().count(), 2);
        assert!(result.output.contains("rust async"));
    }

    #[tokio::test]
    async fn count_is_capped() {
        let tool = WebSearchTool;
        let result = tool
            .execute(serde_json::json!({"query": "anything", "num_results": 50}))
            .await
            .unwrap();
        assert_eq!(result.output.lines().count(), 5);
    }

    #[tokio::test]
    async fn missing_query_rejected() {
        let tool = WebSearchTool;
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters { .. }));
    }
}
