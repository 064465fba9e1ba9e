//! Deterministic mock backend.
//!
//! The mock recognizes a handful of intents in the latest user segment and
//! plays both halves of the tool loop: on the first round it emits a
//! structured tool request, and once a `[tool result]` segment appears in
//! the prompt it composes a final answer that cites it. Identical prompts
//! always produce identical responses, which is what the end-to-end tests
//! rely on.

use async_trait::async_trait;
use tracing::debug;

use prism_core::{
    CompletionRequest, CompletionResponse, LlmClient, LlmError, SegmentRole, StreamChunk,
    ToolRequest, Usage,
};

/// Marker the context builder puts in front of tool-result segments.
pub const TOOL_RESULT_MARKER: &str = "[tool result]";

pub struct MockLlmClient {
    model: String,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            model: "prism-mock-1".into(),
        }
    }

    /// Extract a capitalized location following "in " ("…in Singapore tomorrow").
    fn extract_city(text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        let pos = lower.find(" in ")?;
        let rest = text.get(pos + 4..)?;
        let city: String = rest
            .split_whitespace()
            .take_while(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
            .collect::<Vec<_>>()
            .join(" ");
        let city = city.trim_end_matches(['?', '.', ',', '!']).to_string();
        if city.is_empty() { None } else { Some(city) }
    }

    fn wants_weather(text: &str) -> bool {
        let lower = text.to_lowercase();
        ["weather", "umbrella", "rain", "temperature", "forecast"]
            .iter()
            .any(|kw| lower.contains(kw))
    }

    fn wants_search(text: &str) -> bool {
        let lower = text.to_lowercase();
        ["search for", "look up", "find out"]
            .iter()
            .any(|kw| lower.contains(kw))
    }

    fn wants_calculation(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("calculate") || lower.contains("what is ") && text.contains(['+', '*', '/'])
    }

    fn tool_request_for(text: &str, declared: &[String]) -> Option<ToolRequest> {
        let available = |id: &str| declared.iter().any(|t| t == id);

        if Self::wants_weather(text) && available("weather") {
            let city = Self::extract_city(text).unwrap_or_else(|| "Singapore".into());
            let date = if text.to_lowercase().contains("tomorrow") {
                "tomorrow"
            } else {
                "today"
            };
            return Some(ToolRequest {
                tool: "weather".into(),
                parameters: serde_json::json!({ "city": city, "date": date }),
            });
        }

        if Self::wants_search(text) && available("web_search") {
            return Some(ToolRequest {
                tool: "web_search".into(),
                parameters: serde_json::json!({ "query": text }),
            });
        }

        if Self::wants_calculation(text) && available("calculator") {
            let expression: String = text
                .chars()
                .filter(|c| c.is_ascii_digit() || "+-*/(). ".contains(*c))
                .collect();
            return Some(ToolRequest {
                tool: "calculator".into(),
                parameters: serde_json::json!({ "expression": expression.trim() }),
            });
        }

        None
    }

    /// A canned response for prompts that need no tool.
    fn plain_response(text: &str) -> String {
        let lower = text.to_lowercase();
        if lower.contains("travel") || lower.contains("trip") {
            "Planning a trip is a great idea. Sort out the itinerary early, check the \
             forecast close to departure, and leave room for the unplanned."
                .into()
        } else if lower.contains("hello") || lower.contains("hi") {
            "Hello! How can I help you today?".into()
        } else if lower.contains("reflect") || lower.contains("review") {
            "Looking back over the recent exchanges, the responses stayed on topic and \
             tools were used where they added information."
                .into()
        } else {
            format!(
                "I understand. Let me think about \"{}\" — here is my best answer based on \
                 what we've discussed so far.",
                truncate(text, 80)
            )
        }
    }

    fn usage_for(request: &CompletionRequest, completion: &str) -> Usage {
        // Rough: 4 chars ≈ 1 token.
        let prompt_chars: usize = request.segments.iter().map(|s| s.content.len()).sum();
        let prompt_tokens = (prompt_chars / 4) as u32;
        let completion_tokens = (completion.len() / 4) as u32;
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, LlmError> {
        let user_text = request
            .segments
            .iter()
            .rev()
            .find(|s| s.role == SegmentRole::User)
            .map(|s| s.content.clone())
            .unwrap_or_default();

        let tool_results: Vec<&str> = request
            .segments
            .iter()
            .filter(|s| {
                s.role == SegmentRole::Tool || s.content.starts_with(TOOL_RESULT_MARKER)
            })
            .map(|s| s.content.trim_start_matches(TOOL_RESULT_MARKER).trim())
            .collect();

        // Round two of the tool loop: cite the tool output instead of
        // requesting it again.
        if !tool_results.is_empty() {
            let content = format!(
                "Based on the latest tool results — {} — that answers your question.",
                tool_results.join("; ")
            );
            let usage = Self::usage_for(&request, &content);
            return Ok(CompletionResponse {
                content,
                tool_request: None,
                usage: Some(usage),
                model: self.model.clone(),
            });
        }

        let declared: Vec<String> = request.tools.iter().map(|t| t.name.clone()).collect();
        if let Some(tool_request) = Self::tool_request_for(&user_text, &declared) {
            debug!(tool = %tool_request.tool, "mock requested a tool");
            let content = format!("I need to use the {} tool for that.", tool_request.tool);
            let usage = Self::usage_for(&request, &content);
            return Ok(CompletionResponse {
                content,
                tool_request: Some(tool_request),
                usage: Some(usage),
                model: self.model.clone(),
            });
        }

        let content = Self::plain_response(&user_text);
        let usage = Self::usage_for(&request, &content);
        Ok(CompletionResponse {
            content,
            tool_request: None,
            usage: Some(usage),
            model: self.model.clone(),
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, LlmError>>,
        LlmError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(32);

        tokio::spawn(async move {
            let words: Vec<&str> = response.content.split_inclusive(' ').collect();
            for chunk in words.chunks(3) {
                let piece: String = chunk.concat();
                if tx
                    .send(Ok(StreamChunk {
                        content: Some(piece),
                        done: false,
                        usage: None,
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: response.usage,
                }))
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{PromptSegment, ToolDefinition};

    fn weather_tool() -> ToolDefinition {
        ToolDefinition {
            name: "weather".into(),
            description: "weather lookup".into(),
            category: "information".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn umbrella_question_requests_weather_tool() {
        let client = MockLlmClient::new();
        let request = CompletionRequest::new(
            "prism-mock-1",
            vec![PromptSegment::user(
                "Do I need an umbrella in Singapore tomorrow?",
            )],
        )
        .with_tools(vec![weather_tool()]);

        let response = client.complete(request).await.unwrap();
        let tool = response.tool_request.expect("tool request expected");
        assert_eq!(tool.tool, "weather");
        assert_eq!(tool.parameters["city"], "Singapore");
        assert_eq!(tool.parameters["date"], "tomorrow");
    }

    #[tokio::test]
    async fn no_tool_request_without_declared_tools() {
        let client = MockLlmClient::new();
        let request = CompletionRequest::new(
            "prism-mock-1",
            vec![PromptSegment::user("What's the weather like?")],
        );
        let response = client.complete(request).await.unwrap();
        assert!(response.tool_request.is_none());
    }

    #[tokio::test]
    async fn second_round_cites_tool_result() {
        let client = MockLlmClient::new();
        let request = CompletionRequest::new(
            "prism-mock-1",
            vec![
                PromptSegment::user("Do I need an umbrella in Singapore tomorrow?"),
                PromptSegment::tool("weather returned: Light rain, 27°C"),
            ],
        )
        .with_tools(vec![weather_tool()]);

        let response = client.complete(request).await.unwrap();
        assert!(response.tool_request.is_none());
        assert!(response.content.contains("Light rain"));
    }

    #[tokio::test]
    async fn responses_are_deterministic() {
        let client = MockLlmClient::new();
        let make = || {
            CompletionRequest::new(
                "prism-mock-1",
                vec![PromptSegment::user("Tell me about travel planning")],
            )
        };
        let a = client.complete(make()).await.unwrap();
        let b = client.complete(make()).await.unwrap();
        assert_eq!(a.content, b.content);
    }

    #[tokio::test]
    async fn stream_reassembles_to_full_content() {
        let client = MockLlmClient::new();
        let request =
            CompletionRequest::new("prism-mock-1", vec![PromptSegment::user("hello there")]);
        let expected = client.complete(request.clone()).await.unwrap().content;

        let mut rx = client.stream(request).await.unwrap();
        let mut assembled = String::new();
        let mut saw_final = false;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(content) = chunk.content {
                assembled.push_str(&content);
            }
            if chunk.done {
                saw_final = true;
                assert!(chunk.usage.is_some());
            }
        }
        assert!(saw_final);
        assert_eq!(assembled, expected);
    }

    #[test]
    fn city_extraction() {
        assert_eq!(
            MockLlmClient::extract_city("Do I need an umbrella in Singapore tomorrow?"),
            Some("Singapore".into())
        );
        assert_eq!(
            MockLlmClient::extract_city("weather in New York today"),
            Some("New York".into())
        );
        assert_eq!(MockLlmClient::extract_city("no city here"), None);
    }
}
