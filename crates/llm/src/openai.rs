//! OpenAI-compatible chat-completion client.
//!
//! Covers both the OpenAI endpoint shape (`Authorization: Bearer …` against
//! `{base}/chat/completions`) and the Azure deployment shape (`api-key`
//! header, deployment path with an `api-version` query). A function call in
//! the response surfaces as a structured [`ToolRequest`].

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use prism_core::{
    CompletionRequest, CompletionResponse, LlmClient, LlmError, PromptSegment, SegmentRole,
    ToolDefinition, ToolRequest, Usage,
};

/// How the endpoint expects credentials and paths.
enum Flavor {
    OpenAi,
    Azure,
}

pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    flavor: Flavor,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    fn build(name: &str, api_key: &str, base_url: &str, flavor: Flavor) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            flavor,
            client,
        }
    }

    pub fn openai(api_key: impl AsRef<str>, base_url: impl AsRef<str>) -> Self {
        Self::build(
            "openai",
            api_key.as_ref(),
            base_url.as_ref(),
            Flavor::OpenAi,
        )
    }

    pub fn azure(api_key: impl AsRef<str>, base_url: impl AsRef<str>) -> Self {
        Self::build("azure", api_key.as_ref(), base_url.as_ref(), Flavor::Azure)
    }

    fn completions_url(&self, model: &str) -> String {
        match self.flavor {
            Flavor::OpenAi => format!("{}/chat/completions", self.base_url),
            Flavor::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version=2024-02-01",
                self.base_url, model
            ),
        }
    }

    fn to_api_messages(segments: &[PromptSegment]) -> Vec<serde_json::Value> {
        segments
            .iter()
            .map(|s| {
                let role = match s.role {
                    SegmentRole::System => "system",
                    SegmentRole::User => "user",
                    SegmentRole::Assistant => "assistant",
                    // Tool results are re-projected as user turns: this
                    // client never sends tool_call_id plumbing, the context
                    // builder already labeled the content.
                    SegmentRole::Tool => "user",
                };
                serde_json::json!({ "role": role, "content": s.content })
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, LlmError> {
        let url = self.completions_url(&request.model);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.segments),
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(backend = %self.name, model = %request.model, "Sending completion request");

        let mut http = self.client.post(&url).json(&body);
        http = match self.flavor {
            Flavor::OpenAi => http.header("Authorization", format!("Bearer {}", self.api_key)),
            Flavor::Azure => http.header("api-key", self.api_key.clone()),
        };

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(120)
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(LlmError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "LLM backend returned error");
            return Err(LlmError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| LlmError::Api {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Api {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let tool_request = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|tc| ToolRequest {
                tool: tc.function.name,
                parameters: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null),
            });

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_request,
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_url_shape() {
        let client = OpenAiCompatClient::openai("sk-test", "https://api.openai.com/v1/");
        assert_eq!(
            client.completions_url("gpt-4o"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn azure_url_embeds_deployment() {
        let client = OpenAiCompatClient::azure("key", "https://example.openai.azure.com");
        let url = client.completions_url("my-deployment");
        assert!(url.contains("/openai/deployments/my-deployment/"));
        assert!(url.contains("api-version="));
    }

    #[test]
    fn segments_map_to_api_roles() {
        let messages = OpenAiCompatClient::to_api_messages(&[
            PromptSegment::system("persona"),
            PromptSegment::user("question"),
            PromptSegment::tool("weather returned: sunny"),
        ]);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "user");
    }

    #[test]
    fn response_parse_extracts_tool_call() {
        let raw = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "function": {
                            "name": "weather",
                            "arguments": "{\"city\":\"Singapore\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let parsed: ApiResponse = serde_json::from_value(raw).unwrap();
        let tc = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "weather");
    }
}
