//! LLM backend implementations for Prism.
//!
//! The deterministic [`MockLlmClient`] powers development and tests; the
//! OpenAI-compatible and Azure clients talk to real endpoints. The backend
//! is selected at startup via `LLM_PROVIDER`.

pub mod mock;
pub mod openai;

use std::sync::Arc;

use prism_core::{LlmClient, LlmError};

pub use mock::MockLlmClient;
pub use openai::OpenAiCompatClient;

/// Build the configured LLM backend.
///
/// `provider` is one of `mock`, `openai`, `azure`. Anything else is a
/// configuration error surfaced at startup, not at request time.
pub fn build_client(
    provider: &str,
    api_key: &str,
    api_url: &str,
) -> Result<Arc<dyn LlmClient>, LlmError> {
    match provider {
        "mock" => Ok(Arc::new(MockLlmClient::new())),
        "openai" => {
            if api_key.is_empty() {
                return Err(LlmError::NotConfigured(
                    "LLM_API_KEY is required for the openai backend".into(),
                ));
            }
            let url = if api_url.is_empty() {
                "https://api.openai.com/v1"
            } else {
                api_url
            };
            Ok(Arc::new(OpenAiCompatClient::openai(api_key, url)))
        }
        "azure" => {
            if api_key.is_empty() || api_url.is_empty() {
                return Err(LlmError::NotConfigured(
                    "LLM_API_KEY and LLM_API_URL are required for the azure backend".into(),
                ));
            }
            Ok(Arc::new(OpenAiCompatClient::azure(api_key, api_url)))
        }
        other => Err(LlmError::NotConfigured(format!(
            "unknown LLM provider: '{other}' (expected mock, openai, or azure)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_backend_builds_without_key() {
        let client = build_client("mock", "", "").unwrap();
        assert_eq!(client.name(), "mock");
    }

    #[test]
    fn openai_backend_requires_key() {
        assert!(matches!(
            build_client("openai", "", ""),
            Err(LlmError::NotConfigured(_))
        ));
        let client = build_client("openai", "sk-test", "").unwrap();
        assert_eq!(client.name(), "openai");
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(matches!(
            build_client("quantum", "", ""),
            Err(LlmError::NotConfigured(_))
        ));
    }
}
