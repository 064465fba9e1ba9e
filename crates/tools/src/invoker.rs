//! ToolInvoker — validated, logged, deduplicated tool dispatch.
//!
//! The invoker sits between the orchestrator and the registry:
//! 1. resolve the tool id
//! 2. validate parameters against the tool's declared JSON schema
//! 3. reject a duplicate invocation already in flight for the same
//!    `(dialogue, tool, parameter-hash)` — side-effecting calls must not
//!    double-fire during the tool loop
//! 4. execute under a per-invocation timeout
//! 5. write a `ToolCallRecord` with the outcome and latency

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use prism_core::{Repository, ToolCallRecord, ToolError, ToolRegistry, ToolResult};

/// Default per-invocation timeout.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 10;

/// Where an invocation came from, for the ToolCall log.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub dialogue_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
}

pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    repository: Arc<dyn Repository>,
    timeout: Duration,
    in_flight: Mutex<HashSet<u64>>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, repository: Arc<dyn Repository>) -> Self {
        Self {
            registry,
            repository,
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Invoke a tool, logging the call whatever the outcome.
    pub async fn invoke(
        &self,
        tool_id: &str,
        parameters: serde_json::Value,
        context: &InvocationContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| ToolError::NotFound(tool_id.to_string()))?;

        validate_parameters(tool_id, &tool.parameters_schema(), &parameters)?;

        let key = invocation_key(&context.dialogue_id, tool_id, &parameters);
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key) {
                warn!(tool = tool_id, dialogue = %context.dialogue_id, "duplicate tool invocation rejected");
                return Err(ToolError::DuplicateInvocation {
                    tool: tool_id.to_string(),
                });
            }
        }

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.timeout, tool.execute(parameters.clone())).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.in_flight.lock().await.remove(&key);

        let result = match outcome {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::Timeout {
                tool: tool_id.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        let record = ToolCallRecord {
            id: Uuid::new_v4().to_string(),
            dialogue_id: context.dialogue_id.clone(),
            session_id: context.session_id.clone(),
            turn_id: context.turn_id.clone(),
            tool: tool_id.to_string(),
            parameters,
            success: result.as_ref().map(|r| r.success).unwrap_or(false),
            output: result.as_ref().ok().map(|r| r.output.clone()),
            error: result.as_ref().err().map(|e| e.to_string()),
            latency_ms,
            created_at: Utc::now(),
        };

        if let Err(e) = self.repository.record_tool_call(record).await {
            // The log is best-effort; the invocation result still stands.
            warn!(tool = tool_id, error = %e, "failed to record tool call");
        }

        debug!(tool = tool_id, latency_ms, ok = result.is_ok(), "tool invocation finished");
        result
    }
}

/// Stable key for the dedup guard. serde_json maps are ordered, so equal
/// parameter objects serialize identically.
fn invocation_key(dialogue_id: &str, tool_id: &str, parameters: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    dialogue_id.hash(&mut hasher);
    tool_id.hash(&mut hasher);
    parameters.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Minimal JSON-schema check: required keys must be present, and declared
/// primitive types must match.
fn validate_parameters(
    tool_id: &str,
    schema: &serde_json::Value,
    parameters: &serde_json::Value,
) -> Result<(), ToolError> {
    let invalid = |reason: String| ToolError::InvalidParameters {
        tool: tool_id.to_string(),
        reason,
    };

    if schema["type"] == "object" && !parameters.is_object() {
        return Err(invalid("parameters must be a JSON object".into()));
    }

    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if parameters.get(key).is_none_or(|v| v.is_null()) {
                return Err(invalid(format!("missing required parameter '{key}'")));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (key, spec) in properties {
            let Some(value) = parameters.get(key) else {
                continue;
            };
            let Some(expected) = spec["type"].as_str() else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(invalid(format!(
                    "parameter '{key}' must be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}
