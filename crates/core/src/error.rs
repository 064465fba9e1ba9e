//! Error types for the Prism domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! (storage, LLM, tools) has its own error enum, folded into the top-level
//! [`Error`]. Every variant maps to a stable `kind()` string that feeds
//! `metadata.error_kind` on recovered turns and the gateway's status mapping.

use thiserror::Error;

/// The top-level error type for all Prism operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Bounded contexts ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    // --- Validation ---
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Unsupported modality: {0}")]
    UnsupportedModality(String),

    // --- Lifecycle ---
    #[error("Dialogue not found: {0}")]
    DialogueNotFound(String),

    #[error("Dialogue is closed: {0}")]
    DialogueClosed(String),

    #[error("Turn is closed: {0}")]
    TurnClosed(String),

    #[error("Context overflow: header requires {required} chars, budget is {budget}")]
    ContextOverflow { required: usize, budget: usize },

    // --- Generic ---
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Llm(e) => e.kind(),
            Error::Tool(e) => e.kind(),
            Error::Store(e) => e.kind(),
            Error::InvalidInput(_) => "InvalidInput",
            Error::InvalidReference(_) => "InvalidReference",
            Error::UnsupportedModality(_) => "UnsupportedModality",
            Error::DialogueNotFound(_) => "DialogueNotFound",
            Error::DialogueClosed(_) => "DialogueClosed",
            Error::TurnClosed(_) => "TurnClosed",
            Error::ContextOverflow { .. } => "ContextOverflow",
            Error::NotFound(_) => "NotFound",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Serialization(_) => "InvalidInput",
            Error::Internal(_) => "StorageFailure",
        }
    }

    /// Validation errors surface to the caller and never open turns.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::InvalidReference(_)
                | Error::UnsupportedModality(_)
                | Error::Serialization(_)
        )
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("backend not configured: {0}")]
    NotConfigured(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Timeout(_) => "LLMTimeout",
            _ => "LLMFailure",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid parameters for {tool}: {reason}")]
    InvalidParameters { tool: String, reason: String },

    #[error("tool timed out: {tool} after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("tool execution failed: {tool} — {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("duplicate invocation of {tool} already in flight")]
    DuplicateInvocation { tool: String },
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidParameters { .. } => "InvalidParameters",
            ToolError::Timeout { .. } => "ToolTimeout",
            _ => "ToolFailure",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Failure(String),

    #[error("{entity} not found: {id}")]
    Missing { entity: &'static str, id: String },
}

impl StoreError {
    pub fn missing(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::Missing {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Failure(_) => "StorageFailure",
            StoreError::Missing { .. } => "NotFound",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::InvalidInput("x".into()).kind(), "InvalidInput");
        assert_eq!(Error::Llm(LlmError::Timeout(30)).kind(), "LLMTimeout");
        assert_eq!(
            Error::Tool(ToolError::Timeout {
                tool: "weather".into(),
                timeout_secs: 10
            })
            .kind(),
            "ToolTimeout"
        );
        assert_eq!(
            Error::Tool(ToolError::InvalidParameters {
                tool: "weather".into(),
                reason: "missing city".into()
            })
            .kind(),
            "InvalidParameters"
        );
        assert_eq!(
            Error::Store(StoreError::missing("dialogue", "d1")).kind(),
            "NotFound"
        );
    }

    #[test]
    fn validation_never_opens_turns() {
        assert!(Error::InvalidReference("m1".into()).is_validation());
        assert!(Error::UnsupportedModality("hologram".into()).is_validation());
        assert!(!Error::DialogueClosed("d1".into()).is_validation());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool: "weather".into(),
            reason: "upstream 500".into(),
        });
        assert!(err.to_string().contains("weather"));
        assert!(err.to_string().contains("upstream 500"));
    }
}
