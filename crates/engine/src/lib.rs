//! # Prism Engine
//!
//! The orchestration pipeline: one inbound envelope flows through input
//! parsing → context assembly → LLM call → bounded tool loop → response
//! mixing → persistence → notification fan-out.
//!
//! [`DialogueCore`] is the entry point; [`TurnManager`] and
//! [`SessionManager`] own the lifecycle state machines it drives.

pub mod context;
pub mod input;
pub mod introspection;
pub mod mixer;
pub mod orchestrator;
pub mod sessions;
pub mod turns;

pub use context::ContextBuilder;
pub use input::{InboundEnvelope, InputParser};
pub use introspection::IntrospectionEngine;
pub use mixer::{EmotionDecorator, ResponseDecorator, ResponseMixer};
pub use orchestrator::{DialogueCore, DialogueParams, ProcessOutcome};
pub use sessions::SessionManager;
pub use turns::TurnManager;

/// Tuning knobs the binary derives from `AppConfig` and hands to the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Model name passed to the LLM backend
    pub model: String,
    /// Context character budget
    pub max_context_length: usize,
    /// Default turn response window, in hours (dialogue metadata overrides)
    pub response_window_hours: f64,
    /// Default session idle threshold, in hours (dialogue metadata overrides)
    pub session_timeout_hours: f64,
    /// End-to-end deadline for the LLM/tool leg of one pipeline run
    pub pipeline_deadline_secs: u64,
    /// Maximum LLM↔tool round-trips per turn
    pub max_tool_rounds: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: "prism-mock-1".into(),
            max_context_length: 4000,
            response_window_hours: 3.0,
            session_timeout_hours: 1.0,
            pipeline_deadline_secs: 120,
            max_tool_rounds: 4,
        }
    }
}
