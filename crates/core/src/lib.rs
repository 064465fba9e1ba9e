//! # Prism Core
//!
//! Domain types, traits, and error definitions for the Prism dialogue
//! orchestration runtime. This crate has **zero framework dependencies** —
//! it defines the four-layer conversational model (Dialogue → Session →
//! Turn → Message) that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration (e.g. `DB_URL=memory`)
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)
//!
//! Ownership in the data model is strictly top-down: a Dialogue owns its
//! Sessions, a Session its Turns, a Turn its Messages. Reverse navigation
//! happens by id lookup through the [`Repository`], never by held references.

pub mod dialogue;
pub mod error;
pub mod event;
pub mod llm;
pub mod message;
pub mod records;
pub mod repository;
pub mod semantic;
pub mod session;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use dialogue::{Dialogue, DialogueType};
pub use error::{Error, LlmError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use llm::{
    CompletionRequest, CompletionResponse, LlmClient, PromptSegment, SegmentRole, StreamChunk,
    ToolDefinition, ToolRequest, Usage,
};
pub use message::{ContentType, Message, Role};
pub use records::{
    CollaborationRecord, EventLogEntry, IntrospectionRecord, IntrospectionStep, StepStatus,
    StoredBlob, ToolCallRecord,
};
pub use repository::{Page, PageOf, QueryFilter, Repository};
pub use semantic::SemanticBlock;
pub use session::{CreatedBy, Session, SessionType};
pub use tool::{Tool, ToolRegistry, ToolResult};
pub use turn::{Turn, TurnStatus};
