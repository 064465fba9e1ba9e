//! Auxiliary persisted records: tool-call logs, the append-only pipeline
//! trace, introspection and collaboration sessions, and stored media blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One tool invocation, logged by the ToolInvoker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub dialogue_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub tool: String,
    pub parameters: serde_json::Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// One entry of the append-only pipeline trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: String,
    pub dialogue_id: String,
    /// Pipeline stage name (e.g. "input_received", "llm_called")
    pub stage: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(
        dialogue_id: impl Into<String>,
        stage: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dialogue_id: dialogue_id.into(),
            stage: stage.into(),
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one introspection step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One step of a self-reflection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionStep {
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_shift: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_entry: Option<String>,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
}

/// A self-reflection run inside an `ai_self` dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionRecord {
    pub id: String,
    pub ai_id: String,
    pub dialogue_id: String,
    pub session_id: String,
    pub goal: String,
    /// What started the run: "user_feedback", "system", or "scheduled"
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<IntrospectionStep>,
    #[serde(default)]
    pub summary: String,
}

impl IntrospectionRecord {
    pub fn new(
        ai_id: impl Into<String>,
        dialogue_id: impl Into<String>,
        session_id: impl Into<String>,
        goal: impl Into<String>,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ai_id: ai_id.into(),
            dialogue_id: dialogue_id.into(),
            session_id: session_id.into(),
            goal: goal.into(),
            trigger: trigger.into(),
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            summary: String::new(),
        }
    }
}

/// A multi-agent collaboration task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRecord {
    pub id: String,
    pub task: String,
    pub participant_ids: Vec<String>,
    /// "open" | "completed" | "abandoned"
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl CollaborationRecord {
    pub fn new(task: impl Into<String>, participant_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            participant_ids,
            status: "open".into(),
            created_at: Utc::now(),
        }
    }
}

/// A media blob in the content store, addressed by `(category, filename)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlob {
    pub category: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_entry_gets_id() {
        let entry = EventLogEntry::new("d1", "input_received", "text message");
        assert!(!entry.id.is_empty());
        assert_eq!(entry.stage, "input_received");
    }

    #[test]
    fn introspection_record_starts_empty() {
        let record = IntrospectionRecord::new("a1", "d1", "s1", "weekly_review", "system");
        assert!(record.steps.is_empty());
        assert!(record.completed_at.is_none());
        assert_eq!(record.goal, "weekly_review");
    }

    #[test]
    fn step_status_serde() {
        let json = serde_json::to_string(&StepStatus::Failed).unwrap();
        assert_eq!(json, r#""failed""#);
    }
}
