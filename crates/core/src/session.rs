//! Session domain types — a contiguous context segment inside a Dialogue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// An ordinary conversational segment
    Dialogue,
    /// An AI-driven introspection segment
    SelfReflection,
}

/// Who caused a session to be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    System,
    Ai,
    Human,
}

/// A Session. At most one session per dialogue is open (`end_at == None`)
/// at any time; the SessionManager enforces the rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub dialogue_id: String,
    pub session_type: SessionType,
    pub start_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_by: CreatedBy,
}

impl Session {
    pub fn new(
        dialogue_id: impl Into<String>,
        session_type: SessionType,
        created_by: CreatedBy,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dialogue_id: dialogue_id.into(),
            session_type,
            start_at: Utc::now(),
            end_at: None,
            description: None,
            created_by,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_at.is_none()
    }

    /// Close the session, recording why.
    pub fn close(&mut self, now: DateTime<Utc>, description: impl Into<String>) {
        self.end_at = Some(now);
        self.description = Some(description.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_open() {
        let session = Session::new("d1", SessionType::Dialogue, CreatedBy::System);
        assert!(session.is_open());
        assert_eq!(session.dialogue_id, "d1");
    }

    #[test]
    fn close_records_description() {
        let mut session = Session::new("d1", SessionType::Dialogue, CreatedBy::System);
        session.close(Utc::now(), "idle rollover");
        assert!(!session.is_open());
        assert_eq!(session.description.as_deref(), Some("idle rollover"));
    }

    #[test]
    fn session_type_serde_tags() {
        let json = serde_json::to_string(&SessionType::SelfReflection).unwrap();
        assert_eq!(json, r#""self_reflection""#);
    }
}
