//! Turn domain types — a single initiator → responder interaction attempt.
//!
//! State machine:
//!
//! ```text
//! pending ──(matching response in window)──▶ responded
//! pending ──(deadline passes)─────────────▶ unresponded
//! ```
//!
//! Terminal states are immutable; the TurnManager owns all transitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Waiting for the responder inside the response window
    Pending,
    /// A matching response was committed in time
    Responded,
    /// The window elapsed with no response
    Unresponded,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Responded => "responded",
            TurnStatus::Unresponded => "unresponded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Pending)
    }
}

impl std::str::FromStr for TurnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TurnStatus::Pending),
            "responded" => Ok(TurnStatus::Responded),
            "unresponded" => Ok(TurnStatus::Unresponded),
            other => Err(format!("unknown turn status: '{other}'")),
        }
    }
}

/// A Turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub dialogue_id: String,
    pub session_id: String,
    pub initiator_role: Role,
    /// Who is expected to respond. `Role::System` for broadcast turns in
    /// group topologies (responder assigned on demand).
    pub responder_role: Role,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub status: TurnStatus,
    /// Seconds between `started_at` and the closing response, derived on close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Turn {
    pub fn new(
        dialogue_id: impl Into<String>,
        session_id: impl Into<String>,
        initiator_role: Role,
        responder_role: Role,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dialogue_id: dialogue_id.into(),
            session_id: session_id.into(),
            initiator_role,
            responder_role,
            started_at: Utc::now(),
            closed_at: None,
            status: TurnStatus::Pending,
            response_time_secs: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// The instant after which a pending turn becomes unresponded.
    pub fn deadline(&self, window: Duration) -> DateTime<Utc> {
        self.started_at + window
    }

    /// Whether the response window has elapsed at `now`.
    pub fn expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.status == TurnStatus::Pending && now > self.deadline(window)
    }
}
