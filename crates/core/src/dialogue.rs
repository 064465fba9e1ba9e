//! Dialogue domain types — the unique container for an interaction line.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Role;

/// The seven supported participant topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueType {
    /// human ⇄ AI, private
    HumanAi,
    /// AI ⇄ itself (introspection)
    AiSelf,
    /// AI ⇄ AI
    AiAi,
    /// human ⇄ human, private
    HumanHumanPrivate,
    /// human ⇄ human, group
    HumanHumanGroup,
    /// humans + AI group
    HumanAiGroup,
    /// one AI ⇄ multiple humans
    AiMultiHuman,
}

impl DialogueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueType::HumanAi => "human_ai",
            DialogueType::AiSelf => "ai_self",
            DialogueType::AiAi => "ai_ai",
            DialogueType::HumanHumanPrivate => "human_human_private",
            DialogueType::HumanHumanGroup => "human_human_group",
            DialogueType::HumanAiGroup => "human_ai_group",
            DialogueType::AiMultiHuman => "ai_multi_human",
        }
    }

    /// Group topologies have no implicit responder: turns are broadcast and
    /// the responder is system-assigned on demand.
    pub fn is_group(&self) -> bool {
        matches!(
            self,
            DialogueType::HumanHumanGroup
                | DialogueType::HumanAiGroup
                | DialogueType::AiMultiHuman
        )
    }

    /// Whether an AI participates in this topology.
    pub fn involves_ai(&self) -> bool {
        !matches!(
            self,
            DialogueType::HumanHumanPrivate | DialogueType::HumanHumanGroup
        )
    }

    /// Counterparty rules: who is expected to respond to a turn opened by
    /// `initiator`. `None` means no implicit responder (broadcast turn).
    pub fn responder_for(&self, initiator: Role) -> Option<Role> {
        match self {
            DialogueType::HumanAi => Some(match initiator {
                Role::Human => Role::Ai,
                _ => Role::Human,
            }),
            // Self-dialogue: the AI answers itself.
            DialogueType::AiSelf => Some(Role::Ai),
            DialogueType::AiAi => Some(Role::Ai),
            DialogueType::HumanHumanPrivate => Some(Role::Human),
            _ => None,
        }
    }
}

impl std::str::FromStr for DialogueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human_ai" => Ok(DialogueType::HumanAi),
            "ai_self" => Ok(DialogueType::AiSelf),
            "ai_ai" => Ok(DialogueType::AiAi),
            "human_human_private" => Ok(DialogueType::HumanHumanPrivate),
            "human_human_group" => Ok(DialogueType::HumanHumanGroup),
            "human_ai_group" => Ok(DialogueType::HumanAiGroup),
            "ai_multi_human" => Ok(DialogueType::AiMultiHuman),
            other => Err(format!("unknown dialogue type: '{other}'")),
        }
    }
}

impl std::fmt::Display for DialogueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known metadata keys carried on dialogues.
pub mod meta {
    /// Per-dialogue override of the turn response window, in hours.
    pub const RESPONSE_WINDOW_HOURS: &str = "response_window_hours";
    /// Per-dialogue override of the session idle threshold, in hours.
    pub const SESSION_TIMEOUT_HOURS: &str = "session_timeout_hours";
    /// Group member participant ids (group topologies).
    pub const MEMBERS: &str = "members";
    /// Participating AI ids (ai_ai and group topologies).
    pub const PARTICIPANT_AIS: &str = "participant_ais";
    /// Introspection goal (ai_self dialogues).
    pub const GOAL: &str = "goal";
}

/// A Dialogue — the unique persistent container for one interaction line
/// between a fixed set of participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    pub id: String,

    pub dialogue_type: DialogueType,

    /// Primary human participant (semantics vary by type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_id: Option<String>,

    /// Primary AI participant (semantics vary by type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_id: Option<String>,

    /// Opaque relationship reference owned by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Monotonically non-decreasing; bumped on every write into the dialogue.
    pub last_activity_at: DateTime<Utc>,

    /// Closed dialogues accept no new messages.
    pub is_active: bool,

    /// Type-specific fields (see [`meta`])
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Dialogue {
    pub fn new(dialogue_type: DialogueType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            dialogue_type,
            human_id: None,
            ai_id: None,
            relation_id: None,
            title: None,
            description: None,
            created_at: now,
            last_activity_at: now,
            is_active: true,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_human(mut self, human_id: impl Into<String>) -> Self {
        self.human_id = Some(human_id.into());
        self
    }

    pub fn with_ai(mut self, ai_id: impl Into<String>) -> Self {
        self.ai_id = Some(ai_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Bump `last_activity_at`, keeping it monotone.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Response window for turns in this dialogue. Metadata overrides win
    /// over configuration; fractional hours are honored.
    pub fn response_window(&self, default_hours: f64) -> Duration {
        self.duration_override(meta::RESPONSE_WINDOW_HOURS, default_hours)
    }

    /// Idle threshold after which a new turn rolls the session over.
    pub fn session_idle_threshold(&self, default_hours: f64) -> Duration {
        self.duration_override(meta::SESSION_TIMEOUT_HOURS, default_hours)
    }

    fn duration_override(&self, key: &str, default_hours: f64) -> Duration {
        let hours = self
            .metadata
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|h| *h > 0.0)
            .unwrap_or(default_hours);
        Duration::seconds((hours * 3600.0) as i64)
    }

    /// All participant ids involved in this dialogue: the primary human/AI
    /// plus any group members and participating AIs from metadata.
    pub fn participants(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(h) = &self.human_id {
            ids.push(h.clone());
        }
        if let Some(a) = &self.ai_id {
            ids.push(a.clone());
        }
        for key in [meta::MEMBERS, meta::PARTICIPANT_AIS] {
            if let Some(list) = self.metadata.get(key).and_then(|v| v.as_array()) {
                for entry in list {
                    if let Some(id) = entry.as_str() {
                        if !ids.iter().any(|existing| existing == id) {
                            ids.push(id.to_string());
                        }
                    }
                }
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterparty_rules() {
        assert_eq!(
            DialogueType::HumanAi.responder_for(Role::Human),
            Some(Role::Ai)
        );
        assert_eq!(
            DialogueType::HumanAi.responder_for(Role::Ai),
            Some(Role::Human)
        );
        assert_eq!(DialogueType::AiSelf.responder_for(Role::Ai), Some(Role::Ai));
        assert_eq!(DialogueType::HumanAiGroup.responder_for(Role::Human), None);
    }

    #[test]
    fn group_detection() {
        assert!(DialogueType::HumanAiGroup.is_group());
        assert!(DialogueType::AiMultiHuman.is_group());
        assert!(!DialogueType::HumanAi.is_group());
    }

    #[test]
    fn metadata_window_override() {
        let dialogue = Dialogue::new(DialogueType::HumanAi)
            .with_meta(meta::RESPONSE_WINDOW_HOURS, serde_json::json!(0.5));
        assert_eq!(dialogue.response_window(3.0), Duration::minutes(30));

        let plain = Dialogue::new(DialogueType::HumanAi);
        assert_eq!(plain.response_window(3.0), Duration::hours(3));
    }

    #[test]
    fn zero_override_falls_back() {
        let dialogue = Dialogue::new(DialogueType::HumanAi)
            .with_meta(meta::SESSION_TIMEOUT_HOURS, serde_json::json!(0));
        assert_eq!(dialogue.session_idle_threshold(1.0), Duration::hours(1));
    }

    #[test]
    fn touch_is_monotone() {
        let mut dialogue = Dialogue::new(DialogueType::HumanAi);
        let before = dialogue.last_activity_at;
        dialogue.touch(before - Duration::minutes(5));
        assert_eq!(dialogue.last_activity_at, before);
        let later = before + Duration::minutes(5);
        dialogue.touch(later);
        assert_eq!(dialogue.last_activity_at, later);
    }

    #[test]
    fn participants_include_group_members() {
        let dialogue = Dialogue::new(DialogueType::HumanAiGroup)
            .with_human("h1")
            .with_ai("a1")
            .with_meta(meta::MEMBERS, serde_json::json!(["h1", "h2", "h3"]));
        let ids = dialogue.participants();
        assert_eq!(ids, vec!["h1", "a1", "h2", "h3"]);
    }
}
