//! Message domain types — the atomic information unit.
//!
//! A Message always belongs to a Turn, which belongs to a Session, which
//! belongs to a Dialogue. Ordering within a Turn is by `created_at` with a
//! store-assigned monotonic `seq` tiebreak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a participant in a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human participant
    Human,
    /// An AI participant
    Ai,
    /// The system itself (context injection, broadcast turns)
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Ai => "ai",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Role::Human),
            "ai" => Ok(Role::Ai),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: '{other}'")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported message modalities.
///
/// Dispatch over the content type is a tagged variant: each variant has a
/// dedicated parser that projects the content to text for context assembly.
/// Unknown tags are rejected at the envelope boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Audio,
    ToolInput,
    ToolOutput,
    SystemContext,
    Prompt,
    Markdown,
    QuoteReply,
    Command,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::ToolInput => "tool_input",
            ContentType::ToolOutput => "tool_output",
            ContentType::SystemContext => "system_context",
            ContentType::Prompt => "prompt",
            ContentType::Markdown => "markdown",
            ContentType::QuoteReply => "quote_reply",
            ContentType::Command => "command",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "audio" => Ok(ContentType::Audio),
            "tool_input" => Ok(ContentType::ToolInput),
            "tool_output" => Ok(ContentType::ToolOutput),
            "system_context" => Ok(ContentType::SystemContext),
            "prompt" => Ok(ContentType::Prompt),
            "markdown" => Ok(ContentType::Markdown),
            "quote_reply" => Ok(ContentType::QuoteReply),
            "command" => Ok(ContentType::Command),
            other => Err(format!("unknown content type: '{other}'")),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known metadata keys carried on messages.
pub mod meta {
    /// Caption supplied for an image message.
    pub const CAPTION: &str = "caption";
    /// Transcription supplied for an audio message.
    pub const TRANSCRIPTION: &str = "transcription";
    /// Id of the message a quote-reply refers to.
    pub const REPLY_TO: &str = "reply_to";
    /// Name of the tool that produced a tool_output message.
    pub const TOOL_USED: &str = "tool_used";
    /// Emotional style tag applied by the response mixer.
    pub const EMOTION: &str = "emotion";
    /// Set when a pipeline deadline cut the assistant response short.
    pub const PARTIAL: &str = "partial";
    /// Stable error kind when a turn was finalized with a recovered failure.
    pub const ERROR_KIND: &str = "error_kind";
}

/// A single message inside a Turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id
    pub id: String,

    /// Owning dialogue
    pub dialogue_id: String,

    /// Owning session
    pub session_id: String,

    /// Owning turn
    pub turn_id: String,

    /// Who sent this message
    pub sender_role: Role,

    /// Participant id of the sender (nullable for system messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Raw content (text, URL/base64 reference, serialized tool output, …)
    pub content: String,

    /// Modality tag
    pub content_type: ContentType,

    /// Creation instant — assigned by the Repository at write time, never
    /// trusted from client clocks.
    pub created_at: DateTime<Utc>,

    /// Monotonic insertion sequence, assigned by the Repository. Breaks
    /// ordering ties between equal `created_at` values.
    #[serde(default)]
    pub seq: u64,

    /// Free-form metadata (see [`meta`] for recognized keys)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a new message addressed into the given turn. Timestamps and
    /// sequence numbers are placeholders until the Repository persists it.
    pub fn new(
        dialogue_id: impl Into<String>,
        session_id: impl Into<String>,
        turn_id: impl Into<String>,
        sender_role: Role,
        sender_id: Option<String>,
        content: impl Into<String>,
        content_type: ContentType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dialogue_id: dialogue_id.into(),
            session_id: session_id.into(),
            turn_id: turn_id.into(),
            sender_role,
            sender_id,
            content: content.into(),
            content_type,
            created_at: Utc::now(),
            seq: 0,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry, consuming and returning self.
    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Read a metadata entry as a string slice.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Whether this message is shown to human consumers. `prompt` and
    /// `system_context` messages steer the model but stay hidden.
    pub fn user_visible(&self) -> bool {
        !matches!(
            self.content_type,
            ContentType::Prompt | ContentType::SystemContext
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip() {
        for role in [Role::Human, Role::Ai, Role::System] {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn content_type_parse_rejects_unknown() {
        assert_eq!("text".parse::<ContentType>(), Ok(ContentType::Text));
        assert_eq!(
            "quote_reply".parse::<ContentType>(),
            Ok(ContentType::QuoteReply)
        );
        assert!("hologram".parse::<ContentType>().is_err());
    }

    #[test]
    fn message_metadata_access() {
        let msg = Message::new(
            "d1",
            "s1",
            "t1",
            Role::Human,
            Some("h1".into()),
            "hello",
            ContentType::Text,
        )
        .with_meta(meta::EMOTION, serde_json::json!("calm"));

        assert_eq!(msg.meta_str(meta::EMOTION), Some("calm"));
        assert_eq!(msg.meta_str(meta::CAPTION), None);
    }

    #[test]
    fn prompt_messages_are_hidden() {
        let mut msg = Message::new(
            "d1",
            "s1",
            "t1",
            Role::System,
            None,
            "persona",
            ContentType::Prompt,
        );
        assert!(!msg.user_visible());
        msg.content_type = ContentType::Text;
        assert!(msg.user_visible());
    }

    #[test]
    fn serialization_uses_snake_case_tags() {
        let msg = Message::new(
            "d1",
            "s1",
            "t1",
            Role::Ai,
            Some("a1".into()),
            "{}",
            ContentType::ToolOutput,
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""content_type":"tool_output""#));
        assert!(json.contains(r#""sender_role":"ai""#));
    }
}
