//! The canonical text-projected form of a message, used for context assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Role;

/// A normalized semantic block produced by the input parser.
///
/// Every modality projects to one of these so the context builder and the
/// LLM backends never need to know how the content arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticBlock {
    /// The text projection of the content.
    pub text: String,

    /// Detected intent/topic tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Detected or supplied emotions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,

    /// Which role the content originated from.
    pub origin: Role,

    /// `false` for system instructions (`prompt`) that steer the model but
    /// are never shown to human consumers.
    pub visible: bool,

    /// Id of the message this block was projected from, if persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,

    pub ts: DateTime<Utc>,
}

impl SemanticBlock {
    pub fn text_only(text: impl Into<String>, origin: Role) -> Self {
        Self {
            text: text.into(),
            tags: Vec::new(),
            emotions: Vec::new(),
            origin,
            visible: true,
            source_message_id: None,
            ts: Utc::now(),
        }
    }
}

impl std::fmt::Display for SemanticBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_defaults() {
        let block = SemanticBlock::text_only("hello", Role::Human);
        assert_eq!(block.text, "hello");
        assert!(block.visible);
        assert!(block.tags.is_empty());
        assert_eq!(block.to_string(), "hello");
    }
}
