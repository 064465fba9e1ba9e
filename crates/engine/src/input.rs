//! Multi-modal input parsing.
//!
//! Every inbound envelope is projected to a [`SemanticBlock`] — the
//! canonical text form used for context assembly — through a per-modality
//! parser selected by the envelope's `content_type` tag.

use std::sync::Arc;

use prism_core::message::meta;
use prism_core::{ContentType, Error, Message, Repository, Result, Role, SemanticBlock};
use serde::Deserialize;

/// Metadata key under which the parser caches a projection that differs
/// from the raw content (image captions, quote expansions, …). The context
/// builder prefers it over the raw content.
pub const PROJECTION: &str = "projection";

/// The raw inbound envelope as accepted by `POST /api/input`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub dialogue_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
    pub sender_role: Role,
    #[serde(default)]
    pub sender_id: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl InboundEnvelope {
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Normalizes heterogeneous inbound content into semantic blocks.
pub struct InputParser {
    repository: Arc<dyn Repository>,
}

impl InputParser {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Parse an envelope into its semantic block.
    ///
    /// Fails with `InvalidReference` when a quote-reply target cannot be
    /// resolved inside the same dialogue. Validation failures here never
    /// open turns — the orchestrator parses before touching lifecycle state.
    pub async fn parse(&self, envelope: &InboundEnvelope) -> Result<SemanticBlock> {
        let block = match envelope.content_type {
            ContentType::Text | ContentType::Markdown => self.parse_text(envelope),
            ContentType::Command => {
                let mut block =
                    SemanticBlock::text_only(envelope.content.clone(), envelope.sender_role);
                block.tags.push("command".into());
                block
            }
            ContentType::Image => self.parse_image(envelope),
            ContentType::Audio => self.parse_audio(envelope),
            ContentType::ToolOutput => self.parse_tool_output(envelope),
            ContentType::ToolInput => {
                let mut block = SemanticBlock::text_only(
                    format!("[tool request] {}", envelope.content),
                    envelope.sender_role,
                );
                block.tags.push("tool_input".into());
                block
            }
            ContentType::QuoteReply => self.parse_quote_reply(envelope).await?,
            ContentType::Prompt | ContentType::SystemContext => {
                let mut block =
                    SemanticBlock::text_only(envelope.content.clone(), Role::System);
                block.visible = false;
                block
            }
        };
        Ok(block)
    }

    fn parse_text(&self, envelope: &InboundEnvelope) -> SemanticBlock {
        let text = envelope.content.clone();
        let mut block = SemanticBlock::text_only(text, envelope.sender_role);
        block.tags = detect_tags(&envelope.content);
        block.emotions = vec![detect_sentiment(&envelope.content).to_string()];
        block
    }

    fn parse_image(&self, envelope: &InboundEnvelope) -> SemanticBlock {
        // The content carries the URL or base64 reference; the caption is
        // the text projection. Without one we keep a placeholder marker.
        let caption = envelope
            .meta_str(meta::CAPTION)
            .map(|c| format!("[image: {c}]"))
            .unwrap_or_else(|| "[image]".to_string());
        SemanticBlock::text_only(caption, envelope.sender_role)
    }

    fn parse_audio(&self, envelope: &InboundEnvelope) -> SemanticBlock {
        let projection = envelope
            .meta_str(meta::TRANSCRIPTION)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "[audio]".to_string());
        SemanticBlock::text_only(projection, envelope.sender_role)
    }

    fn parse_tool_output(&self, envelope: &InboundEnvelope) -> SemanticBlock {
        let text = flatten_tool_output(
            envelope.meta_str(meta::TOOL_USED),
            &envelope.content,
        );
        let mut block = SemanticBlock::text_only(text, Role::System);
        block.tags.push("tool_output".into());
        block
    }

    async fn parse_quote_reply(&self, envelope: &InboundEnvelope) -> Result<SemanticBlock> {
        let reply_to = envelope
            .meta_str(meta::REPLY_TO)
            .ok_or_else(|| Error::InvalidReference("quote_reply without reply_to".into()))?;

        let quoted = self
            .repository
            .message(reply_to)
            .await
            .map_err(Error::Store)?
            .ok_or_else(|| Error::InvalidReference(format!("no such message: {reply_to}")))?;

        if quoted.dialogue_id != envelope.dialogue_id {
            return Err(Error::InvalidReference(format!(
                "message {reply_to} belongs to another dialogue"
            )));
        }

        Ok(SemanticBlock::text_only(
            format!("> {}\n{}", quoted.content, envelope.content),
            envelope.sender_role,
        ))
    }
}

/// Text projection of an already-persisted message, used by the context
/// builder. Falls back through the cached projection, modality metadata,
/// and finally the raw content.
pub fn project_stored(message: &Message) -> String {
    if let Some(projection) = message.meta_str(PROJECTION) {
        return projection.to_string();
    }
    match message.content_type {
        ContentType::Image => message
            .meta_str(meta::CAPTION)
            .map(|c| format!("[image: {c}]"))
            .unwrap_or_else(|| "[image]".into()),
        ContentType::Audio => message
            .meta_str(meta::TRANSCRIPTION)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "[audio]".into()),
        ContentType::ToolOutput => {
            flatten_tool_output(message.meta_str(meta::TOOL_USED), &message.content)
        }
        _ => message.content.clone(),
    }
}

/// Flatten a structured tool result into one readable sentence:
/// `"{tool} returned: {summary}"`.
fn flatten_tool_output(tool: Option<&str>, content: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        let tool = value["tool"]
            .as_str()
            .or(tool)
            .unwrap_or("tool")
            .to_string();
        let summary = match &value["result"] {
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", summarize_value(v)))
                .collect::<Vec<_>>()
                .join(", "),
            serde_json::Value::Null => summarize_value(&value),
            other => summarize_value(other),
        };
        return format!("{tool} returned: {summary}");
    }
    format!("{} returned: {}", tool.unwrap_or("tool"), content)
}

fn summarize_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn detect_tags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tags = Vec::new();
    if ["weather", "umbrella", "rain", "forecast"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        tags.push("weather".into());
    }
    if ["travel", "trip", "flight"].iter().any(|kw| lower.contains(kw)) {
        tags.push("travel".into());
    }
    if lower.contains("search") || lower.contains("look up") {
        tags.push("search".into());
    }
    tags
}

fn detect_sentiment(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if ["glad", "great", "love", "thanks", "happy"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        "happy"
    } else if ["sad", "sorry", "unfortunately", "disappointed"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        "sad"
    } else {
        "neutral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_store::MemoryStore;

    fn envelope(content: &str, content_type: ContentType) -> InboundEnvelope {
        InboundEnvelope {
            dialogue_id: "d1".into(),
            session_id: None,
            turn_id: None,
            sender_role: Role::Human,
            sender_id: Some("h1".into()),
            content: content.into(),
            content_type,
            metadata: serde_json::Map::new(),
        }
    }

    fn parser() -> (InputParser, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (InputParser::new(store.clone()), store)
    }

    #[tokio::test]
    async fn text_passes_through_with_tags() {
        let (parser, _) = parser();
        let block = parser
            .parse(&envelope(
                "Do I need an umbrella for my trip?",
                ContentType::Text,
            ))
            .await
            .unwrap();
        assert_eq!(block.text, "Do I need an umbrella for my trip?");
        assert!(block.tags.contains(&"weather".to_string()));
        assert!(block.tags.contains(&"travel".to_string()));
        assert_eq!(block.emotions, vec!["neutral"]);
        assert!(block.visible);
    }

    #[tokio::test]
    async fn image_uses_caption_else_placeholder() {
        let (parser, _) = parser();
        let mut env = envelope("https://cdn.example/cat.png", ContentType::Image);
        assert_eq!(parser.parse(&env).await.unwrap().text, "[image]");

        env.metadata
            .insert("caption".into(), serde_json::json!("a cat on a sofa"));
        assert_eq!(
            parser.parse(&env).await.unwrap().text,
            "[image: a cat on a sofa]"
        );
    }

    #[tokio::test]
    async fn audio_projects_transcription() {
        let (parser, _) = parser();
        let mut env = envelope("blob://audio/1", ContentType::Audio);
        assert_eq!(parser.parse(&env).await.unwrap().text, "[audio]");

        env.metadata
            .insert("transcription".into(), serde_json::json!("see you at noon"));
        assert_eq!(parser.parse(&env).await.unwrap().text, "see you at noon");
    }

    #[tokio::test]
    async fn tool_output_is_flattened() {
        let (parser, _) = parser();
        let env = envelope(
            r#"{"tool": "weather", "result": {"city": "Singapore", "conditions": "Light rain"}}"#,
            ContentType::ToolOutput,
        );
        let block = parser.parse(&env).await.unwrap();
        assert_eq!(
            block.text,
            "weather returned: city: Singapore, conditions: Light rain"
        );
        assert_eq!(block.origin, Role::System);
    }

    #[tokio::test]
    async fn tool_output_without_json_falls_back() {
        let (parser, _) = parser();
        let mut env = envelope("41 degrees and clear", ContentType::ToolOutput);
        env.metadata
            .insert("tool_used".into(), serde_json::json!("weather"));
        let block = parser.parse(&env).await.unwrap();
        assert_eq!(block.text, "weather returned: 41 degrees and clear");
    }

    #[tokio::test]
    async fn quote_reply_resolves_and_prefixes() {
        let (parser, store) = parser();
        let quoted = store
            .create_message(Message::new(
                "d1",
                "s1",
                "t1",
                Role::Ai,
                Some("a1".into()),
                "It will rain tomorrow.",
                ContentType::Text,
            ))
            .await
            .unwrap();

        let mut env = envelope("Are you sure?", ContentType::QuoteReply);
        env.metadata
            .insert("reply_to".into(), serde_json::json!(quoted.id));
        let block = parser.parse(&env).await.unwrap();
        assert_eq!(block.text, "> It will rain tomorrow.\nAre you sure?");
    }

    #[tokio::test]
    async fn quote_reply_to_missing_message_is_invalid_reference() {
        let (parser, _) = parser();
        let mut env = envelope("Are you sure?", ContentType::QuoteReply);
        env.metadata
            .insert("reply_to".into(), serde_json::json!("nope"));
        let err = parser.parse(&env).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidReference");
    }

    #[tokio::test]
    async fn quote_reply_across_dialogues_rejected() {
        let (parser, store) = parser();
        let other = store
            .create_message(Message::new(
                "other-dialogue",
                "s9",
                "t9",
                Role::Human,
                None,
                "private",
                ContentType::Text,
            ))
            .await
            .unwrap();

        let mut env = envelope("quoting you", ContentType::QuoteReply);
        env.metadata
            .insert("reply_to".into(), serde_json::json!(other.id));
        let err = parser.parse(&env).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidReference");
    }

    #[tokio::test]
    async fn prompt_is_system_and_hidden() {
        let (parser, _) = parser();
        let block = parser
            .parse(&envelope("Answer in haiku.", ContentType::Prompt))
            .await
            .unwrap();
        assert!(!block.visible);
        assert_eq!(block.origin, Role::System);
    }

    #[test]
    fn stored_projection_prefers_cache() {
        let msg = Message::new(
            "d1",
            "s1",
            "t1",
            Role::Human,
            None,
            "raw",
            ContentType::Text,
        )
        .with_meta(PROJECTION, serde_json::json!("projected"));
        assert_eq!(project_stored(&msg), "projected");
    }

    #[test]
    fn sentiment_detection() {
        assert_eq!(detect_sentiment("thanks, that's great"), "happy");
        assert_eq!(detect_sentiment("unfortunately it broke"), "sad");
        assert_eq!(detect_sentiment("what time is it"), "neutral");
    }
}
