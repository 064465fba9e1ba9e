//! Context assembly — ordered prompt segments under a character budget.
//!
//! The persona header occupies a fixed slot and is never trimmed. Recent
//! session messages fill the remaining budget newest-first; when it runs
//! out, the oldest messages are dropped whole — a message is never split.
//! Assembly is deterministic: identical store state produces an identical
//! prompt.

use std::sync::Arc;

use prism_core::{ContentType, Error, PromptSegment, Repository, Result, Role};

use crate::input::project_stored;

/// Default persona header used when the deployment does not configure one.
const DEFAULT_PERSONA: &str = "You are a helpful, attentive conversational assistant. \
    Answer concisely and accurately. When a tool can provide missing information, \
    request it instead of guessing.";

/// Marker prefixed to tool-result segments so the model can tell them apart
/// from organic turns.
pub const TOOL_RESULT_MARKER: &str = "[tool result]";

pub struct ContextBuilder {
    repository: Arc<dyn Repository>,
    budget: usize,
    persona: String,
}

impl ContextBuilder {
    pub fn new(repository: Arc<dyn Repository>, budget: usize) -> Self {
        Self {
            repository,
            budget,
            persona: DEFAULT_PERSONA.to_string(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Assemble the prompt for one session.
    ///
    /// Segment order: persona header, then any persisted system instructions
    /// (`prompt` messages), then the conversation window oldest-first.
    pub async fn build(&self, session_id: &str) -> Result<Vec<PromptSegment>> {
        if self.persona.len() > self.budget {
            return Err(Error::ContextOverflow {
                required: self.persona.len(),
                budget: self.budget,
            });
        }

        let messages = self
            .repository
            .session_messages(session_id)
            .await
            .map_err(Error::Store)?;

        // Fixed header slot.
        let mut header = vec![PromptSegment::system(self.persona.clone())];
        let mut remaining = self.budget - self.persona.len();

        // System instructions always ride in the header, budget permitting.
        for message in &messages {
            if matches!(
                message.content_type,
                ContentType::Prompt | ContentType::SystemContext
            ) {
                let text = project_stored(message);
                if text.len() <= remaining {
                    remaining -= text.len();
                    header.push(PromptSegment::system(text));
                }
            }
        }

        // Conversation window: walk newest-first until the budget is spent,
        // dropping oldest messages first and never splitting one.
        let mut window: Vec<PromptSegment> = Vec::new();
        for message in messages.iter().rev() {
            if matches!(
                message.content_type,
                ContentType::Prompt | ContentType::SystemContext
            ) {
                continue;
            }
            let segment = match message.content_type {
                ContentType::ToolOutput => PromptSegment::tool(format!(
                    "{TOOL_RESULT_MARKER} {}",
                    project_stored(message)
                )),
                _ => {
                    let text = project_stored(message);
                    match message.sender_role {
                        Role::Ai => PromptSegment::assistant(text),
                        _ => PromptSegment::user(text),
                    }
                }
            };
            if segment.content.len() > remaining {
                break;
            }
            remaining -= segment.content.len();
            window.push(segment);
        }
        window.reverse();

        header.extend(window);
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::Message;
    use prism_store::MemoryStore;

    async fn seed(store: &MemoryStore, content: &str, role: Role, content_type: ContentType) {
        store
            .create_message(Message::new(
                "d1",
                "s1",
                "t1",
                role,
                None,
                content,
                content_type,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn header_then_history_in_order() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "Hi", Role::Human, ContentType::Text).await;
        seed(&store, "Hello! How can I help?", Role::Ai, ContentType::Text).await;

        let builder = ContextBuilder::new(store, 4000);
        let segments = builder.build("s1").await.unwrap();

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].role, prism_core::SegmentRole::System);
        assert_eq!(segments[1].content, "Hi");
        assert_eq!(segments[2].content, "Hello! How can I help?");
        assert_eq!(segments[2].role, prism_core::SegmentRole::Assistant);
    }

    #[tokio::test]
    async fn prompt_messages_ride_in_header() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "Answer in haiku.", Role::System, ContentType::Prompt).await;
        seed(&store, "Hi", Role::Human, ContentType::Text).await;

        let builder = ContextBuilder::new(store, 4000);
        let segments = builder.build("s1").await.unwrap();

        assert_eq!(segments[1].role, prism_core::SegmentRole::System);
        assert_eq!(segments[1].content, "Answer in haiku.");
        assert_eq!(segments[2].content, "Hi");
    }

    #[tokio::test]
    async fn tool_results_are_marked() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "weather?", Role::Human, ContentType::Text).await;
        store
            .create_message(
                Message::new(
                    "d1",
                    "s1",
                    "t1",
                    Role::System,
                    None,
                    "Light rain, 27°C",
                    ContentType::ToolOutput,
                )
                .with_meta("tool_used", serde_json::json!("weather")),
            )
            .await
            .unwrap();

        let builder = ContextBuilder::new(store, 4000);
        let segments = builder.build("s1").await.unwrap();
        let tool_segment = &segments[2];
        assert_eq!(tool_segment.role, prism_core::SegmentRole::Tool);
        assert!(tool_segment.content.starts_with(TOOL_RESULT_MARKER));
        assert!(tool_segment.content.contains("weather returned: Light rain"));
    }

    #[tokio::test]
    async fn oldest_dropped_first_never_split() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..10 {
            seed(
                &store,
                &format!("message number {i} {}", "x".repeat(40)),
                Role::Human,
                ContentType::Text,
            )
            .await;
        }

        let persona = "p".repeat(100);
        let builder = ContextBuilder::new(store, 100 + 170).with_persona(persona);
        let segments = builder.build("s1").await.unwrap();

        // Header plus however many whole recent messages fit (each ~58 chars).
        let history: Vec<&str> = segments[1..].iter().map(|s| s.content.as_str()).collect();
        assert!(!history.is_empty());
        assert!(history.len() < 10);
        // The survivors are the newest, still in chronological order.
        assert!(history.last().unwrap().contains("message number 9"));
        for window in history.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[tokio::test]
    async fn oversized_persona_is_context_overflow() {
        let store = Arc::new(MemoryStore::new());
        let builder = ContextBuilder::new(store, 50).with_persona("p".repeat(100));
        let err = builder.build("s1").await.unwrap_err();
        assert_eq!(err.kind(), "ContextOverflow");
    }

    #[tokio::test]
    async fn deterministic_assembly() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "Hi", Role::Human, ContentType::Text).await;
        let builder = ContextBuilder::new(store, 4000);
        let a = builder.build("s1").await.unwrap();
        let b = builder.build("s1").await.unwrap();
        let render =
            |segs: &[PromptSegment]| segs.iter().map(|s| s.content.clone()).collect::<Vec<_>>();
        assert_eq!(render(&a), render(&b));
    }
}
