//! Domain event system — decoupled communication between bounded contexts.
//!
//! Events are published as the pipeline moves an input through its stages.
//! Observers (the notification hub, the persisted event log writer) subscribe
//! without coupling to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An inbound message entered the pipeline
    InputReceived {
        dialogue_id: String,
        message_id: String,
        content_type: String,
        timestamp: DateTime<Utc>,
    },

    /// The assistant response was committed and its turn closed
    ResponseCommitted {
        dialogue_id: String,
        turn_id: String,
        message_id: String,
        llm_rounds: u32,
        tool_calls: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed inside the tool loop
    ToolInvoked {
        dialogue_id: String,
        tool: String,
        success: bool,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The sweeper expired a pending turn
    TurnExpired {
        dialogue_id: String,
        turn_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The idle threshold rolled a session over
    SessionRolledOver {
        dialogue_id: String,
        closed_session_id: String,
        new_session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A dialogue was opened or closed
    DialogueStateChanged {
        dialogue_id: String,
        is_active: bool,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline stage failed (recovered or surfaced)
    PipelineError {
        dialogue_id: String,
        kind: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Components
/// subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolInvoked {
            dialogue_id: "d1".into(),
            tool: "weather".into(),
            success: true,
            latency_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolInvoked { tool, success, .. } => {
                assert_eq!(tool, "weather");
                assert!(success);
            }
            _ => panic!("Expected ToolInvoked event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::PipelineError {
            dialogue_id: "d1".into(),
            kind: "LLMFailure".into(),
            detail: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
