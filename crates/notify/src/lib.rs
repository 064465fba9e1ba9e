//! NotificationHub — client registry and best-effort event fan-out.
//!
//! Connected clients (WebSocket sessions, in-process observers) register
//! under their participant id and receive [`NotifyFrame`]s over a bounded
//! queue. Delivery never blocks the pipeline: a client whose queue is full
//! is disconnected and must reconnect.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use prism_core::Message;

/// Per-client queue bound. A consumer this far behind is considered gone.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// The three event kinds delivered to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    /// A completed message was committed
    Message,
    /// A dialogue lifecycle change
    DialogueUpdate,
    /// Partial streamed content
    StreamChunk,
}

/// One server → client frame: `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyFrame {
    #[serde(rename = "type")]
    pub kind: NotifyKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl NotifyFrame {
    fn new(kind: NotifyKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Frame for a committed message. Text previews are capped so a frame
    /// never carries a full transcript.
    pub fn message(message: &Message) -> Self {
        let preview: String = message.content.chars().take(140).collect();
        Self::new(
            NotifyKind::Message,
            serde_json::json!({
                "message_id": message.id,
                "dialogue_id": message.dialogue_id,
                "session_id": message.session_id,
                "turn_id": message.turn_id,
                "sender_role": message.sender_role,
                "sender_id": message.sender_id,
                "content_type": message.content_type,
                "content_preview": preview,
                "created_at": message.created_at,
            }),
        )
    }

    /// Frame for a dialogue lifecycle change.
    pub fn dialogue_update(dialogue_id: &str, update_type: &str, is_active: bool) -> Self {
        Self::new(
            NotifyKind::DialogueUpdate,
            serde_json::json!({
                "dialogue_id": dialogue_id,
                "update_type": update_type,
                "is_active": is_active,
            }),
        )
    }

    /// Frame for one chunk of streamed assistant output.
    pub fn stream_chunk(
        dialogue_id: &str,
        turn_id: &str,
        content: &str,
        is_final: bool,
    ) -> Self {
        Self::new(
            NotifyKind::StreamChunk,
            serde_json::json!({
                "dialogue_id": dialogue_id,
                "turn_id": turn_id,
                "content": content,
                "is_final": is_final,
            }),
        )
    }
}

struct ClientHandle {
    id: String,
    sender: mpsc::Sender<NotifyFrame>,
}

/// The hub. Cheap to share: all state lives behind one async RwLock.
pub struct NotificationHub {
    clients: RwLock<HashMap<String, Vec<ClientHandle>>>,
    queue_capacity: usize,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Register a client for a participant. Returns the client id (for
    /// explicit disconnect) and the frame receiver.
    pub async fn subscribe(&self, participant_id: &str) -> (String, mpsc::Receiver<NotifyFrame>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let client_id = Uuid::new_v4().to_string();
        let handle = ClientHandle {
            id: client_id.clone(),
            sender: tx,
        };
        self.clients
            .write()
            .await
            .entry(participant_id.to_string())
            .or_default()
            .push(handle);
        info!(participant = participant_id, client = %client_id, "client connected");
        (client_id, rx)
    }

    /// Remove one client registration.
    pub async fn disconnect(&self, participant_id: &str, client_id: &str) {
        let mut clients = self.clients.write().await;
        if let Some(handles) = clients.get_mut(participant_id) {
            handles.retain(|h| h.id != client_id);
            if handles.is_empty() {
                clients.remove(participant_id);
            }
        }
        info!(participant = participant_id, client = client_id, "client disconnected");
    }

    /// Deliver a frame to every client of one participant. Best-effort:
    /// slow or gone clients are dropped from the registry. Returns how many
    /// clients accepted the frame.
    pub async fn send_to(&self, participant_id: &str, frame: NotifyFrame) -> usize {
        let mut clients = self.clients.write().await;
        let Some(handles) = clients.get_mut(participant_id) else {
            return 0;
        };

        let mut delivered = 0;
        handles.retain(|handle| match handle.sender.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(participant = participant_id, client = %handle.id, "queue full, disconnecting client");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if handles.is_empty() {
            clients.remove(participant_id);
        }
        delivered
    }

    /// Fan a frame out to a set of participants.
    pub async fn broadcast(&self, participant_ids: &[String], frame: NotifyFrame) -> usize {
        let mut delivered = 0;
        for id in participant_ids {
            delivered += self.send_to(id, frame.clone()).await;
        }
        debug!(recipients = participant_ids.len(), delivered, "broadcast complete");
        delivered
    }

    /// Number of connected clients across all participants.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.values().map(|v| v.len()).sum()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
