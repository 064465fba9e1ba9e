//! In-process document store — the `DB_URL=memory` Repository backend.
//!
//! Useful for development, tests, and single-node deployments. All entity
//! collections live behind one `tokio::sync::RwLock`; each trait method
//! takes the lock once, so writes are atomic per entity.
//!
//! The store owns ordering: it assigns `created_at` and a process-wide
//! monotonic `seq` to every message at write time, so two messages written
//! in the same instant still have a total order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use prism_core::{
    CollaborationRecord, Dialogue, EventLogEntry, IntrospectionRecord, Message, Page, PageOf,
    QueryFilter, Repository, Session, StoreError, StoredBlob, ToolCallRecord, Turn, TurnStatus,
};

#[derive(Default)]
struct Collections {
    dialogues: HashMap<String, Dialogue>,
    sessions: HashMap<String, Session>,
    turns: HashMap<String, Turn>,
    messages: Vec<Message>,
    tool_calls: Vec<ToolCallRecord>,
    events: Vec<EventLogEntry>,
    introspections: HashMap<String, IntrospectionRecord>,
    collaborations: HashMap<String, CollaborationRecord>,
    blobs: HashMap<(String, String), StoredBlob>,
    next_seq: u64,
}

/// The in-process store.
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Collections::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_text(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl Repository for MemoryStore {
    // --- Dialogues ---

    async fn create_dialogue(&self, mut dialogue: Dialogue) -> Result<Dialogue, StoreError> {
        let now = Utc::now();
        dialogue.created_at = now;
        dialogue.last_activity_at = now;
        let mut inner = self.inner.write().await;
        inner.dialogues.insert(dialogue.id.clone(), dialogue.clone());
        Ok(dialogue)
    }

    async fn dialogue(&self, id: &str) -> Result<Option<Dialogue>, StoreError> {
        Ok(self.inner.read().await.dialogues.get(id).cloned())
    }

    async fn update_dialogue(&self, dialogue: Dialogue) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.dialogues.contains_key(&dialogue.id) {
            return Err(StoreError::missing("dialogue", dialogue.id));
        }
        inner.dialogues.insert(dialogue.id.clone(), dialogue);
        Ok(())
    }

    async fn query_dialogues(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Dialogue>, StoreError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Dialogue> = inner
            .dialogues
            .values()
            .filter(|d| {
                filter.dialogue_id.as_deref().is_none_or(|id| d.id == id)
                    && filter
                        .dialogue_type
                        .is_none_or(|t| d.dialogue_type == t)
                    && filter
                        .human_id
                        .as_deref()
                        .is_none_or(|h| d.human_id.as_deref() == Some(h))
                    && filter
                        .ai_id
                        .as_deref()
                        .is_none_or(|a| d.ai_id.as_deref() == Some(a))
                    && (!filter.active_only || d.is_active)
                    && filter.since.is_none_or(|t| d.last_activity_at >= t)
                    && filter.until.is_none_or(|t| d.created_at <= t)
                    && filter.query.as_deref().is_none_or(|q| {
                        d.title.as_deref().is_some_and(|t| matches_text(t, q))
                            || d.description
                                .as_deref()
                                .is_some_and(|desc| matches_text(desc, q))
                    })
            })
            .cloned()
            .collect();
        // Stable order for pagination: creation time, id as tiebreak.
        items.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(PageOf::paginate(items, page))
    }

    // --- Sessions ---

    async fn create_session(&self, mut session: Session) -> Result<Session, StoreError> {
        session.start_at = Utc::now();
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn update_session(&self, session: Session) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(&session.id) {
            return Err(StoreError::missing("session", session.id));
        }
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn open_session(&self, dialogue_id: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.dialogue_id == dialogue_id && s.is_open())
            .max_by_key(|s| s.start_at)
            .cloned())
    }

    async fn query_sessions(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Session>, StoreError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| {
                filter
                    .dialogue_id
                    .as_deref()
                    .is_none_or(|id| s.dialogue_id == id)
                    && filter.session_id.as_deref().is_none_or(|id| s.id == id)
                    && filter.since.is_none_or(|t| s.start_at >= t)
                    && filter.until.is_none_or(|t| s.start_at <= t)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.start_at, &a.id).cmp(&(b.start_at, &b.id)));
        Ok(PageOf::paginate(items, page))
    }

    // --- Turns ---

    async fn create_turn(&self, mut turn: Turn) -> Result<Turn, StoreError> {
        turn.started_at = Utc::now();
        let mut inner = self.inner.write().await;
        inner.turns.insert(turn.id.clone(), turn.clone());
        Ok(turn)
    }

    async fn turn(&self, id: &str) -> Result<Option<Turn>, StoreError> {
        Ok(self.inner.read().await.turns.get(id).cloned())
    }

    async fn update_turn(&self, turn: Turn) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.turns.contains_key(&turn.id) {
            return Err(StoreError::missing("turn", turn.id));
        }
        inner.turns.insert(turn.id.clone(), turn);
        Ok(())
    }

    async fn latest_turn(&self, session_id: &str) -> Result<Option<Turn>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .turns
            .values()
            .filter(|t| t.session_id == session_id)
            .max_by_key(|t| t.started_at)
            .cloned())
    }

    async fn pending_turns(&self) -> Result<Vec<Turn>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Turn> = inner
            .turns
            .values()
            .filter(|t| t.status == TurnStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.started_at);
        Ok(pending)
    }

    async fn query_turns(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Turn>, StoreError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Turn> = inner
            .turns
            .values()
            .filter(|t| {
                filter
                    .dialogue_id
                    .as_deref()
                    .is_none_or(|id| t.dialogue_id == id)
                    && filter
                        .session_id
                        .as_deref()
                        .is_none_or(|id| t.session_id == id)
                    && filter.turn_id.as_deref().is_none_or(|id| t.id == id)
                    && filter.status.is_none_or(|s| t.status == s)
                    && filter
                        .sender_role
                        .is_none_or(|r| t.initiator_role == r)
                    && filter.since.is_none_or(|ts| t.started_at >= ts)
                    && filter.until.is_none_or(|ts| t.started_at <= ts)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        Ok(PageOf::paginate(items, page))
    }

    // --- Messages ---

    async fn create_message(&self, mut message: Message) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        // Ordering is owned by the store: write-time clock plus a monotonic
        // sequence that breaks same-instant ties.
        message.created_at = Utc::now();
        message.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.seq));
        Ok(messages)
    }

    async fn turn_messages(&self, turn_id: &str) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.turn_id == turn_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.seq));
        Ok(messages)
    }

    async fn query_messages(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| {
                filter
                    .dialogue_id
                    .as_deref()
                    .is_none_or(|id| m.dialogue_id == id)
                    && filter
                        .session_id
                        .as_deref()
                        .is_none_or(|id| m.session_id == id)
                    && filter.turn_id.as_deref().is_none_or(|id| m.turn_id == id)
                    && filter.sender_role.is_none_or(|r| m.sender_role == r)
                    && filter
                        .content_type
                        .is_none_or(|ct| m.content_type == ct)
                    && filter.since.is_none_or(|t| m.created_at >= t)
                    && filter.until.is_none_or(|t| m.created_at <= t)
                    && filter
                        .query
                        .as_deref()
                        .is_none_or(|q| matches_text(&m.content, q))
            })
            .cloned()
            .collect();
        items.sort_by_key(|m| (m.created_at, m.seq));
        Ok(PageOf::paginate(items, page))
    }

    // --- Tool calls ---

    async fn record_tool_call(
        &self,
        mut record: ToolCallRecord,
    ) -> Result<ToolCallRecord, StoreError> {
        record.created_at = Utc::now();
        self.inner.write().await.tool_calls.push(record.clone());
        Ok(record)
    }

    async fn dialogue_tool_calls(
        &self,
        dialogue_id: &str,
    ) -> Result<Vec<ToolCallRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .tool_calls
            .iter()
            .filter(|c| c.dialogue_id == dialogue_id)
            .cloned()
            .collect())
    }

    // --- Event log ---

    async fn append_event(&self, entry: EventLogEntry) -> Result<(), StoreError> {
        self.inner.write().await.events.push(entry);
        Ok(())
    }

    async fn dialogue_events(&self, dialogue_id: &str) -> Result<Vec<EventLogEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.dialogue_id == dialogue_id)
            .cloned()
            .collect())
    }

    // --- Introspection ---

    async fn create_introspection(
        &self,
        record: IntrospectionRecord,
    ) -> Result<IntrospectionRecord, StoreError> {
        self.inner
            .write()
            .await
            .introspections
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_introspection(&self, record: IntrospectionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.introspections.contains_key(&record.id) {
            return Err(StoreError::missing("introspection_session", record.id));
        }
        inner.introspections.insert(record.id.clone(), record);
        Ok(())
    }

    async fn introspection(&self, id: &str) -> Result<Option<IntrospectionRecord>, StoreError> {
        Ok(self.inner.read().await.introspections.get(id).cloned())
    }

    // --- Collaboration ---

    async fn create_collaboration(
        &self,
        record: CollaborationRecord,
    ) -> Result<CollaborationRecord, StoreError> {
        self.inner
            .write()
            .await
            .collaborations
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn collaboration(&self, id: &str) -> Result<Option<CollaborationRecord>, StoreError> {
        Ok(self.inner.read().await.collaborations.get(id).cloned())
    }

    // --- Content store ---

    async fn store_blob(&self, blob: StoredBlob) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .blobs
            .insert((blob.category.clone(), blob.filename.clone()), blob);
        Ok(())
    }

    async fn blob(&self, category: &str, filename: &str) -> Result<Option<StoredBlob>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .blobs
            .get(&(category.to_string(), filename.to_string()))
            .cloned())
    }
}
