//! Repository trait — the typed persistence façade over the document store.
//!
//! The store assigns creation timestamps and message sequence numbers at
//! write time; client clocks are never trusted for ordering. Writes are
//! atomic per entity — cross-entity invariants are the orchestrator's job,
//! taken under the per-dialogue lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialogue::{Dialogue, DialogueType};
use crate::error::StoreError;
use crate::message::{ContentType, Message, Role};
use crate::records::{
    CollaborationRecord, EventLogEntry, IntrospectionRecord, StoredBlob, ToolCallRecord,
};
use crate::session::Session;
use crate::turn::{Turn, TurnStatus};

/// Default page size for queries.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Hard ceiling on page size.
pub const MAX_PAGE_SIZE: usize = 100;

/// A page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Page {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }.clamped()
    }

    /// Clamp to sane bounds: page ≥ 1, 1 ≤ page_size ≤ MAX_PAGE_SIZE.
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// The pagination envelope returned by every query endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl<T> PageOf<T> {
    /// Slice a fully filtered, ordered item list into one page.
    pub fn paginate(items: Vec<T>, page: Page) -> Self {
        let page = page.clamped();
        let total = items.len();
        let total_pages = total.div_ceil(page.page_size);
        let start = (page.page - 1) * page.page_size;
        let items = if start >= total {
            Vec::new()
        } else {
            items
                .into_iter()
                .skip(start)
                .take(page.page_size)
                .collect()
        };
        Self {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
            total_pages,
        }
    }
}

/// Shared filter across the unified query endpoints. Fields that do not
/// apply to an entity are ignored by that entity's query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_type: Option<DialogueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TurnStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_id: Option<String>,
    /// Only dialogues with `is_active == true`
    #[serde(default)]
    pub active_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring on content (messages) or title/description
    /// (dialogues).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl QueryFilter {
    pub fn for_dialogue(dialogue_id: impl Into<String>) -> Self {
        Self {
            dialogue_id: Some(dialogue_id.into()),
            ..Self::default()
        }
    }
}

/// CRUD plus filtered, paginated queries over the four entities and the
/// auxiliary records.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Dialogues ---
    async fn create_dialogue(&self, dialogue: Dialogue) -> Result<Dialogue, StoreError>;
    async fn dialogue(&self, id: &str) -> Result<Option<Dialogue>, StoreError>;
    async fn update_dialogue(&self, dialogue: Dialogue) -> Result<(), StoreError>;
    async fn query_dialogues(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Dialogue>, StoreError>;

    // --- Sessions ---
    async fn create_session(&self, session: Session) -> Result<Session, StoreError>;
    async fn session(&self, id: &str) -> Result<Option<Session>, StoreError>;
    async fn update_session(&self, session: Session) -> Result<(), StoreError>;
    /// The at-most-one open session of a dialogue.
    async fn open_session(&self, dialogue_id: &str) -> Result<Option<Session>, StoreError>;
    async fn query_sessions(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Session>, StoreError>;

    // --- Turns ---
    async fn create_turn(&self, turn: Turn) -> Result<Turn, StoreError>;
    async fn turn(&self, id: &str) -> Result<Option<Turn>, StoreError>;
    async fn update_turn(&self, turn: Turn) -> Result<(), StoreError>;
    /// Most recently started turn of a session.
    async fn latest_turn(&self, session_id: &str) -> Result<Option<Turn>, StoreError>;
    /// All pending turns across dialogues (sweeper input).
    async fn pending_turns(&self) -> Result<Vec<Turn>, StoreError>;
    async fn query_turns(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Turn>, StoreError>;

    // --- Messages ---
    /// Persist a message. The store assigns `created_at` and the monotonic
    /// `seq` tiebreak; the returned message carries both.
    async fn create_message(&self, message: Message) -> Result<Message, StoreError>;
    async fn message(&self, id: &str) -> Result<Option<Message>, StoreError>;
    /// Messages of a session in `(created_at, seq)` order.
    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;
    /// Messages of a turn in `(created_at, seq)` order.
    async fn turn_messages(&self, turn_id: &str) -> Result<Vec<Message>, StoreError>;
    async fn query_messages(
        &self,
        filter: &QueryFilter,
        page: Page,
    ) -> Result<PageOf<Message>, StoreError>;

    // --- Tool calls ---
    async fn record_tool_call(&self, record: ToolCallRecord) -> Result<ToolCallRecord, StoreError>;
    async fn dialogue_tool_calls(
        &self,
        dialogue_id: &str,
    ) -> Result<Vec<ToolCallRecord>, StoreError>;

    // --- Event log ---
    async fn append_event(&self, entry: EventLogEntry) -> Result<(), StoreError>;
    async fn dialogue_events(&self, dialogue_id: &str) -> Result<Vec<EventLogEntry>, StoreError>;

    // --- Introspection ---
    async fn create_introspection(
        &self,
        record: IntrospectionRecord,
    ) -> Result<IntrospectionRecord, StoreError>;
    async fn update_introspection(&self, record: IntrospectionRecord) -> Result<(), StoreError>;
    async fn introspection(&self, id: &str) -> Result<Option<IntrospectionRecord>, StoreError>;

    // --- Collaboration ---
    async fn create_collaboration(
        &self,
        record: CollaborationRecord,
    ) -> Result<CollaborationRecord, StoreError>;
    async fn collaboration(&self, id: &str) -> Result<Option<CollaborationRecord>, StoreError>;

    // --- Content store ---
    async fn store_blob(&self, blob: StoredBlob) -> Result<(), StoreError>;
    async fn blob(&self, category: &str, filename: &str) -> Result<Option<StoredBlob>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamping() {
        let page = Page::new(0, 500);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);

        let page = Page::default();
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn paginate_slices_and_counts() {
        let items: Vec<u32> = (0..45).collect();
        let page = PageOf::paginate(items.clone(), Page::new(2, 20));
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.items[0], 20);

        let last = PageOf::paginate(items.clone(), Page::new(3, 20));
        assert_eq!(last.items.len(), 5);

        let beyond = PageOf::paginate(items, Page::new(9, 20));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 45);
    }

    #[test]
    fn paginating_all_pages_returns_each_item_once() {
        let items: Vec<u32> = (0..57).collect();
        let mut seen = Vec::new();
        let mut page_no = 1;
        loop {
            let page = PageOf::paginate(items.clone(), Page::new(page_no, 10));
            if page.items.is_empty() {
                break;
            }
            seen.extend(page.items);
            page_no += 1;
        }
        assert_eq!(seen, items);
    }
}
