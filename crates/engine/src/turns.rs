//! Turn lifecycle — open, attach response, sweep expired.
//!
//! The TurnManager owns every transition of the Turn state machine. The
//! response-window sweeper runs both lazily (at the top of each pipeline
//! run) and as a background task that polls toward the earliest pending
//! deadline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use prism_core::{
    Dialogue, DomainEvent, Error, EventBus, EventLogEntry, Message, Repository, Result, Role,
    Session, Turn, TurnStatus,
};

/// Upper bound on how long the background sweeper sleeps between checks.
const MAX_SWEEP_POLL_SECS: i64 = 30;

pub struct TurnManager {
    repository: Arc<dyn Repository>,
    event_bus: Arc<EventBus>,
    default_window_hours: f64,
}

impl TurnManager {
    pub fn new(
        repository: Arc<dyn Repository>,
        event_bus: Arc<EventBus>,
        default_window_hours: f64,
    ) -> Self {
        Self {
            repository,
            event_bus,
            default_window_hours,
        }
    }

    /// The response window for turns of this dialogue.
    pub fn window_for(&self, dialogue: &Dialogue) -> Duration {
        dialogue.response_window(self.default_window_hours)
    }

    /// Open a new pending turn.
    pub async fn open_turn(
        &self,
        dialogue: &Dialogue,
        session: &Session,
        initiator_role: Role,
        responder_role: Role,
    ) -> Result<Turn> {
        let turn = self
            .repository
            .create_turn(Turn::new(
                &dialogue.id,
                &session.id,
                initiator_role,
                responder_role,
            ))
            .await
            .map_err(Error::Store)?;
        debug!(turn = %turn.id, dialogue = %dialogue.id, "opened turn");
        Ok(turn)
    }

    /// Transition pending → responded for a matching response committed
    /// inside the window. Broadcast turns (`responder_role == System`) adopt
    /// the actual responder on demand.
    pub async fn attach_response(
        &self,
        turn: &mut Turn,
        message: &Message,
        window: Duration,
    ) -> Result<()> {
        if turn.status.is_terminal() {
            return Err(Error::TurnClosed(turn.id.clone()));
        }
        if turn.responder_role == Role::System {
            turn.responder_role = message.sender_role;
        } else if message.sender_role != turn.responder_role {
            return Err(Error::InvalidInput(format!(
                "turn {} expects a {} response",
                turn.id, turn.responder_role
            )));
        }
        if message.created_at > turn.deadline(window) {
            // The window elapsed; the sweeper owns this transition.
            return Err(Error::TurnClosed(turn.id.clone()));
        }

        turn.status = TurnStatus::Responded;
        turn.closed_at = Some(message.created_at);
        turn.response_time_secs = Some(
            (message.created_at - turn.started_at).num_milliseconds() as f64 / 1000.0,
        );
        self.repository
            .update_turn(turn.clone())
            .await
            .map_err(Error::Store)?;
        debug!(turn = %turn.id, "turn responded");
        Ok(())
    }

    /// Transition every expired pending turn to unresponded, with
    /// `closed_at` pinned to the deadline. Returns the expired turns.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<Turn>> {
        let pending = self.repository.pending_turns().await.map_err(Error::Store)?;
        let mut windows: HashMap<String, Duration> = HashMap::new();
        let mut expired = Vec::new();

        for mut turn in pending {
            let window = match windows.get(&turn.dialogue_id) {
                Some(window) => *window,
                None => {
                    let window = match self
                        .repository
                        .dialogue(&turn.dialogue_id)
                        .await
                        .map_err(Error::Store)?
                    {
                        Some(dialogue) => self.window_for(&dialogue),
                        None => Duration::seconds((self.default_window_hours * 3600.0) as i64),
                    };
                    windows.insert(turn.dialogue_id.clone(), window);
                    window
                }
            };

            if !turn.expired(window, now) {
                continue;
            }

            let deadline = turn.deadline(window);
            turn.status = TurnStatus::Unresponded;
            turn.closed_at = Some(deadline);
            self.repository
                .update_turn(turn.clone())
                .await
                .map_err(Error::Store)?;

            self.event_bus.publish(DomainEvent::TurnExpired {
                dialogue_id: turn.dialogue_id.clone(),
                turn_id: turn.id.clone(),
                timestamp: now,
            });
            let _ = self
                .repository
                .append_event(EventLogEntry::new(
                    &turn.dialogue_id,
                    "turn_expired",
                    format!("turn {} unresponded at {}", turn.id, deadline),
                ))
                .await;

            info!(turn = %turn.id, "turn expired as unresponded");
            expired.push(turn);
        }

        Ok(expired)
    }

    /// Next instant at which a pending turn will expire, if any.
    async fn earliest_deadline(&self) -> Option<DateTime<Utc>> {
        let pending = self.repository.pending_turns().await.ok()?;
        let mut earliest: Option<DateTime<Utc>> = None;
        for turn in pending {
            let window = match self.repository.dialogue(&turn.dialogue_id).await.ok()? {
                Some(dialogue) => self.window_for(&dialogue),
                None => Duration::seconds((self.default_window_hours * 3600.0) as i64),
            };
            let deadline = turn.deadline(window);
            earliest = Some(match earliest {
                Some(current) if current <= deadline => current,
                _ => deadline,
            });
        }
        earliest
    }

    /// Background sweeper: sleeps toward the earliest pending deadline
    /// (bounded by a poll ceiling) and sweeps on each wake-up.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let sleep_secs = match self.earliest_deadline().await {
                    Some(deadline) => (deadline - now)
                        .num_seconds()
                        .clamp(1, MAX_SWEEP_POLL_SECS),
                    None => MAX_SWEEP_POLL_SECS,
                };
                tokio::time::sleep(std::time::Duration::from_secs(sleep_secs as u64)).await;
                if let Err(e) = self.sweep(Utc::now()).await {
                    warn!(error = %e, "turn sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::dialogue::meta;
    use prism_core::session::CreatedBy;
    use prism_core::{ContentType, DialogueType, SessionType};
    use prism_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: TurnManager,
        dialogue: Dialogue,
        session: Session,
    }

    async fn fixture(window_hours: Option<f64>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let manager = TurnManager::new(store.clone(), Arc::new(EventBus::default()), 3.0);

        let mut dialogue = Dialogue::new(DialogueType::HumanAi)
            .with_human("h1")
            .with_ai("a1");
        if let Some(hours) = window_hours {
            dialogue = dialogue.with_meta(meta::RESPONSE_WINDOW_HOURS, serde_json::json!(hours));
        }
        let dialogue = store.create_dialogue(dialogue).await.unwrap();
        let session = store
            .create_session(Session::new(
                &dialogue.id,
                SessionType::Dialogue,
                CreatedBy::System,
            ))
            .await
            .unwrap();

        Fixture {
            store,
            manager,
            dialogue,
            session,
        }
    }

    fn response(turn: &Turn, sender_role: Role) -> Message {
        let mut message = Message::new(
            &turn.dialogue_id,
            &turn.session_id,
            &turn.id,
            sender_role,
            Some("a1".into()),
            "answer",
            ContentType::Text,
        );
        message.created_at = Utc::now();
        message
    }

    #[tokio::test]
    async fn open_then_respond() {
        let f = fixture(None).await;
        let mut turn = f
            .manager
            .open_turn(&f.dialogue, &f.session, Role::Human, Role::Ai)
            .await
            .unwrap();

        let window = f.manager.window_for(&f.dialogue);
        let resp = response(&turn, Role::Ai);
        f.manager
            .attach_response(&mut turn, &resp, window)
            .await
            .unwrap();

        assert_eq!(turn.status, TurnStatus::Responded);
        assert!(turn.closed_at.is_some());
        assert!(turn.response_time_secs.unwrap() >= 0.0);

        let stored = f.store.turn(&turn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TurnStatus::Responded);
    }

    #[tokio::test]
    async fn wrong_role_rejected() {
        let f = fixture(None).await;
        let mut turn = f
            .manager
            .open_turn(&f.dialogue, &f.session, Role::Human, Role::Ai)
            .await
            .unwrap();

        let window = f.manager.window_for(&f.dialogue);
        let resp = response(&turn, Role::Human);
        let err = f
            .manager
            .attach_response(&mut turn, &resp, window)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
        assert_eq!(turn.status, TurnStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_turn_is_immutable() {
        let f = fixture(None).await;
        let mut turn = f
            .manager
            .open_turn(&f.dialogue, &f.session, Role::Human, Role::Ai)
            .await
            .unwrap();
        let window = f.manager.window_for(&f.dialogue);
        let resp = response(&turn, Role::Ai);
        f.manager
            .attach_response(&mut turn, &resp, window)
            .await
            .unwrap();

        let resp2 = response(&turn, Role::Ai);
        let err = f
            .manager
            .attach_response(&mut turn, &resp2, window)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TurnClosed");
    }

    #[tokio::test]
    async fn broadcast_turn_adopts_responder() {
        let f = fixture(None).await;
        let mut turn = f
            .manager
            .open_turn(&f.dialogue, &f.session, Role::Human, Role::System)
            .await
            .unwrap();
        let window = f.manager.window_for(&f.dialogue);
        let resp = response(&turn, Role::Human);
        f.manager
            .attach_response(&mut turn, &resp, window)
            .await
            .unwrap();
        assert_eq!(turn.responder_role, Role::Human);
        assert_eq!(turn.status, TurnStatus::Responded);
    }

    #[tokio::test]
    async fn sweep_expires_overdue_turns_at_deadline() {
        // Metadata window of ~0 seconds: already expired at the next sweep.
        let f = fixture(Some(0.0000001)).await;
        let turn = f
            .manager
            .open_turn(&f.dialogue, &f.session, Role::Ai, Role::Human)
            .await
            .unwrap();

        let expired = f
            .manager
            .sweep(Utc::now() + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, TurnStatus::Unresponded);
        // closed_at - started_at == response window
        let window = f.manager.window_for(&f.dialogue);
        assert_eq!(expired[0].closed_at.unwrap(), turn.started_at + window);
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_turns_alone() {
        let f = fixture(None).await;
        f.manager
            .open_turn(&f.dialogue, &f.session, Role::Human, Role::Ai)
            .await
            .unwrap();
        let expired = f.manager.sweep(Utc::now()).await.unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn late_response_is_rejected() {
        let f = fixture(Some(0.0000001)).await;
        let mut turn = f
            .manager
            .open_turn(&f.dialogue, &f.session, Role::Human, Role::Ai)
            .await
            .unwrap();
        let window = f.manager.window_for(&f.dialogue);

        let mut late = response(&turn, Role::Ai);
        late.created_at = turn.started_at + Duration::hours(1);
        let err = f
            .manager
            .attach_response(&mut turn, &late, window)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TurnClosed");
    }
}
