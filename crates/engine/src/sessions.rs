//! Session lifecycle — idle-threshold rollover.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use prism_core::session::CreatedBy;
use prism_core::{
    Dialogue, DomainEvent, Error, EventBus, Repository, Result, Session, SessionType,
};

pub struct SessionManager {
    repository: Arc<dyn Repository>,
    event_bus: Arc<EventBus>,
    default_idle_hours: f64,
}

impl SessionManager {
    pub fn new(
        repository: Arc<dyn Repository>,
        event_bus: Arc<EventBus>,
        default_idle_hours: f64,
    ) -> Self {
        Self {
            repository,
            event_bus,
            default_idle_hours,
        }
    }

    /// Return the dialogue's open session, rolling it over first when its
    /// most recent turn ended longer than the idle threshold ago.
    pub async fn ensure_active_session(
        &self,
        dialogue: &Dialogue,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if let Some(open) = self
            .repository
            .open_session(&dialogue.id)
            .await
            .map_err(Error::Store)?
        {
            let idle_threshold = dialogue.session_idle_threshold(self.default_idle_hours);
            let last_turn = self
                .repository
                .latest_turn(&open.id)
                .await
                .map_err(Error::Store)?;

            // Only a *closed* turn anchors idleness; a pending turn means
            // the conversation is still live inside its response window.
            let idle_since = last_turn.and_then(|t| t.closed_at);
            let rolled_over = match idle_since {
                Some(anchor) => now - anchor > idle_threshold,
                None => false,
            };

            if !rolled_over {
                return Ok(open);
            }

            let mut closing = open;
            closing.close(now, "closed by idle rollover");
            self.repository
                .update_session(closing.clone())
                .await
                .map_err(Error::Store)?;

            let fresh = self
                .repository
                .create_session(Session::new(
                    &dialogue.id,
                    SessionType::Dialogue,
                    CreatedBy::System,
                ))
                .await
                .map_err(Error::Store)?;

            self.event_bus.publish(DomainEvent::SessionRolledOver {
                dialogue_id: dialogue.id.clone(),
                closed_session_id: closing.id.clone(),
                new_session_id: fresh.id.clone(),
                timestamp: now,
            });
            info!(
                dialogue = %dialogue.id,
                closed = %closing.id,
                opened = %fresh.id,
                "session rolled over"
            );
            return Ok(fresh);
        }

        let session = self
            .repository
            .create_session(Session::new(
                &dialogue.id,
                SessionType::Dialogue,
                CreatedBy::System,
            ))
            .await
            .map_err(Error::Store)?;
        debug!(dialogue = %dialogue.id, session = %session.id, "opened session");
        Ok(session)
    }

    /// Close a session explicitly. Returns false when it was already closed
    /// or does not exist.
    pub async fn close_session(
        &self,
        session_id: &str,
        description: &str,
    ) -> Result<bool> {
        let Some(mut session) = self
            .repository
            .session(session_id)
            .await
            .map_err(Error::Store)?
        else {
            return Ok(false);
        };
        if !session.is_open() {
            return Ok(false);
        }
        session.close(Utc::now(), description);
        self.repository
            .update_session(session)
            .await
            .map_err(Error::Store)?;
        Ok(true)
    }
}
