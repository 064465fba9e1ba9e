//! DialogueCore — the pipeline engine.
//!
//! One `process_input` call drives: lazy sweep → parse → session/turn
//! resolution → inbound persistence → context assembly → LLM call →
//! bounded tool loop → response mixing → persistence → notification
//! fan-out.
//!
//! Concurrency contract: two concurrent `process_input` calls on the same
//! dialogue are serialized by a per-dialogue lock; all lifecycle
//! transitions of that dialogue's open turn and session happen under it.
//! The LLM/tool leg runs under an end-to-end deadline; hitting it leaves
//! the turn pending (cancellation is not an error).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use prism_core::dialogue::meta as dmeta;
use prism_core::message::meta;
use prism_core::{
    CompletionRequest, ContentType, Dialogue, DialogueType, DomainEvent, Error, EventBus,
    EventLogEntry, LlmClient, Message, QueryFilter, Repository, Result, Role, Session,
    ToolRegistry, Turn, TurnStatus,
};
use prism_notify::{NotificationHub, NotifyFrame};
use prism_tools::{InvocationContext, ToolInvoker};

use crate::context::ContextBuilder;
use crate::input::{InboundEnvelope, InputParser, PROJECTION};
use crate::introspection::IntrospectionEngine;
use crate::mixer::ResponseMixer;
use crate::sessions::SessionManager;
use crate::turns::TurnManager;
use crate::EngineSettings;

/// Size of one streamed chunk fanned out to clients, in characters.
const STREAM_CHUNK_CHARS: usize = 64;

/// Parameters accepted by the dialogue creation API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DialogueParams {
    #[serde(default)]
    pub human_id: Option<String>,
    #[serde(default)]
    pub ai_id: Option<String>,
    #[serde(default)]
    pub relation_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DialogueParams {
    fn members(&self) -> Vec<String> {
        self.metadata
            .get(dmeta::MEMBERS)
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn participant_ais(&self) -> Vec<String> {
        self.metadata
            .get(dmeta::PARTICIPANT_AIS)
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// What one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub dialogue_id: String,
    pub session_id: String,
    pub turn_id: String,
    pub turn_status: TurnStatus,
    pub input_message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<Message>,
    pub llm_rounds: u32,
    pub tool_calls: u32,
}

struct AiOutcome {
    message: Message,
    llm_rounds: u32,
    tool_calls: u32,
}

pub struct DialogueCore {
    repository: Arc<dyn Repository>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    invoker: Arc<ToolInvoker>,
    hub: Arc<NotificationHub>,
    event_bus: Arc<EventBus>,
    parser: InputParser,
    context: ContextBuilder,
    mixer: ResponseMixer,
    turns: Arc<TurnManager>,
    sessions: SessionManager,
    introspection: IntrospectionEngine,
    settings: EngineSettings,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DialogueCore {
    pub fn new(
        repository: Arc<dyn Repository>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        invoker: Arc<ToolInvoker>,
        hub: Arc<NotificationHub>,
        event_bus: Arc<EventBus>,
        settings: EngineSettings,
    ) -> Self {
        let turns = Arc::new(TurnManager::new(
            repository.clone(),
            event_bus.clone(),
            settings.response_window_hours,
        ));
        let sessions = SessionManager::new(
            repository.clone(),
            event_bus.clone(),
            settings.session_timeout_hours,
        );
        let introspection = IntrospectionEngine::new(
            repository.clone(),
            llm.clone(),
            invoker.clone(),
            settings.model.clone(),
        );
        Self {
            parser: InputParser::new(repository.clone()),
            context: ContextBuilder::new(repository.clone(), settings.max_context_length),
            mixer: ResponseMixer::new().with_max_length(settings.max_context_length),
            turns,
            sessions,
            introspection,
            repository,
            llm,
            tools,
            invoker,
            hub,
            event_bus,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The turn manager, exposed so the binary can spawn the background
    /// sweeper.
    pub fn turn_manager(&self) -> Arc<TurnManager> {
        self.turns.clone()
    }

    async fn dialogue_lock(&self, dialogue_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(dialogue_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Dialogue lifecycle ────────────────────────────────────────────────

    /// Create a dialogue, validating participants per topology. Creation is
    /// idempotent for fixed-participant topologies: an existing active
    /// dialogue with the same participant tuple is returned instead of a
    /// duplicate.
    pub async fn create_dialogue(
        &self,
        dialogue_type: DialogueType,
        params: DialogueParams,
    ) -> Result<Dialogue> {
        self.validate_participants(dialogue_type, &params)?;

        if !dialogue_type.is_group() {
            let filter = QueryFilter {
                dialogue_type: Some(dialogue_type),
                human_id: params.human_id.clone(),
                ai_id: params.ai_id.clone(),
                active_only: true,
                ..QueryFilter::default()
            };
            let existing = self
                .repository
                .query_dialogues(&filter, prism_core::Page::default())
                .await
                .map_err(Error::Store)?;
            if let Some(found) = existing.items.into_iter().next() {
                debug!(dialogue = %found.id, "reusing existing dialogue for participant tuple");
                return Ok(found);
            }
        }

        let mut dialogue = Dialogue::new(dialogue_type);
        dialogue.human_id = params.human_id;
        dialogue.ai_id = params.ai_id;
        dialogue.relation_id = params.relation_id;
        dialogue.title = params.title;
        dialogue.description = params.description;
        dialogue.metadata = params.metadata;

        let dialogue = self
            .repository
            .create_dialogue(dialogue)
            .await
            .map_err(Error::Store)?;

        let _ = self
            .repository
            .append_event(EventLogEntry::new(
                &dialogue.id,
                "dialogue_created",
                dialogue_type.as_str(),
            ))
            .await;
        self.event_bus.publish(DomainEvent::DialogueStateChanged {
            dialogue_id: dialogue.id.clone(),
            is_active: true,
            timestamp: dialogue.created_at,
        });
        self.hub
            .broadcast(
                &dialogue.participants(),
                NotifyFrame::dialogue_update(&dialogue.id, "created", true),
            )
            .await;

        info!(dialogue = %dialogue.id, kind = %dialogue_type, "dialogue created");
        Ok(dialogue)
    }

    fn validate_participants(
        &self,
        dialogue_type: DialogueType,
        params: &DialogueParams,
    ) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidInput(msg.into()));
        match dialogue_type {
            DialogueType::HumanAi => {
                if params.human_id.is_none() || params.ai_id.is_none() {
                    return invalid("human_ai requires human_id and ai_id");
                }
            }
            DialogueType::AiSelf => {
                if params.ai_id.is_none() {
                    return invalid("ai_self requires ai_id");
                }
            }
            DialogueType::AiAi => {
                if params.ai_id.is_none() || params.participant_ais().is_empty() {
                    return invalid("ai_ai requires ai_id and metadata.participant_ais");
                }
            }
            DialogueType::HumanHumanPrivate => {
                if params.members().len() != 2 {
                    return invalid("human_human_private requires exactly two metadata.members");
                }
            }
            DialogueType::HumanHumanGroup => {
                if params.members().len() < 2 {
                    return invalid("human_human_group requires at least two metadata.members");
                }
            }
            DialogueType::HumanAiGroup => {
                if params.ai_id.is_none() || params.members().is_empty() {
                    return invalid("human_ai_group requires ai_id and metadata.members");
                }
            }
            DialogueType::AiMultiHuman => {
                if params.ai_id.is_none() || params.members().len() < 2 {
                    return invalid("ai_multi_human requires ai_id and at least two metadata.members");
                }
            }
        }
        Ok(())
    }

    /// Close a dialogue: no new messages are accepted, the open session
    /// ends, and pending turns are force-closed. Closing an already-closed
    /// dialogue is a no-op.
    pub async fn close_dialogue(&self, dialogue_id: &str) -> Result<Dialogue> {
        let lock = self.dialogue_lock(dialogue_id).await;
        let _guard = lock.lock().await;

        let mut dialogue = self
            .repository
            .dialogue(dialogue_id)
            .await
            .map_err(Error::Store)?
            .ok_or_else(|| Error::DialogueNotFound(dialogue_id.to_string()))?;

        if !dialogue.is_active {
            return Ok(dialogue);
        }

        if let Some(open) = self
            .repository
            .open_session(dialogue_id)
            .await
            .map_err(Error::Store)?
        {
            self.sessions
                .close_session(&open.id, "dialogue closed")
                .await?;
        }

        let now = Utc::now();
        for mut turn in self
            .repository
            .pending_turns()
            .await
            .map_err(Error::Store)?
            .into_iter()
            .filter(|t| t.dialogue_id == dialogue_id)
        {
            turn.status = TurnStatus::Unresponded;
            turn.closed_at = Some(now);
            self.repository
                .update_turn(turn)
                .await
                .map_err(Error::Store)?;
        }

        dialogue.is_active = false;
        dialogue.touch(now);
        self.repository
            .update_dialogue(dialogue.clone())
            .await
            .map_err(Error::Store)?;

        let _ = self
            .repository
            .append_event(EventLogEntry::new(dialogue_id, "dialogue_closed", ""))
            .await;
        self.event_bus.publish(DomainEvent::DialogueStateChanged {
            dialogue_id: dialogue_id.to_string(),
            is_active: false,
            timestamp: now,
        });
        self.hub
            .broadcast(
                &dialogue.participants(),
                NotifyFrame::dialogue_update(dialogue_id, "closed", false),
            )
            .await;

        info!(dialogue = %dialogue_id, "dialogue closed");
        Ok(dialogue)
    }

    // ── The pipeline ──────────────────────────────────────────────────────

    /// Process one inbound envelope end to end.
    pub async fn process_input(&self, envelope: InboundEnvelope) -> Result<ProcessOutcome> {
        // Lazy sweep keeps turn state fresh even without the background task.
        if let Err(e) = self.turns.sweep(Utc::now()).await {
            warn!(error = %e, "lazy sweep failed");
        }

        let lock = self.dialogue_lock(&envelope.dialogue_id).await;
        let _guard = lock.lock().await;

        let mut dialogue = self
            .repository
            .dialogue(&envelope.dialogue_id)
            .await
            .map_err(Error::Store)?
            .ok_or_else(|| Error::DialogueNotFound(envelope.dialogue_id.clone()))?;
        if !dialogue.is_active {
            return Err(Error::DialogueClosed(dialogue.id.clone()));
        }

        // Parse first: validation failures surface to the caller and never
        // open turns.
        let block = self.parser.parse(&envelope).await?;

        let session = self.resolve_session(&envelope, &dialogue).await?;
        let (mut turn, is_response) = self.resolve_turn(&envelope, &dialogue, &session).await?;

        // Persist the inbound message, caching its projection when it
        // differs from the raw content.
        let mut inbound = Message::new(
            &dialogue.id,
            &session.id,
            &turn.id,
            envelope.sender_role,
            envelope.sender_id.clone(),
            envelope.content.clone(),
            envelope.content_type,
        );
        inbound.metadata = envelope.metadata.clone();
        if block.text != envelope.content {
            inbound
                .metadata
                .insert(PROJECTION.into(), serde_json::json!(block.text));
        }
        if let Some(emotion) = block.emotions.first() {
            inbound
                .metadata
                .entry(meta::EMOTION.to_string())
                .or_insert_with(|| serde_json::json!(emotion));
        }
        let inbound = self
            .repository
            .create_message(inbound)
            .await
            .map_err(Error::Store)?;

        dialogue.touch(inbound.created_at);
        self.repository
            .update_dialogue(dialogue.clone())
            .await
            .map_err(Error::Store)?;

        let _ = self
            .repository
            .append_event(EventLogEntry::new(
                &dialogue.id,
                "input_received",
                format!("{} message {}", inbound.content_type, inbound.id),
            ))
            .await;
        self.event_bus.publish(DomainEvent::InputReceived {
            dialogue_id: dialogue.id.clone(),
            message_id: inbound.id.clone(),
            content_type: inbound.content_type.to_string(),
            timestamp: inbound.created_at,
        });
        if inbound.user_visible() {
            self.hub
                .broadcast(&dialogue.participants(), NotifyFrame::message(&inbound))
                .await;
        }

        let window = self.turns.window_for(&dialogue);

        // The inbound answered an open turn: no model leg.
        if is_response {
            self.turns
                .attach_response(&mut turn, &inbound, window)
                .await?;
            return Ok(ProcessOutcome {
                dialogue_id: dialogue.id.clone(),
                session_id: session.id.clone(),
                turn_id: turn.id.clone(),
                turn_status: turn.status,
                input_message: inbound,
                response_message: None,
                llm_rounds: 0,
                tool_calls: 0,
            });
        }

        // Only AI responders get the model leg; broadcast and human-to-human
        // turns wait for their counterparty.
        if turn.responder_role != Role::Ai {
            return Ok(ProcessOutcome {
                dialogue_id: dialogue.id.clone(),
                session_id: session.id.clone(),
                turn_id: turn.id.clone(),
                turn_status: turn.status,
                input_message: inbound,
                response_message: None,
                llm_rounds: 0,
                tool_calls: 0,
            });
        }

        let deadline = std::time::Duration::from_secs(self.settings.pipeline_deadline_secs);
        let leg = self.ai_leg(&dialogue, &session, &turn);
        match tokio::time::timeout(deadline, leg).await {
            Ok(Ok(ai)) => {
                self.turns
                    .attach_response(&mut turn, &ai.message, window)
                    .await?;

                let _ = self
                    .repository
                    .append_event(EventLogEntry::new(
                        &dialogue.id,
                        "response_committed",
                        format!(
                            "message {} after {} llm round(s), {} tool call(s)",
                            ai.message.id, ai.llm_rounds, ai.tool_calls
                        ),
                    ))
                    .await;
                self.event_bus.publish(DomainEvent::ResponseCommitted {
                    dialogue_id: dialogue.id.clone(),
                    turn_id: turn.id.clone(),
                    message_id: ai.message.id.clone(),
                    llm_rounds: ai.llm_rounds,
                    tool_calls: ai.tool_calls,
                    timestamp: ai.message.created_at,
                });
                self.hub
                    .broadcast(&dialogue.participants(), NotifyFrame::message(&ai.message))
                    .await;

                Ok(ProcessOutcome {
                    dialogue_id: dialogue.id.clone(),
                    session_id: session.id.clone(),
                    turn_id: turn.id.clone(),
                    turn_status: turn.status,
                    input_message: inbound,
                    response_message: Some(ai.message),
                    llm_rounds: ai.llm_rounds,
                    tool_calls: ai.tool_calls,
                })
            }
            Ok(Err(e)) => {
                // LLM/tool failures are recovered locally: the turn is
                // finalized with a user-facing error message while the
                // detail goes to the event log.
                let message = self
                    .finalize_with_error(&dialogue, &session, &mut turn, window, &e)
                    .await?;
                Ok(ProcessOutcome {
                    dialogue_id: dialogue.id.clone(),
                    session_id: session.id.clone(),
                    turn_id: turn.id.clone(),
                    turn_status: turn.status,
                    input_message: inbound,
                    response_message: Some(message),
                    llm_rounds: 0,
                    tool_calls: 0,
                })
            }
            Err(_elapsed) => {
                // Pipeline deadline. Cancellation is not an error: the
                // inbound stays recorded and the turn stays pending.
                warn!(dialogue = %dialogue.id, turn = %turn.id, "pipeline deadline hit");
                let _ = self
                    .repository
                    .append_event(EventLogEntry::new(
                        &dialogue.id,
                        "pipeline_deadline",
                        format!("turn {} left pending", turn.id),
                    ))
                    .await;
                self.event_bus.publish(DomainEvent::PipelineError {
                    dialogue_id: dialogue.id.clone(),
                    kind: "PipelineDeadline".into(),
                    detail: format!("deadline of {}s elapsed", deadline.as_secs()),
                    timestamp: Utc::now(),
                });
                Ok(ProcessOutcome {
                    dialogue_id: dialogue.id.clone(),
                    session_id: session.id.clone(),
                    turn_id: turn.id.clone(),
                    turn_status: TurnStatus::Pending,
                    input_message: inbound,
                    response_message: None,
                    llm_rounds: 0,
                    tool_calls: 0,
                })
            }
        }
    }

    async fn resolve_session(
        &self,
        envelope: &InboundEnvelope,
        dialogue: &Dialogue,
    ) -> Result<Session> {
        if let Some(session_id) = &envelope.session_id {
            let session = self
                .repository
                .session(session_id)
                .await
                .map_err(Error::Store)?
                .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
            if session.dialogue_id != dialogue.id {
                return Err(Error::InvalidReference(format!(
                    "session {session_id} belongs to another dialogue"
                )));
            }
            if !session.is_open() {
                return Err(Error::InvalidInput(format!(
                    "session {session_id} is closed"
                )));
            }
            return Ok(session);
        }
        self.sessions
            .ensure_active_session(dialogue, Utc::now())
            .await
    }

    async fn resolve_turn(
        &self,
        envelope: &InboundEnvelope,
        dialogue: &Dialogue,
        session: &Session,
    ) -> Result<(Turn, bool)> {
        if let Some(turn_id) = &envelope.turn_id {
            let turn = self
                .repository
                .turn(turn_id)
                .await
                .map_err(Error::Store)?
                .ok_or_else(|| Error::NotFound(format!("turn {turn_id}")))?;
            if turn.dialogue_id != dialogue.id {
                return Err(Error::InvalidReference(format!(
                    "turn {turn_id} belongs to another dialogue"
                )));
            }
            if turn.status.is_terminal() {
                return Err(Error::TurnClosed(turn_id.clone()));
            }
            // A turn's messages share its session; a stale turn id from a
            // rolled-over session is a caller error.
            if turn.session_id != session.id {
                return Err(Error::InvalidReference(format!(
                    "turn {turn_id} belongs to another session"
                )));
            }
            let is_response = turn.responder_role == envelope.sender_role
                || turn.responder_role == Role::System;
            return Ok((turn, is_response));
        }

        // No explicit turn: an open turn awaiting this sender is answered;
        // anything else starts a fresh turn.
        if let Some(latest) = self
            .repository
            .latest_turn(&session.id)
            .await
            .map_err(Error::Store)?
        {
            if latest.status == TurnStatus::Pending
                && latest.responder_role == envelope.sender_role
            {
                return Ok((latest, true));
            }
        }

        let responder = dialogue
            .dialogue_type
            .responder_for(envelope.sender_role)
            .unwrap_or(Role::System);
        let turn = self
            .turns
            .open_turn(dialogue, session, envelope.sender_role, responder)
            .await?;
        Ok((turn, false))
    }

    /// The LLM/tool leg: bounded rounds of completion and tool execution.
    async fn ai_leg(
        &self,
        dialogue: &Dialogue,
        session: &Session,
        turn: &Turn,
    ) -> Result<AiOutcome> {
        let mut tools_used: Vec<String> = Vec::new();
        let mut rounds: u32 = 0;
        let mut last_content = String::new();

        loop {
            rounds += 1;
            let segments = self.context.build(&session.id).await?;
            let request = CompletionRequest::new(&self.settings.model, segments)
                .with_tools(self.tools.definitions());

            let response = self.llm.complete(request).await.map_err(Error::Llm)?;
            let _ = self
                .repository
                .append_event(EventLogEntry::new(
                    &dialogue.id,
                    "llm_called",
                    format!("round {rounds}, model {}", response.model),
                ))
                .await;
            last_content = response.content;

            let Some(tool_request) = response.tool_request else {
                break;
            };
            if rounds > self.settings.max_tool_rounds {
                warn!(
                    dialogue = %dialogue.id,
                    rounds,
                    "tool loop bound reached, finalizing last model output"
                );
                break;
            }

            let context = InvocationContext {
                dialogue_id: dialogue.id.clone(),
                session_id: Some(session.id.clone()),
                turn_id: Some(turn.id.clone()),
            };
            let started = std::time::Instant::now();
            let invocation = self
                .invoker
                .invoke(&tool_request.tool, tool_request.parameters.clone(), &context)
                .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let (output, success, error_kind) = match &invocation {
                Ok(result) => (result.output.clone(), result.success, None),
                Err(e) => (format!("Error: {e}"), false, Some(e.kind())),
            };

            self.event_bus.publish(DomainEvent::ToolInvoked {
                dialogue_id: dialogue.id.clone(),
                tool: tool_request.tool.clone(),
                success,
                latency_ms,
                timestamp: Utc::now(),
            });
            let _ = self
                .repository
                .append_event(EventLogEntry::new(
                    &dialogue.id,
                    "tool_invoked",
                    format!("{} (success: {success})", tool_request.tool),
                ))
                .await;

            // The tool result joins the turn as a message; the model sees
            // it on the next round through the rebuilt context.
            let mut tool_message = Message::new(
                &dialogue.id,
                &session.id,
                &turn.id,
                Role::System,
                None,
                output,
                ContentType::ToolOutput,
            )
            .with_meta(meta::TOOL_USED, serde_json::json!(tool_request.tool));
            if let Some(kind) = error_kind {
                tool_message = tool_message.with_meta(meta::ERROR_KIND, serde_json::json!(kind));
            }
            self.repository
                .create_message(tool_message)
                .await
                .map_err(Error::Store)?;

            tools_used.push(tool_request.tool);
        }

        let final_content = self.mixer.mix(&last_content, &tools_used, &serde_json::Map::new());

        // Chunked fan-out so connected clients see the response arriving.
        self.stream_to_clients(dialogue, turn, &final_content).await;

        let mut assistant = Message::new(
            &dialogue.id,
            &session.id,
            &turn.id,
            Role::Ai,
            dialogue.ai_id.clone(),
            final_content,
            ContentType::Text,
        );
        if !tools_used.is_empty() {
            assistant = assistant.with_meta(meta::TOOL_USED, serde_json::json!(tools_used));
        }
        let assistant = self
            .repository
            .create_message(assistant)
            .await
            .map_err(Error::Store)?;

        Ok(AiOutcome {
            message: assistant,
            llm_rounds: rounds,
            tool_calls: tools_used.len() as u32,
        })
    }

    async fn stream_to_clients(&self, dialogue: &Dialogue, turn: &Turn, content: &str) {
        let participants = dialogue.participants();
        let chars: Vec<char> = content.chars().collect();
        for chunk in chars.chunks(STREAM_CHUNK_CHARS) {
            let piece: String = chunk.iter().collect();
            self.hub
                .broadcast(
                    &participants,
                    NotifyFrame::stream_chunk(&dialogue.id, &turn.id, &piece, false),
                )
                .await;
        }
        self.hub
            .broadcast(
                &participants,
                NotifyFrame::stream_chunk(&dialogue.id, &turn.id, "", true),
            )
            .await;
    }

    async fn finalize_with_error(
        &self,
        dialogue: &Dialogue,
        session: &Session,
        turn: &mut Turn,
        window: chrono::Duration,
        error: &Error,
    ) -> Result<Message> {
        warn!(dialogue = %dialogue.id, kind = error.kind(), error = %error, "pipeline leg failed, finalizing turn");

        let _ = self
            .repository
            .append_event(EventLogEntry::new(
                &dialogue.id,
                "pipeline_error",
                format!("{}: {error}", error.kind()),
            ))
            .await;
        self.event_bus.publish(DomainEvent::PipelineError {
            dialogue_id: dialogue.id.clone(),
            kind: error.kind().into(),
            detail: error.to_string(),
            timestamp: Utc::now(),
        });

        let message = Message::new(
            &dialogue.id,
            &session.id,
            &turn.id,
            Role::Ai,
            dialogue.ai_id.clone(),
            "I ran into a problem handling that request. Please try again.",
            ContentType::Text,
        )
        .with_meta(meta::ERROR_KIND, serde_json::json!(error.kind()));
        let message = self
            .repository
            .create_message(message)
            .await
            .map_err(Error::Store)?;

        self.turns
            .attach_response(turn, &message, window)
            .await?;
        self.hub
            .broadcast(&dialogue.participants(), NotifyFrame::message(&message))
            .await;
        Ok(message)
    }

    // ── Introspection ─────────────────────────────────────────────────────

    /// Start a self-reflection run inside an `ai_self` dialogue.
    pub async fn start_introspection(
        &self,
        dialogue_id: &str,
        goal: &str,
        trigger: &str,
    ) -> Result<prism_core::IntrospectionRecord> {
        let lock = self.dialogue_lock(dialogue_id).await;
        let _guard = lock.lock().await;

        let mut dialogue = self
            .repository
            .dialogue(dialogue_id)
            .await
            .map_err(Error::Store)?
            .ok_or_else(|| Error::DialogueNotFound(dialogue_id.to_string()))?;
        if dialogue.dialogue_type != DialogueType::AiSelf {
            return Err(Error::InvalidInput(
                "introspection requires an ai_self dialogue".into(),
            ));
        }
        if !dialogue.is_active {
            return Err(Error::DialogueClosed(dialogue_id.to_string()));
        }

        if let Some(open) = self
            .repository
            .open_session(dialogue_id)
            .await
            .map_err(Error::Store)?
        {
            self.sessions
                .close_session(&open.id, "superseded by reflection")
                .await?;
        }

        let record = self.introspection.run(&dialogue, goal, trigger).await?;

        dialogue.touch(Utc::now());
        self.repository
            .update_dialogue(dialogue.clone())
            .await
            .map_err(Error::Store)?;
        self.hub
            .broadcast(
                &dialogue.participants(),
                NotifyFrame::dialogue_update(dialogue_id, "introspection_completed", true),
            )
            .await;
        Ok(record)
    }
}
