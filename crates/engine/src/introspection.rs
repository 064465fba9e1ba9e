//! The self-reflection sub-pipeline.
//!
//! Given a goal, the engine drives a `self_reflection` session inside an
//! `ai_self` dialogue: a fixed sequence of tool-mediated steps, each
//! recorded on the `IntrospectionSession`, closed out by a summary turn.
//! A failing step is marked `failed` and the run continues — there is no
//! rollback.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use prism_core::session::CreatedBy;
use prism_core::{
    CompletionRequest, ContentType, Dialogue, Error, EventLogEntry, IntrospectionRecord,
    IntrospectionStep, LlmClient, Message, PromptSegment, Repository, Result, Role, Session,
    SessionType, StepStatus, Turn, TurnStatus,
};
use prism_tools::{InvocationContext, ToolInvoker};

/// Mood trajectory over the course of a reflection run.
const MOODS: [&str; 4] = ["curious", "focused", "reflective", "resolved"];

pub struct IntrospectionEngine {
    repository: Arc<dyn Repository>,
    llm: Arc<dyn LlmClient>,
    invoker: Arc<ToolInvoker>,
    model: String,
}

impl IntrospectionEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        llm: Arc<dyn LlmClient>,
        invoker: Arc<ToolInvoker>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            llm,
            invoker,
            model: model.into(),
        }
    }

    /// Run a full reflection inside the given `ai_self` dialogue. Opens its
    /// own `self_reflection` session and closes it when done.
    pub async fn run(
        &self,
        dialogue: &Dialogue,
        goal: &str,
        trigger: &str,
    ) -> Result<IntrospectionRecord> {
        let ai_id = dialogue.ai_id.clone().unwrap_or_else(|| "ai".into());

        let mut session = self
            .repository
            .create_session(Session::new(
                &dialogue.id,
                SessionType::SelfReflection,
                CreatedBy::Ai,
            ))
            .await
            .map_err(Error::Store)?;

        let mut record = self
            .repository
            .create_introspection(IntrospectionRecord::new(
                &ai_id,
                &dialogue.id,
                &session.id,
                goal,
                trigger,
            ))
            .await
            .map_err(Error::Store)?;

        info!(dialogue = %dialogue.id, goal, "introspection started");

        // Step 1 — gather background through a real tool invocation.
        let gather_input = serde_json::json!({ "query": goal });
        let gather = self
            .tool_step(
                dialogue,
                &session,
                "gather background on the reflection goal",
                "web_search",
                gather_input,
                MOODS[0],
            )
            .await;
        record.steps.push(gather);

        // Steps 2–4 — LLM-mediated reasoning over what came before.
        let prompts = [
            (
                "analyze recent behavior against the goal",
                format!(
                    "Goal: {goal}. Analyze the assistant's recent conduct against this goal. \
                     Background: {}",
                    record.steps[0].tool_output.as_deref().unwrap_or("none")
                ),
                MOODS[1],
            ),
            (
                "derive insights from the analysis",
                format!(
                    "Goal: {goal}. From the analysis so far, derive the key insights worth keeping."
                ),
                MOODS[2],
            ),
            (
                "draft an improvement plan",
                format!("Goal: {goal}. Draft a short, concrete improvement plan."),
                MOODS[3],
            ),
        ];
        for (purpose, prompt, mood) in prompts {
            let step = self.llm_step(purpose, &prompt, mood).await;
            record.steps.push(step);
        }
        if let Some(insights) = record
            .steps
            .iter_mut()
            .find(|s| s.purpose.starts_with("derive insights"))
        {
            insights.generated_entry = insights.tool_output.clone();
        }

        // Summary turn closes the reflection.
        let summary = self.summarize(goal, &record.steps).await;
        let turn = self.commit_summary_turn(dialogue, &session, &ai_id, &summary).await?;

        record.summary = summary;
        record.completed_at = Some(Utc::now());
        self.repository
            .update_introspection(record.clone())
            .await
            .map_err(Error::Store)?;

        session.close(Utc::now(), format!("self reflection: {goal}"));
        self.repository
            .update_session(session)
            .await
            .map_err(Error::Store)?;

        let _ = self
            .repository
            .append_event(EventLogEntry::new(
                &dialogue.id,
                "introspection_completed",
                format!("goal '{goal}', {} step(s), summary turn {}", record.steps.len(), turn.id),
            ))
            .await;
        info!(dialogue = %dialogue.id, steps = record.steps.len(), "introspection completed");
        Ok(record)
    }

    async fn tool_step(
        &self,
        dialogue: &Dialogue,
        session: &Session,
        purpose: &str,
        tool: &str,
        input: serde_json::Value,
        mood: &str,
    ) -> IntrospectionStep {
        let started_at = Utc::now();
        let context = InvocationContext {
            dialogue_id: dialogue.id.clone(),
            session_id: Some(session.id.clone()),
            turn_id: None,
        };
        let outcome = self.invoker.invoke(tool, input.clone(), &context).await;
        let (output, status) = match outcome {
            Ok(result) if result.success => (result.output, StepStatus::Completed),
            Ok(result) => (result.output, StepStatus::Failed),
            Err(e) => {
                warn!(step = purpose, error = %e, "introspection step failed");
                (format!("Error: {e}"), StepStatus::Failed)
            }
        };
        IntrospectionStep {
            purpose: purpose.into(),
            tool_used: Some(tool.into()),
            tool_input: Some(input),
            tool_output: Some(output),
            mood_shift: Some(mood.into()),
            generated_entry: None,
            status,
            started_at,
        }
    }

    async fn llm_step(&self, purpose: &str, prompt: &str, mood: &str) -> IntrospectionStep {
        let started_at = Utc::now();
        let request = CompletionRequest::new(
            &self.model,
            vec![
                PromptSegment::system(
                    "You are reviewing your own recent conduct as a conversational assistant.",
                ),
                PromptSegment::user(prompt.to_string()),
            ],
        );
        let (output, status) = match self.llm.complete(request).await {
            Ok(response) => (response.content, StepStatus::Completed),
            Err(e) => {
                warn!(step = purpose, error = %e, "introspection step failed");
                (format!("Error: {e}"), StepStatus::Failed)
            }
        };
        IntrospectionStep {
            purpose: purpose.into(),
            tool_used: Some("llm".into()),
            tool_input: Some(serde_json::json!({ "prompt": prompt })),
            tool_output: Some(output),
            mood_shift: Some(mood.into()),
            generated_entry: None,
            status,
            started_at,
        }
    }

    async fn summarize(&self, goal: &str, steps: &[IntrospectionStep]) -> String {
        let digest: String = steps
            .iter()
            .map(|s| {
                format!(
                    "- {} [{}]: {}",
                    s.purpose,
                    match s.status {
                        StepStatus::Completed => "ok",
                        StepStatus::Failed => "failed",
                    },
                    s.tool_output.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(
            &self.model,
            vec![
                PromptSegment::system("Summarize this self-reflection in a few sentences."),
                PromptSegment::user(format!("Goal: {goal}\nSteps:\n{digest}")),
            ],
        );
        match self.llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => format!("Reflection on '{goal}' finished; summary unavailable ({e})"),
        }
    }

    /// Persist the aggregate as a closed self-turn with one AI message.
    async fn commit_summary_turn(
        &self,
        dialogue: &Dialogue,
        session: &Session,
        ai_id: &str,
        summary: &str,
    ) -> Result<Turn> {
        let mut turn = self
            .repository
            .create_turn(Turn::new(&dialogue.id, &session.id, Role::Ai, Role::Ai))
            .await
            .map_err(Error::Store)?;

        let message = self
            .repository
            .create_message(Message::new(
                &dialogue.id,
                &session.id,
                &turn.id,
                Role::Ai,
                Some(ai_id.to_string()),
                summary,
                ContentType::Text,
            ))
            .await
            .map_err(Error::Store)?;

        turn.status = TurnStatus::Responded;
        turn.closed_at = Some(message.created_at);
        turn.response_time_secs = Some(
            (message.created_at - turn.started_at).num_milliseconds() as f64 / 1000.0,
        );
        self.repository
            .update_turn(turn.clone())
            .await
            .map_err(Error::Store)?;
        Ok(turn)
    }
}
