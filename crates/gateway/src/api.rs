//! REST handlers for the `/api` surface.
//!
//! Endpoints:
//!
//! - `POST /api/input`                          — run one inbound envelope through the pipeline
//! - `POST /api/dialogues/new` (+ per-type)     — create dialogues
//! - `GET  /api/dialogues`, `GET /api/dialogues/{id}`, `POST /api/dialogues/{id}/close`
//! - `POST /api/dialogues/{id}/introspection`   — start a self-reflection run
//! - `GET  /api/query/{dialogues|sessions|turns|messages}` — unified paginated queries
//! - `GET/POST /api/tools`, `GET /api/tools/categories`
//! - `POST /api/notify/{message|dialogue_update|stream_response}`
//! - `POST /api/media/upload/base64`, `GET /media/{category}/{filename}`

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use prism_core::message::meta;
use prism_core::{
    ContentType, DialogueType, Error, Page, QueryFilter, Role, StoredBlob, Tool, ToolError,
    ToolResult, TurnStatus,
};
use prism_engine::{DialogueParams, InboundEnvelope};
use prism_notify::NotifyFrame;

use crate::SharedState;

// ── Error mapping ─────────────────────────────────────────────────────────

/// Wraps the domain error so every handler can use `?`.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "NotFound" | "DialogueNotFound" => StatusCode::NOT_FOUND,
            "Unauthorized" => StatusCode::UNAUTHORIZED,
            "InvalidInput" | "InvalidReference" | "UnsupportedModality" | "InvalidParameters"
            | "ContextOverflow" => StatusCode::BAD_REQUEST,
            "DialogueClosed" | "TurnClosed" => StatusCode::CONFLICT,
            "LLMTimeout" | "ToolTimeout" => StatusCode::GATEWAY_TIMEOUT,
            "LLMFailure" | "ToolFailure" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "kind": kind,
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn not_found(what: impl Into<String>) -> ApiError {
    ApiError(Error::NotFound(what.into()))
}

// ── Health ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Input ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct InputRequest {
    dialogue_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    turn_id: Option<String>,
    sender_role: String,
    #[serde(default)]
    sender_id: Option<String>,
    content: String,
    content_type: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct InputResponse {
    message_id: String,
    status: TurnStatus,
    content: String,
    content_type: ContentType,
    dialogue_id: String,
    session_id: String,
    turn_id: String,
}

pub async fn input_handler(
    State(state): State<SharedState>,
    Json(request): Json<InputRequest>,
) -> ApiResult<Json<InputResponse>> {
    let sender_role = Role::from_str(&request.sender_role).map_err(Error::InvalidInput)?;

    // Unknown modality tags fall back to the caption's text projection when
    // one is supplied, otherwise the envelope is rejected.
    let (content_type, content) = match ContentType::from_str(&request.content_type) {
        Ok(content_type) => (content_type, request.content),
        Err(_) => match request.metadata.get(meta::CAPTION).and_then(|v| v.as_str()) {
            Some(caption) => (ContentType::Text, caption.to_string()),
            None => {
                return Err(ApiError(Error::UnsupportedModality(
                    request.content_type.clone(),
                )))
            }
        },
    };

    let envelope = InboundEnvelope {
        dialogue_id: request.dialogue_id,
        session_id: request.session_id,
        turn_id: request.turn_id,
        sender_role,
        sender_id: request.sender_id,
        content,
        content_type,
        metadata: request.metadata,
    };

    let outcome = state.core.process_input(envelope).await?;
    let (message_id, content, content_type) = match &outcome.response_message {
        Some(response) => (
            response.id.clone(),
            response.content.clone(),
            response.content_type,
        ),
        None => (
            outcome.input_message.id.clone(),
            outcome.input_message.content.clone(),
            outcome.input_message.content_type,
        ),
    };

    Ok(Json(InputResponse {
        message_id,
        status: outcome.turn_status,
        content,
        content_type,
        dialogue_id: outcome.dialogue_id,
        session_id: outcome.session_id,
        turn_id: outcome.turn_id,
    }))
}

// ── Dialogues ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateDialogueRequest {
    dialogue_type: String,
    #[serde(flatten)]
    params: DialogueParams,
}

pub async fn create_dialogue_handler(
    State(state): State<SharedState>,
    Json(request): Json<CreateDialogueRequest>,
) -> ApiResult<impl IntoResponse> {
    let dialogue_type =
        DialogueType::from_str(&request.dialogue_type).map_err(Error::InvalidInput)?;
    let dialogue = state.core.create_dialogue(dialogue_type, request.params).await?;
    Ok((StatusCode::CREATED, Json(dialogue)))
}

/// Per-type creator: the path segment names the topology
/// (`POST /api/dialogues/human_ai` etc.).
pub async fn create_typed_dialogue_handler(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(params): Json<DialogueParams>,
) -> ApiResult<impl IntoResponse> {
    let dialogue_type = DialogueType::from_str(&key)
        .map_err(|_| Error::NotFound(format!("no such dialogue type: {key}")))?;
    let dialogue = state.core.create_dialogue(dialogue_type, params).await?;
    Ok((StatusCode::CREATED, Json(dialogue)))
}

pub async fn get_dialogue_handler(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> ApiResult<Json<prism_core::Dialogue>> {
    let dialogue = state
        .repository
        .dialogue(&key)
        .await
        .map_err(Error::Store)?
        .ok_or_else(|| not_found(format!("dialogue {key}")))?;
    Ok(Json(dialogue))
}

pub async fn list_dialogues_handler(
    State(state): State<SharedState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let (filter, page) = params.into_parts()?;
    let result = state
        .repository
        .query_dialogues(&filter, page)
        .await
        .map_err(Error::Store)?;
    Ok(Json(serde_json::to_value(result).map_err(Error::from)?))
}

pub async fn close_dialogue_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<prism_core::Dialogue>> {
    let dialogue = state.core.close_dialogue(&id).await?;
    Ok(Json(dialogue))
}

#[derive(Deserialize)]
pub struct IntrospectionRequest {
    goal: String,
    #[serde(default = "default_trigger")]
    trigger: String,
}

fn default_trigger() -> String {
    "system".into()
}

pub async fn introspection_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<IntrospectionRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .core
        .start_introspection(&id, &request.goal, &request.trigger)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ── Unified query ─────────────────────────────────────────────────────────

/// Query-string filters shared by the unified query endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    dialogue_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    turn_id: Option<String>,
    #[serde(default)]
    dialogue_type: Option<String>,
    #[serde(default)]
    sender_role: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    human_id: Option<String>,
    #[serde(default)]
    ai_id: Option<String>,
    #[serde(default)]
    active_only: Option<bool>,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default)]
    until: Option<DateTime<Utc>>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
}

impl QueryParams {
    fn into_parts(self) -> std::result::Result<(QueryFilter, Page), Error> {
        let filter = QueryFilter {
            dialogue_id: self.dialogue_id,
            session_id: self.session_id,
            turn_id: self.turn_id,
            dialogue_type: parse_opt(self.dialogue_type, "dialogue_type")?,
            sender_role: parse_opt(self.sender_role, "sender_role")?,
            content_type: parse_opt(self.content_type, "content_type")?,
            status: parse_opt(self.status, "status")?,
            human_id: self.human_id,
            ai_id: self.ai_id,
            active_only: self.active_only.unwrap_or(false),
            since: self.since,
            until: self.until,
            query: self.query,
        };
        let page = Page::new(self.page.unwrap_or(1), self.page_size.unwrap_or(20));
        Ok((filter, page))
    }
}

fn parse_opt<T: FromStr>(
    value: Option<String>,
    what: &str,
) -> std::result::Result<Option<T>, Error> {
    value
        .map(|raw| {
            T::from_str(&raw).map_err(|_| Error::InvalidInput(format!("bad {what}: '{raw}'")))
        })
        .transpose()
}

pub async fn query_handler(
    State(state): State<SharedState>,
    Path(entity): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let (filter, page) = params.into_parts()?;
    let value = match entity.as_str() {
        "dialogues" => serde_json::to_value(
            state
                .repository
                .query_dialogues(&filter, page)
                .await
                .map_err(Error::Store)?,
        ),
        "sessions" => serde_json::to_value(
            state
                .repository
                .query_sessions(&filter, page)
                .await
                .map_err(Error::Store)?,
        ),
        "turns" => serde_json::to_value(
            state
                .repository
                .query_turns(&filter, page)
                .await
                .map_err(Error::Store)?,
        ),
        "messages" => serde_json::to_value(
            state
                .repository
                .query_messages(&filter, page)
                .await
                .map_err(Error::Store)?,
        ),
        other => return Err(not_found(format!("no such query entity: {other}"))),
    };
    Ok(Json(value.map_err(Error::from)?))
}

// ── Tools ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ToolListResponse {
    tools: Vec<prism_core::ToolDefinition>,
    count: usize,
}

pub async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state.tools.definitions();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

pub async fn tool_categories_handler(
    State(state): State<SharedState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "categories": state.tools.categories() }))
}

#[derive(Deserialize)]
pub struct RegisterToolRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_tool_category")]
    category: String,
    #[serde(default = "empty_object_schema")]
    parameters: serde_json::Value,
    /// Canned output returned when the declared tool is invoked.
    #[serde(default)]
    summary: Option<String>,
}

fn default_tool_category() -> String {
    "external".into()
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A catalog entry registered over HTTP. Arbitrary code cannot arrive this
/// way; invocation returns the declared summary.
struct DeclaredTool {
    name: String,
    description: String,
    category: String,
    parameters: serde_json::Value,
    summary: String,
}

#[async_trait]
impl Tool for DeclaredTool {
    fn id(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn category(&self) -> &str {
        &self.category
    }
    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }
    async fn execute(
        &self,
        _parameters: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(self.summary.clone(), None))
    }
}

pub async fn register_tool_handler(
    State(state): State<SharedState>,
    Json(request): Json<RegisterToolRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(ApiError(Error::InvalidInput("tool name is required".into())));
    }
    let summary = request
        .summary
        .unwrap_or_else(|| format!("declared tool '{}' acknowledged", request.name));
    let tool = Arc::new(DeclaredTool {
        name: request.name.clone(),
        description: request.description,
        category: request.category,
        parameters: request.parameters,
        summary,
    });
    let definition = tool.to_definition();
    state.tools.register(tool);
    info!(tool = %request.name, "tool registered via API");
    Ok((StatusCode::CREATED, Json(definition)))
}

// ── Notify ────────────────────────────────────────────────────────────────

pub async fn notify_handler(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let field = |key: &str| -> std::result::Result<String, Error> {
        body.get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::InvalidInput(format!("missing field '{key}'")))
    };

    let (dialogue_id, frame) = match kind.as_str() {
        "message" => {
            let message_id = field("message_id")?;
            let message = state
                .repository
                .message(&message_id)
                .await
                .map_err(Error::Store)?
                .ok_or_else(|| not_found(format!("message {message_id}")))?;
            (message.dialogue_id.clone(), NotifyFrame::message(&message))
        }
        "dialogue_update" => {
            let dialogue_id = field("dialogue_id")?;
            let update_type = field("update_type").unwrap_or_else(|_| "updated".into());
            let dialogue = state
                .repository
                .dialogue(&dialogue_id)
                .await
                .map_err(Error::Store)?
                .ok_or_else(|| not_found(format!("dialogue {dialogue_id}")))?;
            (
                dialogue_id.clone(),
                NotifyFrame::dialogue_update(&dialogue_id, &update_type, dialogue.is_active),
            )
        }
        "stream_response" => {
            let dialogue_id = field("dialogue_id")?;
            let turn_id = field("turn_id")?;
            let content = field("content").unwrap_or_default();
            let is_final = body.get("is_final").and_then(|v| v.as_bool()).unwrap_or(false);
            (
                dialogue_id.clone(),
                NotifyFrame::stream_chunk(&dialogue_id, &turn_id, &content, is_final),
            )
        }
        other => return Err(not_found(format!("no such notification kind: {other}"))),
    };

    let dialogue = state
        .repository
        .dialogue(&dialogue_id)
        .await
        .map_err(Error::Store)?
        .ok_or_else(|| not_found(format!("dialogue {dialogue_id}")))?;
    let delivered = state.hub.broadcast(&dialogue.participants(), frame).await;
    Ok(Json(serde_json::json!({ "delivered": delivered })))
}

// ── Media ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MediaUploadRequest {
    category: String,
    filename: String,
    #[serde(default = "default_mime")]
    mime_type: String,
    /// Base64-encoded payload
    data: String,
}

fn default_mime() -> String {
    "application/octet-stream".into()
}

pub async fn media_upload_handler(
    State(state): State<SharedState>,
    Json(request): Json<MediaUploadRequest>,
) -> ApiResult<impl IntoResponse> {
    for segment in [&request.category, &request.filename] {
        if segment.is_empty() || segment.contains('/') || segment.contains("..") {
            return Err(ApiError(Error::InvalidInput(
                "category and filename must be plain path segments".into(),
            )));
        }
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.data.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("invalid base64 payload: {e}")))?;
    if bytes.len() > state.media_max_bytes {
        return Err(ApiError(Error::InvalidInput(format!(
            "payload of {} bytes exceeds the {} byte upload cap",
            bytes.len(),
            state.media_max_bytes
        ))));
    }

    state
        .repository
        .store_blob(StoredBlob {
            category: request.category.clone(),
            filename: request.filename.clone(),
            mime_type: request.mime_type,
            bytes,
            created_at: Utc::now(),
        })
        .await
        .map_err(Error::Store)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "url": format!("/media/{}/{}", request.category, request.filename),
        })),
    ))
}

pub async fn media_fetch_handler(
    State(state): State<SharedState>,
    Path((category, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let blob = state
        .repository
        .blob(&category, &filename)
        .await
        .map_err(Error::Store)?
        .ok_or_else(|| not_found(format!("media {category}/{filename}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, blob.mime_type)],
        blob.bytes,
    )
        .into_response())
}
