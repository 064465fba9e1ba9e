//! HTTP API gateway for Prism.
//!
//! Exposes the REST surface (`/api/…`), the media content store, and the
//! WebSocket endpoint (`/ws`). Built on Axum; request tracing and CORS ride
//! as tower layers. Authentication is a boundary concern handled by a
//! fronting proxy — the `token` query parameter is accepted and passed
//! through untouched.

pub mod api;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use prism_config::AppConfig;
use prism_core::{EventBus, Repository, ToolRegistry};
use prism_engine::{DialogueCore, EngineSettings};
use prism_llm::build_client;
use prism_notify::NotificationHub;
use prism_store::MemoryStore;
use prism_tools::ToolInvoker;

/// Shared application state for all handlers.
pub struct AppState {
    pub core: Arc<DialogueCore>,
    pub repository: Arc<dyn Repository>,
    pub tools: Arc<ToolRegistry>,
    pub hub: Arc<NotificationHub>,
    /// Upload cap for `/api/media`, in bytes.
    pub media_max_bytes: usize,
}

pub type SharedState = Arc<AppState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/input", post(api::input_handler))
        .route(
            "/api/dialogues",
            get(api::list_dialogues_handler).post(api::create_dialogue_handler),
        )
        .route("/api/dialogues/new", post(api::create_dialogue_handler))
        // `{id}` doubles as a dialogue id (GET) and a per-type creator
        // segment such as `human_ai` (POST); static routes win over it.
        .route(
            "/api/dialogues/{id}",
            get(api::get_dialogue_handler).post(api::create_typed_dialogue_handler),
        )
        .route("/api/dialogues/{id}/close", post(api::close_dialogue_handler))
        .route(
            "/api/dialogues/{id}/introspection",
            post(api::introspection_handler),
        )
        .route("/api/query/{entity}", get(api::query_handler))
        .route(
            "/api/tools",
            get(api::list_tools_handler).post(api::register_tool_handler),
        )
        .route("/api/tools/categories", get(api::tool_categories_handler))
        .route("/api/notify/{kind}", post(api::notify_handler))
        .route("/api/media/upload/base64", post(api::media_upload_handler))
        .route("/media/{category}/{filename}", get(api::media_fetch_handler))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Wire the full stack from configuration and start serving.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !config.memory_store() {
        return Err(format!(
            "unsupported DB_URL '{}': this build wires the in-process store (DB_URL=memory)",
            config.database.url
        )
        .into());
    }

    let store = Arc::new(MemoryStore::new());
    let repository: Arc<dyn Repository> = store.clone();
    let llm = build_client(
        &config.llm.provider,
        &config.llm.api_key,
        &config.llm.api_url,
    )?;
    let tools = Arc::new(prism_tools::default_registry());
    let invoker = Arc::new(ToolInvoker::new(tools.clone(), repository.clone()));
    let hub = Arc::new(NotificationHub::new());
    let event_bus = Arc::new(EventBus::default());

    let settings = EngineSettings {
        model: config.llm.model.clone(),
        max_context_length: config.dialogue.max_context_length,
        response_window_hours: config.dialogue.response_window_hours,
        session_timeout_hours: config.dialogue.session_timeout_hours,
        pipeline_deadline_secs: config.dialogue.pipeline_deadline_secs,
        max_tool_rounds: config.dialogue.max_tool_rounds,
    };
    let core = Arc::new(DialogueCore::new(
        repository.clone(),
        llm,
        tools.clone(),
        invoker,
        hub.clone(),
        event_bus,
        settings,
    ));

    // Background sweeper for unresponded turns; the pipeline also sweeps
    // lazily on every input.
    core.turn_manager().spawn_sweeper();

    let state = Arc::new(AppState {
        core,
        repository,
        tools,
        hub,
        media_max_bytes: config.media.max_upload_mb * 1024 * 1024,
    });

    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    info!(addr = %addr, provider = %config.llm.provider, "gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let store = Arc::new(MemoryStore::new());
        let repository: Arc<dyn Repository> = store.clone();
        let tools = Arc::new(prism_tools::default_registry());
        let invoker = Arc::new(ToolInvoker::new(tools.clone(), repository.clone()));
        let hub = Arc::new(NotificationHub::new());
        let core = Arc::new(DialogueCore::new(
            repository.clone(),
            Arc::new(prism_llm::MockLlmClient::new()),
            tools.clone(),
            invoker,
            hub.clone(),
            Arc::new(EventBus::default()),
            EngineSettings::default(),
        ));
        Arc::new(AppState {
            core,
            repository,
            tools,
            hub,
            media_max_bytes: 1024 * 1024,
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, value)
    }

    async fn create_human_ai(app: &Router) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/api/dialogues/human_ai",
            Some(serde_json::json!({ "human_id": "h1", "ai_id": "a1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn input_round_trip_and_query_pagination() {
        let app = build_router(test_state());
        let dialogue_id = create_human_ai(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/input",
            Some(serde_json::json!({
                "dialogue_id": dialogue_id,
                "sender_role": "human",
                "sender_id": "h1",
                "content": "Hi",
                "content_type": "text",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "responded");
        assert!(!body["content"].as_str().unwrap().is_empty());
        assert_eq!(body["dialogue_id"], dialogue_id.as_str());

        // Two messages, paginated one per page, each seen exactly once.
        let uri = format!(
            "/api/query/messages?dialogue_id={dialogue_id}&page=1&page_size=1"
        );
        let (status, page1) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page1["total"], 2);
        assert_eq!(page1["total_pages"], 2);
        assert_eq!(page1["items"].as_array().unwrap().len(), 1);

        let uri = format!(
            "/api/query/messages?dialogue_id={dialogue_id}&page=2&page_size=1"
        );
        let (_, page2) = call(&app, "GET", &uri, None).await;
        let first_id = page1["items"][0]["id"].as_str().unwrap();
        let second_id = page2["items"][0]["id"].as_str().unwrap();
        assert_ne!(first_id, second_id);
    }

    #[tokio::test]
    async fn input_to_missing_dialogue_is_404() {
        let app = build_router(test_state());
        let (status, body) = call(
            &app,
            "POST",
            "/api/input",
            Some(serde_json::json!({
                "dialogue_id": "no-such-dialogue",
                "sender_role": "human",
                "content": "Hi",
                "content_type": "text",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "DialogueNotFound");
    }

    #[tokio::test]
    async fn unknown_modality_falls_back_to_caption_or_rejects() {
        let app = build_router(test_state());
        let dialogue_id = create_human_ai(&app).await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/input",
            Some(serde_json::json!({
                "dialogue_id": dialogue_id,
                "sender_role": "human",
                "content": "blob",
                "content_type": "hologram",
                "metadata": { "caption": "a hologram of the meeting" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/api/input",
            Some(serde_json::json!({
                "dialogue_id": dialogue_id,
                "sender_role": "human",
                "content": "blob",
                "content_type": "hologram",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "UnsupportedModality");
    }

    #[tokio::test]
    async fn dialogue_create_fetch_close_cycle() {
        let app = build_router(test_state());
        let (status, created) = call(
            &app,
            "POST",
            "/api/dialogues/new",
            Some(serde_json::json!({
                "dialogue_type": "human_ai",
                "human_id": "h9",
                "ai_id": "a9",
                "title": "trip planning",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap();

        // Fetching returns an equal record.
        let (status, fetched) = call(&app, "GET", &format!("/api/dialogues/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["title"], "trip planning");
        assert_eq!(fetched["dialogue_type"], "human_ai");

        // Closing twice is a no-op, not an error.
        let uri = format!("/api/dialogues/{id}/close");
        let (status, closed) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(closed["is_active"], false);
        let (status, _) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "GET", "/api/dialogues/missing-id", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tool_catalog_endpoints() {
        let app = build_router(test_state());
        let (status, body) = call(&app, "GET", "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);

        let (status, _) = call(
            &app,
            "POST",
            "/api/tools",
            Some(serde_json::json!({
                "name": "crm_lookup",
                "description": "Look up a customer record",
                "summary": "customer record found",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = call(&app, "GET", "/api/tools", None).await;
        assert_eq!(body["count"], 4);

        let (_, categories) = call(&app, "GET", "/api/tools/categories", None).await;
        let list = categories["categories"].as_array().unwrap();
        assert!(list.iter().any(|c| c == "external"));
    }

    #[tokio::test]
    async fn media_upload_and_fetch() {
        let app = build_router(test_state());
        let (status, body) = call(
            &app,
            "POST",
            "/api/media/upload/base64",
            Some(serde_json::json!({
                "category": "image",
                "filename": "note.txt",
                "mime_type": "text/plain",
                "data": "aGVsbG8=",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["url"], "/media/image/note.txt");

        let (status, body) = call(&app, "GET", "/media/image/note.txt", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::Value::String("hello".into()));

        let (status, _) = call(&app, "GET", "/media/image/missing.txt", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn query_rejects_unknown_entity_and_bad_filter() {
        let app = build_router(test_state());
        let (status, _) = call(&app, "GET", "/api/query/widgets", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            call(&app, "GET", "/api/query/messages?sender_role=robot", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidInput");
    }

    #[tokio::test]
    async fn introspection_endpoint() {
        let app = build_router(test_state());
        let (status, created) = call(
            &app,
            "POST",
            "/api/dialogues/ai_self",
            Some(serde_json::json!({ "ai_id": "a1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap();

        let (status, record) = call(
            &app,
            "POST",
            &format!("/api/dialogues/{id}/introspection"),
            Some(serde_json::json!({ "goal": "weekly_review" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!record["steps"].as_array().unwrap().is_empty());
        assert!(!record["summary"].as_str().unwrap().is_empty());
    }
}
