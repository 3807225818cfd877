use ainput::{ActionOutput, ActionRequest, Dispatcher, StreamTransport, settings::normalize_origin};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Surface id used when a stream request does not name one.
const DEFAULT_SURFACE: &str = "default";
const DEFAULT_PAGE_SIZE: u32 = 20;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub transport: StreamTransport,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            transport: StreamTransport::new(dispatcher.clone()),
            dispatcher,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/actions", post(run_action))
        .route("/v1/actions/stream", post(stream_action))
        .route("/v1/usage", get(usage_page))
        .route("/v1/sites/status", get(site_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub async fn run_server(host: &str, port: u16, dispatcher: Dispatcher) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(dispatcher));
    let app = router(state.clone());

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("AInput server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    state.dispatcher.usage().flush().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// POST /v1/actions
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ActionOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    config_error: bool,
}

async fn run_action(State(state): State<Arc<AppState>>, Json(req): Json<ActionRequest>) -> Json<ActionResponse> {
    tracing::info!(action = %req.action, "action request");
    let response = match state.dispatcher.handle(&req).await {
        Ok(result) => ActionResponse {
            success: true,
            result: Some(result),
            error: None,
            config_error: false,
        },
        Err(e) => {
            tracing::warn!(action = %req.action, "action failed: {e}");
            ActionResponse {
                success: false,
                result: None,
                error: Some(e.to_string()),
                config_error: e.is_config_error(),
            }
        }
    };
    Json(response)
}

// ---------------------------------------------------------------------------
// POST /v1/actions/stream
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StreamQuery {
    surface: Option<String>,
}

async fn stream_action(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StreamQuery>,
    Json(req): Json<ActionRequest>,
) -> Response {
    let surface = q
        .surface
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SURFACE.to_string());
    tracing::info!(action = %req.action, surface = %surface, "stream request");

    let session = state.transport.open(&surface, &req);
    let sse = session
        .into_events()
        .map(|event| Event::default().json_data(event));

    Sse::new(sse).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/usage
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn usage_page(State(state): State<Arc<AppState>>, Query(q): Query<UsageQuery>) -> Response {
    let page = q.page.unwrap_or(1);
    let page_size = q.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    match state.dispatcher.usage().page(page, page_size).await {
        Ok(p) => Json(p).into_response(),
        Err(e) => {
            tracing::error!("usage query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/sites/status
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SiteQuery {
    origin: String,
}

async fn site_status(State(state): State<Arc<AppState>>, Query(q): Query<SiteQuery>) -> Response {
    let origin = match normalize_origin(&q.origin) {
        Ok(o) => o,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("{e:#}")})),
            )
                .into_response();
        }
    };

    match state.dispatcher.settings().load() {
        Ok(s) => Json(json!({
            "origin": origin,
            "disabled": s.disabled_sites.contains(&origin),
            "autoReply": s.auto_reply_sites.contains(&origin),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("{e:#}")})),
        )
            .into_response(),
    }
}
