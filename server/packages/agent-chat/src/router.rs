use std::sync::Arc;

use agent_chat_error::{ChatError, ErrorBody};
use agent_chat_stream::SessionId;
use agent_chat_upstream::AgentClient;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode, Uri};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::gate::{require_token, validate_password, AuthConfig};
use crate::history::{HistoryQuery, HistoryResponse};
use crate::relay::relay_response;

pub const LOG_HTTP_ENV: &str = "AGENT_CHAT_LOG_HTTP";

#[derive(Debug)]
pub struct AppState {
    pub(crate) auth: AuthConfig,
    pub(crate) upstream: AgentClient,
}

impl AppState {
    pub fn new(auth: AuthConfig, upstream: AgentClient) -> Self {
        Self { auth, upstream }
    }
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state)).0
}

pub fn build_router_with_state(shared: Arc<AppState>) -> (Router, Arc<AppState>) {
    let mut router = Router::new()
        .route("/api/health", get(get_health))
        .route("/api/auth/validate", post(validate_password))
        .route("/api/chat", post(create_chat))
        .route("/api/chat/:chat_id/continue", post(continue_chat))
        .route("/api/history", get(list_history))
        .fallback(not_found)
        .with_state(shared.clone());

    if shared.auth.is_enabled() {
        router = router.layer(from_fn_with_state(shared.clone(), require_token));
    }

    if http_logging_enabled() {
        let trace_layer = TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %req.method(),
                uri = %req.uri().path()
            )
        });
        router = router.layer(trace_layer);
    }

    (router, shared)
}

fn http_logging_enabled() -> bool {
    match std::env::var(LOG_HTTP_ENV) {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body): (u16, ErrorBody) = match &self {
            ApiError::Chat(err) => (err.status_code(), ErrorBody::from(err)),
        };
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatResponse {
    pub chat_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct ContinueChatRequest {
    #[serde(default)]
    input: Option<String>,
}

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn create_chat(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CreateChatResponse>, ApiError> {
    let chat_id = state.upstream.create_session().await.map_err(|err| {
        tracing::error!(error = %err, "failed to create chat");
        err
    })?;
    Ok(Json(CreateChatResponse { chat_id }))
}

async fn continue_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ContinueChatRequest = serde_json::from_slice(&body).map_err(|err| {
        ChatError::invalid_request(format!("request body must be a JSON object: {err}"))
    })?;
    let Some(input) = request.input.filter(|input| !input.is_empty()) else {
        return Err(ChatError::invalid_request("Input is required").into());
    };

    let chat_id = SessionId::from(chat_id);
    let upstream = state
        .upstream
        .continue_session(&chat_id, &input)
        .await
        .map_err(|err| {
            tracing::error!(chat_id = %chat_id, error = %err, "failed to continue chat");
            err
        })?;
    Ok(relay_response(chat_id, upstream))
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query
        .map_err(|err| ChatError::invalid_request(format!("invalid history query: {err}")))?;

    let agent_id = match query.agent_id.as_deref().filter(|id| !id.is_empty()) {
        Some(agent_id) => agent_id.to_string(),
        None => state.upstream.config().agent_id()?.to_string(),
    };

    let items = state
        .upstream
        .history(&agent_id, query.effective_limit())
        .await?;
    let fetched = items.len();
    let data = query.apply(items, chrono::Utc::now());
    tracing::debug!(agent_id = %agent_id, fetched = fetched, returned = data.len(), "history listed");
    Ok(Json(HistoryResponse { data }))
}

async fn not_found(uri: Uri) -> ApiError {
    ChatError::NotFound {
        path: uri.path().to_string(),
    }
    .into()
}
