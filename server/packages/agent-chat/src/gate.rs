use std::sync::Arc;

use agent_chat_error::ChatError;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::router::{ApiError, AppState};

pub const AUTH_COOKIE: &str = "auth-token";

/// Paths reachable without a token even when the gate is on.
const OPEN_PATHS: &[&str] = &["/api/health", "/api/auth/validate"];

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self { token: None }
    }

    pub fn with_token(token: String) -> Self {
        Self { token: Some(token) }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// An unconfigured gate accepts no password.
    pub fn accepts(&self, candidate: &str) -> bool {
        self.token.as_deref() == Some(candidate)
    }
}

pub(crate) async fn require_token(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if OPEN_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }

    let expected = match &state.auth.token {
        Some(token) => token.as_str(),
        None => return Ok(next.run(req).await),
    };

    let provided = extract_token(req.headers());
    if provided.as_deref() == Some(expected) {
        Ok(next.run(req).await)
    } else {
        tracing::debug!(path = %path, presented = provided.is_some(), "rejecting request without a valid token");
        Err(ChatError::TokenInvalid.into())
    }
}

/// Bearer header first, then the login cookie.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) {
        if let Some((scheme, rest)) = value.trim().split_once(' ') {
            if scheme.eq_ignore_ascii_case("bearer") {
                return Some(rest.trim().to_string());
            }
        }
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.to_string())
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

pub(crate) async fn validate_password(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ValidateResponse>, ApiError> {
    let request: ValidateRequest = serde_json::from_slice(&body)
        .map_err(|err| ChatError::invalid_request(format!("invalid request body: {err}")))?;
    let Some(password) = request.password.filter(|password| !password.is_empty()) else {
        return Err(ChatError::invalid_request("Password is required").into());
    };

    let valid = state.auth.accepts(&password);
    tracing::info!(valid = valid, gate_enabled = state.auth.is_enabled(), "access token validation");
    Ok(Json(ValidateResponse { valid }))
}
