//! `POST /api/leads/postback` and `GET /healthz`.
//!
//! EXECUTION ORDER per postback (fixed, never reordered):
//!   1. Authentication   (basic credential present)      → 401
//!   2. Authorization    (credential matches the tracker) → 403
//!   3. Media type       (JSON body)                       → 415
//!   4. Validation + ingestion                             → 422 / 500 / 200
//!
//! Nothing touches the database before step 4.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use leadtrack_core::{
    config::TrackerAuthConfig,
    engine::LeadEngine,
    error::{LeadError, ValidationErrors},
};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const POSTBACK_ROUTE: &str = "api.leads.postback";
pub const UNEXPECTED_MESSAGE: &str = "The given data was unexpected.";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<LeadEngine>>,
    pub auth:   Arc<TrackerAuthConfig>,
}

impl AppState {
    pub fn new(engine: LeadEngine) -> Self {
        let auth = Arc::new(engine.config.tracker_auth.clone());
        Self { engine: Arc::new(Mutex::new(engine)), auth }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Request authentication error")]
    Unauthenticated,

    #[error("Request authorization error")]
    Forbidden,

    #[error("Request media type error")]
    UnsupportedMediaType,

    #[error("Request validation error")]
    Validation(ValidationErrors),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl From<LeadError> for GatewayError {
    fn from(err: LeadError) -> Self {
        match err {
            LeadError::Validation(errors) => GatewayError::Validation(errors),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic"))],
                Json(json!({ "success": false, "message": "Unauthenticated." })),
            )
                .into_response(),
            GatewayError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({ "success": false, "message": "This action is unauthorized." })),
            )
                .into_response(),
            GatewayError::UnsupportedMediaType => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(json!({ "success": false, "message": "Unsupported media type." })),
            )
                .into_response(),
            GatewayError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "success": false, "errors": errors })),
            )
                .into_response(),
            GatewayError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": UNEXPECTED_MESSAGE })),
            )
                .into_response(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/leads/postback", post(postback))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn postback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    match handle_postback(&state, &headers, &body).await {
        Ok(()) => {
            log::info!(
                target: "tracker",
                "{POSTBACK_ROUTE}: Request handled; REQUEST.id={} RESPONSE.success=true",
                request.get("id").unwrap_or(&Value::Null)
            );
            Json(json!({ "success": true })).into_response()
        }
        Err(err) => {
            let response = err.to_string();
            if let GatewayError::Validation(errors) = &err {
                log::error!(
                    target: "tracker",
                    "{POSTBACK_ROUTE}: {response}; REQUEST={request} RESPONSE.success=false errors={errors}"
                );
            } else {
                log::error!(
                    target: "tracker",
                    "{POSTBACK_ROUTE}: {response}; REQUEST={request} RESPONSE.success=false"
                );
            }
            err.into_response()
        }
    }
}

async fn handle_postback(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<(), GatewayError> {
    authorize(&state.auth, headers)?;
    if !is_json(headers) {
        return Err(GatewayError::UnsupportedMediaType);
    }
    let body: Value = serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Map::new()));

    let engine = Arc::clone(&state.engine);
    let ingested = tokio::task::spawn_blocking(move || {
        let engine = engine.lock().unwrap_or_else(|e| e.into_inner());
        engine.ingest_postback(&body).map(|lead| lead.id)
    })
    .await
    .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let lead_id = ingested?;
    log::debug!("Postback applied to lead {lead_id}");
    Ok(())
}

/// Basic credentials from the Authorization header, if any were sent.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub fn authorize(auth: &TrackerAuthConfig, headers: &HeaderMap) -> Result<(), GatewayError> {
    if !headers.contains_key(header::AUTHORIZATION) {
        return Err(GatewayError::Unauthenticated);
    }
    match basic_credentials(headers) {
        Some((username, password))
            if !username.is_empty() && username == auth.username && password == auth.password =>
        {
            Ok(())
        }
        _ => Err(GatewayError::Forbidden),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> TrackerAuthConfig {
        TrackerAuthConfig { username: "tracker@leads.test".into(), password: "secret".into() }
    }

    fn headers_with(authorization: Option<&str>, content_type: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        if let Some(value) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn missing_header_is_unauthenticated_and_wrong_secret_is_forbidden() {
        let good = format!("Basic {}", STANDARD.encode("tracker@leads.test:secret"));
        let bad = format!("Basic {}", STANDARD.encode("tracker@leads.test:nope"));
        let empty = format!("Basic {}", STANDARD.encode(":"));

        assert!(matches!(authorize(&auth(), &headers_with(None, None)), Err(GatewayError::Unauthenticated)));
        assert!(authorize(&auth(), &headers_with(Some(&good), None)).is_ok());
        assert!(matches!(authorize(&auth(), &headers_with(Some(&bad), None)), Err(GatewayError::Forbidden)));
        assert!(matches!(authorize(&auth(), &headers_with(Some(&empty), None)), Err(GatewayError::Forbidden)));
        assert!(matches!(authorize(&auth(), &headers_with(Some("Bearer x"), None)), Err(GatewayError::Forbidden)));
    }

    #[test]
    fn json_media_types_are_recognised() {
        assert!(is_json(&headers_with(None, Some("application/json"))));
        assert!(is_json(&headers_with(None, Some("application/json; charset=utf-8"))));
        assert!(is_json(&headers_with(None, Some("application/vnd.tracker+json"))));
        assert!(!is_json(&headers_with(None, Some("text/plain"))));
        assert!(!is_json(&headers_with(None, None)));
    }
}
