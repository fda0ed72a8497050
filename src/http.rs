//! HTTP surface (§5, §6.3): the static auth page, auth lifecycle endpoints,
//! and the data endpoints the companion worker and operator tooling call.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use bridge_core::auth::AuthCoordinator;
use bridge_core::protocol::ProtocolAdapter;
use bridge_core::store::{MediaKind, MessageStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::services::ServeFile;
use tracing::{error, warn};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: MessageStore,
    pub auth: Arc<AuthCoordinator>,
    pub protocol: Arc<ProtocolAdapter>,
    pub api_key: String,
    /// `~`-expanded store directory (§6.4), needed to build the absolute
    /// media path returned by `POST /api/download`.
    pub store_dir: String,
}

/// Constant-time string comparison, to avoid leaking key material through
/// early-exit timing on a byte-by-byte compare.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check the `X-API-Key` header against the configured secret. An empty
/// configured key (dev mode) always authorizes. Returns `None` when
/// authorized, `Some(response)` otherwise.
fn check_auth(headers: &HeaderMap, api_key: &str) -> Option<(StatusCode, Json<Value>)> {
    if api_key.is_empty() {
        return None;
    }

    let unauthorized = || {
        Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        ))
    };

    let Some(header) = headers.get("x-api-key") else {
        return unauthorized();
    };
    let Ok(value) = header.to_str() else {
        return unauthorized();
    };

    if constant_time_eq(value, api_key) {
        None
    } else {
        unauthorized()
    }
}

/// `GET /api/health`.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = if state.protocol.is_connected().await {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({"status": status}))
}

/// `GET /api/auth/status`. No key required (§6.3) — the auth page itself
/// needs to poll this before any pairing has happened.
async fn auth_status(State(state): State<AppState>) -> Json<Value> {
    let connected = state.protocol.is_connected().await;
    let has_identity = state.protocol.has_identity_for_auth_view().await;
    let view = state.auth.view_with_override(connected, has_identity).await;
    Json(serde_json::to_value(view).unwrap_or_else(|_| json!({})))
}

/// `POST /api/auth/start`. Re-pairing runs the full connect/pair flow, which
/// blocks on the bot's event loop — spawned in the background so the HTTP
/// response returns immediately.
async fn auth_start(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let protocol = state.protocol.clone();
    tokio::spawn(async move {
        if let Err(e) = protocol.start_auth().await {
            error!("auth restart failed: {e}");
        }
    });

    Ok(Json(json!({"status": "starting"})))
}

/// `POST /api/auth/logout`.
async fn auth_logout(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    if let Err(e) = state.protocol.logout().await {
        warn!("logout failed: {e}");
    }

    Ok(Json(json!({"status": "logged_out"})))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    hours: Option<i64>,
}

/// `GET /api/messages/recent?hours=N`, default 48.
async fn messages_recent(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let hours = query.hours.unwrap_or(48);
    let mut rows = state.store.get_recent_messages(hours).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    // §4.3's write-through alias cache: upgrade any bare-phone-number chat
    // name using whatever push name has been observed for that jid since,
    // persisting the rewrite so future reads skip it.
    let protocol = state.protocol.clone();
    if let Err(e) = state
        .store
        .rewrite_bare_phone_chat_names(&mut rows, |chat_jid| {
            let protocol = protocol.clone();
            async move {
                let jid_user = chat_jid.split('@').next().unwrap_or(&chat_jid).to_string();
                protocol.resolve_known_name(&jid_user).await
            }
        })
        .await
    {
        warn!("failed to rewrite bare-phone chat names: {e}");
    }

    Ok(Json(serde_json::to_value(rows).unwrap_or_else(|_| json!([]))))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    recipient: String,
    #[serde(default)]
    message: String,
    media_path: Option<String>,
}

/// `POST /api/send` (§4.3). 400 on missing recipient or missing both
/// fields, 500 on an underlying send failure, 200 otherwise (§6.3).
async fn send(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(body): Json<SendRequest>,
) -> (StatusCode, Json<Value>) {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return err;
    }

    if body.recipient.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "recipient is required"})),
        );
    }
    if body.message.is_empty() && body.media_path.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "message or media_path is required"})),
        );
    }

    let result = match &body.media_path {
        Some(path) => send_media(&state, &body.recipient, path, &body.message).await,
        None => state
            .protocol
            .send_text(&body.recipient, &body.message)
            .await
            .map(|_| "sent".to_string()),
    };

    match result {
        Ok(msg) => (StatusCode::OK, Json(json!({"success": true, "message": msg}))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

async fn send_media(
    state: &AppState,
    recipient: &str,
    media_path: &str,
    caption: &str,
) -> Result<String, bridge_core::BridgeError> {
    let bytes = tokio::fs::read(media_path)
        .await
        .map_err(bridge_core::BridgeError::Io)?;
    let (kind, _mime) = bridge_core::media::infer(media_path);
    let filename = std::path::Path::new(media_path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string());
    let caption = if caption.is_empty() {
        None
    } else {
        Some(caption.to_string())
    };

    state
        .protocol
        .send_media(recipient, kind, bytes, filename, caption)
        .await
        .map(|_| "sent".to_string())
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    message_id: String,
    chat_jid: String,
}

/// `POST /api/download` (§4.3).
async fn download(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(body): Json<DownloadRequest>,
) -> (StatusCode, Json<Value>) {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return err;
    }

    if body.message_id.is_empty() || body.chat_jid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "message_id and chat_jid are required"})),
        );
    }

    let descriptor = match state
        .store
        .get_media_descriptor(&body.message_id, &body.chat_jid)
        .await
    {
        Ok(Some(d)) if d.is_complete() => d,
        Ok(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "no media for that message"})),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": e.to_string()})),
            )
        }
    };

    let filename = descriptor.filename.clone();
    let kind: MediaKind = descriptor.kind;

    match state.protocol.download(&body.chat_jid, &descriptor).await {
        Ok(_bytes) => {
            let sanitized_chat = body.chat_jid.replace(':', "_");
            let path = format!("{}/{sanitized_chat}/{filename}", state.store_dir);
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "downloaded",
                    "kind": kind.as_str(),
                    "filename": filename,
                    "path": path,
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct TranscribeRequest {
    message_id: String,
    chat_jid: String,
}

/// `POST /api/transcribe` (§6.3).
async fn transcribe(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(body): Json<TranscribeRequest>,
) -> (StatusCode, Json<Value>) {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return err;
    }

    if body.message_id.is_empty() || body.chat_jid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "message_id and chat_jid are required"})),
        );
    }

    match state
        .protocol
        .transcribe(&body.message_id, &body.chat_jid)
        .await
    {
        Ok(text) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "transcribed", "transcription": text})),
        ),
        Err(bridge_core::BridgeError::Validation(msg)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": msg})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

/// Build the router. `auth_page_path` points at the static HTML auth page.
pub fn build_router(state: AppState, auth_page_path: &str) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(auth_page_path))
        .route("/api/health", get(health))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/start", post(auth_start))
        .route("/api/auth/logout", post(auth_logout))
        .route("/api/messages/recent", get(messages_recent))
        .route("/api/send", post(send))
        .route("/api/download", post(download))
        .route("/api/transcribe", post(transcribe))
        .layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_and_rejects() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "wrong!"));
        assert!(!constant_time_eq("short", "muchlonger"));
    }

    #[test]
    fn check_auth_bypassed_when_key_empty() {
        let headers = HeaderMap::new();
        assert!(check_auth(&headers, "").is_none());
    }

    #[test]
    fn check_auth_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(check_auth(&headers, "secret").is_some());
    }

    #[test]
    fn check_auth_rejects_wrong_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "wrong".parse().unwrap());
        assert!(check_auth(&headers, "secret").is_some());
    }

    #[test]
    fn check_auth_accepts_correct_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(check_auth(&headers, "secret").is_none());
    }
}
