//! Session extraction and the `/api/auth` surface.
//!
//! A session id may arrive three ways, checked in order: the
//! `skribly_session` cookie the server sets, the legacy
//! `skribly_session_id` cookie, or the `X-Session-ID` header (used by
//! cross-origin clients that cannot carry cookies).

use axum::Json;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse};
use serde::Deserialize;

use skribly_core::user::username_is_valid;

use crate::engine;
use crate::error::ApiError;
use crate::registry::RegistryError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "skribly_session";
pub const SESSION_ID_COOKIE: &str = "skribly_session_id";
pub const SESSION_HEADER: &str = "x-session-id";

/// Pull the session id out of the request headers, if present.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookies) = cookie_header.to_str() else {
            continue;
        };
        for pair in cookies.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next().unwrap_or_default();
            if name == SESSION_COOKIE || name == SESSION_ID_COOKIE {
                let value = parts.next().unwrap_or_default().trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extractor for routes that require a session id (existence of the user
/// is still the handler's concern, so it can answer 404 vs 401 precisely).
pub struct SessionId(pub String);

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        session_id_from_headers(&parts.headers)
            .map(SessionId)
            .ok_or_else(ApiError::not_authenticated)
    }
}

fn session_cookies(session_id: &str) -> [(header::HeaderName, String); 2] {
    [
        (
            header::SET_COOKIE,
            format!("{SESSION_COOKIE}={session_id}; Path=/; SameSite=Lax"),
        ),
        (
            header::SET_COOKIE,
            format!("{SESSION_ID_COOKIE}={session_id}; Path=/; SameSite=Lax"),
        ),
    ]
}

fn expired_cookies() -> [(header::HeaderName, String); 2] {
    [
        (
            header::SET_COOKIE,
            format!("{SESSION_COOKIE}=; Path=/; Max-Age=0"),
        ),
        (
            header::SET_COOKIE,
            format!("{SESSION_ID_COOKIE}=; Path=/; Max-Age=0"),
        ),
    ]
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub username: String,
    pub avatar_url: Option<String>,
}

/// POST /api/auth/session — create a user session and set its cookies.
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let username = body.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }

    let user = {
        let mut registry = state.registry.write().await;
        registry.create_user(username, body.avatar_url)
    }
    .map_err(|e| match e {
        RegistryError::UsernameTaken => ApiError::Invalid {
            code: "USERNAME_TAKEN",
            message: e.to_string(),
        },
        _ => ApiError::BadRequest(e.to_string()),
    })?;

    Ok((
        StatusCode::CREATED,
        AppendHeaders(session_cookies(&user.session_id)),
        Json(serde_json::json!({
            "success": true,
            "session_id": user.session_id,
            "user": user,
        })),
    ))
}

/// GET /api/auth/session — return the current user.
pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = session_id_from_headers(&headers).ok_or(ApiError::Unauthorized {
        code: "NOT_AUTHENTICATED",
        message: "No active session".to_string(),
    })?;

    let user = {
        let registry = state.registry.read().await;
        registry.get_user(&session_id)
    }
    .ok_or(ApiError::NotFound {
        code: None,
        message: "Session not found".to_string(),
    })?;

    Ok(Json(serde_json::json!({ "success": true, "user": user })))
}

/// DELETE /api/auth/session — destroy the session. The user leaves their
/// room first so membership and score invariants hold for the remainder.
pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(session_id) = session_id_from_headers(&headers) {
        let room_id = {
            let registry = state.registry.read().await;
            registry.get_user(&session_id).and_then(|u| u.current_room)
        };
        if let Some(room_id) = room_id {
            let _ = engine::leave_room(&state, &session_id, &room_id).await;
        }
        let mut registry = state.registry.write().await;
        registry.delete_user(&session_id);
    }

    (
        AppendHeaders(expired_cookies()),
        Json(serde_json::json!({ "success": true })),
    )
}

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    #[serde(default)]
    pub username: String,
}

/// POST /api/auth/validate — username availability check.
pub async fn validate_username(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    let username = body.username.trim();
    if username.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "valid": false, "error": "Username is required" })),
        );
    }
    if !username_is_valid(username) {
        return (
            StatusCode::BAD_REQUEST,
            Json(
                serde_json::json!({ "valid": false, "error": "Username must be 3-20 characters" }),
            ),
        );
    }
    let available = {
        let registry = state.registry.read().await;
        registry.username_available(username)
    };
    if !available {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "valid": false, "error": "Username is already taken" })),
        );
    }
    (StatusCode::OK, Json(serde_json::json!({ "valid": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn session_from_primary_cookie() {
        let headers = headers_with(header::COOKIE, "skribly_session=abc-123; theme=dark");
        assert_eq!(session_id_from_headers(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn session_from_explicit_cookie() {
        let headers = headers_with(header::COOKIE, "other=1; skribly_session_id=xyz");
        assert_eq!(session_id_from_headers(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn session_from_header_fallback() {
        let headers = headers_with(
            header::HeaderName::from_static(SESSION_HEADER),
            "header-session",
        );
        assert_eq!(
            session_id_from_headers(&headers).as_deref(),
            Some("header-session")
        );
    }

    #[test]
    fn cookie_takes_precedence_over_header() {
        let mut headers = headers_with(header::COOKIE, "skribly_session=from-cookie");
        headers.insert(
            header::HeaderName::from_static(SESSION_HEADER),
            HeaderValue::from_static("from-header"),
        );
        assert_eq!(
            session_id_from_headers(&headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn missing_session_is_none() {
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
        let headers = headers_with(header::COOKIE, "skribly_session=");
        assert_eq!(session_id_from_headers(&headers), None);
    }
}
