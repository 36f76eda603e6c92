use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// HTTP-level failure. Serializes to `{"error": …}` with a machine-usable
/// `code` field where one exists.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Invalid { code: &'static str, message: String },
    Unauthorized { code: &'static str, message: String },
    Forbidden(String),
    NotFound { code: Option<&'static str>, message: String },
    Internal(String),
}

impl ApiError {
    pub fn not_authenticated() -> Self {
        Self::Unauthorized {
            code: "NOT_AUTHENTICATED",
            message: "Authentication required. Please create a username first.".to_string(),
        }
    }

    pub fn session_expired() -> Self {
        Self::Unauthorized {
            code: "SESSION_EXPIRED",
            message: "Your session has expired. Please create a username again.".to_string(),
        }
    }

    pub fn room_not_found(room_id: &str) -> Self {
        Self::NotFound {
            code: Some("ROOM_NOT_FOUND"),
            message: format!("Room {room_id} not found. It may have been deleted or expired."),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m) | Self::Forbidden(m) | Self::Internal(m) => write!(f, "{m}"),
            Self::Invalid { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::NotFound { message, .. } => write!(f, "{message}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, None, m),
            Self::Invalid { code, message } => (StatusCode::BAD_REQUEST, Some(code), message),
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, Some(code), message)
            },
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, None, m),
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("INTERNAL_ERROR"),
                m,
            ),
        };
        let body = match code {
            Some(code) => serde_json::json!({ "error": message, "code": code }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

/// Socket-handler failure. The event router turns these into an
/// `error {message}` reply to the caller; no state is mutated on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    Unauthenticated,
    NotInRoom,
    RoomNotFound,
    NotHost,
    NotEnoughPlayers,
    GameInProgress,
    NotDrawer,
    NotYourWordSelection,
    DrawerCannotGuess,
    AlreadyGuessed,
    NotAuthorized(&'static str),
    BadState(&'static str),
    InvalidInput(&'static str),
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Unauthenticated => {
                "Authentication required. Please authenticate your socket connection first."
            },
            Self::NotInRoom => "Not in a room",
            Self::RoomNotFound => "Room not found",
            Self::NotHost => "Only host can start the game",
            Self::NotEnoughPlayers => "Need at least 2 players to start",
            Self::GameInProgress => "Game already in progress",
            Self::NotDrawer => "Not your turn to draw",
            Self::NotYourWordSelection => "Not your turn to select word",
            Self::DrawerCannotGuess => "You cannot guess your own drawing",
            Self::AlreadyGuessed => "You already guessed correctly",
            Self::NotAuthorized(m) | Self::BadState(m) | Self::InvalidInput(m) => m,
        };
        f.write_str(msg)
    }
}

impl std::error::Error for EventError {}
