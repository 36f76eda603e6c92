//! The `/api/rooms` and `/api/game` REST surface.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use skribly_core::events::{PlayerJoinedMsg, RoomUpdatedMsg, ServerEvent};
use skribly_core::room::{Difficulty, GameStateView, RoomSettings};

use crate::auth::SessionId;
use crate::error::ApiError;
use crate::registry::JoinError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomBody {
    pub name: Option<String>,
    pub rounds: Option<u32>,
    pub draw_time: Option<u32>,
    pub word_difficulty: Option<String>,
    pub max_players: Option<u32>,
}

/// POST /api/rooms/create
pub async fn create_room(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    body: Option<Json<CreateRoomBody>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let defaults = RoomSettings::default();
    let word_difficulty = match body.word_difficulty.as_deref() {
        None => defaults.word_difficulty,
        Some("easy") => Difficulty::Easy,
        Some("medium") => Difficulty::Medium,
        Some("hard") => Difficulty::Hard,
        Some(_) => return Err(ApiError::BadRequest("Invalid word difficulty".to_string())),
    };
    let settings = RoomSettings {
        rounds: body.rounds.unwrap_or(defaults.rounds),
        draw_time: body.draw_time.unwrap_or(defaults.draw_time),
        word_difficulty,
        max_players: body.max_players.unwrap_or(defaults.max_players),
    };
    settings
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let detail = {
        let mut registry = state.registry.write().await;
        registry
            .get_user(&session_id)
            .ok_or_else(ApiError::session_expired)?;
        let room = registry
            .create_room(&session_id, settings, body.name)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        registry
            .room_detail(&room.id)
            .ok_or_else(|| ApiError::Internal("Room vanished during creation".to_string()))?
    };

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "room": detail })),
    ))
}

/// GET /api/rooms/{room_id}
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let detail = {
        let registry = state.registry.read().await;
        registry.room_detail(&room_id)
    }
    .ok_or(ApiError::NotFound {
        code: None,
        message: "Room not found".to_string(),
    })?;

    Ok(Json(serde_json::json!({ "success": true, "room": detail })))
}

/// POST /api/rooms/{room_id}/join — idempotent for existing members.
pub async fn join_room(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (detail, username, added) = {
        let mut registry = state.registry.write().await;
        let user = registry
            .get_user(&session_id)
            .ok_or_else(ApiError::session_expired)?;

        let joined = registry.add_player(&room_id, &session_id);
        let (room, added) = joined.map_err(|e| match e {
            JoinError::RoomNotFound => ApiError::room_not_found(&room_id),
            JoinError::GameInProgress => ApiError::Invalid {
                code: "GAME_IN_PROGRESS",
                message: "This game is already in progress and cannot be joined.".to_string(),
            },
            JoinError::RoomFull => {
                let occupancy = registry
                    .get_room(&room_id)
                    .map(|r| format!("{}/{}", r.players.len(), r.settings.max_players))
                    .unwrap_or_default();
                ApiError::Invalid {
                    code: "ROOM_FULL",
                    message: format!("Room is full ({occupancy} players)"),
                }
            },
        })?;
        let detail = registry
            .room_detail(&room.id)
            .ok_or_else(|| ApiError::Internal("Room vanished during join".to_string()))?;
        (detail, user.username, added)
    };

    let message = if added {
        // Players already on the socket channel learn about the newcomer now
        state
            .to_room(
                &room_id,
                &ServerEvent::PlayerJoined(Box::new(PlayerJoinedMsg {
                    player_id: session_id.clone(),
                    username,
                    room: detail.clone(),
                })),
            )
            .await;
        state
            .to_room(
                &room_id,
                &ServerEvent::RoomUpdated(Box::new(RoomUpdatedMsg {
                    room: detail.clone(),
                    event: Some("player_joined".to_string()),
                    player_id: Some(session_id.clone()),
                })),
            )
            .await;
        format!("Successfully joined {}", detail.name)
    } else {
        "You are already in this room".to_string()
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "room": detail,
        "message": message,
    })))
}

/// GET /api/rooms/list — waiting rooms only.
pub async fn list_rooms(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry.read().await;
    Json(serde_json::json!({
        "success": true,
        "rooms": registry.waiting_rooms(),
        "total_rooms": registry.room_count(),
        "total_players": registry.player_count(),
    }))
}

/// GET /api/game/stats
pub async fn game_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry.read().await;
    Json(serde_json::json!({
        "success": true,
        "stats": {
            "active_rooms": registry.room_count(),
            "active_players": registry.player_count(),
            "server_status": "healthy",
        },
    }))
}

/// GET /api/game/room/{room_id}/status — members only.
pub async fn room_status(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let registry = state.registry.read().await;
    registry
        .get_user(&session_id)
        .ok_or_else(ApiError::session_expired)?;
    let room = registry.get_room(&room_id).ok_or(ApiError::NotFound {
        code: None,
        message: "Room not found".to_string(),
    })?;
    if !room.contains(&session_id) {
        return Err(ApiError::Forbidden("Not in this room".to_string()));
    }
    let detail = registry
        .room_detail(&room_id)
        .ok_or_else(|| ApiError::Internal("Room vanished".to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "room": detail,
        "game_state": GameStateView::from(&room.game_state),
    })))
}
