use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub rooms: usize,
    pub players: usize,
    pub active_timers: usize,
    pub words: HashMap<&'static str, usize>,
}

async fn build_health(state: &AppState) -> HealthResponse {
    let (rooms, players) = {
        let registry = state.registry.read().await;
        (registry.room_count(), registry.player_count())
    };
    HealthResponse {
        status: "healthy",
        service: "skribly-server",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.broadcaster.connection_count(),
        rooms,
        players,
        active_timers: state.timers.active_count(),
        words: state.words.counts(),
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(build_health(&state).await)
}

/// GET /api/health — same payload plus an API-reachability marker.
pub async fn api_health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = build_health(&state).await;
    let mut value = serde_json::to_value(&health).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("api".to_string(), serde_json::json!("working"));
    }
    Json(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "healthy",
            service: "skribly-server",
            version: "0.1.0",
            connections: 4,
            rooms: 2,
            players: 5,
            active_timers: 1,
            words: HashMap::new(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"healthy\""));
        assert!(json.contains("\"connections\":4"));
        assert!(json.contains("\"players\":5"));
    }
}
