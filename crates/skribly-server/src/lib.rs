pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod registry;
pub mod state;
pub mod timer;
pub mod words;
pub mod ws;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config. Also spawns
/// the timer expiry worker that drives the game engine.
pub fn build_app(config: ServerConfig) -> (Router, AppState) {
    let cors = build_cors(&config);
    let (state, expiry_rx) = AppState::new(config);
    engine::spawn_expiry_worker(state.clone(), expiry_rx);

    let auth_routes = Router::new()
        .route(
            "/session",
            axum::routing::post(auth::create_session)
                .get(auth::get_session)
                .delete(auth::delete_session),
        )
        .route("/validate", axum::routing::post(auth::validate_username));

    let room_routes = Router::new()
        .route("/create", axum::routing::post(api::create_room))
        .route("/list", axum::routing::get(api::list_rooms))
        .route("/{room_id}", axum::routing::get(api::get_room))
        .route("/{room_id}/join", axum::routing::post(api::join_room));

    let game_routes = Router::new()
        .route("/stats", axum::routing::get(api::game_stats))
        .route("/room/{room_id}/status", axum::routing::get(api::room_status));

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/api/health", axum::routing::get(health::api_health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/rooms", room_routes)
        .nest("/api/game", game_routes)
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

/// Credentialed CORS for the configured origins. Session cookies require
/// explicit origins; wildcard would break credentials.
fn build_cors(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(auth::SESSION_HEADER),
            HeaderName::from_static("x-requested-with"),
        ])
}

/// Background task that periodically removes empty and aged-out rooms and
/// stops their timers.
pub fn spawn_room_reaper(state: AppState) {
    let interval_secs = state.config.rooms.reap_interval_secs;
    let max_age = state.config.rooms.max_age_secs;
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Room reaper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let removed = {
                        let mut registry = state.registry.write().await;
                        registry.reap_rooms(max_age)
                    };
                    for room_id in &removed {
                        state.timers.stop(room_id);
                    }
                }
            }
        }
    });
}
