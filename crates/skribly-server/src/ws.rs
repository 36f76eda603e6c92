//! Socket lifecycle and inbound event routing.
//!
//! Each connection gets a writer task fed by its broadcaster channel, so
//! outbound delivery stays FIFO per socket. The read loop decodes the JSON
//! envelope and routes to the engine with authorization gating; any handler
//! failure becomes an `error {message}` reply and mutates nothing.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use skribly_core::events::{
    AuthenticationSuccessMsg, CanvasClearedMsg, ChangeToolMsg, ClientEvent,
    ConnectionConfirmedMsg, DrawDataMsg, DrawMoveMsg, DrawStartMsg, ErrorMsg,
    MAX_BRUSH_SIZE, MIN_BRUSH_SIZE, PlayerDisconnectedMsg, PlayerJoinedMsg, PlayerLeftMsg,
    RoomInfoMsg, RoomJoinedMsg, RoomLeftMsg, RoomUpdatedMsg, ServerEvent, ToolChangedMsg,
};
use skribly_core::time::epoch_secs;

use crate::auth::session_id_from_headers;
use crate::broadcast::SocketId;
use crate::engine;
use crate::error::EventError;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_hint = session_id_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_hint))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_hint: Option<String>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (socket_id, rx) = state.broadcaster.register();
    spawn_writer(ws_sender, rx);

    let confirmed = connection_confirmed(&state, session_hint.as_deref()).await;
    state
        .broadcaster
        .send_to_socket(socket_id, &ServerEvent::ConnectionConfirmed(confirmed));

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => dispatch(&state, socket_id, text.as_str()).await,
            Message::Close(_) => break,
            _ => continue,
        }
    }

    // Transient disconnect: unbind the socket, keep room membership.
    let session_id = state.broadcaster.session_of(socket_id);
    state.broadcaster.unbind(socket_id);
    if let Some(session_id) = session_id {
        let in_room = {
            let registry = state.registry.read().await;
            registry
                .get_user(&session_id)
                .and_then(|u| u.current_room.map(|room| (room, u.username)))
        };
        if let Some((room_id, username)) = in_room {
            state
                .to_room(
                    &room_id,
                    &ServerEvent::PlayerDisconnected(PlayerDisconnectedMsg {
                        player_id: session_id.clone(),
                        username,
                    }),
                )
                .await;
        }
        tracing::info!(socket_id, session = %session_id, "Client disconnected");
    } else {
        tracing::info!(socket_id, "Anonymous client disconnected");
    }
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });
}

async fn connection_confirmed(
    state: &AppState,
    session_hint: Option<&str>,
) -> ConnectionConfirmedMsg {
    match session_hint {
        Some(session_id) => {
            let user = {
                let registry = state.registry.read().await;
                registry.get_user(session_id)
            };
            match user {
                Some(user) => ConnectionConfirmedMsg {
                    message: "Successfully connected to server".to_string(),
                    user_id: Some(session_id.to_string()),
                    username: Some(user.username),
                    status: "connected".to_string(),
                },
                None => ConnectionConfirmedMsg {
                    message: "Connected but session invalid".to_string(),
                    user_id: Some(session_id.to_string()),
                    username: None,
                    status: "connected_no_session".to_string(),
                },
            }
        },
        None => ConnectionConfirmedMsg {
            message: "Connected but not authenticated".to_string(),
            user_id: None,
            username: None,
            status: "connected_anonymous".to_string(),
        },
    }
}

async fn dispatch(state: &AppState, socket_id: SocketId, text: &str) {
    let event = match ClientEvent::parse(text) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::debug!(socket_id, error = %e, "Undecodable socket event");
            state
                .broadcaster
                .send_to_socket(socket_id, &ServerEvent::error(e.to_string()));
            return;
        },
    };
    tracing::debug!(socket_id, event = event.name(), "Socket event");

    if let ClientEvent::Authenticate(msg) = &event {
        authenticate(state, socket_id, &msg.user_id).await;
        return;
    }

    if let Err(e) = route(state, socket_id, event).await {
        state
            .broadcaster
            .send_to_socket(socket_id, &ServerEvent::error(e.to_string()));
    }
}

async fn authenticate(state: &AppState, socket_id: SocketId, user_id: &str) {
    let user = {
        let registry = state.registry.read().await;
        registry.get_user(user_id)
    };
    match user {
        Some(user) => {
            state.broadcaster.bind(socket_id, user_id);
            tracing::info!(socket_id, username = %user.username, "Socket authenticated");
            state.broadcaster.send_to_socket(
                socket_id,
                &ServerEvent::AuthenticationSuccess(Box::new(AuthenticationSuccessMsg {
                    message: "Socket authenticated successfully".to_string(),
                    user,
                })),
            );
        },
        None => {
            tracing::debug!(socket_id, user_id, "Authentication failed: unknown session");
            state.broadcaster.send_to_socket(
                socket_id,
                &ServerEvent::AuthenticationFailed(ErrorMsg {
                    message: "Invalid user session - please refresh page".to_string(),
                }),
            );
        },
    }
}

fn session_of(state: &AppState, socket_id: SocketId) -> Result<String, EventError> {
    state
        .broadcaster
        .session_of(socket_id)
        .ok_or(EventError::Unauthenticated)
}

async fn route(state: &AppState, socket_id: SocketId, event: ClientEvent) -> Result<(), EventError> {
    match event {
        // Handled before routing
        ClientEvent::Authenticate(_) => Ok(()),
        ClientEvent::JoinRoom(msg) => join_room(state, socket_id, &msg.room_id).await,
        ClientEvent::LeaveRoom(msg) => leave_room(state, socket_id, &msg.room_id).await,
        ClientEvent::GetRoomInfo(msg) => room_info(state, socket_id, &msg.room_id).await,
        ClientEvent::StartGame => {
            let session_id = session_of(state, socket_id)?;
            engine::start_game(state, &session_id).await
        },
        ClientEvent::SelectWord(msg) => {
            let session_id = session_of(state, socket_id)?;
            engine::select_word(state, &session_id, &msg.word).await
        },
        ClientEvent::SubmitGuess(msg) => {
            let session_id = session_of(state, socket_id)?;
            engine::submit_guess(state, &session_id, &msg.guess).await
        },
        ClientEvent::SendChatMessage(msg) => {
            let session_id = session_of(state, socket_id)?;
            engine::send_chat(state, &session_id, &msg.message).await
        },
        ClientEvent::DrawStart(msg) => draw_start(state, socket_id, msg).await,
        ClientEvent::DrawMove(msg) => draw_move(state, socket_id, msg).await,
        ClientEvent::DrawEnd => draw_end(state, socket_id).await,
        ClientEvent::ClearCanvas => clear_canvas(state, socket_id).await,
        ClientEvent::ChangeTool(msg) => change_tool(state, socket_id, msg).await,
        ClientEvent::TurnTimeout(msg) => {
            let session_id = session_of(state, socket_id)?;
            engine::client_turn_timeout(state, &session_id, &msg.room_id).await
        },
    }
}

async fn join_room(state: &AppState, socket_id: SocketId, room_id: &str) -> Result<(), EventError> {
    let session_id = session_of(state, socket_id)?;
    let (detail, user) = {
        let mut registry = state.registry.write().await;
        let mut user = registry
            .get_user(&session_id)
            .ok_or(EventError::Unauthenticated)?;
        let room = registry.get_room(room_id).ok_or(EventError::RoomNotFound)?;
        // Membership is established over HTTP first; the socket join only
        // attaches this connection to the room.
        if !room.contains(&session_id) {
            return Err(EventError::NotAuthorized(
                "User not in room. Please join via HTTP first.",
            ));
        }
        registry.set_current_room(&session_id, Some(room_id.to_string()));
        user.current_room = Some(room_id.to_string());
        let detail = registry.room_detail(room_id).ok_or(EventError::RoomNotFound)?;
        (detail, user)
    };

    state.broadcaster.send_to_socket(
        socket_id,
        &ServerEvent::RoomJoined(Box::new(RoomJoinedMsg {
            room: detail.clone(),
            user: user.clone(),
        })),
    );
    state
        .to_room_except(
            room_id,
            &session_id,
            &ServerEvent::PlayerJoined(Box::new(PlayerJoinedMsg {
                player_id: session_id.clone(),
                username: user.username,
                room: detail,
            })),
        )
        .await;
    tracing::info!(room = %room_id, session = %session_id, "Joined room via socket");
    Ok(())
}

async fn leave_room(state: &AppState, socket_id: SocketId, room_id: &str) -> Result<(), EventError> {
    let session_id = session_of(state, socket_id)?;
    let outcome = engine::leave_room(state, &session_id, room_id).await?;
    state
        .broadcaster
        .send_to_socket(socket_id, &ServerEvent::RoomLeft(RoomLeftMsg { success: true }));

    if outcome.room.is_some() {
        // Re-snapshot: the departure may have ended the current turn
        let fresh = {
            let registry = state.registry.read().await;
            registry.room_detail(room_id)
        };
        if let Some(detail) = fresh {
            state
                .to_room(
                    room_id,
                    &ServerEvent::PlayerLeft(Box::new(PlayerLeftMsg {
                        player_id: session_id.clone(),
                        username: outcome.user.username,
                        room: detail.clone(),
                    })),
                )
                .await;
            state
                .to_room(
                    room_id,
                    &ServerEvent::RoomUpdated(Box::new(RoomUpdatedMsg {
                        room: detail,
                        event: None,
                        player_id: None,
                    })),
                )
                .await;
        }
    }
    tracing::info!(room = %room_id, session = %session_id, "Left room");
    Ok(())
}

async fn room_info(state: &AppState, socket_id: SocketId, room_id: &str) -> Result<(), EventError> {
    let _session_id = session_of(state, socket_id)?;
    let detail = {
        let registry = state.registry.read().await;
        registry.room_detail(room_id).ok_or(EventError::RoomNotFound)?
    };
    state
        .broadcaster
        .send_to_socket(socket_id, &ServerEvent::RoomInfo(Box::new(RoomInfoMsg { room: detail })));
    Ok(())
}

struct DrawContext {
    session_id: String,
    username: String,
    host: String,
    current_drawer: Option<String>,
    players: Vec<String>,
}

async fn draw_context(state: &AppState, socket_id: SocketId) -> Result<DrawContext, EventError> {
    let session_id = session_of(state, socket_id)?;
    let registry = state.registry.read().await;
    let user = registry
        .get_user(&session_id)
        .ok_or(EventError::Unauthenticated)?;
    let room_id = user.current_room.ok_or(EventError::NotInRoom)?;
    let room = registry.get_room(&room_id).ok_or(EventError::RoomNotFound)?;
    Ok(DrawContext {
        session_id,
        username: user.username,
        host: room.host,
        current_drawer: room.game_state.current_drawer,
        players: room.players,
    })
}

/// Stroke relay is drawer-gated whenever a turn is active; nothing is
/// rasterized or stored server-side.
async fn draw_start(
    state: &AppState,
    socket_id: SocketId,
    msg: DrawStartMsg,
) -> Result<(), EventError> {
    let ctx = draw_context(state, socket_id).await?;
    if ctx
        .current_drawer
        .as_deref()
        .is_some_and(|d| d != ctx.session_id)
    {
        return Err(EventError::NotDrawer);
    }
    if !msg.x.is_finite() || !msg.y.is_finite() {
        return Err(EventError::InvalidInput("Invalid coordinates"));
    }
    if !(MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).contains(&msg.size) {
        return Err(EventError::InvalidInput("Invalid brush size"));
    }

    state.broadcaster.to_sessions_except(
        &ctx.players,
        &ctx.session_id,
        &ServerEvent::DrawData(DrawDataMsg {
            kind: "start".to_string(),
            x: Some(msg.x),
            y: Some(msg.y),
            color: Some(msg.color),
            size: Some(msg.size),
            tool: Some(msg.tool),
            timestamp: epoch_secs(),
        }),
    );
    Ok(())
}

async fn draw_move(
    state: &AppState,
    socket_id: SocketId,
    msg: DrawMoveMsg,
) -> Result<(), EventError> {
    let ctx = draw_context(state, socket_id).await?;
    if ctx
        .current_drawer
        .as_deref()
        .is_some_and(|d| d != ctx.session_id)
    {
        return Err(EventError::NotDrawer);
    }
    if !msg.x.is_finite() || !msg.y.is_finite() {
        return Err(EventError::InvalidInput("Invalid coordinates"));
    }

    state.broadcaster.to_sessions_except(
        &ctx.players,
        &ctx.session_id,
        &ServerEvent::DrawData(DrawDataMsg {
            kind: "move".to_string(),
            x: Some(msg.x),
            y: Some(msg.y),
            color: None,
            size: None,
            tool: None,
            timestamp: epoch_secs(),
        }),
    );
    Ok(())
}

async fn draw_end(state: &AppState, socket_id: SocketId) -> Result<(), EventError> {
    let ctx = draw_context(state, socket_id).await?;
    if ctx
        .current_drawer
        .as_deref()
        .is_some_and(|d| d != ctx.session_id)
    {
        return Err(EventError::NotDrawer);
    }

    state.broadcaster.to_sessions_except(
        &ctx.players,
        &ctx.session_id,
        &ServerEvent::DrawData(DrawDataMsg {
            kind: "end".to_string(),
            x: None,
            y: None,
            color: None,
            size: None,
            tool: None,
            timestamp: epoch_secs(),
        }),
    );
    Ok(())
}

async fn clear_canvas(state: &AppState, socket_id: SocketId) -> Result<(), EventError> {
    let ctx = draw_context(state, socket_id).await?;
    let is_drawer = ctx.current_drawer.as_deref() == Some(ctx.session_id.as_str());
    let is_host = ctx.host == ctx.session_id;
    if !is_drawer && !is_host {
        return Err(EventError::NotAuthorized("Not authorized to clear canvas"));
    }

    state.broadcaster.to_sessions(
        &ctx.players,
        &ServerEvent::CanvasCleared(CanvasClearedMsg {
            timestamp: epoch_secs(),
            cleared_by: ctx.username,
        }),
    );
    Ok(())
}

async fn change_tool(
    state: &AppState,
    socket_id: SocketId,
    msg: ChangeToolMsg,
) -> Result<(), EventError> {
    let ctx = draw_context(state, socket_id).await?;
    if ctx.current_drawer.as_deref() != Some(ctx.session_id.as_str()) {
        return Err(EventError::NotDrawer);
    }
    if let Some(size) = msg.size
        && !(MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).contains(&size)
    {
        return Err(EventError::InvalidInput("Invalid size"));
    }

    state.broadcaster.to_sessions_except(
        &ctx.players,
        &ctx.session_id,
        &ServerEvent::ToolChanged(ToolChangedMsg {
            tool: msg.tool,
            color: msg.color,
            size: msg.size,
            user: ctx.username,
        }),
    );
    Ok(())
}
