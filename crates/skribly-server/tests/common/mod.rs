use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use skribly_server::build_app;
use skribly_server::config::{GameTimings, ServerConfig};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _serve: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with default config.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    /// Short engine phases so game-flow tests don't sit out real timers.
    pub async fn with_fast_timers() -> Self {
        let config = ServerConfig {
            game: GameTimings {
                word_selection_secs: 2,
                results_secs: 1,
                intermission_secs: 1,
            },
            ..ServerConfig::default()
        };
        Self::from_config(config).await
    }

    async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _serve: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// POST /api/auth/session, returning the new session id.
pub async fn create_session(server: &TestServer, username: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/session", server.base_url()))
        .json(&serde_json::json!({ "username": username }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "session create failed for {username}");
    let body: serde_json::Value = resp.json().await.unwrap();
    body["session_id"].as_str().unwrap().to_string()
}

/// POST /api/rooms/create with the session conveyed via X-Session-ID.
/// Returns the created room's JSON.
pub async fn create_room(
    server: &TestServer,
    session_id: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/rooms/create", server.base_url()))
        .header("X-Session-ID", session_id)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "room create failed");
    let body: serde_json::Value = resp.json().await.unwrap();
    body["room"].clone()
}

/// POST /api/rooms/{id}/join. Returns the full response body.
pub async fn join_room(
    server: &TestServer,
    session_id: &str,
    room_id: &str,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/rooms/{room_id}/join", server.base_url()))
        .header("X-Session-ID", session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "room join failed");
    resp.json().await.unwrap()
}

pub async fn ws_connect(server: &TestServer) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();
    stream
}

/// Send one `{event, data}` frame.
pub async fn ws_send(stream: &mut WsStream, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data }).to_string();
    stream.send(Message::Text(frame.into())).await.unwrap();
}

/// Read the next event frame (5 s timeout).
pub async fn ws_read(stream: &mut WsStream) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket event")
}

/// Read frames until one with the given event name arrives, skipping
/// everything else (timer ticks, chat, ...). Panics after 100 frames.
pub async fn ws_read_until(stream: &mut WsStream, event: &str) -> serde_json::Value {
    for _ in 0..100 {
        let frame = ws_read(stream).await;
        if frame["event"] == event {
            return frame;
        }
    }
    panic!("Event {event} never arrived");
}

/// Connect a socket, swallow `connection_confirmed`, and authenticate it.
pub async fn ws_auth(server: &TestServer, session_id: &str) -> WsStream {
    let mut stream = ws_connect(server).await;
    let confirmed = ws_read(&mut stream).await;
    assert_eq!(confirmed["event"], "connection_confirmed");
    ws_send(
        &mut stream,
        "authenticate",
        serde_json::json!({ "user_id": session_id }),
    )
    .await;
    ws_read_until(&mut stream, "authentication_success").await;
    stream
}

/// Authenticate and attach the socket to a room the session already joined
/// over HTTP.
pub async fn ws_join(server: &TestServer, session_id: &str, room_id: &str) -> WsStream {
    let mut stream = ws_auth(server, session_id).await;
    ws_send(
        &mut stream,
        "join_room",
        serde_json::json!({ "room_id": room_id }),
    )
    .await;
    ws_read_until(&mut stream, "room_joined").await;
    stream
}
