use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use skribly_core::events::ServerEvent;

pub type SocketId = u64;

/// Outbound channel for one socket. Bounded so a stalled client cannot
/// hold memory hostage; full channels are skipped, not awaited.
pub type SocketSender = mpsc::Sender<Message>;

struct SocketEntry {
    tx: SocketSender,
    session_id: Option<String>,
}

#[derive(Default)]
struct Routes {
    sockets: HashMap<SocketId, SocketEntry>,
    /// Reverse index: session → all of its live sockets.
    sessions: HashMap<String, Vec<SocketId>>,
}

/// Typed event fan-out over the socket routing table. Each socket's writer
/// task drains its channel in order, so per-socket delivery is FIFO.
pub struct Broadcaster {
    routes: Mutex<Routes>,
    next_socket_id: AtomicU64,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            routes: Mutex::new(Routes::default()),
            next_socket_id: AtomicU64::new(1),
            buffer,
        }
    }

    /// Register a new socket; the returned receiver feeds its writer task.
    pub fn register(&self) -> (SocketId, mpsc::Receiver<Message>) {
        let id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut routes = self.routes.lock().expect("broadcaster lock");
        routes.sockets.insert(
            id,
            SocketEntry {
                tx,
                session_id: None,
            },
        );
        (id, rx)
    }

    /// Bind an authenticated socket to its session. Rebinding to a new
    /// session moves the socket in the reverse index.
    pub fn bind(&self, socket_id: SocketId, session_id: &str) {
        let mut routes = self.routes.lock().expect("broadcaster lock");
        let Some(entry) = routes.sockets.get_mut(&socket_id) else {
            return;
        };
        let previous = entry.session_id.replace(session_id.to_string());
        if let Some(prev) = previous {
            detach(&mut routes.sessions, &prev, socket_id);
        }
        routes
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push(socket_id);
    }

    /// The session an authenticated socket is bound to.
    pub fn session_of(&self, socket_id: SocketId) -> Option<String> {
        let routes = self.routes.lock().expect("broadcaster lock");
        routes.sockets.get(&socket_id)?.session_id.clone()
    }

    /// Drop a socket from the routing table (disconnect).
    pub fn unbind(&self, socket_id: SocketId) {
        let mut routes = self.routes.lock().expect("broadcaster lock");
        if let Some(entry) = routes.sockets.remove(&socket_id)
            && let Some(session) = entry.session_id
        {
            detach(&mut routes.sessions, &session, socket_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.routes.lock().expect("broadcaster lock").sockets.len()
    }

    /// Send to a single socket regardless of authentication state.
    pub fn send_to_socket(&self, socket_id: SocketId, event: &ServerEvent) {
        let msg = encode(event);
        let routes = self.routes.lock().expect("broadcaster lock");
        if let Some(entry) = routes.sockets.get(&socket_id)
            && entry.tx.try_send(msg).is_err()
        {
            tracing::debug!(socket_id, "Skipping send to slow or closed socket");
        }
    }

    /// Deliver to every socket bound to the session.
    pub fn to_session(&self, session_id: &str, event: &ServerEvent) {
        let sessions = [session_id.to_string()];
        self.fan_out(&sessions, None, event);
    }

    /// Deliver to every socket of every listed session.
    pub fn to_sessions(&self, sessions: &[String], event: &ServerEvent) {
        self.fan_out(sessions, None, event);
    }

    /// Deliver to every listed session except one (typically the sender).
    pub fn to_sessions_except(&self, sessions: &[String], except: &str, event: &ServerEvent) {
        self.fan_out(sessions, Some(except), event);
    }

    fn fan_out(&self, sessions: &[String], except: Option<&str>, event: &ServerEvent) {
        let msg = encode(event);
        let routes = self.routes.lock().expect("broadcaster lock");
        for session in sessions {
            if except.is_some_and(|e| e == session) {
                continue;
            }
            let Some(socket_ids) = routes.sessions.get(session) else {
                continue;
            };
            for socket_id in socket_ids {
                if let Some(entry) = routes.sockets.get(socket_id)
                    && entry.tx.try_send(msg.clone()).is_err()
                {
                    tracing::debug!(
                        socket_id,
                        session = %session,
                        "Skipping broadcast to slow or closed socket"
                    );
                }
            }
        }
    }
}

fn detach(sessions: &mut HashMap<String, Vec<SocketId>>, session: &str, socket_id: SocketId) {
    if let Some(ids) = sessions.get_mut(session) {
        ids.retain(|id| *id != socket_id);
        if ids.is_empty() {
            sessions.remove(session);
        }
    }
}

fn encode(event: &ServerEvent) -> Message {
    Message::Text(event.to_json().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_event(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        match rx.try_recv().expect("expected a message") {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bound_socket_receives_session_events() {
        let b = Broadcaster::new(8);
        let (id, mut rx) = b.register();
        b.bind(id, "sess-1");

        b.to_session("sess-1", &ServerEvent::error("ping"));
        let v = recv_event(&mut rx);
        assert_eq!(v["event"], "error");
        assert_eq!(v["data"]["message"], "ping");
    }

    #[tokio::test]
    async fn unbound_socket_receives_nothing_via_session() {
        let b = Broadcaster::new(8);
        let (_id, mut rx) = b.register();
        b.to_session("sess-1", &ServerEvent::error("ping"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fan_out_skips_excepted_session() {
        let b = Broadcaster::new(8);
        let (a, mut rx_a) = b.register();
        let (c, mut rx_c) = b.register();
        b.bind(a, "alice");
        b.bind(c, "bob");

        let sessions = vec!["alice".to_string(), "bob".to_string()];
        b.to_sessions_except(&sessions, "alice", &ServerEvent::error("hi"));
        assert!(rx_a.try_recv().is_err());
        let v = recv_event(&mut rx_c);
        assert_eq!(v["data"]["message"], "hi");
    }

    #[tokio::test]
    async fn multiple_sockets_per_session_all_receive() {
        let b = Broadcaster::new(8);
        let (s1, mut rx1) = b.register();
        let (s2, mut rx2) = b.register();
        b.bind(s1, "alice");
        b.bind(s2, "alice");

        b.to_session("alice", &ServerEvent::error("both"));
        assert_eq!(recv_event(&mut rx1)["data"]["message"], "both");
        assert_eq!(recv_event(&mut rx2)["data"]["message"], "both");
    }

    #[tokio::test]
    async fn unbind_removes_socket_from_reverse_index() {
        let b = Broadcaster::new(8);
        let (id, mut rx) = b.register();
        b.bind(id, "alice");
        b.unbind(id);

        b.to_session("alice", &ServerEvent::error("gone"));
        assert!(rx.try_recv().is_err());
        assert_eq!(b.connection_count(), 0);
    }

    #[tokio::test]
    async fn rebind_moves_socket_between_sessions() {
        let b = Broadcaster::new(8);
        let (id, mut rx) = b.register();
        b.bind(id, "alice");
        b.bind(id, "bob");

        b.to_session("alice", &ServerEvent::error("stale"));
        assert!(rx.try_recv().is_err());
        b.to_session("bob", &ServerEvent::error("fresh"));
        assert_eq!(recv_event(&mut rx)["data"]["message"], "fresh");
    }

    #[tokio::test]
    async fn full_channel_is_skipped_not_blocked() {
        let b = Broadcaster::new(1);
        let (id, mut rx) = b.register();
        b.bind(id, "alice");

        b.to_session("alice", &ServerEvent::error("one"));
        b.to_session("alice", &ServerEvent::error("two")); // dropped, channel full
        assert_eq!(recv_event(&mut rx)["data"]["message"], "one");
        assert!(rx.try_recv().is_err());
    }
}
