use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use skribly_core::events::ServerEvent;

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::registry::{Registry, SharedRegistry};
use crate::timer::{TimerExpiry, TimerService};
use crate::words::WordList;

/// Shared application state: every collaborator is explicitly constructed
/// here and injected, never reached through a global.
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub broadcaster: Arc<Broadcaster>,
    pub timers: Arc<TimerService>,
    pub words: Arc<WordList>,
    pub config: Arc<ServerConfig>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build the state graph. The returned receiver carries timer expiries
    /// and must be handed to `engine::spawn_expiry_worker`.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<TimerExpiry>) {
        let registry: SharedRegistry = Arc::new(RwLock::new(Registry::new()));
        let broadcaster = Arc::new(Broadcaster::new(config.limits.socket_send_buffer));
        let (timers, expiry_rx) =
            TimerService::new(Arc::clone(&registry), Arc::clone(&broadcaster));
        let words = Arc::new(WordList::load(&config.words_dir));
        (
            Self {
                registry,
                broadcaster,
                timers: Arc::new(timers),
                words,
                config: Arc::new(config),
                shutdown: CancellationToken::new(),
            },
            expiry_rx,
        )
    }

    /// Deliver an event to every player of a room. The player snapshot is
    /// taken under the registry lock; the fan-out happens after release.
    pub async fn to_room(&self, room_id: &str, event: &ServerEvent) {
        let players = {
            let registry = self.registry.read().await;
            registry.get_room(room_id).map(|r| r.players)
        };
        if let Some(players) = players {
            self.broadcaster.to_sessions(&players, event);
        }
    }

    /// As [`Self::to_room`], excluding one session (typically the sender).
    pub async fn to_room_except(&self, room_id: &str, except: &str, event: &ServerEvent) {
        let players = {
            let registry = self.registry.read().await;
            registry.get_room(room_id).map(|r| r.players)
        };
        if let Some(players) = players {
            self.broadcaster.to_sessions_except(&players, except, event);
        }
    }

    /// Deliver to all sockets of one session.
    pub fn to_session(&self, session_id: &str, event: &ServerEvent) {
        self.broadcaster.to_session(session_id, event);
    }
}
