use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use skribly_core::room::{
    GameState, PlayerInfo, Room, RoomDetail, RoomSettings, RoomStatus, RoomSummary,
    generate_room_code,
};
use skribly_core::time::epoch_secs;
use skribly_core::user::{User, username_is_valid};

/// The registry behind its lock. The write lock is the serialization point
/// for all room mutation: no two operations on the same room interleave.
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// User creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    InvalidUsername,
    UsernameTaken,
    UserNotFound,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUsername => write!(f, "Username must be 3-20 characters"),
            Self::UsernameTaken => write!(f, "Username is already taken"),
            Self::UserNotFound => write!(f, "User session not found"),
        }
    }
}

/// Room join failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    RoomNotFound,
    RoomFull,
    GameInProgress,
}

/// Room leave failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveError {
    NotPresent,
}

/// In-memory stores for users and rooms. All state dies with the process.
#[derive(Default)]
pub struct Registry {
    users: HashMap<String, User>,
    rooms: HashMap<String, Room>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- users ---------------------------------------------------------

    /// Create a user session. The username is trimmed, must be 3–20 chars,
    /// and must be unique (case-insensitively) across live users.
    pub fn create_user(
        &mut self,
        username: &str,
        avatar_url: Option<String>,
    ) -> Result<User, RegistryError> {
        let username = username.trim();
        if !username_is_valid(username) {
            return Err(RegistryError::InvalidUsername);
        }
        if self
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
        {
            return Err(RegistryError::UsernameTaken);
        }

        let user = User {
            session_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            avatar_url,
            created_at: epoch_secs(),
            current_room: None,
        };
        self.users.insert(user.session_id.clone(), user.clone());
        tracing::info!(username = %user.username, "Created session");
        Ok(user)
    }

    /// Case-insensitive availability check, used by `/api/auth/validate`.
    pub fn username_available(&self, username: &str) -> bool {
        !self
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
    }

    pub fn get_user(&self, session_id: &str) -> Option<User> {
        self.users.get(session_id).cloned()
    }

    pub fn username_of(&self, session_id: &str) -> Option<String> {
        self.users.get(session_id).map(|u| u.username.clone())
    }

    pub fn set_current_room(&mut self, session_id: &str, room_id: Option<String>) {
        if let Some(user) = self.users.get_mut(session_id) {
            user.current_room = room_id;
        }
    }

    /// Remove a user session. If the user is in a room they are removed
    /// from it first (with host promotion / empty-room deletion applying).
    /// Returns the removed user and, when their room was deleted, its id.
    pub fn delete_user(&mut self, session_id: &str) -> (Option<User>, Option<String>) {
        let room_id = self
            .users
            .get(session_id)
            .and_then(|u| u.current_room.clone());
        let mut deleted_room = None;
        if let Some(room_id) = room_id
            && let Ok(None) = self.remove_player(&room_id, session_id)
        {
            deleted_room = Some(room_id);
        }
        let user = self.users.remove(session_id);
        if let Some(ref u) = user {
            tracing::info!(username = %u.username, "Removed session");
        }
        (user, deleted_room)
    }

    // -- rooms ---------------------------------------------------------

    /// Create a room with the given host as its first (and scoring) player.
    pub fn create_room(
        &mut self,
        host_session: &str,
        settings: RoomSettings,
        name: Option<String>,
    ) -> Result<Room, RegistryError> {
        let host = self
            .users
            .get(host_session)
            .cloned()
            .ok_or(RegistryError::UserNotFound)?;

        let mut id = generate_room_code();
        while self.rooms.contains_key(&id) {
            id = generate_room_code();
        }

        let mut game_state = GameState::default();
        game_state.scores.insert(host_session.to_string(), 0);

        let room = Room {
            id: id.clone(),
            name: name.unwrap_or_else(|| format!("{}'s Room", host.username)),
            host: host_session.to_string(),
            status: RoomStatus::Waiting,
            players: vec![host_session.to_string()],
            settings,
            game_state,
            created_at: epoch_secs(),
        };
        self.rooms.insert(id.clone(), room.clone());
        self.set_current_room(host_session, Some(id.clone()));
        tracing::info!(room = %id, host = %host.username, "Created room");
        Ok(room)
    }

    pub fn get_room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).cloned()
    }

    /// Mutable access for the game engine, which shares this lock.
    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    /// Apply `f` to the room under the registry lock, returning its result.
    pub fn update_room<T>(&mut self, room_id: &str, f: impl FnOnce(&mut Room) -> T) -> Option<T> {
        self.rooms.get_mut(room_id).map(f)
    }

    /// Add a player. Re-adding an existing member is idempotent success.
    /// Returns the room snapshot and whether the player was newly added.
    pub fn add_player(
        &mut self,
        room_id: &str,
        session_id: &str,
    ) -> Result<(Room, bool), JoinError> {
        let room = self.rooms.get_mut(room_id).ok_or(JoinError::RoomNotFound)?;
        if room.contains(session_id) {
            let snapshot = room.clone();
            return Ok((snapshot, false));
        }
        if room.status != RoomStatus::Waiting {
            return Err(JoinError::GameInProgress);
        }
        if room.is_full() {
            return Err(JoinError::RoomFull);
        }
        room.players.push(session_id.to_string());
        room.game_state.scores.insert(session_id.to_string(), 0);
        let snapshot = room.clone();
        self.set_current_room(session_id, Some(room_id.to_string()));
        tracing::info!(room = %room_id, player = %session_id, "Player joined room");
        Ok((snapshot, true))
    }

    /// Remove a player. Promotes `players[0]` to host when the host leaves;
    /// deletes the room when it empties (returns `Ok(None)`).
    pub fn remove_player(
        &mut self,
        room_id: &str,
        session_id: &str,
    ) -> Result<Option<Room>, LeaveError> {
        let room = self.rooms.get_mut(room_id).ok_or(LeaveError::NotPresent)?;
        if !room.contains(session_id) {
            return Err(LeaveError::NotPresent);
        }

        room.players.retain(|p| p != session_id);
        room.game_state.scores.remove(session_id);
        room.game_state.players_guessed.retain(|p| p != session_id);
        self.set_current_room(session_id, None);

        let room = self.rooms.get_mut(room_id).expect("room checked above");
        if room.players.is_empty() {
            self.rooms.remove(room_id);
            tracing::info!(room = %room_id, "Deleted empty room");
            return Ok(None);
        }

        if room.host == session_id {
            room.host = room.players[0].clone();
            tracing::info!(room = %room_id, host = %room.host, "Promoted new host");
        }
        Ok(Some(room.clone()))
    }

    /// Room snapshot with the player list enriched with usernames.
    pub fn room_detail(&self, room_id: &str) -> Option<RoomDetail> {
        let room = self.rooms.get(room_id)?;
        let players = room
            .players
            .iter()
            .filter_map(|p| {
                self.users.get(p).map(|u| PlayerInfo {
                    session_id: p.clone(),
                    username: u.username.clone(),
                })
            })
            .collect();
        Some(RoomDetail {
            id: room.id.clone(),
            name: room.name.clone(),
            host: room.host.clone(),
            status: room.status,
            players,
            max_players: room.settings.max_players,
            settings: room.settings.clone(),
            game_state: (&room.game_state).into(),
            created_at: room.created_at,
        })
    }

    /// Summaries of rooms still accepting players.
    pub fn waiting_rooms(&self) -> Vec<RoomSummary> {
        self.rooms
            .values()
            .filter(|r| r.status == RoomStatus::Waiting)
            .map(|r| RoomSummary {
                id: r.id.clone(),
                name: r.name.clone(),
                players: r.players.len(),
                max_players: r.settings.max_players,
                status: r.status,
                host: self
                    .username_of(&r.host)
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms.values().map(|r| r.players.len()).sum()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Delete empty rooms and rooms past the age cap, returning the removed
    /// ids so callers can stop their timers.
    pub fn reap_rooms(&mut self, max_age_secs: u64) -> Vec<String> {
        let now = epoch_secs();
        let expired: Vec<String> = self
            .rooms
            .values()
            .filter(|r| r.players.is_empty() || r.age_secs(now) > max_age_secs as f64)
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            self.rooms.remove(id);
        }
        if !expired.is_empty() {
            // Users may still point at a reaped room
            for user in self.users.values_mut() {
                if let Some(ref room) = user.current_room
                    && expired.contains(room)
                {
                    user.current_room = None;
                }
            }
            tracing::info!(removed = expired.len(), "Reaped inactive rooms");
        }
        expired
    }
}
