use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Ended,
}

/// Word-list difficulty tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_ROUNDS: u32 = 1;
pub const MAX_ROUNDS: u32 = 10;
pub const MIN_DRAW_TIME: u32 = 30;
pub const MAX_DRAW_TIME: u32 = 300;
pub const MIN_PLAYERS: u32 = 2;
pub const MAX_PLAYERS: u32 = 12;

/// Per-room game settings, chosen by the host at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub rounds: u32,
    pub draw_time: u32,
    pub word_difficulty: Difficulty,
    pub max_players: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            rounds: 3,
            draw_time: 80,
            word_difficulty: Difficulty::Medium,
            max_players: 8,
        }
    }
}

/// A settings field that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    Rounds,
    DrawTime,
    MaxPlayers,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Rounds => {
                write!(f, "Rounds must be between {MIN_ROUNDS} and {MAX_ROUNDS}")
            },
            SettingsError::DrawTime => write!(
                f,
                "Draw time must be between {MIN_DRAW_TIME} and {MAX_DRAW_TIME} seconds"
            ),
            SettingsError::MaxPlayers => write!(
                f,
                "Max players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
            ),
        }
    }
}

impl RoomSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&self.rounds) {
            return Err(SettingsError::Rounds);
        }
        if !(MIN_DRAW_TIME..=MAX_DRAW_TIME).contains(&self.draw_time) {
            return Err(SettingsError::DrawTime);
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.max_players) {
            return Err(SettingsError::MaxPlayers);
        }
        Ok(())
    }
}

/// Phase-specific state for the current turn. Each variant carries only the
/// data that phase needs; transitions replace the whole variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TurnPhase {
    /// No turn in progress (lobby, or the game has ended).
    #[default]
    Idle,
    /// The drawer is choosing between the offered words.
    WordSelection { options: Vec<String> },
    /// The drawer is drawing; `revealed` holds the hint positions exposed
    /// so far, in reveal order.
    Drawing { revealed: Vec<usize> },
    TurnResults,
    Intermission,
}

/// Mutable per-room game state. `current_word` never leaves the server; the
/// serializable [`GameStateView`] is what clients see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    pub current_round: u32,
    pub drawer_order: Vec<String>,
    pub current_drawer_index: usize,
    pub current_drawer: Option<String>,
    pub current_word: Option<String>,
    /// Epoch seconds when the drawing phase started.
    pub turn_start_time: Option<f64>,
    pub words_used: HashSet<String>,
    pub scores: HashMap<String, i64>,
    pub players_guessed: Vec<String>,
    pub phase: TurnPhase,
}

/// A single game room. All mutation happens under the registry lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub host: String,
    pub status: RoomStatus,
    /// Session ids in join order. Unique; host is always a member.
    pub players: Vec<String>,
    pub settings: RoomSettings,
    pub game_state: GameState,
    /// Epoch seconds.
    pub created_at: f64,
}

impl Room {
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.settings.max_players as usize
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.players.iter().any(|p| p == session_id)
    }

    pub fn age_secs(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 6;

/// Generate a 6-character uppercase alphanumeric room code. Uniqueness is
/// the caller's responsibility (retry against the live room set).
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// A player entry enriched with the username, for client-facing payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub session_id: String,
    pub username: String,
}

/// The client-visible slice of [`GameState`]. Deliberately excludes the
/// current word and the drawer's word options.
#[derive(Debug, Clone, Serialize)]
pub struct GameStateView {
    pub current_round: u32,
    pub current_drawer: Option<String>,
    pub scores: HashMap<String, i64>,
    pub players_guessed: Vec<String>,
}

impl From<&GameState> for GameStateView {
    fn from(gs: &GameState) -> Self {
        Self {
            current_round: gs.current_round,
            current_drawer: gs.current_drawer.clone(),
            scores: gs.scores.clone(),
            players_guessed: gs.players_guessed.clone(),
        }
    }
}

/// Full room payload for members: settings, enriched player list, and the
/// public game state.
#[derive(Debug, Clone, Serialize)]
pub struct RoomDetail {
    pub id: String,
    pub name: String,
    pub host: String,
    pub status: RoomStatus,
    pub players: Vec<PlayerInfo>,
    pub max_players: u32,
    pub settings: RoomSettings,
    pub game_state: GameStateView,
    pub created_at: f64,
}

/// Lobby-list entry for waiting rooms.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub players: usize,
    pub max_players: u32,
    pub status: RoomStatus,
    pub host: String,
}
