//! Wire schema for the socket channel.
//!
//! Both directions use a JSON envelope: `{"event": <name>, "data": <payload>}`.
//! Inbound frames are parsed through [`ClientEvent::parse`]; outbound frames
//! serialize [`ServerEvent`] directly (the enum is adjacently tagged so the
//! envelope falls out of serde).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::room::RoomDetail;
use crate::scoring::ResultEntry;
use crate::user::User;

/// Drawing tool selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

/// Brush size bounds for stroke validation.
pub const MIN_BRUSH_SIZE: f64 = 1.0;
pub const MAX_BRUSH_SIZE: f64 = 50.0;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateMsg {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomRefMsg {
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectWordMsg {
    pub word: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitGuessMsg {
    pub guess: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendChatMsg {
    pub message: String,
}

fn default_color() -> String {
    "#000000".to_string()
}

fn default_size() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawStartMsg {
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_size")]
    pub size: f64,
    #[serde(default)]
    pub tool: Tool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawMoveMsg {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeToolMsg {
    pub tool: Option<Tool>,
    pub color: Option<String>,
    pub size: Option<f64>,
}

/// An inbound socket event, decoded from the JSON envelope.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Authenticate(AuthenticateMsg),
    JoinRoom(RoomRefMsg),
    LeaveRoom(RoomRefMsg),
    GetRoomInfo(RoomRefMsg),
    StartGame,
    SelectWord(SelectWordMsg),
    SubmitGuess(SubmitGuessMsg),
    SendChatMessage(SendChatMsg),
    DrawStart(DrawStartMsg),
    DrawMove(DrawMoveMsg),
    DrawEnd,
    ClearCanvas,
    ChangeTool(ChangeToolMsg),
    TurnTimeout(RoomRefMsg),
}

/// Why an inbound frame could not be decoded.
#[derive(Debug)]
pub enum ProtocolError {
    /// The frame was not a valid `{event, data}` envelope.
    Malformed(String),
    /// The envelope named an event this server does not handle.
    UnknownEvent(String),
    /// The event was recognized but its payload did not match the schema.
    BadPayload { event: &'static str, reason: String },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(e) => write!(f, "Malformed event frame: {e}"),
            ProtocolError::UnknownEvent(name) => write!(f, "Unknown event: {name}"),
            ProtocolError::BadPayload { event, reason } => {
                write!(f, "Invalid payload for {event}: {reason}")
            },
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &'static str,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::BadPayload {
        event,
        reason: e.to_string(),
    })
}

impl ClientEvent {
    /// Decode a text frame into a typed event.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let env: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let ev = match env.event.as_str() {
            "authenticate" => ClientEvent::Authenticate(payload("authenticate", env.data)?),
            "join_room" => ClientEvent::JoinRoom(payload("join_room", env.data)?),
            "leave_room" => ClientEvent::LeaveRoom(payload("leave_room", env.data)?),
            "get_room_info" => ClientEvent::GetRoomInfo(payload("get_room_info", env.data)?),
            "start_game" => ClientEvent::StartGame,
            "select_word" => ClientEvent::SelectWord(payload("select_word", env.data)?),
            "submit_guess" => ClientEvent::SubmitGuess(payload("submit_guess", env.data)?),
            "send_chat_message" => {
                ClientEvent::SendChatMessage(payload("send_chat_message", env.data)?)
            },
            "draw_start" => ClientEvent::DrawStart(payload("draw_start", env.data)?),
            "draw_move" => ClientEvent::DrawMove(payload("draw_move", env.data)?),
            "draw_end" => ClientEvent::DrawEnd,
            "clear_canvas" => ClientEvent::ClearCanvas,
            "change_tool" => ClientEvent::ChangeTool(payload("change_tool", env.data)?),
            "turn_timeout" => ClientEvent::TurnTimeout(payload("turn_timeout", env.data)?),
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(ev)
    }

    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate(_) => "authenticate",
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::GetRoomInfo(_) => "get_room_info",
            ClientEvent::StartGame => "start_game",
            ClientEvent::SelectWord(_) => "select_word",
            ClientEvent::SubmitGuess(_) => "submit_guess",
            ClientEvent::SendChatMessage(_) => "send_chat_message",
            ClientEvent::DrawStart(_) => "draw_start",
            ClientEvent::DrawMove(_) => "draw_move",
            ClientEvent::DrawEnd => "draw_end",
            ClientEvent::ClearCanvas => "clear_canvas",
            ClientEvent::ChangeTool(_) => "change_tool",
            ClientEvent::TurnTimeout(_) => "turn_timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionConfirmedMsg {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationSuccessMsg {
    pub message: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMsg {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomJoinedMsg {
    pub room: RoomDetail,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomLeftMsg {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomInfoMsg {
    pub room: RoomDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomUpdatedMsg {
    pub room: RoomDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerJoinedMsg {
    pub player_id: String,
    pub username: String,
    pub room: RoomDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerLeftMsg {
    pub player_id: String,
    pub username: String,
    pub room: RoomDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerDisconnectedMsg {
    pub player_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameStartedMsg {
    pub room_id: String,
    pub room: RoomDetail,
    pub current_round: u32,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundStartedMsg {
    pub round: u32,
    pub drawer: String,
    pub drawer_name: String,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundCompleteMsg {
    pub next_round: u32,
    pub intermission_time: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WordSelectionStartedMsg {
    pub drawer_id: String,
    pub drawer_name: String,
    /// Clients show these only to the drawer.
    pub words: Vec<String>,
    pub time_limit: u32,
    pub phase: String,
}

/// Per-recipient `word_selected` payload: the drawer gets `word`, everyone
/// else gets `word_hint` + `word_length`.
#[derive(Debug, Clone, Serialize)]
pub struct WordSelectedMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_length: Option<usize>,
    pub time_limit: u32,
    pub drawer_id: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_selected: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawingStartedMsg {
    pub drawer_id: String,
    pub drawer_name: String,
    pub word_hint: String,
    pub word_length: usize,
    pub time_limit: u32,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HintUpdateMsg {
    pub word_hint: String,
    pub word_length: usize,
    pub elapsed_time: f64,
    pub drawer_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerUpdateMsg {
    pub time_remaining: u64,
    pub phase: String,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectGuessMsg {
    pub player: String,
    pub player_id: String,
    pub word: String,
    pub score: i64,
    pub speed_bonus: i64,
    pub scores: HashMap<String, i64>,
    pub time_elapsed: f64,
    pub time_remaining: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuessCorrectMsg {
    pub message: String,
    pub score: i64,
    pub word: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageMsg {
    pub user: String,
    pub user_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawDataMsg {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanvasClearedMsg {
    pub timestamp: f64,
    pub cleared_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolChangedMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    pub user: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnEndedMsg {
    pub word: Option<String>,
    pub drawer: Option<String>,
    pub drawer_name: String,
    pub results: Vec<ResultEntry>,
    pub scores: HashMap<String, i64>,
    pub timeout: bool,
    pub all_guessed: bool,
    pub next_phase_in: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnTimeoutMsg {
    pub room_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameEndedMsg {
    pub winner: Option<ResultEntry>,
    pub final_results: Vec<ResultEntry>,
    pub total_rounds: u32,
}

/// An outbound socket event. Serializes to `{"event": …, "data": …}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionConfirmed(ConnectionConfirmedMsg),
    AuthenticationSuccess(Box<AuthenticationSuccessMsg>),
    AuthenticationFailed(ErrorMsg),
    RoomJoined(Box<RoomJoinedMsg>),
    RoomLeft(RoomLeftMsg),
    RoomInfo(Box<RoomInfoMsg>),
    RoomUpdated(Box<RoomUpdatedMsg>),
    PlayerJoined(Box<PlayerJoinedMsg>),
    PlayerLeft(Box<PlayerLeftMsg>),
    PlayerDisconnected(PlayerDisconnectedMsg),
    GameStarted(Box<GameStartedMsg>),
    RoundStarted(RoundStartedMsg),
    RoundComplete(RoundCompleteMsg),
    WordSelectionStarted(WordSelectionStartedMsg),
    WordSelected(WordSelectedMsg),
    DrawingStarted(DrawingStartedMsg),
    HintUpdate(HintUpdateMsg),
    TimerUpdate(TimerUpdateMsg),
    CorrectGuess(CorrectGuessMsg),
    GuessCorrect(GuessCorrectMsg),
    ChatMessage(ChatMessageMsg),
    DrawData(DrawDataMsg),
    CanvasCleared(CanvasClearedMsg),
    ToolChanged(ToolChangedMsg),
    TurnEnded(TurnEndedMsg),
    TurnTimeout(TurnTimeoutMsg),
    GameEnded(GameEndedMsg),
    Error(ErrorMsg),
}

impl ServerEvent {
    /// Convenience constructor for the ubiquitous `error {message}` reply.
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorMsg {
            message: message.into(),
        })
    }

    /// Serialize to the wire envelope.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode server event");
            "{\"event\":\"error\",\"data\":{\"message\":\"encoding failure\"}}".to_string()
        })
    }
}
