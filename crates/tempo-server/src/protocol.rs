//! WebSocket protocol messages for Tempo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempo_core::{Clocks, Color};
use uuid::Uuid;

/// Stable identity of a seated player. Survives reconnects.
pub type PlayerId = Uuid;

/// Client-chosen room identifier.
pub type RoomId = String;

/// Longest accepted room id.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Take a seat in a room, creating the room if needed, or reclaim a seat
    Join {
        room_id: RoomId,
        name: String,
        #[serde(default)]
        desired_clock_seconds: Option<u64>,
        #[serde(default)]
        player_id: Option<PlayerId>,
    },

    /// Play a move
    Move {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },

    /// Send chat message
    Chat { text: String },

    /// Concede the game
    Resign,

    /// Offer a draw to the opponent
    OfferDraw,

    /// Accept the opponent's draw offer
    AcceptDraw,

    /// Start a new game in the same room after the last one ended
    Rematch,

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Seat taken or reclaimed; carries the full room snapshot
    Joined {
        player_id: PlayerId,
        color: Color,
        position: String,
        clocks: Clocks,
        names: Names,
        turn: Color,
        status: RoomStatus,
        move_history: Vec<MoveRecord>,
        chat: Vec<ChatEntry>,
        reconnected: bool,
    },

    /// Seated, waiting for an opponent
    Waiting { message: String },

    /// Both seats are taken and the game has begun
    Start {
        position: String,
        clocks: Clocks,
        turn: Color,
        names: Names,
    },

    /// A move was accepted
    MoveApplied {
        #[serde(rename = "move")]
        record: MoveRecord,
        position: String,
        turn: Color,
        clocks: Clocks,
    },

    /// The requester's command was rejected
    Invalid { reason: String },

    /// Periodic clock update
    ClockUpdate { clocks: Clocks, turn: Color },

    /// A side ran out of time
    Timeout { winner: Color },

    /// Game finished
    GameOver {
        reason: GameOverReason,
        winner: Option<Color>,
        position: String,
        move_history: Vec<MoveRecord>,
    },

    /// Chat message received
    Chat {
        sender: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// The other seat lost its connection
    PeerLeft {
        player_id: PlayerId,
        name: String,
        color: Color,
    },

    /// The other seat reconnected
    PeerReturned {
        player_id: PlayerId,
        name: String,
        color: Color,
    },

    /// A side resigned
    Resigned { winner: Color },

    /// A side offered a draw
    DrawOffered { by: Color },

    /// Draw offer accepted
    DrawAgreed,

    /// A new game started in the same room
    RematchStarted {
        position: String,
        clocks: Clocks,
        turn: Color,
    },

    /// Error occurred
    Error { message: String },

    /// Pong response
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Display names by seat color.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Names {
    pub white: Option<String>,
    pub black: Option<String>,
}

/// One applied move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    pub color: Color,
    /// Coordinate form, e.g. `e2e4`
    pub uci: String,
    /// Canonical notation, e.g. `e4`
    pub san: String,
}

/// One chat log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Over,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameOverReason {
    Checkmate,
    Draw,
    Timeout,
    Resignation,
    DrawAgreed,
    Abandoned,
}
