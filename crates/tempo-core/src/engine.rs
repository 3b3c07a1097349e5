//! Rule engine contract.
//!
//! The coordinator never knows the rules of the game it hosts. Everything it
//! needs from a board (whose turn it is, whether a move is legal, what the
//! position looks like, whether the game has ended) goes through
//! [`RuleEngine`]. Implementations must be pure: `apply_move` returns a new
//! board and leaves the input untouched, which lets a room reject a move
//! without having mutated anything.

use crate::color::Color;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A move as requested by a player, in coordinate form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Origin square, e.g. `e2`
    pub from: String,
    /// Destination square, e.g. `e4`
    pub to: String,
    /// Promotion piece (`q`, `r`, `b`, `n`), if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl MoveRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, piece: impl Into<String>) -> Self {
        self.promotion = Some(piece.into());
        self
    }
}

impl std::fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = &self.promotion {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Why the engine refused a move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalMove {
    #[error("malformed move: {0}")]
    Malformed(String),

    #[error("illegal move: {0}")]
    Illegal(String),

    #[error("game is already over")]
    GameOver,
}

/// A successfully applied move.
#[derive(Debug, Clone)]
pub struct MoveResult<B> {
    /// Board after the move
    pub board: B,
    /// Canonical notation of the move, computed against the board before it
    pub notation: String,
    /// Coordinate form of the move as the engine normalised it
    pub coordinates: String,
}

/// Terminal condition reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Terminal {
    /// The side to move has been mated; the given color won.
    Checkmate { winner: Color },
    /// Stalemate, insufficient material, or any other rules draw.
    Draw,
}

/// A game's rules, as seen by a room.
pub trait RuleEngine: Send + Sync + 'static {
    /// Opaque board handle owned by a room.
    type Board: Clone + Send + 'static;

    /// Board at the start of a game.
    fn initial_board(&self) -> Self::Board;

    /// Which color is to move.
    fn side_to_move(&self, board: &Self::Board) -> Color;

    /// Validate `mv` against `board` and return the resulting board.
    fn apply_move(
        &self,
        board: &Self::Board,
        mv: &MoveRequest,
    ) -> Result<MoveResult<Self::Board>, IllegalMove>;

    /// Terminal status of `board`, if the game has ended.
    fn terminal(&self, board: &Self::Board) -> Option<Terminal>;

    /// Serialised position.
    fn serialize(&self, board: &Self::Board) -> String;

    /// Canonical notation of `mv` played from `board`.
    fn notation(&self, board: &Self::Board, mv: &MoveRequest) -> Result<String, IllegalMove>;
}
