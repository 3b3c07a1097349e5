//! Standard chess rules backed by shakmaty.
//!
//! Moves arrive in coordinate form (`from`, `to`, optional promotion), are
//! validated as UCI against the current position and reported back in SAN.
//! Positions are serialised as FEN.

use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, EnPassantMode, Move, Position,
};
use thiserror::Error;

use crate::color::Color;
use crate::engine::{IllegalMove, MoveRequest, MoveResult, RuleEngine, Terminal};

/// Halfmoves without capture or pawn move after which the game is drawn
/// automatically (the seventy-five move rule).
const AUTOMATIC_DRAW_HALFMOVES: u32 = 150;

#[derive(Debug, Error)]
#[error("invalid FEN: {0}")]
pub struct InvalidFen(String);

/// Rule engine for standard chess.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChessEngine;

impl ChessEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build a board from a FEN string.
    pub fn board_from_fen(&self, fen: &str) -> Result<Chess, InvalidFen> {
        let fen: Fen = fen.parse().map_err(|e| InvalidFen(format!("{e}")))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| InvalidFen(format!("{e}")))
    }

    /// Resolve a coordinate move against `board`.
    fn resolve(&self, board: &Chess, mv: &MoveRequest) -> Result<Move, IllegalMove> {
        let text = uci_text(mv);
        let uci: UciMove = text
            .parse()
            .map_err(|_| IllegalMove::Malformed(text.clone()))?;

        let m = uci
            .to_move(board)
            .map_err(|_| IllegalMove::Illegal(text.clone()))?;

        if !board.is_legal(&m) {
            return Err(IllegalMove::Illegal(text));
        }
        Ok(m)
    }
}

/// Lowercased UCI text for a coordinate move.
fn uci_text(mv: &MoveRequest) -> String {
    let mut text = format!(
        "{}{}",
        mv.from.trim().to_ascii_lowercase(),
        mv.to.trim().to_ascii_lowercase()
    );
    if let Some(piece) = mv.promotion.as_deref().and_then(|p| p.trim().chars().next()) {
        text.push(piece.to_ascii_lowercase());
    }
    text
}

impl RuleEngine for ChessEngine {
    type Board = Chess;

    fn initial_board(&self) -> Chess {
        Chess::default()
    }

    fn side_to_move(&self, board: &Chess) -> Color {
        board.turn().into()
    }

    fn apply_move(&self, board: &Chess, mv: &MoveRequest) -> Result<MoveResult<Chess>, IllegalMove> {
        if self.terminal(board).is_some() {
            return Err(IllegalMove::GameOver);
        }

        let m = self.resolve(board, mv)?;
        // SAN depends on the position before the move
        let san = San::from_move(board, &m).to_string();
        let coordinates = UciMove::from_move(&m, CastlingMode::Standard).to_string();

        let next = board
            .clone()
            .play(&m)
            .map_err(|_| IllegalMove::Illegal(coordinates.clone()))?;

        let suffix = if next.is_checkmate() {
            "#"
        } else if next.is_check() {
            "+"
        } else {
            ""
        };

        Ok(MoveResult {
            board: next,
            notation: format!("{san}{suffix}"),
            coordinates,
        })
    }

    fn terminal(&self, board: &Chess) -> Option<Terminal> {
        if board.is_checkmate() {
            // The side to move is mated
            let loser: Color = board.turn().into();
            Some(Terminal::Checkmate {
                winner: loser.opposite(),
            })
        } else if board.is_stalemate()
            || board.is_insufficient_material()
            || board.halfmoves() >= AUTOMATIC_DRAW_HALFMOVES
        {
            Some(Terminal::Draw)
        } else {
            None
        }
    }

    fn serialize(&self, board: &Chess) -> String {
        Fen::from_position(board.clone(), EnPassantMode::Legal).to_string()
    }

    fn notation(&self, board: &Chess, mv: &MoveRequest) -> Result<String, IllegalMove> {
        let m = self.resolve(board, mv)?;
        Ok(San::from_move(board, &m).to_string())
    }
}
