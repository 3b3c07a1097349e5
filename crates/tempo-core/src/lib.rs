//! Tempo - rules and clocks for two-player game rooms
//!
//! This crate holds the pieces of a game room that do not depend on any
//! async runtime or transport:
//! - The rule engine contract a room delegates move handling to
//! - A standard chess implementation of that contract
//! - Countdown clock arithmetic for both seats
//!
//! # Modules
//!
//! - [`color`]: The two seat colors
//! - [`engine`]: Rule engine trait, move requests and terminal conditions
//! - [`chess`]: Standard chess via shakmaty
//! - [`clock`]: Elapsed-time countdown clock

pub mod chess;
pub mod clock;
pub mod color;
pub mod engine;

// Re-export commonly used types
pub use chess::{ChessEngine, InvalidFen};
pub use clock::{ChessClock, Clocks};
pub use color::Color;
pub use engine::{IllegalMove, MoveRequest, MoveResult, RuleEngine, Terminal};
