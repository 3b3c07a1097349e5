//! Game room state machine.
//!
//! A room holds at most two seats, the board, the clocks, the move history and
//! a bounded chat log. Every operation validates first and mutates only once
//! all of its preconditions hold, so a rejected command leaves the room
//! exactly as it was. Operations take the current instant as an argument;
//! the room never reads the clock itself.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tempo_core::{ChessClock, Clocks, Color, MoveRequest, RuleEngine, Terminal};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broadcast::{BroadcastBus, ConnectionId, Link, Outbox};
use crate::config::{RematchClocks, RoomConfig};
use crate::protocol::{
    ChatEntry, GameOverReason, MoveRecord, Names, PlayerId, RoomId, RoomStatus, ServerMessage,
};

/// Longest chat message kept, in characters.
pub const MAX_CHAT_LEN: usize = 500;

/// Longest display name kept, in characters.
pub const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,

    #[error("Player not in room")]
    PlayerNotInRoom,

    #[error("Seat is held by another connection")]
    Superseded,

    #[error("No game in progress")]
    GameNotInProgress,

    #[error("Game is not over")]
    GameNotOver,

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Invalid move: {0}")]
    IllegalMove(String),

    #[error("No draw offer to accept")]
    NoDrawOffer,

    #[error("Chat message is empty")]
    EmptyChat,

    #[error("Room is closed")]
    Closed,

    #[error("Internal room error: {0}")]
    Invariant(String),
}

impl RoomError {
    /// Event reporting this error to whoever issued the command.
    pub fn to_message(&self) -> ServerMessage {
        match self {
            RoomError::NotYourTurn
            | RoomError::IllegalMove(_)
            | RoomError::GameNotInProgress
            | RoomError::GameNotOver
            | RoomError::NoDrawOffer
            | RoomError::EmptyChat => ServerMessage::invalid(self.to_string()),
            RoomError::RoomFull
            | RoomError::PlayerNotInRoom
            | RoomError::Superseded
            | RoomError::Closed
            | RoomError::Invariant(_) => ServerMessage::error(self.to_string()),
        }
    }
}

/// A seat in a room. Identity and color never change once assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub player_id: PlayerId,
    pub name: String,
    pub color: Color,
}

/// The issuer of a seated command.
#[derive(Debug, Clone)]
pub struct Origin {
    pub player_id: PlayerId,
    pub connection: ConnectionId,
    pub outbox: Outbox,
}

/// A request to take or reclaim a seat.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub name: String,
    pub player_id: Option<PlayerId>,
    pub connection: ConnectionId,
    pub outbox: Outbox,
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinReceipt {
    pub player_id: PlayerId,
    pub color: Color,
    pub reconnected: bool,
}

/// Lightweight view of a room for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSummary {
    pub status: RoomStatus,
    pub seats: usize,
    pub connected_seats: usize,
    pub last_activity: Instant,
}

/// A two-seat game room.
pub struct GameRoom<E: RuleEngine> {
    pub id: RoomId,
    engine: Arc<E>,
    config: RoomConfig,
    status: RoomStatus,
    seats: Vec<Seat>,
    board: E::Board,
    history: Vec<MoveRecord>,
    chat: VecDeque<ChatEntry>,
    clock: ChessClock,
    bus: BroadcastBus,
    /// Color with an outstanding draw offer
    draw_offer: Option<Color>,
    result: Option<(GameOverReason, Option<Color>)>,
    created_at: Instant,
    last_activity: Instant,
    terminal_deadline: Option<Instant>,
    disconnect_deadline: Option<Instant>,
}

impl<E: RuleEngine> GameRoom<E> {
    pub fn new(id: RoomId, engine: Arc<E>, config: RoomConfig, now: Instant) -> Self {
        let board = engine.initial_board();
        let clock = ChessClock::new(config.initial_clock, config.increment, now);
        Self {
            id,
            engine,
            config,
            status: RoomStatus::Waiting,
            seats: Vec::with_capacity(2),
            board,
            history: Vec::new(),
            chat: VecDeque::new(),
            clock,
            bus: BroadcastBus::new(),
            draw_offer: None,
            result: None,
            created_at: now,
            last_activity: now,
            terminal_deadline: None,
            disconnect_deadline: None,
        }
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn chat_log(&self) -> impl Iterator<Item = &ChatEntry> {
        self.chat.iter()
    }

    pub fn position(&self) -> String {
        self.engine.serialize(&self.board)
    }

    /// Side to move, as reported by the engine.
    pub fn turn(&self) -> Color {
        self.engine.side_to_move(&self.board)
    }

    pub fn clocks(&self, now: Instant) -> Clocks {
        self.clock.snapshot(now)
    }

    /// Reason and winner of the last finished game.
    pub fn result(&self) -> Option<(GameOverReason, Option<Color>)> {
        self.result
    }

    pub fn is_connected(&self, color: Color) -> bool {
        self.bus.is_connected(color)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the clock should be ticking.
    pub fn clock_running(&self) -> bool {
        self.status == RoomStatus::Playing
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            status: self.status,
            seats: self.seats.len(),
            connected_seats: self.bus.connected_count(),
            last_activity: self.last_activity,
        }
    }

    /// Earliest instant at which [`GameRoom::expire`] has something to do.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.terminal_deadline, self.disconnect_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn names(&self) -> Names {
        let name = |color: Color| self.seats.get(color.index()).map(|s| s.name.clone());
        Names {
            white: name(Color::White),
            black: name(Color::Black),
        }
    }

    /// Take a new seat or reclaim an existing one.
    pub fn join(&mut self, request: JoinRequest, now: Instant) -> Result<JoinReceipt, RoomError> {
        if let Some(player_id) = request.player_id {
            if let Some(index) = self.seats.iter().position(|s| s.player_id == player_id) {
                return Ok(self.reconnect(index, request, now));
            }
        }

        let color = Color::from_index(self.seats.len()).ok_or(RoomError::RoomFull)?;
        let player_id = Uuid::new_v4();
        let name = display_name(&request.name, color);

        self.last_activity = now;
        self.seats.push(Seat {
            player_id,
            name: name.clone(),
            color,
        });
        self.bus.bind(
            color,
            Link {
                connection: request.connection,
                outbox: request.outbox,
            },
        );
        self.refresh_disconnect_deadline(now);

        info!("{} joined room {} as {}", name, self.id, color);
        self.bus
            .send_to(color, self.joined_message(color, false, now));

        if self.seats.len() == 2 {
            self.begin_game(now);
        } else {
            self.bus.send_to(
                color,
                ServerMessage::Waiting {
                    message: "Waiting for an opponent".to_string(),
                },
            );
        }

        Ok(JoinReceipt {
            player_id,
            color,
            reconnected: false,
        })
    }

    fn reconnect(&mut self, index: usize, request: JoinRequest, now: Instant) -> JoinReceipt {
        let Seat {
            player_id,
            name,
            color,
        } = self.seats[index].clone();

        let was_connected = self.bus.is_connected(color);
        self.last_activity = now;
        self.bus.bind(
            color,
            Link {
                connection: request.connection,
                outbox: request.outbox,
            },
        );
        self.refresh_disconnect_deadline(now);
        if self.status == RoomStatus::Over {
            self.terminal_deadline = now.checked_add(self.config.terminal_grace);
        }

        info!("{} reconnected to room {} as {}", name, self.id, color);
        self.bus
            .send_to(color, self.joined_message(color, true, now));
        // The opponent only saw a peerLeft if the seat was actually unbound
        if !was_connected {
            self.bus.publish_except(
                color,
                &ServerMessage::PeerReturned {
                    player_id,
                    name,
                    color,
                },
            );
        }

        JoinReceipt {
            player_id,
            color,
            reconnected: true,
        }
    }

    fn begin_game(&mut self, now: Instant) {
        let turn = self.turn();
        self.status = RoomStatus::Playing;
        self.clock.start(turn, now);

        info!("Game started in room {}", self.id);
        self.bus.publish(&ServerMessage::Start {
            position: self.position(),
            clocks: self.clock.snapshot(now),
            turn,
            names: self.names(),
        });
    }

    /// Play a move for the requesting seat.
    pub fn apply_move(
        &mut self,
        origin: &Origin,
        request: &MoveRequest,
        now: Instant,
    ) -> Result<(), RoomError> {
        let color = self.seat_for(origin)?;
        if self.status != RoomStatus::Playing {
            return Err(RoomError::GameNotInProgress);
        }
        if color != self.turn() {
            return Err(RoomError::NotYourTurn);
        }
        let result = self
            .engine
            .apply_move(&self.board, request)
            .map_err(|e| RoomError::IllegalMove(e.to_string()))?;

        self.last_activity = now;
        self.clock.charge(now);
        if self.clock.flagged() == Some(color) {
            // Flag fell before the move arrived; the move does not count
            self.time_out(color, now);
            return Ok(());
        }
        self.clock.credit(color, self.clock.increment());

        self.board = result.board;
        let record = MoveRecord {
            color,
            uci: result.coordinates,
            san: result.notation,
        };
        debug!("Room {}: {} played {}", self.id, color, record.san);
        self.history.push(record.clone());
        self.draw_offer = None;

        let turn = self.turn();
        self.clock.start(turn, now);
        self.bus.publish(&ServerMessage::MoveApplied {
            record,
            position: self.position(),
            turn,
            clocks: self.clock.snapshot(now),
        });

        if let Some(terminal) = self.engine.terminal(&self.board) {
            let (reason, winner) = match terminal {
                Terminal::Checkmate { winner } => (GameOverReason::Checkmate, Some(winner)),
                Terminal::Draw => (GameOverReason::Draw, None),
            };
            self.finish(reason, winner, now);
        }
        Ok(())
    }

    /// Account elapsed time for the side to move.
    pub fn tick(&mut self, now: Instant) {
        if self.status != RoomStatus::Playing {
            return;
        }
        let Some((color, _)) = self.clock.charge(now) else {
            return;
        };
        if self.clock.flagged() == Some(color) {
            self.time_out(color, now);
        } else {
            self.bus.publish(&ServerMessage::ClockUpdate {
                clocks: self.clock.snapshot(now),
                turn: color,
            });
        }
    }

    pub fn resign(&mut self, origin: &Origin, now: Instant) -> Result<(), RoomError> {
        let color = self.seat_for(origin)?;
        if self.status != RoomStatus::Playing {
            return Err(RoomError::GameNotInProgress);
        }

        self.last_activity = now;
        let winner = color.opposite();
        self.bus.publish(&ServerMessage::Resigned { winner });
        self.finish(GameOverReason::Resignation, Some(winner), now);
        Ok(())
    }

    pub fn offer_draw(&mut self, origin: &Origin, now: Instant) -> Result<(), RoomError> {
        let color = self.seat_for(origin)?;
        if self.status != RoomStatus::Playing {
            return Err(RoomError::GameNotInProgress);
        }

        self.last_activity = now;
        self.draw_offer = Some(color);
        self.bus.publish(&ServerMessage::DrawOffered { by: color });
        Ok(())
    }

    pub fn accept_draw(&mut self, origin: &Origin, now: Instant) -> Result<(), RoomError> {
        let color = self.seat_for(origin)?;
        if self.status != RoomStatus::Playing {
            return Err(RoomError::GameNotInProgress);
        }
        if self.draw_offer != Some(color.opposite()) {
            return Err(RoomError::NoDrawOffer);
        }

        self.last_activity = now;
        self.bus.publish(&ServerMessage::DrawAgreed);
        self.finish(GameOverReason::DrawAgreed, None, now);
        Ok(())
    }

    /// Start a fresh game with the same seats.
    pub fn rematch(&mut self, origin: &Origin, now: Instant) -> Result<(), RoomError> {
        self.seat_for(origin)?;
        if self.status != RoomStatus::Over {
            return Err(RoomError::GameNotOver);
        }

        self.last_activity = now;
        self.board = self.engine.initial_board();
        self.history.clear();
        self.draw_offer = None;
        self.result = None;
        self.terminal_deadline = None;
        match self.config.rematch_clocks {
            RematchClocks::Reset => self.clock.reset(self.config.initial_clock, now),
            RematchClocks::Preserve => {
                self.clock.stop(now);
                // A side that lost on time would flag again on the first tick
                for color in self.clock.refill_empty(self.config.initial_clock) {
                    debug!("Room {}: {} starts the rematch with full time", self.id, color);
                }
            }
        }

        let turn = self.turn();
        self.status = RoomStatus::Playing;
        self.clock.start(turn, now);

        info!("Rematch started in room {}", self.id);
        self.bus.publish(&ServerMessage::RematchStarted {
            position: self.position(),
            clocks: self.clock.snapshot(now),
            turn,
        });
        Ok(())
    }

    pub fn chat(&mut self, origin: &Origin, text: &str, now: Instant) -> Result<(), RoomError> {
        let color = self.seat_for(origin)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(RoomError::EmptyChat);
        }

        self.last_activity = now;
        let entry = ChatEntry {
            sender: self.seats[color.index()].name.clone(),
            text: text.chars().take(MAX_CHAT_LEN).collect(),
            timestamp: Utc::now(),
        };
        self.chat.push_back(entry.clone());
        while self.chat.len() > self.config.chat_log_limit {
            self.chat.pop_front();
        }

        self.bus.publish(&ServerMessage::Chat {
            sender: entry.sender,
            text: entry.text,
            timestamp: entry.timestamp,
        });
        Ok(())
    }

    /// Unbind a seat from `connection`. Returns false if the seat is unknown
    /// or already bound to a different connection.
    pub fn disconnect(&mut self, player_id: PlayerId, connection: ConnectionId, now: Instant) -> bool {
        let Some(seat) = self.seats.iter().find(|s| s.player_id == player_id).cloned() else {
            return false;
        };
        if !self.bus.unbind(seat.color, connection) {
            return false;
        }

        self.last_activity = now;
        self.refresh_disconnect_deadline(now);
        info!("{} left room {}", seat.name, self.id);
        self.bus.publish_except(
            seat.color,
            &ServerMessage::PeerLeft {
                player_id: seat.player_id,
                name: seat.name,
                color: seat.color,
            },
        );
        true
    }

    /// Handle a passed deadline. Returns true when the room should be removed.
    pub fn expire(&mut self, now: Instant) -> bool {
        if self.terminal_deadline.is_some_and(|d| now >= d) {
            info!("Room {} finished grace period elapsed", self.id);
            return true;
        }
        if self.disconnect_deadline.is_some_and(|d| now >= d) {
            if self.status == RoomStatus::Playing {
                let winner = Color::ALL
                    .into_iter()
                    .find(|c| self.bus.is_connected(*c));
                self.finish(GameOverReason::Abandoned, winner, now);
            }
            info!("Room {} abandoned", self.id);
            return true;
        }
        false
    }

    /// Tell every connected seat the room is going away.
    pub fn close(&mut self, message: &str, now: Instant) {
        self.clock.stop(now);
        self.bus.publish(&ServerMessage::error(message));
    }

    /// Structural checks that must hold after every operation.
    pub fn check_invariants(&self) -> Result<(), RoomError> {
        if self.seats.len() > 2 {
            return Err(RoomError::Invariant(format!(
                "{} seats in room",
                self.seats.len()
            )));
        }
        for (index, seat) in self.seats.iter().enumerate() {
            if Color::from_index(index) != Some(seat.color) {
                return Err(RoomError::Invariant(format!(
                    "seat {} has color {}",
                    index, seat.color
                )));
            }
        }
        match self.status {
            RoomStatus::Playing => {
                if self.seats.len() != 2 {
                    return Err(RoomError::Invariant("playing without two seats".into()));
                }
                if self.clock.running() != Some(self.turn()) {
                    return Err(RoomError::Invariant(
                        "clock running for the wrong side".into(),
                    ));
                }
            }
            RoomStatus::Waiting | RoomStatus::Over => {
                if self.clock.running().is_some() {
                    return Err(RoomError::Invariant("clock running outside play".into()));
                }
            }
        }
        Ok(())
    }

    /// Seat a phantom third player so the next invariant check fails.
    #[cfg(test)]
    pub(crate) fn corrupt_seats(&mut self) {
        self.seats.push(Seat {
            player_id: Uuid::new_v4(),
            name: "phantom".to_string(),
            color: Color::White,
        });
    }

    fn seat_for(&self, origin: &Origin) -> Result<Color, RoomError> {
        let seat = self
            .seats
            .iter()
            .find(|s| s.player_id == origin.player_id)
            .ok_or(RoomError::PlayerNotInRoom)?;
        if !self.bus.is_bound_to(seat.color, origin.connection) {
            return Err(RoomError::Superseded);
        }
        Ok(seat.color)
    }

    fn time_out(&mut self, loser: Color, now: Instant) {
        let winner = loser.opposite();
        info!("Room {}: {} ran out of time", self.id, loser);
        self.bus.publish(&ServerMessage::Timeout { winner });
        self.finish(GameOverReason::Timeout, Some(winner), now);
    }

    fn finish(&mut self, reason: GameOverReason, winner: Option<Color>, now: Instant) {
        self.clock.stop(now);
        self.status = RoomStatus::Over;
        self.result = Some((reason, winner));
        self.draw_offer = None;
        self.terminal_deadline = now.checked_add(self.config.terminal_grace);

        info!("Game over in room {}: {:?}, winner {:?}", self.id, reason, winner);
        self.bus.publish(&ServerMessage::GameOver {
            reason,
            winner,
            position: self.position(),
            move_history: self.history.clone(),
        });
    }

    /// Arm the disconnect deadline when some seat is unbound, clear it once
    /// every seat is back. An armed deadline is not pushed back.
    fn refresh_disconnect_deadline(&mut self, now: Instant) {
        let all_connected = self.seats.iter().all(|s| self.bus.is_connected(s.color));
        if all_connected {
            self.disconnect_deadline = None;
        } else if self.disconnect_deadline.is_none() {
            self.disconnect_deadline = now.checked_add(self.config.disconnect_grace);
        }
    }

    fn joined_message(&self, color: Color, reconnected: bool, now: Instant) -> ServerMessage {
        ServerMessage::Joined {
            player_id: self.seats[color.index()].player_id,
            color,
            position: self.position(),
            clocks: self.clock.snapshot(now),
            names: self.names(),
            turn: self.turn(),
            status: self.status,
            move_history: self.history.clone(),
            chat: self.chat.iter().cloned().collect(),
            reconnected,
        }
    }
}

fn display_name(requested: &str, color: Color) -> String {
    let name: String = requested.trim().chars().take(MAX_NAME_LEN).collect();
    if name.is_empty() {
        format!("{color} player")
    } else {
        name
    }
}
