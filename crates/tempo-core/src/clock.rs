//! Two-sided countdown clock.
//!
//! Time is deducted from the running side by measuring the elapsed interval
//! between the last epoch and `now`, never by subtracting a fixed amount per
//! tick, so a late or early scheduler wake-up cannot make the clock drift.
//! All methods take the current instant explicitly.

use crate::color::Color;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Remaining time for both colors, in milliseconds.
///
/// Serialized as `{"white": 300000, "black": 300000}` for a five minute game;
/// the wire carries milliseconds, not seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clocks {
    /// White's remaining time in milliseconds
    pub white: u64,
    /// Black's remaining time in milliseconds
    pub black: u64,
}

impl Clocks {
    pub fn get(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }
}

/// Countdown clock for a two-player game.
#[derive(Debug, Clone)]
pub struct ChessClock {
    remaining: [Duration; 2],
    running: Option<Color>,
    epoch: Instant,
    increment: Duration,
}

impl ChessClock {
    /// Create a stopped clock with `initial` time on both sides.
    pub fn new(initial: Duration, increment: Duration, now: Instant) -> Self {
        Self {
            remaining: [initial; 2],
            running: None,
            epoch: now,
            increment,
        }
    }

    /// Time left for `color` as of the last charge.
    pub fn remaining(&self, color: Color) -> Duration {
        self.remaining[color.index()]
    }

    /// The side whose time is running, if any.
    pub fn running(&self) -> Option<Color> {
        self.running
    }

    /// Per-move increment.
    pub fn increment(&self) -> Duration {
        self.increment
    }

    /// Start running `color` from `now`. Any side already running is charged
    /// up to `now` first.
    pub fn start(&mut self, color: Color, now: Instant) {
        self.charge(now);
        self.running = Some(color);
        self.epoch = now;
    }

    /// Deduct the time elapsed since the epoch from the running side and move
    /// the epoch to `now`. Returns the running side and what it has left.
    pub fn charge(&mut self, now: Instant) -> Option<(Color, Duration)> {
        let color = self.running?;
        let elapsed = now.saturating_duration_since(self.epoch);
        let slot = &mut self.remaining[color.index()];
        *slot = slot.saturating_sub(elapsed);
        self.epoch = now;
        Some((color, *slot))
    }

    /// Charge the running side and freeze both clocks.
    pub fn stop(&mut self, now: Instant) {
        self.charge(now);
        self.running = None;
    }

    /// Add `amount` to `color`.
    pub fn credit(&mut self, color: Color, amount: Duration) {
        let slot = &mut self.remaining[color.index()];
        *slot = slot.saturating_add(amount);
    }

    /// Running side whose time has run out.
    pub fn flagged(&self) -> Option<Color> {
        self.running
            .filter(|color| self.remaining[color.index()].is_zero())
    }

    /// Give `initial` back to any side that has run out, leaving the other
    /// side's time alone. Returns the sides that were refilled.
    pub fn refill_empty(&mut self, initial: Duration) -> Vec<Color> {
        let mut refilled = Vec::new();
        for color in Color::ALL {
            let slot = &mut self.remaining[color.index()];
            if slot.is_zero() {
                *slot = initial;
                refilled.push(color);
            }
        }
        refilled
    }

    /// Put `initial` back on both sides and stop the clock.
    pub fn reset(&mut self, initial: Duration, now: Instant) {
        self.remaining = [initial; 2];
        self.running = None;
        self.epoch = now;
    }

    /// Remaining time for both sides as it would be after charging at `now`,
    /// without mutating the clock.
    pub fn snapshot(&self, now: Instant) -> Clocks {
        let mut remaining = self.remaining;
        if let Some(color) = self.running {
            let elapsed = now.saturating_duration_since(self.epoch);
            remaining[color.index()] = remaining[color.index()].saturating_sub(elapsed);
        }
        Clocks {
            white: millis(remaining[0]),
            black: millis(remaining[1]),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
