//! Server configuration read from the environment.

use anyhow::Context;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every configured duration. Deadlines are computed as
/// `now + duration` and must stay representable.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What a rematch does with the clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RematchClocks {
    /// Both sides get the room's configured time again
    #[default]
    Reset,
    /// Both sides keep what they had left when the last game ended
    Preserve,
}

impl FromStr for RematchClocks {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(Self::Reset),
            "preserve" => Ok(Self::Preserve),
            other => anyhow::bail!("unknown rematch clock policy {other:?}"),
        }
    }
}

/// Per-room settings fixed when the room is created.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Starting time for each side
    pub initial_clock: Duration,
    /// Time added to the mover after each move
    pub increment: Duration,
    /// How often the clock is re-accounted and broadcast
    pub tick_interval: Duration,
    /// How long a finished room lingers for rematch or reconnection
    pub terminal_grace: Duration,
    /// How long a seat may stay disconnected before the room is torn down
    pub disconnect_grace: Duration,
    /// Chat entries kept for reconnecting players
    pub chat_log_limit: usize,
    pub rematch_clocks: RematchClocks,
}

impl Default for RoomConfig {
    fn default() -> Self {
        ServerConfig::default().room_config(None)
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub default_clock: Duration,
    pub min_clock: Duration,
    pub max_clock: Duration,
    pub increment: Duration,
    pub tick_interval: Duration,
    pub terminal_grace: Duration,
    pub disconnect_grace: Duration,
    /// Rooms with nobody connected are swept after this long without activity
    pub idle_grace: Duration,
    pub sweep_interval: Duration,
    pub max_rooms: usize,
    pub chat_log_limit: usize,
    pub rematch_clocks: RematchClocks,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            default_clock: Duration::from_secs(300),
            min_clock: Duration::from_secs(10),
            max_clock: Duration::from_secs(3 * 60 * 60),
            increment: Duration::ZERO,
            tick_interval: Duration::from_secs(1),
            terminal_grace: Duration::from_secs(60),
            disconnect_grace: Duration::from_secs(60),
            idle_grace: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            max_rooms: 10_000,
            chat_log_limit: 100,
            rematch_clocks: RematchClocks::Reset,
        }
    }
}

impl ServerConfig {
    /// Read configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(v) => Ok(Duration::from_secs(
                    v.trim().parse().with_context(|| format!("{key}={v}"))?,
                )),
                None => Ok(default),
            }
        };

        let addr = match lookup("SERVER_ADDR") {
            Some(v) => v.parse().with_context(|| format!("SERVER_ADDR={v}"))?,
            None => defaults.addr,
        };
        let tick_interval = match lookup("TEMPO_TICK_MS") {
            Some(v) => Duration::from_millis(v.trim().parse().with_context(|| format!("TEMPO_TICK_MS={v}"))?),
            None => defaults.tick_interval,
        };
        let max_rooms = match lookup("TEMPO_MAX_ROOMS") {
            Some(v) => v.trim().parse().with_context(|| format!("TEMPO_MAX_ROOMS={v}"))?,
            None => defaults.max_rooms,
        };
        let chat_log_limit = match lookup("TEMPO_CHAT_LOG_LIMIT") {
            Some(v) => v.trim().parse().with_context(|| format!("TEMPO_CHAT_LOG_LIMIT={v}"))?,
            None => defaults.chat_log_limit,
        };
        let rematch_clocks = match lookup("TEMPO_REMATCH_CLOCKS") {
            Some(v) => v.parse()?,
            None => defaults.rematch_clocks,
        };

        let config = Self {
            addr,
            default_clock: secs("TEMPO_DEFAULT_CLOCK_SECS", defaults.default_clock)?,
            min_clock: secs("TEMPO_MIN_CLOCK_SECS", defaults.min_clock)?,
            max_clock: secs("TEMPO_MAX_CLOCK_SECS", defaults.max_clock)?,
            increment: secs("TEMPO_INCREMENT_SECS", defaults.increment)?,
            tick_interval,
            terminal_grace: secs("TEMPO_TERMINAL_GRACE_SECS", defaults.terminal_grace)?,
            disconnect_grace: secs("TEMPO_DISCONNECT_GRACE_SECS", defaults.disconnect_grace)?,
            idle_grace: secs("TEMPO_IDLE_GRACE_SECS", defaults.idle_grace)?,
            sweep_interval: secs("TEMPO_SWEEP_SECS", defaults.sweep_interval)?,
            max_rooms,
            chat_log_limit,
            rematch_clocks,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.min_clock <= self.max_clock,
            "TEMPO_MIN_CLOCK_SECS exceeds TEMPO_MAX_CLOCK_SECS"
        );
        anyhow::ensure!(!self.tick_interval.is_zero(), "TEMPO_TICK_MS must be positive");
        anyhow::ensure!(!self.sweep_interval.is_zero(), "TEMPO_SWEEP_SECS must be positive");

        for (key, value) in [
            ("TEMPO_DEFAULT_CLOCK_SECS", self.default_clock),
            ("TEMPO_MAX_CLOCK_SECS", self.max_clock),
            ("TEMPO_INCREMENT_SECS", self.increment),
            ("TEMPO_TICK_MS", self.tick_interval),
            ("TEMPO_TERMINAL_GRACE_SECS", self.terminal_grace),
            ("TEMPO_DISCONNECT_GRACE_SECS", self.disconnect_grace),
            ("TEMPO_IDLE_GRACE_SECS", self.idle_grace),
            ("TEMPO_SWEEP_SECS", self.sweep_interval),
        ] {
            anyhow::ensure!(
                value <= MAX_DURATION,
                "{key} exceeds {} seconds",
                MAX_DURATION.as_secs()
            );
        }
        Ok(())
    }

    /// Settings for a new room, honoring a player's requested clock within
    /// the configured bounds.
    pub fn room_config(&self, desired_clock_seconds: Option<u64>) -> RoomConfig {
        let initial_clock = desired_clock_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_clock)
            .clamp(self.min_clock, self.max_clock);

        RoomConfig {
            initial_clock,
            increment: self.increment,
            tick_interval: self.tick_interval,
            terminal_grace: self.terminal_grace,
            disconnect_grace: self.disconnect_grace,
            chat_log_limit: self.chat_log_limit,
            rematch_clocks: self.rematch_clocks,
        }
    }
}
