//! Cancelable periodic clock tick.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// A room's single source of clock ticks.
///
/// At most one interval exists at a time: `start` on an active source does
/// nothing, and a new interval can only come into being after `stop`.
#[derive(Debug)]
pub struct TickSource {
    period: Duration,
    interval: Option<Interval>,
}

impl TickSource {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Begin ticking one period from now. Returns false if already ticking.
    pub fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        true
    }

    /// Stop ticking. Returns false if nothing was running.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick. Never resolves while stopped.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}
