//! Per-room event fan-out.
//!
//! A room publishes every event through its own [`BroadcastBus`] from a
//! single task, and each connection drains a FIFO outbox, so every seat that
//! is connected sees the room's events in the order they were produced.
//! Seats without a link are skipped; nothing is queued for them.

use crate::protocol::ServerMessage;
use tempo_core::Color;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one transport connection.
pub type ConnectionId = Uuid;

/// Sender half of a connection's outgoing message queue.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// A seat's current delivery target.
#[derive(Debug, Clone)]
pub struct Link {
    pub connection: ConnectionId,
    pub outbox: Outbox,
}

#[derive(Debug, Default)]
pub struct BroadcastBus {
    links: [Option<Link>; 2],
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `color`'s deliveries at a new connection, replacing any old one.
    pub fn bind(&mut self, color: Color, link: Link) {
        self.links[color.index()] = Some(link);
    }

    /// Drop `color`'s link if it still belongs to `connection`.
    ///
    /// Returns false when the seat has since been rebound to another
    /// connection, in which case nothing changes.
    pub fn unbind(&mut self, color: Color, connection: ConnectionId) -> bool {
        let slot = &mut self.links[color.index()];
        match slot {
            Some(link) if link.connection == connection => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, color: Color) -> bool {
        self.links[color.index()].is_some()
    }

    /// Whether `connection` is the one currently bound to `color`.
    pub fn is_bound_to(&self, color: Color, connection: ConnectionId) -> bool {
        self.links[color.index()]
            .as_ref()
            .is_some_and(|link| link.connection == connection)
    }

    pub fn connected_count(&self) -> usize {
        self.links.iter().flatten().count()
    }

    /// Deliver to every connected seat, white first.
    pub fn publish(&self, msg: &ServerMessage) {
        for link in self.links.iter().flatten() {
            let _ = link.outbox.send(msg.clone());
        }
    }

    /// Deliver to one seat if connected.
    pub fn send_to(&self, color: Color, msg: ServerMessage) {
        if let Some(link) = &self.links[color.index()] {
            let _ = link.outbox.send(msg);
        }
    }

    /// Deliver to every connected seat except `color`.
    pub fn publish_except(&self, color: Color, msg: &ServerMessage) {
        if let Some(link) = &self.links[color.opposite().index()] {
            let _ = link.outbox.send(msg.clone());
        }
    }
}
