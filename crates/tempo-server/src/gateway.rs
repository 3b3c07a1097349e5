//! Connection gateway.
//!
//! Maps transport connections to room seats and routes decoded client
//! commands to the right room actor. The binding tables here are the only
//! state shared between rooms.

use dashmap::DashMap;
use tempo_core::{MoveRequest, RuleEngine};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::RoomCommand;
use crate::broadcast::{ConnectionId, Outbox};
use crate::config::ServerConfig;
use crate::protocol::{ClientMessage, PlayerId, RoomId, ServerMessage};
use crate::registry::RoomRegistry;
use crate::room::{JoinRequest, Origin, RoomError};

/// Where a connection is seated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub room_id: RoomId,
    pub instance: u64,
    pub player_id: PlayerId,
}

pub struct Gateway<E: RuleEngine> {
    registry: RoomRegistry<E>,
    config: ServerConfig,
    outboxes: DashMap<ConnectionId, Outbox>,
    bindings: DashMap<ConnectionId, Binding>,
}

impl<E: RuleEngine> Gateway<E> {
    pub fn new(registry: RoomRegistry<E>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            outboxes: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &RoomRegistry<E> {
        &self.registry
    }

    /// Register a new connection's outbox.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let connection = Uuid::new_v4();
        self.outboxes.insert(connection, outbox);
        connection
    }

    /// Forget a connection and release its seat, if any.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.outboxes.remove(&connection);
        if let Some((_, binding)) = self.bindings.remove(&connection) {
            self.leave(connection, &binding);
        }
    }

    pub fn binding(&self, connection: ConnectionId) -> Option<Binding> {
        self.bindings.get(&connection).map(|b| b.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Send directly to one connection.
    pub fn send(&self, connection: ConnectionId, msg: ServerMessage) {
        if let Some(outbox) = self.outboxes.get(&connection) {
            let _ = outbox.send(msg);
        }
    }

    /// Handle one decoded command from `connection`.
    pub async fn dispatch(&self, connection: ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::Join {
                room_id,
                name,
                desired_clock_seconds,
                player_id,
            } => {
                self.join(connection, room_id, name, desired_clock_seconds, player_id)
                    .await
            }
            ClientMessage::Move {
                from,
                to,
                promotion,
            } => self.forward(connection, |origin| RoomCommand::Move {
                origin,
                request: MoveRequest {
                    from,
                    to,
                    promotion,
                },
            }),
            ClientMessage::Chat { text } => {
                self.forward(connection, |origin| RoomCommand::Chat { origin, text })
            }
            ClientMessage::Resign => self.forward(connection, |origin| RoomCommand::Resign { origin }),
            ClientMessage::OfferDraw => {
                self.forward(connection, |origin| RoomCommand::OfferDraw { origin })
            }
            ClientMessage::AcceptDraw => {
                self.forward(connection, |origin| RoomCommand::AcceptDraw { origin })
            }
            ClientMessage::Rematch => {
                self.forward(connection, |origin| RoomCommand::Rematch { origin })
            }
            ClientMessage::Ping => self.send(connection, ServerMessage::Pong),
        }
    }

    async fn join(
        &self,
        connection: ConnectionId,
        room_id: RoomId,
        name: String,
        desired_clock_seconds: Option<u64>,
        mut player_id: Option<PlayerId>,
    ) {
        let Some(outbox) = self.outboxes.get(&connection).map(|o| o.clone()) else {
            return;
        };
        let room_id = room_id.trim().to_string();

        if let Some(previous) = self.binding(connection) {
            if previous.room_id == room_id {
                // Joining the same room again reclaims the same seat
                player_id = Some(previous.player_id);
            } else {
                self.bindings.remove(&connection);
                self.leave(connection, &previous);
            }
        }

        let room_config = self.config.room_config(desired_clock_seconds);
        let handle = match self.registry.get_or_create(&room_id, room_config) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Join to {:?} refused: {}", room_id, e);
                let _ = outbox.send(ServerMessage::error(e.to_string()));
                return;
            }
        };

        let request = JoinRequest {
            name,
            player_id,
            connection,
            outbox: outbox.clone(),
        };
        match handle.join(request).await {
            Ok(receipt) => {
                info!(
                    "Connection {} seated in {} as {}",
                    connection, room_id, receipt.color
                );
                self.bindings.insert(
                    connection,
                    Binding {
                        room_id,
                        instance: handle.instance(),
                        player_id: receipt.player_id,
                    },
                );
            }
            Err(RoomError::Closed) => {
                let _ = outbox.send(ServerMessage::error("Room not found"));
            }
            // Already reported to the connection by the room
            Err(e) => debug!("Connection {} not seated: {}", connection, e),
        }
    }

    fn forward<F>(&self, connection: ConnectionId, command: F)
    where
        F: FnOnce(Origin) -> RoomCommand,
    {
        let Some(binding) = self.binding(connection) else {
            self.send(connection, ServerMessage::error("Not in a room"));
            return;
        };
        let Some(outbox) = self.outboxes.get(&connection).map(|o| o.clone()) else {
            return;
        };

        let handle = self
            .registry
            .get(&binding.room_id)
            .filter(|h| h.instance() == binding.instance);
        let Some(handle) = handle else {
            self.bindings.remove(&connection);
            let _ = outbox.send(ServerMessage::error("Room not found"));
            return;
        };

        let origin = Origin {
            player_id: binding.player_id,
            connection,
            outbox: outbox.clone(),
        };
        if handle.send(command(origin)).is_err() {
            self.bindings.remove(&connection);
            let _ = outbox.send(ServerMessage::error("Room not found"));
        }
    }

    fn leave(&self, connection: ConnectionId, binding: &Binding) {
        let Some(handle) = self.registry.get(&binding.room_id) else {
            return;
        };
        if handle.instance() != binding.instance {
            return;
        }
        let _ = handle.send(RoomCommand::Disconnect {
            player_id: binding.player_id,
            connection,
        });
    }
}
