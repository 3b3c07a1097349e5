//! Room actor.
//!
//! Each room runs on its own task and is the only writer of its
//! [`GameRoom`]. Commands, clock ticks and grace deadlines are all handled
//! from one `select!` loop, so a tick can never interleave with a move.

use tempo_core::{MoveRequest, RuleEngine};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::broadcast::ConnectionId;
use crate::protocol::{PlayerId, RoomId};
use crate::registry::RoomRegistry;
use crate::room::{GameRoom, JoinReceipt, JoinRequest, Origin, RoomError, RoomSummary};
use crate::ticker::TickSource;

/// Commands accepted by a room actor.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<JoinReceipt, RoomError>>,
    },
    Move {
        origin: Origin,
        request: MoveRequest,
    },
    Chat {
        origin: Origin,
        text: String,
    },
    Resign {
        origin: Origin,
    },
    OfferDraw {
        origin: Origin,
    },
    AcceptDraw {
        origin: Origin,
    },
    Rematch {
        origin: Origin,
    },
    Disconnect {
        player_id: PlayerId,
        connection: ConnectionId,
    },
    Shutdown,
    /// Break the room's invariants.
    #[cfg(test)]
    Corrupt,
}

/// Cheap, cloneable reference to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: RoomId,
    instance: u64,
    sender: mpsc::UnboundedSender<RoomCommand>,
    summary: watch::Receiver<RoomSummary>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry-unique number telling apart rooms that reused an id.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// State published after the room's last step.
    pub fn summary(&self) -> RoomSummary {
        *self.summary.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.sender.send(command).map_err(|_| RoomError::Closed)
    }

    /// Ask the room for a seat and wait for the answer.
    ///
    /// Rejections other than [`RoomError::Closed`] have already been reported
    /// to the requester's outbox by the room.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinReceipt, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join { request, reply })?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(RoomCommand::Shutdown);
    }
}

/// Spawn the task driving `room` and return its handle.
pub(crate) fn spawn<E: RuleEngine>(
    room: GameRoom<E>,
    instance: u64,
    registry: RoomRegistry<E>,
) -> RoomHandle {
    let (sender, inbox) = mpsc::unbounded_channel();
    let (summary_tx, summary_rx) = watch::channel(room.summary());
    let handle = RoomHandle {
        id: room.id.clone(),
        instance,
        sender,
        summary: summary_rx,
    };

    let actor = RoomActor {
        ticker: TickSource::new(room.config().tick_interval),
        room,
        inbox,
        summary: summary_tx,
        registry,
        instance,
    };
    tokio::spawn(actor.run());
    handle
}

struct RoomActor<E: RuleEngine> {
    room: GameRoom<E>,
    inbox: mpsc::UnboundedReceiver<RoomCommand>,
    ticker: TickSource,
    summary: watch::Sender<RoomSummary>,
    registry: RoomRegistry<E>,
    instance: u64,
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<E: RuleEngine> RoomActor<E> {
    async fn run(mut self) {
        info!("Room {} opened", self.room.id);

        loop {
            let deadline = self.room.deadline().map(Instant::from_std);

            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(RoomCommand::Shutdown) | None => {
                        self.room.close("Room closed", now());
                        break;
                    }
                    Some(command) => self.handle(command),
                },
                _ = self.ticker.tick() => self.room.tick(now()),
                _ = sleep_until_opt(deadline) => {
                    if self.room.expire(now()) {
                        self.registry.remove_instance(&self.room.id, self.instance);
                        break;
                    }
                }
            }

            if let Err(e) = self.room.check_invariants() {
                error!("Room {} torn down: {}", self.room.id, e);
                self.room.close("Internal room error", now());
                self.registry.remove_instance(&self.room.id, self.instance);
                break;
            }
            self.sync_ticker();
            self.summary.send_replace(self.room.summary());
        }

        self.ticker.stop();
        let lifetime = now().saturating_duration_since(self.room.created_at());
        info!("Room {} closed after {:?}", self.room.id, lifetime);
    }

    fn handle(&mut self, command: RoomCommand) {
        let now = now();
        match command {
            RoomCommand::Join { request, reply } => {
                let outbox = request.outbox.clone();
                let result = self.room.join(request, now);
                if let Err(e) = &result {
                    debug!("Room {}: join refused: {}", self.room.id, e);
                    let _ = outbox.send(e.to_message());
                }
                let _ = reply.send(result);
            }
            RoomCommand::Move { origin, request } => {
                let result = self.room.apply_move(&origin, &request, now);
                self.report(&origin, result);
            }
            RoomCommand::Chat { origin, text } => {
                let result = self.room.chat(&origin, &text, now);
                self.report(&origin, result);
            }
            RoomCommand::Resign { origin } => {
                let result = self.room.resign(&origin, now);
                self.report(&origin, result);
            }
            RoomCommand::OfferDraw { origin } => {
                let result = self.room.offer_draw(&origin, now);
                self.report(&origin, result);
            }
            RoomCommand::AcceptDraw { origin } => {
                let result = self.room.accept_draw(&origin, now);
                self.report(&origin, result);
            }
            RoomCommand::Rematch { origin } => {
                let result = self.room.rematch(&origin, now);
                self.report(&origin, result);
            }
            RoomCommand::Disconnect {
                player_id,
                connection,
            } => {
                self.room.disconnect(player_id, connection, now);
            }
            // Consumed by the run loop
            RoomCommand::Shutdown => {}
            #[cfg(test)]
            RoomCommand::Corrupt => self.room.corrupt_seats(),
        }
    }

    /// Send a rejected command's error back to whoever issued it.
    fn report(&self, origin: &Origin, result: Result<(), RoomError>) {
        if let Err(e) = result {
            debug!("Room {}: {} rejected: {}", self.room.id, origin.player_id, e);
            let _ = origin.outbox.send(e.to_message());
        }
    }

    /// Keep exactly one tick source alive while the game is being played.
    fn sync_ticker(&mut self) {
        if self.room.clock_running() {
            if self.ticker.start() {
                debug!("Room {}: clock ticking", self.room.id);
            }
        } else if self.ticker.stop() {
            debug!("Room {}: clock stopped", self.room.id);
        }
    }
}
