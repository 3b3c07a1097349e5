//! End-to-end room scenarios driven through the gateway on a paused clock.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempo_core::{ChessEngine, Clocks, Color};
use tempo_server::broadcast::ConnectionId;
use tempo_server::protocol::{ClientMessage, GameOverReason, PlayerId, ServerMessage};
use tempo_server::{Gateway, RoomRegistry, ServerConfig};
use tokio::sync::mpsc;

struct Player {
    connection: ConnectionId,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Player {
    fn connect(gateway: &Gateway<ChessEngine>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connection: gateway.connect(tx),
            rx,
        }
    }

    /// Everything received so far, minus periodic clock updates.
    fn events(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if !matches!(msg, ServerMessage::ClockUpdate { .. }) {
                out.push(msg);
            }
        }
        out
    }
}

fn gateway() -> Gateway<ChessEngine> {
    let config = ServerConfig::default();
    let registry = RoomRegistry::new(Arc::new(ChessEngine::new()), config.max_rooms);
    Gateway::new(registry, config)
}

fn join(room_id: &str, name: &str, clock: Option<u64>, player_id: Option<PlayerId>) -> ClientMessage {
    ClientMessage::Join {
        room_id: room_id.into(),
        name: name.into(),
        desired_clock_seconds: clock,
        player_id,
    }
}

fn mv(from: &str, to: &str) -> ClientMessage {
    ClientMessage::Move {
        from: from.into(),
        to: to.into(),
        promotion: None,
    }
}

/// Let room tasks drain their inboxes without moving the clock.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

async fn seat_both(
    gateway: &Gateway<ChessEngine>,
    room_id: &str,
    clock: Option<u64>,
) -> (Player, Player) {
    let mut white = Player::connect(gateway);
    let mut black = Player::connect(gateway);
    gateway
        .dispatch(white.connection, join(room_id, "Ada", clock, None))
        .await;
    gateway
        .dispatch(black.connection, join(room_id, "Grace", None, None))
        .await;
    settle().await;
    white.events();
    black.events();
    (white, black)
}

#[tokio::test(start_paused = true)]
async fn test_two_players_start_a_game() {
    let gateway = gateway();
    let mut white = Player::connect(&gateway);
    let mut black = Player::connect(&gateway);

    gateway
        .dispatch(white.connection, join("A", "Ada", Some(300), None))
        .await;
    let first = white.events();
    assert!(matches!(
        first[0],
        ServerMessage::Joined {
            color: Color::White,
            ..
        }
    ));
    assert!(matches!(first[1], ServerMessage::Waiting { .. }));

    gateway
        .dispatch(black.connection, join("A", "Grace", None, None))
        .await;
    settle().await;

    let expected_clocks = Clocks {
        white: 300_000,
        black: 300_000,
    };
    for events in [white.events(), black.events()] {
        let start = events
            .iter()
            .find_map(|m| match m {
                ServerMessage::Start { clocks, turn, .. } => Some((*clocks, *turn)),
                _ => None,
            })
            .expect("start event");
        assert_eq!(start, (expected_clocks, Color::White));
    }
}

#[tokio::test(start_paused = true)]
async fn test_move_charges_the_mover_only() {
    let gateway = gateway();
    let (mut white, mut black) = seat_both(&gateway, "B", None).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    gateway.dispatch(white.connection, mv("e2", "e4")).await;
    settle().await;

    for events in [white.events(), black.events()] {
        match events.as_slice() {
            [ServerMessage::MoveApplied {
                record,
                turn,
                clocks,
                ..
            }] => {
                assert_eq!(record.san, "e4");
                assert_eq!(*turn, Color::Black);
                assert_eq!(
                    *clocks,
                    Clocks {
                        white: 295_000,
                        black: 300_000
                    }
                );
            }
            other => panic!("expected one moveApplied, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_seat_forfeits_and_room_is_removed() {
    let gateway = gateway();
    let (mut white, black) = seat_both(&gateway, "C", None).await;

    gateway.disconnect(black.connection);
    settle().await;
    assert!(matches!(
        white.events().as_slice(),
        [ServerMessage::PeerLeft {
            color: Color::Black,
            ..
        }]
    ));

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    assert!(gateway.registry().get("C").is_none());
    let game_over = white.events().into_iter().find_map(|m| match m {
        ServerMessage::GameOver { reason, winner, .. } => Some((reason, winner)),
        _ => None,
    });
    assert_eq!(game_over, Some((GameOverReason::Abandoned, Some(Color::White))));

    gateway.dispatch(white.connection, mv("e2", "e4")).await;
    assert_eq!(
        white.events(),
        vec![ServerMessage::error("Room not found")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_flag_falls_exactly_once() {
    let gateway = gateway();
    let (mut white, mut black) = seat_both(&gateway, "D", Some(10)).await;

    tokio::time::sleep(Duration::from_secs(15)).await;
    settle().await;

    for events in [white.events(), black.events()] {
        let timeouts: Vec<_> = events
            .iter()
            .filter(|m| matches!(m, ServerMessage::Timeout { .. }))
            .collect();
        assert_eq!(
            timeouts,
            vec![&ServerMessage::Timeout {
                winner: Color::Black
            }]
        );
        assert!(events.iter().any(|m| matches!(
            m,
            ServerMessage::GameOver {
                reason: GameOverReason::Timeout,
                winner: Some(Color::Black),
                ..
            }
        )));
    }

    gateway.dispatch(white.connection, mv("e2", "e4")).await;
    settle().await;
    assert_eq!(
        white.events(),
        vec![ServerMessage::invalid("No game in progress")]
    );
    assert!(black.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restores_seat_and_state() {
    let gateway = gateway();
    let (white, mut black) = seat_both(&gateway, "R", None).await;
    let white_id = gateway.binding(white.connection).unwrap().player_id;

    gateway.dispatch(white.connection, mv("e2", "e4")).await;
    settle().await;
    gateway.disconnect(white.connection);
    settle().await;
    black.events();

    let mut returning = Player::connect(&gateway);
    gateway
        .dispatch(returning.connection, join("R", "", None, Some(white_id)))
        .await;
    settle().await;

    match returning.events().as_slice() {
        [ServerMessage::Joined {
            player_id,
            color,
            turn,
            move_history,
            names,
            reconnected,
            ..
        }] => {
            assert_eq!(*player_id, white_id);
            assert_eq!(*color, Color::White);
            assert_eq!(*turn, Color::Black);
            assert_eq!(move_history.len(), 1);
            assert_eq!(names.white.as_deref(), Some("Ada"));
            assert!(*reconnected);
        }
        other => panic!("expected joined snapshot, got {other:?}"),
    }
    assert!(matches!(
        black.events().as_slice(),
        [ServerMessage::PeerReturned {
            color: Color::White,
            ..
        }]
    ));

    // The game continues where it left off
    gateway.dispatch(black.connection, mv("e7", "e5")).await;
    settle().await;
    assert!(returning
        .events()
        .iter()
        .any(|m| matches!(m, ServerMessage::MoveApplied { turn: Color::White, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_rooms_are_independent() {
    let gateway = gateway();
    let (mut w1, mut b1) = seat_both(&gateway, "one", None).await;
    let (mut w2, _b2) = seat_both(&gateway, "two", None).await;

    gateway.dispatch(w1.connection, ClientMessage::Resign).await;
    settle().await;

    assert!(b1
        .events()
        .iter()
        .any(|m| matches!(m, ServerMessage::Resigned { winner: Color::Black })));
    assert!(w1
        .events()
        .iter()
        .any(|m| matches!(m, ServerMessage::GameOver { .. })));
    assert!(w2.events().is_empty());

    gateway.dispatch(w2.connection, mv("d2", "d4")).await;
    settle().await;
    assert!(matches!(
        w2.events().as_slice(),
        [ServerMessage::MoveApplied { .. }]
    ));
}
