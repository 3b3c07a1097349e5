//! Wire-level checks against a live listener.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempo_core::ChessEngine;
use tempo_server::{server, Gateway, RoomRegistry, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig::default();
    let registry = RoomRegistry::new(Arc::new(ChessEngine::new()), config.max_rooms);
    let gateway = Arc::new(Gateway::new(registry, config));
    tokio::spawn(server::serve(listener, gateway));
    format!("ws://{addr}")
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_join_and_start_over_the_wire() {
    let url = start_server().await;
    let (mut white, _) = connect_async(url.as_str()).await.unwrap();
    let (mut black, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut white,
        json!({"type": "join", "payload": {"roomId": "wire", "name": "Ada", "desiredClockSeconds": 60}}),
    )
    .await;
    let joined = recv(&mut white).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["payload"]["color"], "white");
    assert_eq!(joined["payload"]["clocks"], json!({"white": 60_000, "black": 60_000}));
    assert_eq!(recv(&mut white).await["type"], "waiting");

    send(
        &mut black,
        json!({"type": "join", "payload": {"roomId": "wire", "name": "Grace"}}),
    )
    .await;
    assert_eq!(recv(&mut black).await["payload"]["color"], "black");

    let start = recv(&mut white).await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["payload"]["turn"], "white");
    assert_eq!(start["payload"]["names"], json!({"white": "Ada", "black": "Grace"}));
}

#[tokio::test]
async fn test_malformed_command_reported() {
    let url = start_server().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    client
        .send(Message::Text("{\"type\": \"castle\"}".into()))
        .await
        .unwrap();
    assert_eq!(
        recv(&mut client).await,
        json!({"type": "error", "payload": {"message": "Malformed command"}})
    );

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "pong"}));
}
