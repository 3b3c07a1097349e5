//! WebSocket server and connection handling.

use crate::gateway::Gateway;
use crate::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tempo_core::RuleEngine;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

/// Run the WebSocket server.
pub async fn run_server<E: RuleEngine>(
    addr: SocketAddr,
    gateway: Arc<Gateway<E>>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Tempo server listening on {}", addr);
    serve(listener, gateway).await
}

/// Accept connections on an already bound listener.
pub async fn serve<E: RuleEngine>(
    listener: TcpListener,
    gateway: Arc<Gateway<E>>,
) -> anyhow::Result<()> {
    while let Ok((stream, peer_addr)) = listener.accept().await {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, gateway).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection<E: RuleEngine>(
    stream: TcpStream,
    addr: SocketAddr,
    gateway: Arc<Gateway<E>>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection = gateway.connect(tx);
    info!("New WebSocket connection {} from {}", connection, addr);

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode {:?}: {}", msg, e),
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => gateway.dispatch(connection, client_msg).await,
                Err(e) => {
                    warn!("Malformed message from {}: {}", connection, e);
                    gateway.send(connection, ServerMessage::error("Malformed command"));
                }
            },
            Ok(Message::Binary(_)) => {
                gateway.send(connection, ServerMessage::error("Malformed command"));
            }
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", connection);
                break;
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", connection, e);
                break;
            }
            _ => {}
        }
    }

    // Clean up on disconnect
    gateway.disconnect(connection);
    send_task.abort();

    info!("Connection closed for {}", connection);
    Ok(())
}
