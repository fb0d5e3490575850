use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use courier_types::events::{GatewayCommand, GatewayEvent};

use crate::delivery::DeliveryEngine;
use crate::presence::ConnectionHandle;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, presence
/// registration with backlog replay, then the command/event loop until
/// either side goes away.
pub async fn handle_connection(socket: WebSocket, engine: DeliveryEngine, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let (handle, mut user_rx) = ConnectionHandle::new();
    let conn_id = handle.conn_id();

    // Registers presence, replays the queued backlog, then queues the Ready
    // welcome. Everything lands in user_rx for the send task below.
    engine.on_connect(user_id, handle.clone()).await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let engine_recv = engine.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&engine_recv, &handle, user_id, &username_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    engine.on_disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use courier_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Dispatch one client command. Failures are reported to this connection as
/// Error frames; the session stays open.
async fn handle_command(
    engine: &DeliveryEngine,
    handle: &ConnectionHandle,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::MessageSend {
            recipient_id,
            content,
        } => match engine.send_message(user_id, recipient_id, content).await {
            Ok(message) => {
                info!(
                    "{} ({}) -> message {} to {}",
                    username, user_id, message.id, recipient_id
                );
            }
            Err(err) => {
                warn!("{} ({}) send failed: {}", username, user_id, err);
                handle.push(GatewayEvent::Error {
                    message: err.to_string(),
                });
            }
        },

        GatewayCommand::MarkRead { conversation_id } => {
            match engine.mark_read(conversation_id, user_id).await {
                Ok(updated) => {
                    info!(
                        "{} ({}) read {} messages in {}",
                        username, user_id, updated, conversation_id
                    );
                    handle.push(GatewayEvent::ConversationRead {
                        conversation_id,
                        updated,
                    });
                }
                Err(err) => {
                    warn!("{} ({}) mark read failed: {}", username, user_id, err);
                    handle.push(GatewayEvent::Error {
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}
