use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{stream::StreamExt, SinkExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_common::helpers::is_valid_room_id;
use huddle_common::{ClientMessage, ParticipantId, ServerMessage};

use crate::relay::SignalingRelay;
use crate::room::JoinError;
use crate::security::{
    self, MessageBudget, MAX_NEGOTIATE_PAYLOAD_BYTES, WS_MAX_TEXT_BYTES, WS_OUTBOX_CAPACITY,
};
use crate::GatewayConfig;

static ACTIVE_WS_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

fn to_ws_message(signal: &ServerMessage) -> Option<Message> {
    serde_json::to_string(signal).ok().map(Message::Text)
}

async fn send_signal(tx: &mpsc::Sender<ServerMessage>, signal: ServerMessage) -> bool {
    tx.send(signal).await.is_ok()
}

fn new_participant_id() -> ParticipantId {
    ParticipantId::new(Uuid::new_v4().simple().to_string())
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(relay): State<Arc<SignalingRelay>>,
    State(config): State<Arc<GatewayConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if !security::allow_ws_connect(&format!("ws:{}", addr.ip())) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    if ACTIVE_WS_CONNECTIONS.load(Ordering::Relaxed) >= security::ws_connection_limit() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(WS_MAX_TEXT_BYTES)
        .max_frame_size(WS_MAX_TEXT_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, relay, config, addr))
        .into_response()
}

async fn handle_socket(
    stream: WebSocket,
    relay: Arc<SignalingRelay>,
    config: Arc<GatewayConfig>,
    addr: SocketAddr,
) {
    ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    let participant = new_participant_id();
    info!("participant {} connected from {}", participant, addr);

    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(WS_OUTBOX_CAPACITY);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            let Some(msg) = to_ws_message(&signal) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    send_signal(
        &tx,
        ServerMessage::Welcome {
            participant_id: participant.clone(),
            ice_servers: config.ice_servers.clone(),
        },
    )
    .await;
    relay.connect(participant.clone(), tx.clone()).await;

    let mut budget = MessageBudget::per_minute_from_env();

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let Ok(msg) = msg else { break; };

                if !budget.consume() {
                    send_signal(&tx, ServerMessage::error("Rate limit exceeded")).await;
                    break;
                }

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        send_signal(&tx, ServerMessage::error("Binary messages are not supported")).await;
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if text.len() > WS_MAX_TEXT_BYTES {
                    send_signal(&tx, ServerMessage::error("Message too large")).await;
                    break;
                }

                let signal: ClientMessage = match serde_json::from_str(&text) {
                    Ok(signal) => signal,
                    Err(err) => {
                        warn!("invalid JSON from {}: {}", participant, err);
                        send_signal(&tx, ServerMessage::error("Invalid JSON")).await;
                        break;
                    }
                };

                match signal {
                    ClientMessage::Join { room_id } => {
                        if !is_valid_room_id(room_id.as_str()) {
                            send_signal(&tx, ServerMessage::error("Invalid room id")).await;
                            continue;
                        }
                        if let Err(JoinError::AlreadyJoined(current)) =
                            relay.join(&participant, room_id).await
                        {
                            send_signal(
                                &tx,
                                ServerMessage::error(format!("Already joined room {}", current)),
                            )
                            .await;
                        }
                    }
                    ClientMessage::Negotiate { to, payload } => {
                        if relay.room_of(&participant).await.is_none() {
                            send_signal(&tx, ServerMessage::error("Join a room before signaling")).await;
                            continue;
                        }
                        let size = serde_json::to_vec(&payload)
                            .map(|bytes| bytes.len())
                            .unwrap_or(usize::MAX);
                        if size > MAX_NEGOTIATE_PAYLOAD_BYTES {
                            send_signal(&tx, ServerMessage::error("Negotiation payload too large")).await;
                            continue;
                        }
                        relay.relay(&participant, &to, payload).await;
                    }
                    ClientMessage::Chat { text } => {
                        let delivered = relay.broadcast_chat(&participant, &text).await;
                        debug!("chat from {} delivered to {} members", participant, delivered);
                    }
                }
            }
        }
    }

    info!("participant {} disconnected", participant);
    relay.disconnect(&participant).await;
    ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
}
