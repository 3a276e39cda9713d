//! Client end of the signaling channel.
//!
//! The socket is split into a writer task draining [`ClientMessage`]s and a
//! reader task pushing parsed [`ServerMessage`]s. When the socket closes the
//! inbound channel closes with it.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};

use huddle_common::{ClientMessage, Error, Result, ServerMessage};

const OUTBOUND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 128;

pub struct SignalingChannel {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

pub async fn connect(url: &str) -> Result<SignalingChannel> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::transport(format!("failed to connect to {}: {}", url, e)))?;
    info!("connected to signaling gateway: {}", url);

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(INBOUND_CAPACITY);

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode signaling message: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(WsMessage::Text(text)).await {
                error!("failed to send signaling message: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    let message: ServerMessage = match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("failed to parse signaling message: {}", e);
                            continue;
                        }
                    };
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!("signaling socket closed: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("signaling WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(SignalingChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}
