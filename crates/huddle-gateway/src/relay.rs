//! Signaling relay.
//!
//! Forwards negotiation payloads and chat between members of the same room.
//! Payloads are never inspected: the relay only knows who sent a message
//! and who should get it.

use std::collections::HashMap;

use huddle_common::helpers::{now_millis, sanitize_chat_text};
use huddle_common::{ParticipantId, RoomId, ServerMessage};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::room::{Departure, JoinError, RoomRegistry};

/// Per-connection queue drained by the socket writer task.
pub type Outbox = mpsc::Sender<ServerMessage>;

#[derive(Default)]
pub struct SignalingRelay {
    connections: RwLock<HashMap<ParticipantId, Outbox>>,
    rooms: RwLock<RoomRegistry>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the outbox for a freshly upgraded connection.
    pub async fn connect(&self, participant: ParticipantId, outbox: Outbox) {
        self.connections.write().await.insert(participant, outbox);
    }

    /// Admits `participant` to `room_id`, sends it the roster and tells the
    /// existing members about it. Returns the roster.
    pub async fn join(
        &self,
        participant: &ParticipantId,
        room_id: RoomId,
    ) -> Result<Vec<ParticipantId>, JoinError> {
        let admission = self.rooms.write().await.join(participant, &room_id)?;
        info!(
            "{} joined room {} ({} already present)",
            participant,
            room_id,
            admission.existing.len()
        );

        self.deliver(
            participant,
            ServerMessage::Roster {
                participants: admission.existing.clone(),
            },
        )
        .await;
        for member in &admission.existing {
            self.deliver(
                member,
                ServerMessage::ParticipantJoined {
                    participant_id: participant.clone(),
                },
            )
            .await;
        }

        Ok(admission.existing)
    }

    /// Forwards `payload` from one participant to another in the same room.
    ///
    /// Returns false when the message was dropped.
    pub async fn relay(&self, from: &ParticipantId, to: &ParticipantId, payload: Value) -> bool {
        if !self.rooms.read().await.shares_room(from, to) {
            warn!("dropping negotiation from {} to {}: not in the same room", from, to);
            return false;
        }

        self.deliver(
            to,
            ServerMessage::Negotiate {
                from: from.clone(),
                payload,
            },
        )
        .await
    }

    /// Broadcasts a chat line to the sender's room, skipping the sender.
    ///
    /// Returns how many members the line was queued for. Blank text and
    /// senders without a room are dropped silently.
    pub async fn broadcast_chat(&self, from: &ParticipantId, text: &str) -> usize {
        let Some(text) = sanitize_chat_text(text) else {
            debug!("dropping blank chat from {}", from);
            return 0;
        };

        let recipients: Vec<ParticipantId> = {
            let rooms = self.rooms.read().await;
            let Some(room_id) = rooms.room_of(from) else {
                debug!("dropping chat from {}: not in a room", from);
                return 0;
            };
            rooms
                .members(room_id)
                .iter()
                .filter(|member| *member != from)
                .cloned()
                .collect()
        };

        let message = ServerMessage::Chat {
            from: from.clone(),
            text,
            timestamp: now_millis(),
        };
        let mut delivered = 0;
        for member in &recipients {
            if self.deliver(member, message.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Removes `participant` from its room and notifies whoever is left.
    pub async fn leave(&self, participant: &ParticipantId) -> Option<Departure> {
        let departure = self.rooms.write().await.leave(participant)?;
        info!("{} left room {}", participant, departure.room_id);

        for member in &departure.remaining {
            self.deliver(
                member,
                ServerMessage::ParticipantLeft {
                    participant_id: participant.clone(),
                },
            )
            .await;
        }
        Some(departure)
    }

    /// Connection closed: leave the room and forget the outbox.
    pub async fn disconnect(&self, participant: &ParticipantId) {
        self.leave(participant).await;
        self.connections.write().await.remove(participant);
    }

    pub async fn room_of(&self, participant: &ParticipantId) -> Option<RoomId> {
        self.rooms.read().await.room_of(participant).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.room_count()
    }

    pub async fn participant_count(&self) -> usize {
        self.rooms.read().await.participant_count()
    }

    async fn deliver(&self, target: &ParticipantId, message: ServerMessage) -> bool {
        let outbox = {
            let guard = self.connections.read().await;
            guard.get(target).cloned()
        };

        let Some(outbox) = outbox else {
            warn!("target participant not connected: {}", target);
            return false;
        };

        match outbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("outbox full, dropping message for {}", target);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("outbox closed for {}", target);
                false
            }
        }
    }
}
