//! Shared harness: orchestrators wired to a real `SignalingRelay` through
//! in-memory channels instead of sockets.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use huddle_client::peer::PeerEventReceiver;
use huddle_client::{
    MediaPlatform, MediaSink, Orchestrator, PeerSinks, RoomEvent, SessionState, SinkProvider,
};
use huddle_common::{ClientMessage, IceServer, ParticipantId, Result, RoomId, ServerMessage};
use huddle_gateway::room::JoinError;
use huddle_gateway::SignalingRelay;

pub const TEST_STUN: &str = "stun:stun.example.org:3478";

/// Logs `attach <peer>:<kind>` and `release <peer>:<kind>`.
pub struct RecordingSink {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl<R> MediaSink<R> for RecordingSink {
    fn attach(&mut self, _track: R) {
        self.log
            .lock()
            .unwrap()
            .push(format!("attach {}", self.label));
    }

    fn release(&mut self) {
        self.log
            .lock()
            .unwrap()
            .push(format!("release {}", self.label));
    }
}

pub struct RecordingSinks {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl<R> SinkProvider<R> for RecordingSinks {
    fn sinks_for(&mut self, peer: &ParticipantId) -> PeerSinks<R> {
        PeerSinks::new(
            Box::new(RecordingSink {
                label: format!("{}:audio", peer),
                log: self.log.clone(),
            }),
            Box::new(RecordingSink {
                label: format!("{}:video", peer),
                log: self.log.clone(),
            }),
        )
    }
}

/// One participant. `handle` lets tests look inside the platform the
/// orchestrator owns.
pub struct Client<P: MediaPlatform, H> {
    pub id: ParticipantId,
    pub orchestrator: Orchestrator<P>,
    pub handle: H,
    pub outbound: mpsc::Receiver<ClientMessage>,
    inbox: mpsc::Receiver<ServerMessage>,
    outbox: mpsc::Sender<ServerMessage>,
    peer_events: PeerEventReceiver<P::Remote>,
    ui: mpsc::UnboundedReceiver<RoomEvent>,
    sink_log: Arc<Mutex<Vec<String>>>,
}

impl<P: MediaPlatform, H> Client<P, H> {
    pub fn ui_events(&mut self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn sink_log(&self) -> Vec<String> {
        self.sink_log.lock().unwrap().clone()
    }

    pub fn state_of(&self, peer: &str) -> Option<SessionState> {
        self.orchestrator
            .sessions()
            .state_of(&ParticipantId::from(peer))
    }
}

pub struct Mesh<P: MediaPlatform, H> {
    pub relay: Arc<SignalingRelay>,
    pub clients: Vec<Client<P, H>>,
    /// Every negotiation payload the relay accepted, as (from, to, payload).
    pub relayed: Vec<(ParticipantId, ParticipantId, Value)>,
}

impl<P: MediaPlatform, H> Default for Mesh<P, H> {
    fn default() -> Self {
        Self {
            relay: Arc::new(SignalingRelay::new()),
            clients: Vec::new(),
            relayed: Vec::new(),
        }
    }
}

impl<P: MediaPlatform, H> Mesh<P, H> {
    /// Connects a client to the relay without joining anything yet.
    pub async fn add(&mut self, id: &str, room: &str, platform: P, handle: H) -> usize {
        let id = ParticipantId::from(id);
        let (signals_tx, outbound) = mpsc::channel(256);
        let (outbox, inbox) = mpsc::channel(256);
        let (ui_tx, ui) = mpsc::unbounded_channel();
        let sink_log = Arc::new(Mutex::new(Vec::new()));

        let mut orchestrator = Orchestrator::new(
            platform,
            RoomId::from(room),
            signals_tx,
            Box::new(RecordingSinks {
                log: sink_log.clone(),
            }),
            ui_tx,
        );
        let peer_events = orchestrator
            .take_peer_events()
            .expect("peer events available");
        self.relay.connect(id.clone(), outbox.clone()).await;

        self.clients.push(Client {
            id,
            orchestrator,
            handle,
            outbound,
            inbox,
            outbox,
            peer_events,
            ui,
            sink_log,
        });
        self.clients.len() - 1
    }

    pub async fn welcome(&mut self, idx: usize) -> Result<()> {
        let participant_id = self.clients[idx].id.clone();
        self.clients[idx]
            .orchestrator
            .handle_server_message(ServerMessage::Welcome {
                participant_id,
                ice_servers: vec![IceServer::stun(TEST_STUN)],
            })
            .await
    }

    pub async fn join_with(&mut self, id: &str, room: &str, platform: P, handle: H) -> usize {
        let idx = self.add(id, room, platform, handle).await;
        self.welcome(idx).await.expect("join succeeds");
        self.settle().await;
        idx
    }

    pub fn client(&mut self, id: &str) -> &mut Client<P, H> {
        let idx = self
            .clients
            .iter()
            .position(|client| client.id.as_str() == id)
            .unwrap_or_else(|| panic!("unknown client {}", id));
        &mut self.clients[idx]
    }

    pub fn orchestrator(&mut self, id: &str) -> &mut Orchestrator<P> {
        &mut self.client(id).orchestrator
    }

    pub fn payloads_from(&self, id: &str, kind: &str) -> Vec<&Value> {
        self.relayed
            .iter()
            .filter(|(from, _, payload)| from.as_str() == id && payload["type"] == kind)
            .map(|(_, _, payload)| payload)
            .collect()
    }

    pub fn offers_from(&self, id: &str) -> usize {
        self.payloads_from(id, "offer").len()
    }

    pub fn requests_from(&self, id: &str) -> usize {
        self.payloads_from(id, "renegotiate").len()
    }

    pub fn offers_total(&self) -> usize {
        self.relayed
            .iter()
            .filter(|(_, _, payload)| payload["type"] == "offer")
            .count()
    }

    /// Hands one outbound message to the relay the way the gateway's socket
    /// loop does.
    async fn forward(&mut self, idx: usize, message: ClientMessage) {
        let sender = self.clients[idx].id.clone();
        match message {
            ClientMessage::Join { room_id } => {
                if let Err(JoinError::AlreadyJoined(current)) =
                    self.relay.join(&sender, room_id).await
                {
                    let _ = self.clients[idx]
                        .outbox
                        .try_send(ServerMessage::error(format!("Already joined room {}", current)));
                }
            }
            ClientMessage::Negotiate { to, payload } => {
                if self.relay.relay(&sender, &to, payload.clone()).await {
                    self.relayed.push((sender, to, payload));
                }
            }
            ClientMessage::Chat { text } => {
                self.relay.broadcast_chat(&sender, &text).await;
            }
        }
    }

    /// One round of peer events, outbound signaling and deliveries.
    /// Returns whether anything moved.
    pub async fn pump(&mut self) -> bool {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let mut progressed = false;

        for client in self.clients.iter_mut() {
            while let Ok(event) = client.peer_events.try_recv() {
                client.orchestrator.handle_peer_event(event).await;
                progressed = true;
            }
        }

        let mut outgoing = Vec::new();
        for (idx, client) in self.clients.iter_mut().enumerate() {
            while let Ok(message) = client.outbound.try_recv() {
                outgoing.push((idx, message));
            }
        }
        for (idx, message) in outgoing {
            progressed = true;
            self.forward(idx, message).await;
        }

        for client in self.clients.iter_mut() {
            while let Ok(message) = client.inbox.try_recv() {
                progressed = true;
                client
                    .orchestrator
                    .handle_server_message(message)
                    .await
                    .expect("server message handled");
            }
        }
        progressed
    }

    /// Pumps until nothing moves.
    pub async fn settle(&mut self) {
        for _ in 0..64 {
            if !self.pump().await {
                return;
            }
        }
        panic!("mesh did not settle");
    }

    /// Keeps pumping for `period`, for platforms whose callbacks fire from
    /// background tasks.
    pub async fn settle_for(&mut self, period: Duration) {
        let deadline = tokio::time::Instant::now() + period;
        while tokio::time::Instant::now() < deadline {
            self.pump().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.pump().await;
    }

    /// Shuts the client down and drops its connection, as a closed socket
    /// would.
    pub async fn leave(&mut self, id: &str) {
        let leaver = ParticipantId::from(id);
        self.orchestrator(id).shutdown().await;
        self.relay.disconnect(&leaver).await;
        self.settle().await;
    }
}
