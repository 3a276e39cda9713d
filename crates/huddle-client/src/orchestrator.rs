//! Peer connection orchestrator.
//!
//! Turns room membership into a mesh of peer connections. Everything runs on
//! one task: inbound signaling, peer events and UI commands are handled one
//! at a time, so a session is never touched by two flows at once.
//!
//! Negotiation follows the usual offer/answer rules with three additions:
//!
//! * a media change while an offer is outstanding only sets
//!   `renegotiation_pending`; one fresh offer goes out after the answer;
//! * towards a peer with a larger id we are polite. Once a polite side's
//!   connection is up it never offers on its own; it sends a `renegotiate`
//!   request and the other side makes the offer. Only the opening offer
//!   (and the video follow-up below) comes from the polite side;
//! * if a polite side still sees a colliding offer, it discards its own
//!   connection and answers on a fresh one, since webrtc-rs can't roll a
//!   local offer back. The impolite side ignores colliding offers.
//!
//! A session created by an offer without a video section while we share
//! the screen is followed by our own offer, so the new peer gets a slot
//! for the screen track.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_common::helpers::{now_millis, sanitize_chat_text};
use huddle_common::{
    ClientMessage, Error, IceCandidate, IceServer, NegotiationPayload, ParticipantId, Result,
    RoomId, ServerMessage, SessionDescription, DEFAULT_STUN_SERVER,
};

use crate::events::{Command, RoomEvent};
use crate::media::LocalMedia;
use crate::peer::{
    LocalTrack, MediaPlatform, PeerConnection, PeerEvent, PeerEventReceiver, PeerEventSender,
    SinkProvider,
};
use crate::session::{PeerSession, PeerSessionTable, Role, SessionState};

pub type SessionTable<P> =
    PeerSessionTable<<P as MediaPlatform>::Connection, <P as MediaPlatform>::Remote>;

pub struct Orchestrator<P: MediaPlatform> {
    pub(crate) platform: P,
    pub(crate) room_id: RoomId,
    pub(crate) self_id: Option<ParticipantId>,
    pub(crate) ice_servers: Vec<IceServer>,
    /// Set when the ICE servers came from local configuration; the
    /// gateway's list is ignored then.
    ice_servers_pinned: bool,
    pub(crate) members: BTreeSet<ParticipantId>,
    pub(crate) sessions: SessionTable<P>,
    pub(crate) media: LocalMedia<P::Track>,
    pub(crate) sinks: Box<dyn SinkProvider<P::Remote>>,
    pub(crate) signals: mpsc::Sender<ClientMessage>,
    pub(crate) ui: mpsc::UnboundedSender<RoomEvent>,
    pub(crate) peer_events_tx: PeerEventSender<P::Remote>,
    peer_events_rx: Option<PeerEventReceiver<P::Remote>>,
}

impl<P: MediaPlatform> Orchestrator<P> {
    pub fn new(
        platform: P,
        room_id: RoomId,
        signals: mpsc::Sender<ClientMessage>,
        sinks: Box<dyn SinkProvider<P::Remote>>,
        ui: mpsc::UnboundedSender<RoomEvent>,
    ) -> Self {
        let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();
        Self {
            platform,
            room_id,
            self_id: None,
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            ice_servers_pinned: false,
            members: BTreeSet::new(),
            sessions: PeerSessionTable::new(),
            media: LocalMedia::new(),
            sinks,
            signals,
            ui,
            peer_events_tx,
            peer_events_rx: Some(peer_events_rx),
        }
    }

    /// Uses `ice_servers` instead of whatever the gateway suggests.
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        if !ice_servers.is_empty() {
            self.ice_servers = ice_servers;
            self.ice_servers_pinned = true;
        }
        self
    }

    pub fn self_id(&self) -> Option<&ParticipantId> {
        self.self_id.as_ref()
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn members(&self) -> &BTreeSet<ParticipantId> {
        &self.members
    }

    pub fn sessions(&self) -> &SessionTable<P> {
        &self.sessions
    }

    pub fn media(&self) -> &LocalMedia<P::Track> {
        &self.media
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// Hands out the peer event stream. [`Orchestrator::run`] takes it
    /// itself; callers driving the handlers by hand take it here.
    pub fn take_peer_events(&mut self) -> Option<PeerEventReceiver<P::Remote>> {
        self.peer_events_rx.take()
    }

    /// Event loop. Returns when the signaling channel closes, the UI asks to
    /// leave, or joining fails.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ServerMessage>,
        mut commands: mpsc::Receiver<Command>,
    ) -> Result<()> {
        let mut peer_events = self
            .take_peer_events()
            .ok_or_else(|| Error::internal("peer event stream already taken"))?;

        let outcome = loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("signaling channel closed");
                        break Ok(());
                    };
                    if let Err(err) = self.handle_server_message(message).await {
                        break Err(err);
                    }
                }
                Some(event) = peer_events.recv() => {
                    self.handle_peer_event(event).await;
                }
                command = commands.recv() => {
                    match command {
                        None | Some(Command::Leave) => break Ok(()),
                        Some(command) => {
                            if let Err(err) = self.handle_command(command).await {
                                warn!("command failed: {}", err);
                                self.emit(RoomEvent::Notice(err.to_string()));
                            }
                        }
                    }
                }
            }
        };

        self.shutdown().await;
        outcome
    }

    /// Acquires the microphone, then asks the gateway to join. Nothing is
    /// sent if the microphone can't be opened.
    pub async fn join(&mut self) -> Result<()> {
        if self.media.microphone().is_none() {
            let microphone = self.platform.capture_microphone().await?;
            info!("microphone acquired ({})", microphone.id());
            self.media.set_microphone(microphone);
        }

        info!("joining room {}", self.room_id);
        self.send(ClientMessage::Join {
            room_id: self.room_id.clone(),
        })
        .await
    }

    /// Only a failed join is returned as an error; per-peer problems close
    /// that peer's session and are logged.
    pub async fn handle_server_message(&mut self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::Welcome {
                participant_id,
                ice_servers,
            } => {
                info!("connected as {}", participant_id);
                self.self_id = Some(participant_id.clone());
                if !self.ice_servers_pinned && !ice_servers.is_empty() {
                    self.ice_servers = ice_servers;
                }
                self.emit(RoomEvent::Connected { participant_id });
                self.join().await?;
            }
            ServerMessage::Roster { participants } => {
                info!(
                    "joined room {} with {} other participant(s)",
                    self.room_id,
                    participants.len()
                );
                self.members.extend(participants.iter().cloned());
                self.emit(RoomEvent::Joined {
                    room_id: self.room_id.clone(),
                    members: participants.clone(),
                });
                for peer in &participants {
                    self.call(peer).await;
                }
            }
            ServerMessage::ParticipantJoined { participant_id } => {
                if self.members.insert(participant_id.clone()) {
                    info!("{} joined", participant_id);
                    self.emit(RoomEvent::MemberJoined { participant_id });
                }
            }
            ServerMessage::ParticipantLeft { participant_id } => {
                let was_member = self.members.remove(&participant_id);
                self.close_session(&participant_id).await;
                if was_member {
                    info!("{} left", participant_id);
                    self.emit(RoomEvent::MemberLeft { participant_id });
                }
            }
            ServerMessage::Negotiate { from, payload } => {
                match NegotiationPayload::from_value(payload) {
                    Ok(payload) => self.handle_incoming_signal(&from, payload).await,
                    Err(err) => warn!("dropping malformed negotiation from {}: {}", from, err),
                }
            }
            ServerMessage::Chat {
                from,
                text,
                timestamp,
            } => {
                self.emit(RoomEvent::Chat {
                    from,
                    text,
                    timestamp,
                    local: false,
                });
            }
            ServerMessage::Error { message } => {
                warn!("gateway error: {}", message);
                self.emit(RoomEvent::Notice(message));
            }
        }
        Ok(())
    }

    pub async fn handle_incoming_signal(&mut self, from: &ParticipantId, payload: NegotiationPayload) {
        let result = match payload {
            NegotiationPayload::Offer { sdp } => self.accept_offer(from, sdp).await,
            NegotiationPayload::Answer { sdp } => self.accept_answer(from, sdp).await,
            NegotiationPayload::Ice { candidate } => {
                self.apply_candidate(from, candidate).await;
                Ok(())
            }
            NegotiationPayload::Renegotiate => self.accept_renegotiation_request(from).await,
        };
        if let Err(err) = result {
            self.fail_session(from, err).await;
        }
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent<P::Remote>) {
        match event {
            PeerEvent::LocalCandidate { peer, candidate } => {
                if !self.sessions.contains(&peer) {
                    debug!("dropping local candidate for closed session {}", peer);
                    return;
                }
                if let Err(err) = self
                    .send_negotiation(&peer, NegotiationPayload::Ice { candidate })
                    .await
                {
                    warn!("failed to send candidate to {}: {}", peer, err);
                }
            }
            PeerEvent::RemoteTrack { peer, kind, track } => match self.sessions.get_mut(&peer) {
                Some(session) => {
                    debug!("{} track from {}", kind, peer);
                    session.sinks.route(kind, track);
                }
                None => debug!("dropping {} track from {}: no session", kind, peer),
            },
            PeerEvent::Failed { peer } => {
                warn!("connection to {} failed", peer);
                self.close_session(&peer).await;
            }
            PeerEvent::ScreenCaptureEnded { generation } => {
                if self.media.is_current_share(generation) {
                    info!("screen capture ended");
                    self.stop_screen_share().await;
                }
            }
        }
    }

    pub async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::ToggleMute => {
                self.toggle_mute();
            }
            Command::StartScreenShare => self.start_screen_share().await?,
            Command::StopScreenShare => self.stop_screen_share().await,
            Command::Chat(text) => self.send_chat(&text).await?,
            Command::Leave => self.shutdown().await,
        }
        Ok(())
    }

    /// Sends a chat line and echoes it locally. Blank text is ignored.
    pub async fn send_chat(&mut self, text: &str) -> Result<()> {
        let Some(text) = sanitize_chat_text(text) else {
            return Ok(());
        };
        self.send(ClientMessage::Chat { text: text.clone() }).await?;

        if let Some(me) = self.self_id.clone() {
            self.emit(RoomEvent::Chat {
                from: me,
                text,
                timestamp: now_millis(),
                local: true,
            });
        }
        Ok(())
    }

    /// Closes every session and releases local media.
    pub async fn shutdown(&mut self) {
        for peer in self.sessions.peer_ids() {
            self.close_session(&peer).await;
        }
        self.members.clear();
        self.media.release();
        self.emit(RoomEvent::Disconnected);
    }

    /// Closes the connection to `peer` and releases its sinks. Unknown
    /// peers are ignored.
    pub async fn close_session(&mut self, peer: &ParticipantId) {
        let Some(mut session) = self.sessions.remove(peer) else {
            return;
        };
        session.sinks.release();
        if let Err(err) = session.connection.close().await {
            debug!("error closing connection to {}: {}", peer, err);
        }
        info!("closed session with {} ({:?})", peer, session.role);
    }

    /// Starts a new offer round with `peer`, or marks one pending if an
    /// offer is already out. A polite side with an established connection
    /// asks the peer to offer instead.
    pub async fn renegotiate(&mut self, peer: &ParticipantId) {
        if let Err(err) = self.send_offer(peer).await {
            self.fail_session(peer, err).await;
        }
    }

    pub(crate) fn emit(&self, event: RoomEvent) {
        let _ = self.ui.send(event);
    }

    pub(crate) fn connection_for(&self, peer: &ParticipantId) -> Option<Arc<P::Connection>> {
        self.sessions
            .get(peer)
            .map(|session| session.connection.clone())
    }

    pub(crate) async fn fail_session(&mut self, peer: &ParticipantId, err: Error) {
        warn!("negotiation with {} failed: {}", peer, err);
        self.close_session(peer).await;
    }

    fn is_polite_towards(&self, peer: &ParticipantId) -> bool {
        self.self_id.as_ref().map_or(true, |me| me < peer)
    }

    async fn send(&self, message: ClientMessage) -> Result<()> {
        self.signals
            .send(message)
            .await
            .map_err(|_| Error::transport("signaling channel closed"))
    }

    async fn send_negotiation(&self, to: &ParticipantId, payload: NegotiationPayload) -> Result<()> {
        let payload = payload.to_value()?;
        self.send(ClientMessage::Negotiate {
            to: to.clone(),
            payload,
        })
        .await
    }

    async fn call(&mut self, peer: &ParticipantId) {
        if let Err(err) = self.ensure_session(peer, Role::Caller).await {
            self.fail_session(peer, err).await;
            return;
        }
        self.renegotiate(peer).await;
    }

    /// Returns without side effects if a session already exists. A new
    /// session starts with every current local track attached.
    async fn ensure_session(&mut self, peer: &ParticipantId, role: Role) -> Result<()> {
        if self.sessions.contains(peer) {
            return Ok(());
        }

        let connection = self
            .platform
            .new_connection(peer, &self.ice_servers, self.peer_events_tx.clone())
            .await?;
        for track in self.media.outgoing_tracks() {
            if let Err(err) = connection.add_track(track).await {
                let _ = connection.close().await;
                return Err(err);
            }
        }

        let sinks = self.sinks.sinks_for(peer);
        self.sessions.get_or_insert(PeerSession::new(
            peer.clone(),
            Arc::new(connection),
            sinks,
            role,
        ));
        debug!("created session with {} as {:?}", peer, role);
        Ok(())
    }

    async fn send_offer(&mut self, peer: &ParticipantId) -> Result<()> {
        self.start_offer(peer, false).await
    }

    /// With `force` a polite side offers from `Stable` instead of asking
    /// the peer to.
    async fn start_offer(&mut self, peer: &ParticipantId, force: bool) -> Result<()> {
        let polite = self.is_polite_towards(peer);
        let Some(session) = self.sessions.get_mut(peer) else {
            return Ok(());
        };
        match session.state {
            SessionState::Negotiating => {
                debug!("offer to {} still outstanding, renegotiation queued", peer);
                session.renegotiation_pending = true;
                return Ok(());
            }
            SessionState::Closed => return Ok(()),
            SessionState::Stable if polite && !force => {
                debug!("asking {} to renegotiate", peer);
                return self
                    .send_negotiation(peer, NegotiationPayload::Renegotiate)
                    .await;
            }
            SessionState::New | SessionState::Stable => {}
        }
        session.state = SessionState::Negotiating;
        let connection = session.connection.clone();

        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        debug!("sending offer to {}", peer);
        self.send_negotiation(peer, NegotiationPayload::Offer { sdp: offer })
            .await
    }

    async fn accept_offer(&mut self, from: &ParticipantId, offer: SessionDescription) -> Result<()> {
        let mut created = !self.sessions.contains(from);
        self.ensure_session(from, Role::Callee).await?;

        let mut carried = false;
        if self.sessions.state_of(from) == Some(SessionState::Negotiating) {
            if !self.is_polite_towards(from) {
                debug!("ignoring colliding offer from {}", from);
                return Ok(());
            }
            debug!("offer collision with {}, answering on a fresh connection", from);
            carried = self
                .sessions
                .get(from)
                .map_or(false, |session| session.renegotiation_pending);
            self.close_session(from).await;
            self.ensure_session(from, Role::Callee).await?;
            created = true;
        }
        let Some(connection) = self.connection_for(from) else {
            return Ok(());
        };
        // The answer can only mirror the offer's sections.
        let needs_video = created && self.media.is_sharing() && !offer.has_video_section();

        connection.set_remote_description(offer).await?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;

        let queued = match self.sessions.get_mut(from) {
            Some(session) => {
                session.state = SessionState::Stable;
                std::mem::take(&mut session.renegotiation_pending)
            }
            None => false,
        };

        debug!("sending answer to {}", from);
        self.send_negotiation(from, NegotiationPayload::Answer { sdp: answer })
            .await?;
        if needs_video {
            debug!("offer from {} had no video section, offering one", from);
            self.start_offer(from, true).await?;
        } else if queued || carried {
            self.send_offer(from).await?;
        }
        Ok(())
    }

    /// Only honoured from peers we are not polite towards; a polite peer
    /// asking us back would bounce requests forever.
    async fn accept_renegotiation_request(&mut self, from: &ParticipantId) -> Result<()> {
        if !self.sessions.contains(from) {
            debug!("dropping renegotiation request from {}: no session", from);
            return Ok(());
        }
        if self.is_polite_towards(from) {
            debug!("ignoring renegotiation request from {}", from);
            return Ok(());
        }
        self.send_offer(from).await
    }

    async fn accept_answer(&mut self, from: &ParticipantId, answer: SessionDescription) -> Result<()> {
        let connection = match self.sessions.get(from) {
            Some(session) if session.state == SessionState::Negotiating => {
                session.connection.clone()
            }
            Some(session) => {
                debug!("dropping answer from {} in state {:?}", from, session.state);
                return Ok(());
            }
            None => {
                debug!("dropping answer from {}: no session", from);
                return Ok(());
            }
        };

        connection.set_remote_description(answer).await?;

        let pending = match self.sessions.get_mut(from) {
            Some(session) => {
                session.state = SessionState::Stable;
                std::mem::take(&mut session.renegotiation_pending)
            }
            None => false,
        };
        if pending {
            self.send_offer(from).await?;
        }
        Ok(())
    }

    async fn apply_candidate(&self, from: &ParticipantId, candidate: IceCandidate) {
        let Some(connection) = self.connection_for(from) else {
            debug!("dropping candidate from {}: no session", from);
            return;
        };
        if let Err(err) = connection.add_ice_candidate(candidate).await {
            debug!("ignoring candidate from {}: {}", from, err);
        }
    }
}
