//! Seams between the orchestrator and the platform's peer-connection
//! primitive.
//!
//! The orchestrator never talks to webrtc-rs directly. It drives a
//! [`MediaPlatform`], which hands out [`PeerConnection`]s and captured
//! [`LocalTrack`]s, and it hears back through [`PeerEvent`]s posted to an
//! unbounded channel. Callbacks only post events; all state changes happen
//! on the orchestrator's task.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use huddle_common::{IceCandidate, IceServer, ParticipantId, Result, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A locally captured track (microphone or screen).
pub trait LocalTrack: Send + Sync + 'static {
    fn kind(&self) -> TrackKind;

    fn id(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// A disabled track keeps its slot in every connection but sends nothing.
    fn set_enabled(&self, enabled: bool);

    /// Ends capture for good.
    fn stop(&self);
}

#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    type Track: LocalTrack;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: Arc<Self::Track>) -> Result<()>;

    /// Whether an outgoing video slot exists, even if it currently carries nothing.
    async fn has_video_sender(&self) -> bool;

    /// Swaps the content of the outgoing video slot in place.
    async fn replace_video_track(&self, track: Option<Arc<Self::Track>>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A screen track plus a signal that fires when capture ends outside our
/// control (e.g. the user stops sharing from the OS).
pub struct ScreenCapture<T> {
    pub track: Arc<T>,
    pub ended: oneshot::Receiver<()>,
}

#[derive(Debug)]
pub enum PeerEvent<R> {
    /// The connection to `peer` gathered a local ICE candidate.
    LocalCandidate {
        peer: ParticipantId,
        candidate: IceCandidate,
    },
    /// `peer` started sending a track.
    RemoteTrack {
        peer: ParticipantId,
        kind: TrackKind,
        track: R,
    },
    /// The connection to `peer` failed and will not recover.
    Failed { peer: ParticipantId },
    /// The screen capture started as `generation` ended.
    ScreenCaptureEnded { generation: u64 },
}

pub type PeerEventSender<R> = mpsc::UnboundedSender<PeerEvent<R>>;
pub type PeerEventReceiver<R> = mpsc::UnboundedReceiver<PeerEvent<R>>;

#[async_trait]
pub trait MediaPlatform: Send + Sync + 'static {
    type Track: LocalTrack;
    type Remote: Send + 'static;
    type Connection: PeerConnection<Track = Self::Track>;

    async fn new_connection(
        &self,
        peer: &ParticipantId,
        ice_servers: &[IceServer],
        events: PeerEventSender<Self::Remote>,
    ) -> Result<Self::Connection>;

    /// Fails with `Error::MediaAcquisition` when the device is denied or missing.
    async fn capture_microphone(&self) -> Result<Arc<Self::Track>>;

    /// Fails with `Error::MediaAcquisition` when capture is denied or unsupported.
    async fn capture_screen(&self) -> Result<ScreenCapture<Self::Track>>;
}

/// Renders one remote track.
pub trait MediaSink<R>: Send + Sync {
    fn attach(&mut self, track: R);

    fn release(&mut self);
}

/// A peer's audio and video sinks.
pub struct PeerSinks<R> {
    pub audio: Box<dyn MediaSink<R>>,
    pub video: Box<dyn MediaSink<R>>,
}

impl<R> PeerSinks<R> {
    pub fn new(audio: Box<dyn MediaSink<R>>, video: Box<dyn MediaSink<R>>) -> Self {
        Self { audio, video }
    }

    pub fn route(&mut self, kind: TrackKind, track: R) {
        match kind {
            TrackKind::Audio => self.audio.attach(track),
            TrackKind::Video => self.video.attach(track),
        }
    }

    pub fn release(&mut self) {
        self.audio.release();
        self.video.release();
    }
}

/// UI side: creates sinks when a new peer shows up.
pub trait SinkProvider<R>: Send + Sync {
    fn sinks_for(&mut self, peer: &ParticipantId) -> PeerSinks<R>;
}
