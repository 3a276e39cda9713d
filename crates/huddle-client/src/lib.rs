//! Huddle client: joins a room through the gateway and keeps a mesh of peer
//! connections in step with the room's membership and the local media.

pub mod events;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod rtc;
pub mod session;
pub mod signaling;

pub use events::{Command, RoomEvent};
pub use media::LocalMedia;
pub use orchestrator::Orchestrator;
pub use peer::{
    LocalTrack, MediaPlatform, MediaSink, PeerConnection, PeerEvent, PeerSinks, ScreenCapture,
    SinkProvider, TrackKind,
};
pub use rtc::{RtcPlatform, RtcTrack};
pub use session::{PeerSession, PeerSessionTable, Role, SessionState};
pub use signaling::SignalingChannel;
