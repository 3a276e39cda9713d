//! webrtc-rs implementation of the peer-connection seams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use huddle_common::{
    Error, IceCandidate, IceServer, ParticipantId, Result, SdpKind, SessionDescription,
};

use crate::peer::{
    LocalTrack, MediaPlatform, PeerConnection, PeerEvent, PeerEventSender, ScreenCapture,
    TrackKind,
};

const STREAM_ID: &str = "huddle";
const OPUS_FRAME: Duration = Duration::from_millis(20);
/// One 20 ms Opus frame of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// A local track backed by a `TrackLocalStaticSample`.
///
/// Encoded samples are pushed with [`RtcTrack::write_sample`]; while the
/// track is disabled or stopped they are discarded.
pub struct RtcTrack {
    local: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended: Mutex<Option<oneshot::Sender<()>>>,
}

impl RtcTrack {
    fn new(kind: TrackKind, id: &str) -> Self {
        let mime_type = match kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                ..Default::default()
            },
            id.to_string(),
            STREAM_ID.to_string(),
        ));
        Self {
            local,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            ended: Mutex::new(None),
        }
    }

    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.local.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(());
        }
        self.local
            .write_sample(sample)
            .await
            .map_err(|e| Error::transport(format!("failed to write sample: {}", e)))
    }

    fn on_ended(&self, tx: oneshot::Sender<()>) {
        if let Ok(mut guard) = self.ended.lock() {
            *guard = Some(tx);
        }
    }
}

impl LocalTrack for RtcTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn id(&self) -> &str {
        self.local.id()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.ended.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// Keeps the microphone stream alive with silence frames until the track
/// is stopped or dropped.
fn spawn_silence_feeder(track: &Arc<RtcTrack>) {
    let weak = Arc::downgrade(track);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OPUS_FRAME);
        loop {
            ticker.tick().await;
            let Some(track) = weak.upgrade() else {
                break;
            };
            if track.is_stopped() {
                break;
            }
            let sample = Sample {
                data: Bytes::from_static(&OPUS_SILENCE),
                duration: OPUS_FRAME,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!("microphone feeder: {}", e);
            }
        }
    });
}

fn rtc_ice_servers(ice_servers: &[IceServer]) -> Vec<RTCIceServer> {
    ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn rollback_description() -> RTCSessionDescription {
    let mut description = RTCSessionDescription::default();
    description.sdp_type = RTCSdpType::Rollback;
    description
}

/// Reads RTCP off a sender until it closes; interceptors only run while
/// someone reads.
fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => return Ok(rollback_description()),
    };
    parsed.map_err(Error::negotiation)
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::negotiation("session description without a type"))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn to_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

/// A webrtc-rs peer connection.
///
/// Every connection owns a video transceiver from the start, so offers
/// and answers always carry a video section. Screen sharing swaps the
/// sender's track instead of adding transceivers, which keeps the answering
/// side able to send video without making its own offer.
pub struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
    video_sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl PeerConnection for RtcConnection {
    type Track = RtcTrack;

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(Error::negotiation)?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(Error::negotiation)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(Error::negotiation)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(Error::negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(Error::negotiation)
    }

    async fn add_track(&self, track: Arc<RtcTrack>) -> Result<()> {
        if track.kind() == TrackKind::Video {
            return self.replace_video_track(Some(track)).await;
        }
        let sender = self
            .pc
            .add_track(track.local() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(Error::negotiation)?;
        spawn_rtcp_drain(sender);
        Ok(())
    }

    async fn has_video_sender(&self) -> bool {
        true
    }

    async fn replace_video_track(&self, track: Option<Arc<RtcTrack>>) -> Result<()> {
        let local = track.map(|track| track.local() as Arc<dyn TrackLocal + Send + Sync>);
        self.video_sender
            .replace_track(local)
            .await
            .map_err(Error::negotiation)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(Error::negotiation)
    }
}

pub struct RtcPlatform {
    api: API,
    screen_capture: bool,
}

impl RtcPlatform {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(Error::internal)?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        Ok(Self {
            api,
            screen_capture: true,
        })
    }

    /// Makes every `capture_screen` fail with `Error::MediaAcquisition`.
    pub fn without_screen_capture(mut self) -> Self {
        self.screen_capture = false;
        self
    }
}

#[async_trait]
impl MediaPlatform for RtcPlatform {
    type Track = RtcTrack;
    type Remote = Arc<TrackRemote>;
    type Connection = RtcConnection;

    async fn new_connection(
        &self,
        peer: &ParticipantId,
        ice_servers: &[IceServer],
        events: PeerEventSender<Arc<TrackRemote>>,
    ) -> Result<RtcConnection> {
        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(Error::negotiation)?,
        );

        let candidate_events = events.clone();
        let candidate_peer = peer.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            let peer = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent::LocalCandidate {
                            peer,
                            candidate: to_candidate(init),
                        });
                    }
                    Err(e) => warn!("failed to serialize local candidate: {}", e),
                }
            })
        }));

        let track_events = events.clone();
        let track_peer = peer.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                let peer = track_peer.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => {
                            debug!("ignoring track of unknown kind from {}", peer);
                            return;
                        }
                    };
                    let _ = events.send(PeerEvent::RemoteTrack { peer, kind, track });
                })
            },
        ));

        let state_events = events;
        let state_peer = peer.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            let peer = state_peer.clone();
            Box::pin(async move {
                debug!("connection to {} is {}", peer, state);
                if state == RTCPeerConnectionState::Failed {
                    let _ = events.send(PeerEvent::Failed { peer });
                }
            })
        }));

        let video = pc
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .map_err(Error::negotiation)?;
        let video_sender = video.sender().await;
        spawn_rtcp_drain(video_sender.clone());

        Ok(RtcConnection { pc, video_sender })
    }

    async fn capture_microphone(&self) -> Result<Arc<RtcTrack>> {
        let track = Arc::new(RtcTrack::new(TrackKind::Audio, "microphone"));
        spawn_silence_feeder(&track);
        Ok(track)
    }

    async fn capture_screen(&self) -> Result<ScreenCapture<RtcTrack>> {
        if !self.screen_capture {
            return Err(Error::media_acquisition(
                "screen capture is not available on this client",
            ));
        }
        let track = Arc::new(RtcTrack::new(TrackKind::Video, "screen"));
        let (tx, ended) = oneshot::channel();
        track.on_ended(tx);
        info!("screen track ready; feed it with RtcTrack::write_sample");
        Ok(ScreenCapture { track, ended })
    }
}
