//! Media track controller.
//!
//! [`LocalMedia`] owns the microphone and the optional screen track. The
//! orchestrator methods at the bottom of this file fan a change out to every
//! peer session and trigger renegotiation where the outgoing tracks changed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use huddle_common::Result;

use crate::events::RoomEvent;
use crate::orchestrator::Orchestrator;
use crate::peer::{LocalTrack, MediaPlatform, PeerConnection, PeerEvent, ScreenCapture};

pub struct LocalMedia<T> {
    microphone: Option<Arc<T>>,
    screen: Option<Arc<T>>,
    /// Bumped on every share so a late end-of-capture signal from an earlier
    /// share can be told apart from the current one.
    share_generation: u64,
}

impl<T> Default for LocalMedia<T> {
    fn default() -> Self {
        Self {
            microphone: None,
            screen: None,
            share_generation: 0,
        }
    }
}

impl<T: LocalTrack> LocalMedia<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn microphone(&self) -> Option<&Arc<T>> {
        self.microphone.as_ref()
    }

    pub fn set_microphone(&mut self, track: Arc<T>) {
        if let Some(previous) = self.microphone.replace(track) {
            previous.stop();
        }
    }

    pub fn is_muted(&self) -> bool {
        self.microphone
            .as_ref()
            .map(|track| !track.is_enabled())
            .unwrap_or(false)
    }

    /// Flips the microphone's enabled flag. Returns the new muted state.
    pub fn toggle_mute(&mut self) -> bool {
        if let Some(track) = &self.microphone {
            track.set_enabled(!track.is_enabled());
        }
        self.is_muted()
    }

    pub fn screen(&self) -> Option<&Arc<T>> {
        self.screen.as_ref()
    }

    pub fn is_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn share_generation(&self) -> u64 {
        self.share_generation
    }

    pub fn is_current_share(&self, generation: u64) -> bool {
        self.screen.is_some() && generation == self.share_generation
    }

    /// Tracks every new connection starts with.
    pub fn outgoing_tracks(&self) -> Vec<Arc<T>> {
        self.microphone
            .iter()
            .chain(self.screen.iter())
            .cloned()
            .collect()
    }

    pub(crate) fn begin_share(&mut self, track: Arc<T>) -> u64 {
        self.share_generation += 1;
        self.screen = Some(track);
        self.share_generation
    }

    /// Stops and forgets the screen track.
    pub(crate) fn end_share(&mut self) -> Option<Arc<T>> {
        let track = self.screen.take()?;
        track.stop();
        Some(track)
    }

    pub(crate) fn release(&mut self) {
        self.end_share();
        if let Some(track) = self.microphone.take() {
            track.stop();
        }
    }
}

impl<P: MediaPlatform> Orchestrator<P> {
    /// Mute is local only: no connection is touched and nothing is renegotiated.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.media.toggle_mute();
        info!("microphone {}", if muted { "muted" } else { "unmuted" });
        self.emit(RoomEvent::MuteChanged { muted });
        muted
    }

    /// Starts sharing the screen with every connected peer.
    ///
    /// On `Error::MediaAcquisition` nothing changes and the error is returned.
    pub async fn start_screen_share(&mut self) -> Result<()> {
        if self.media.is_sharing() {
            debug!("screen share already active");
            return Ok(());
        }

        let ScreenCapture { track, ended } = self.platform.capture_screen().await?;
        let generation = self.media.begin_share(track.clone());
        info!("screen share started ({})", track.id());

        let events = self.peer_events_tx.clone();
        tokio::spawn(async move {
            if ended.await.is_ok() {
                let _ = events.send(PeerEvent::ScreenCaptureEnded { generation });
            }
        });

        for peer in self.sessions.peer_ids() {
            let Some(connection) = self.connection_for(&peer) else {
                continue;
            };
            let attached = if connection.has_video_sender().await {
                connection.replace_video_track(Some(track.clone())).await
            } else {
                connection.add_track(track.clone()).await
            };
            if let Err(err) = attached {
                self.fail_session(&peer, err).await;
                continue;
            }
            self.renegotiate(&peer).await;
        }

        self.emit(RoomEvent::ScreenShareChanged { sharing: true });
        Ok(())
    }

    /// No-op when not sharing.
    pub async fn stop_screen_share(&mut self) {
        if self.media.end_share().is_none() {
            return;
        }
        info!("screen share stopped");

        for peer in self.sessions.peer_ids() {
            let Some(connection) = self.connection_for(&peer) else {
                continue;
            };
            if connection.has_video_sender().await {
                if let Err(err) = connection.replace_video_track(None).await {
                    warn!("failed to clear video for {}: {}", peer, err);
                }
            }
            self.renegotiate(&peer).await;
        }

        self.emit(RoomEvent::ScreenShareChanged { sharing: false });
    }
}
