//! Media element collaborator boundary.
//!
//! The actual playback surface (video/audio element) lives in the UI shell.
//! The engine talks to it through a command handle and receives events back
//! on the session loop, in the same handle/driver split used for the
//! downloader. Driver contract: after `Load`, report `Loaded` once, with the
//! media duration if metadata arrived within [`METADATA_WAIT`], else with
//! `None`; report `Error` if the surface rejects the source.

use std::time::Duration;

use stagelit_core::source::MediaSource;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Bounded wait for media metadata before giving up on a known duration.
/// Drivers with a real surface apply this; see the module contract above.
#[allow(dead_code)]
pub const METADATA_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum MediaCommand {
    Load { source: MediaSource },
    Play,
    Pause,
    SeekTo { seconds: f64 },
    Stop,
}

#[derive(Debug)]
pub enum MediaEvent {
    /// The surface accepted the source. `duration_secs` is `None` when
    /// metadata did not arrive within the bounded wait.
    Loaded { duration_secs: Option<f64> },
    /// The surface rejected the source (codec, missing file, ...).
    Error { message: String },
}

/// Cheaply cloneable handle to the media driver task. Sends are
/// fire-and-forget; results come back as [`MediaEvent`]s.
#[derive(Clone)]
pub struct MediaHandle {
    tx: mpsc::Sender<MediaCommand>,
}

impl MediaHandle {
    pub fn new(tx: mpsc::Sender<MediaCommand>) -> Self {
        Self { tx }
    }

    pub async fn load(&self, source: MediaSource) {
        let _ = self.tx.send(MediaCommand::Load { source }).await;
    }

    pub async fn play(&self) {
        let _ = self.tx.send(MediaCommand::Play).await;
    }

    #[allow(dead_code)]
    pub async fn pause(&self) {
        let _ = self.tx.send(MediaCommand::Pause).await;
    }

    pub async fn seek_to(&self, seconds: f64) {
        let _ = self.tx.send(MediaCommand::SeekTo { seconds }).await;
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(MediaCommand::Stop).await;
    }
}

/// Driver for running without an attached playback surface. Loads are
/// acknowledged immediately with no duration: there is no surface that
/// could ever deliver metadata, so waiting out [`METADATA_WAIT`] would only
/// delay the countdown start.
pub fn spawn_detached_driver(events: mpsc::Sender<MediaEvent>) -> MediaHandle {
    let (tx, mut rx) = mpsc::channel::<MediaCommand>(16);

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                MediaCommand::Load { source } => {
                    info!("media surface (detached): load {:?}", source);
                    let _ = events
                        .send(MediaEvent::Loaded {
                            duration_secs: None,
                        })
                        .await;
                }
                other => debug!("media surface (detached): {:?}", other),
            }
        }
    });

    MediaHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn detached_driver_acks_load_with_unknown_duration() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = spawn_detached_driver(event_tx);

        handle.play().await; // ignored, must not produce an event
        handle
            .load(MediaSource::LocalVideo {
                path: PathBuf::from("/v.mp4"),
            })
            .await;

        match event_rx.recv().await {
            Some(MediaEvent::Loaded { duration_secs }) => assert!(duration_secs.is_none()),
            other => panic!("expected Loaded, got {:?}", other),
        }
    }
}
