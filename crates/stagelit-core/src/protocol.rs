use serde::{Deserialize, Serialize};

use crate::session::{PlaybackPhase, PlaybackSession};
use crate::source::{MediaFile, MediaSource};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  A UI shell checks this on connect and can refuse to talk
/// to an incompatible engine.
pub const PROTOCOL_VERSION: u32 = 1;

/// How a URL source should be played.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UrlMode {
    /// Acquire a local file via the downloader, then play it.
    Download,
    /// Hand the URL to the sandboxed browser surface.
    Browser,
}

/// What the operator asked to play.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum StartRequest {
    LocalFile { path: String },
    Url { url: String, mode: UrlMode },
}

/// Messages sent from a UI shell to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// List playable files in a folder; answered with `FolderContents`.
    ScanFolder { path: String },
    /// Probe downloader availability; answered with `DownloaderStatus`.
    CheckDownloader,
    Start { request: StartRequest },
    Stop,
    /// Stop and stay Idle awaiting a fresh source selection.
    NewSong,
    Seek { seconds: u64 },
    CancelDownload,
    /// Configure the countdown; only honored while Idle (locked during
    /// playback).
    SetDuration { seconds: u64 },
    /// Play the entire detected media length, ignoring the configured
    /// duration. One-shot: resets when the session stops.
    SetFullLength { enabled: bool },
    GetState,
}

/// Messages sent from the engine to UI shells (broadcasts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: engine version + full state snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: SessionState,
    },
    State {
        data: SessionState,
    },
    /// Live acquisition progress, pushed as the downloader reports it.
    DownloadProgress {
        percent: f32,
        line: String,
    },
    DownloaderStatus {
        status: DownloaderStatus,
    },
    FolderContents {
        files: Vec<MediaFile>,
    },
    /// The countdown ran out (or the browser surface closed).
    SessionEnded,
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Downloader discovery result as shown to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloaderStatus {
    pub found: bool,
    pub command: Option<String>,
    pub origin: Option<DownloaderOrigin>,
    pub version: Option<String>,
}

/// Where a discovered downloader came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloaderOrigin {
    Bundled,
    SystemPath,
    PythonModule,
    CommonInstall,
}

/// Full state snapshot.  `rev` is a monotonically increasing counter
/// incremented every time the state changes; clients use it to detect
/// missed updates and resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub rev: u64,
    pub phase: PlaybackPhase,
    pub elapsed_secs: u64,
    pub configured_secs: u64,
    pub media_secs: Option<f64>,
    pub full_length: bool,
    pub effective_secs: u64,
    pub remaining_secs: u64,
    pub flash_on: bool,
    pub source: Option<MediaSource>,
    /// True while an acquisition job is in flight; the start action must be
    /// disabled until it resolves or is cancelled.
    pub downloading: bool,
    pub download_percent: Option<f32>,
}

impl SessionState {
    /// Snapshot the live session.  Derived fields (effective/remaining) are
    /// computed here so clients never re-implement the resolver.
    pub fn capture(
        session: &PlaybackSession,
        rev: u64,
        downloading: bool,
        download_percent: Option<f32>,
    ) -> Self {
        Self {
            rev,
            phase: session.phase,
            elapsed_secs: session.elapsed_secs,
            configured_secs: session.configured_secs,
            media_secs: session.media_secs,
            full_length: session.full_length,
            effective_secs: session.effective_secs(),
            remaining_secs: session.remaining_secs(),
            flash_on: session.flash_on,
            source: session.source.clone(),
            downloading,
            download_percent,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
