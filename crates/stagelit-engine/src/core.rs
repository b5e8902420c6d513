//! SessionCore — single-owner event loop for all mutable session state.
//!
//! All tasks that need to mutate playback state send `SessionEvent` messages
//! to this loop. SessionCore owns `PlaybackSession`, the temp-file registry
//! and the in-flight download exclusively; no other task touches them. The
//! 1-second tick and the 500 ms flash cadence are interval tasks that only
//! enqueue events here, so both cadences are serialized through one update
//! path and can never race a phase transition.
//!
//! After each event that mutates state, SessionCore publishes a fresh
//! `SessionState` snapshot (rev-bumped) and broadcasts to all listeners via
//! a `tokio::sync::broadcast` channel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stagelit_core::config::Config;
use stagelit_core::error::StageError;
use stagelit_core::platform;
use stagelit_core::present::format_clock;
use stagelit_core::protocol::{Command, SessionState, StartRequest, UrlMode};
use stagelit_core::session::{
    CadenceChange, PlaybackPhase, PlaybackSession, TickOutcome, FLASH_CADENCE_MS,
};
use stagelit_core::source::{classify_extension, is_direct_media_url, scan_folder, MediaKind,
    MediaSource};
use stagelit_core::state::StateHandle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::browser::{BrowserEvent, BrowserHandle};
use crate::media::{MediaEvent, MediaHandle};
use crate::tempfiles::TempFileRegistry;
use crate::ytdlp::{self, Discovery, DownloadEvent, DownloadHandle, JobUpdate};
use crate::BroadcastMessage;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A command from a connected UI shell.
    ClientCommand(Command),
    /// The 1-second countdown tick.
    Tick,
    /// The 500 ms flash-cadence tick.
    FlashTick,
    /// Progress or completion from the download job task.
    Download(JobUpdate),
    /// Event from the media surface driver.
    Media(MediaEvent),
    /// Event from the browser surface driver.
    Browser(BrowserEvent),
    /// Shutdown requested.
    Shutdown,
}

/// Forward events from a collaborator channel into the session loop.
pub fn pipe<T: Send + 'static>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<SessionEvent>,
    wrap: fn(T) -> SessionEvent,
) {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if tx.send(wrap(item)).await.is_err() {
                break;
            }
        }
    });
}

// ── SessionCore ───────────────────────────────────────────────────────────────

struct ActiveDownload {
    handle: DownloadHandle,
    url: String,
    percent: Option<f32>,
}

/// A start operation waiting on a collaborator before ticking begins.
enum PendingStart {
    /// Media surface is loading; the countdown starts on `Loaded`.
    MediaLoad { source: MediaSource },
    /// Acquisition job in flight; on success we move to `MediaLoad`.
    Acquisition,
}

pub struct SessionCore {
    config: Config,
    session: PlaybackSession,
    rev: u64,
    state: StateHandle,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    event_tx: mpsc::Sender<SessionEvent>,
    media: MediaHandle,
    browser: BrowserHandle,
    temp_files: TempFileRegistry,
    /// At most one download job exists at a time, process-wide.
    download: Option<ActiveDownload>,
    pending: Option<PendingStart>,
    job_tx: mpsc::Sender<JobUpdate>,
    tick_task: Option<AbortHandle>,
    flash_task: Option<AbortHandle>,
}

impl SessionCore {
    pub fn new(
        config: Config,
        state: StateHandle,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<SessionEvent>,
        media: MediaHandle,
        browser: BrowserHandle,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<JobUpdate>(64);
        pipe(job_rx, event_tx.clone(), SessionEvent::Download);

        let session = PlaybackSession::new(config.timer.default_duration_secs);

        Self {
            config,
            session,
            rev: 0,
            state,
            broadcast_tx,
            event_tx,
            media,
            browser,
            temp_files: TempFileRegistry::new(platform::temp_dir()),
            download: None,
            pending: None,
            job_tx,
            tick_task: None,
            flash_task: None,
        }
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        self.publish().await;

        while let Some(event) = event_rx.recv().await {
            if matches!(event, SessionEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
        }

        info!("session core shutting down");
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(job) = self.download.take() {
            job.handle.cancel();
        }
        self.stop_timers();
        self.media.stop().await;
        self.browser.close().await;
        self.temp_files.cleanup();
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ClientCommand(cmd) => self.handle_command(cmd).await,
            SessionEvent::Tick => self.handle_tick().await,
            SessionEvent::FlashTick => self.handle_flash_tick().await,
            SessionEvent::Download(update) => self.handle_download(update).await,
            SessionEvent::Media(ev) => self.handle_media(ev).await,
            SessionEvent::Browser(ev) => self.handle_browser(ev).await,
            SessionEvent::Shutdown => {}
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        debug!("client command: {:?}", cmd);
        match cmd {
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Command::ScanFolder { path } => match scan_folder(Path::new(&path)) {
                Ok(files) => {
                    let _ = self
                        .broadcast_tx
                        .send(BroadcastMessage::FolderContents(files));
                }
                Err(e) => self.broadcast_error(e.to_string()),
            },
            Command::CheckDownloader => {
                // Discovery can take several probe timeouts on first call;
                // never block the loop on it.
                let broadcast_tx = self.broadcast_tx.clone();
                tokio::spawn(async move {
                    let status = ytdlp::discover().await.status();
                    let _ = broadcast_tx.send(BroadcastMessage::DownloaderStatus(status));
                });
            }
            Command::SetDuration { seconds } => {
                if self.session.is_active() {
                    warn!("SetDuration ignored: locked during playback");
                } else if seconds == 0 {
                    warn!("SetDuration ignored: zero duration");
                } else {
                    self.session.configured_secs = seconds;
                    self.publish().await;
                }
            }
            Command::SetFullLength { enabled } => {
                if self.session.is_active() {
                    warn!("SetFullLength ignored: locked during playback");
                } else {
                    self.session.full_length = enabled;
                    self.publish().await;
                }
            }
            Command::Start { request } => self.handle_start(request).await,
            Command::Stop | Command::NewSong => self.stop_session().await,
            Command::Seek { seconds } => self.handle_seek(seconds).await,
            Command::CancelDownload => self.handle_cancel_download().await,
        }
    }

    async fn handle_start(&mut self, request: StartRequest) {
        if self.download.is_some() {
            // Refuse, never queue: the shell disables the start action while
            // a job is outstanding, so this only happens to stale clients.
            self.broadcast_error("A download is already in progress.".to_string());
            return;
        }
        if self.session.is_active() || self.pending.is_some() {
            self.broadcast_error("A session is already running.".to_string());
            return;
        }
        if self.session.phase == PlaybackPhase::Completed {
            self.session.halt();
        }

        match request {
            StartRequest::LocalFile { path } => {
                let path = PathBuf::from(path);
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
                    .unwrap_or_default();
                let source = match classify_extension(&ext) {
                    Some(MediaKind::Video) => MediaSource::LocalVideo { path },
                    Some(MediaKind::Audio) => MediaSource::LocalAudio { path },
                    None => {
                        self.broadcast_error(format!(
                            "Unsupported media file: {}",
                            path.display()
                        ));
                        return;
                    }
                };
                self.ready_media(source).await;
            }
            StartRequest::Url { url, mode } => {
                let url = url.trim().to_string();
                if url.is_empty() {
                    self.broadcast_error("No URL provided.".to_string());
                    return;
                }
                if is_direct_media_url(&url) {
                    self.ready_media(MediaSource::DirectStream { url }).await;
                } else if mode == UrlMode::Browser {
                    self.browser.open(url.clone()).await;
                    self.session.begin(MediaSource::BrowserView { url });
                    self.start_ticking();
                    self.publish().await;
                } else {
                    let discovery = ytdlp::discover().await.clone();
                    self.begin_acquisition(url, &discovery).await;
                }
            }
        }
    }

    /// Hand a ready source to the media surface and wait for `Loaded` before
    /// the countdown starts.
    async fn ready_media(&mut self, source: MediaSource) {
        self.media.load(source.clone()).await;
        self.pending = Some(PendingStart::MediaLoad { source });
        self.publish().await;
    }

    /// Kick off an acquisition job for `url`, or fail fast when discovery
    /// came up empty (cached for the process lifetime; no process is ever
    /// spawned in that case).
    async fn begin_acquisition(&mut self, url: String, discovery: &Discovery) {
        let downloader = match &discovery.downloader {
            Some(d) => d,
            None => {
                self.broadcast_error(StageError::DiscoveryNotFound.to_string());
                return;
            }
        };

        let output = match self.temp_files.allocate("mp4") {
            Ok(p) => p,
            Err(e) => {
                self.broadcast_error(format!("Could not create temp file: {}", e));
                return;
            }
        };

        let handle = ytdlp::spawn_download(
            downloader,
            url.clone(),
            output,
            self.config.downloads.format.clone(),
            self.job_tx.clone(),
        );
        self.download = Some(ActiveDownload {
            handle,
            url,
            percent: None,
        });
        self.pending = Some(PendingStart::Acquisition);
        self.publish().await;
    }

    async fn handle_seek(&mut self, seconds: u64) {
        match self.session.seek(seconds) {
            None => debug!("seek ignored: inactive session or browser view"),
            Some(change) => {
                self.media.seek_to(seconds as f64).await;
                match change {
                    CadenceChange::Start => self.start_flash_cadence(),
                    CadenceChange::Stop => self.stop_flash_cadence(),
                    CadenceChange::Unchanged => {}
                }
                self.publish().await;
            }
        }
    }

    /// Stop / new-song: tear everything down deterministically and return to
    /// Idle awaiting a fresh source selection.
    async fn stop_session(&mut self) {
        self.stop_timers();
        self.teardown_source().await;
        self.session.halt();
        self.publish().await;
    }

    async fn handle_cancel_download(&mut self) {
        if let Some(job) = self.download.take() {
            info!("cancelling download job {}", job.handle.id);
            job.handle.cancel();
            self.pending = None;
            // Temp cleanup is deferred: the killed process may still hold
            // the file open. The next stop/new-song/shutdown retries.
            self.publish().await;
        }
    }

    // ── timer events ──────────────────────────────────────────────────────────

    async fn handle_tick(&mut self) {
        match self.session.tick() {
            TickOutcome::Ignored => {}
            TickOutcome::Completed => {
                self.stop_timers();
                self.teardown_source().await;
                let _ = self.broadcast_tx.send(BroadcastMessage::SessionEnded);
                self.publish().await;
            }
            TickOutcome::EnteredFlashing => {
                self.start_flash_cadence();
                self.publish().await;
            }
            TickOutcome::EnteredWarning | TickOutcome::Running => self.publish().await,
        }
    }

    async fn handle_flash_tick(&mut self) {
        // A cadence tick can still be queued after a seek moved us out of
        // Flashing; the phase guard makes it harmless.
        if self.session.phase == PlaybackPhase::Flashing {
            self.session.toggle_flash();
            self.publish().await;
        }
    }

    // ── collaborator events ───────────────────────────────────────────────────

    async fn handle_download(&mut self, update: JobUpdate) {
        let active = match self.download.as_mut() {
            Some(a) if a.handle.id == update.job_id => a,
            _ => {
                debug!("stale download event for job {}: ignored", update.job_id);
                return;
            }
        };

        match update.event {
            DownloadEvent::Progress { percent, line } => {
                active.percent = Some(percent);
                let _ = self
                    .broadcast_tx
                    .send(BroadcastMessage::DownloadProgress { percent, line });
                self.publish().await;
            }
            DownloadEvent::Finished(Ok(path)) => {
                info!("download of {} finished: {:?}", active.url, path);
                self.download = None;
                self.pending = None;
                self.ready_media(MediaSource::AcquiredStream { path }).await;
            }
            DownloadEvent::Finished(Err(err)) => {
                warn!("download of {} failed: {}", active.url, err);
                self.download = None;
                self.pending = None;
                self.broadcast_error(err.to_string());
                self.temp_files.cleanup();
                self.publish().await;
            }
        }
    }

    async fn handle_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Loaded { duration_secs } => {
                let source = match self.pending.take() {
                    Some(PendingStart::MediaLoad { source }) => source,
                    other => {
                        self.pending = other;
                        debug!("unexpected media Loaded event: ignored");
                        return;
                    }
                };

                self.session.begin(source);
                self.session.set_media_duration(duration_secs);
                self.media.play().await;
                self.start_ticking();
                self.publish().await;

                // Smart-duration notice for the operator.
                if let Some(media) = self.session.media_secs {
                    let media_clock = format_clock(media.floor() as u64);
                    if self.session.full_length {
                        self.broadcast_log(format!(
                            "Full Song mode — playing entire {} track.",
                            media_clock
                        ));
                    } else if (media.floor() as u64) < self.session.configured_secs {
                        self.broadcast_log(format!(
                            "Song is {} — shorter than the configured time. Using actual length.",
                            media_clock
                        ));
                    }
                }
            }
            MediaEvent::Error { message } => {
                self.broadcast_error(StageError::MediaPlayback(message).to_string());
                self.stop_session().await;
            }
        }
    }

    async fn handle_browser(&mut self, event: BrowserEvent) {
        match event {
            BrowserEvent::Closed => {
                if self.session.is_active() && self.session.is_browser_view() {
                    // The surface closing ends the performance, whoever
                    // closed it.
                    self.session.finish();
                    self.stop_timers();
                    self.teardown_source().await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::SessionEnded);
                    self.publish().await;
                } else {
                    debug!("browser closed with no browser session: ignored");
                }
            }
        }
    }

    // ── timers ────────────────────────────────────────────────────────────────

    fn start_ticking(&mut self) {
        self.stop_timers();
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // completes immediately
            loop {
                interval.tick().await;
                if tx.send(SessionEvent::Tick).await.is_err() {
                    break;
                }
            }
        });
        self.tick_task = Some(task.abort_handle());
    }

    fn start_flash_cadence(&mut self) {
        self.stop_flash_cadence();
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(FLASH_CADENCE_MS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(SessionEvent::FlashTick).await.is_err() {
                    break;
                }
            }
        });
        self.flash_task = Some(task.abort_handle());
    }

    fn stop_flash_cadence(&mut self) {
        if let Some(task) = self.flash_task.take() {
            task.abort();
        }
    }

    fn stop_timers(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        self.stop_flash_cadence();
    }

    // ── teardown / publishing ─────────────────────────────────────────────────

    /// Release everything attached to the current source: in-flight download,
    /// media surface, browser surface, temp files.
    async fn teardown_source(&mut self) {
        if let Some(job) = self.download.take() {
            job.handle.cancel();
        }
        self.pending = None;
        self.media.stop().await;
        self.browser.close().await;
        self.temp_files.cleanup();
    }

    async fn publish(&mut self) {
        self.rev += 1;
        let percent = self.download.as_ref().and_then(|d| d.percent);
        let snapshot = SessionState::capture(
            &self.session,
            self.rev,
            self.download.is_some(),
            percent,
        );
        self.state.publish(snapshot).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    fn broadcast_error(&self, message: String) {
        warn!("{}", message);
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    fn broadcast_log(&self, message: String) {
        info!("{}", message);
        let _ = self.broadcast_tx.send(BroadcastMessage::Log(message));
    }
}
