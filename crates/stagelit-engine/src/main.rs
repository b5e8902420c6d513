mod browser;
mod core;
mod media;
mod socket;
mod tempfiles;
mod ytdlp;

use stagelit_core::config::Config;
use stagelit_core::protocol::{DownloaderStatus, SessionState};
use stagelit_core::source::MediaFile;
use stagelit_core::state::StateHandle;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::SessionEvent;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    DownloadProgress { percent: f32, line: String },
    DownloaderStatus(DownloaderStatus),
    FolderContents(Vec<MediaFile>),
    SessionEnded,
    Log(String),
    Error(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only forward WARN and ERROR to clients to avoid clogging the channel
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();

        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // Send to broadcast channel (ignore errors - no receivers is OK)
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    // Setup file logging + broadcast layer
    let data_dir = stagelit_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("engine.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stagelit=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel — all external inputs funnel into SessionCore
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);

    // Collaborator surfaces. The detached drivers only log; a real shell
    // replaces them with handles to its playback and browser surfaces.
    let (media_event_tx, media_event_rx) = mpsc::channel(32);
    let media = media::spawn_detached_driver(media_event_tx);
    core::pipe(media_event_rx, event_tx.clone(), SessionEvent::Media);

    let (browser_event_tx, browser_event_rx) = mpsc::channel(32);
    let browser = browser::spawn_detached_driver(browser_event_tx);
    core::pipe(browser_event_rx, event_tx.clone(), SessionEvent::Browser);

    let state = StateHandle::new(SessionState::default());

    let session_core = core::SessionCore::new(
        config.clone(),
        state.clone(),
        broadcast_tx.clone(),
        event_tx.clone(),
        media,
        browser,
    );

    // Start TCP socket server for UI shells
    let _socket_handle = socket::start_server(
        config.engine.bind_address.clone(),
        config.engine.port,
        state,
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    // ctrl-c drains into a clean shutdown (temp files are removed there)
    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(SessionEvent::Shutdown).await;
        }
    });

    info!("Engine initialised, running session loop");
    session_core.run(event_rx).await?;

    Ok(())
}
