//! Browser-view collaborator boundary.
//!
//! For URLs the downloader cannot (or should not) touch, playback is
//! delegated to a sandboxed browser surface in the shell. The engine can
//! open and close it; the surface reports a single `Closed` event with no
//! further detail; user-closed and engine-closed are indistinguishable on
//! purpose. Navigation inside the surface is restricted to the allow-list
//! checked by [`navigation_allowed`].

use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug)]
pub enum BrowserCommand {
    Open { url: String },
    Close,
}

#[derive(Debug)]
pub enum BrowserEvent {
    /// The surface is gone, whoever closed it.
    Closed,
}

#[derive(Clone)]
pub struct BrowserHandle {
    tx: mpsc::Sender<BrowserCommand>,
}

impl BrowserHandle {
    pub fn new(tx: mpsc::Sender<BrowserCommand>) -> Self {
        Self { tx }
    }

    pub async fn open(&self, url: String) {
        let _ = self.tx.send(BrowserCommand::Open { url }).await;
    }

    pub async fn close(&self) {
        let _ = self.tx.send(BrowserCommand::Close).await;
    }
}

/// Whether the surface may navigate to `url`: the host must be one of the
/// allowed hostnames or a subdomain of one. A raw suffix match would also
/// admit look-alike registrations ("evilyoutube.com"), so the boundary is a
/// dot.
pub fn navigation_allowed(url: &str, allowed_hosts: &[String]) -> bool {
    let host = match host_of(url) {
        Some(h) => h,
        None => return false,
    };
    allowed_hosts
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Driver for running without an attached browser surface. `Open` only logs;
/// `Close` reports the surface gone so session teardown stays uniform.
pub fn spawn_detached_driver(events: mpsc::Sender<BrowserEvent>) -> BrowserHandle {
    let (tx, mut rx) = mpsc::channel::<BrowserCommand>(16);

    tokio::spawn(async move {
        let mut open = false;
        while let Some(cmd) = rx.recv().await {
            match cmd {
                BrowserCommand::Open { url } => {
                    info!("browser surface (detached): open {}", url);
                    open = true;
                }
                BrowserCommand::Close => {
                    if open {
                        open = false;
                        let _ = events.send(BrowserEvent::Closed).await;
                    }
                }
            }
        }
    });

    BrowserHandle::new(tx)
}
