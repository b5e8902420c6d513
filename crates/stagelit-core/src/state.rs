//! Shared snapshot holder.
//!
//! The engine loop is the only writer; the socket server reads snapshots to
//! answer Hello/resync requests. Nothing here persists; snapshots live only
//! in memory for the lifetime of the process.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::SessionState;

#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl StateHandle {
    pub fn new(initial: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.read().await.clone()
    }

    /// Replace the snapshot. The caller (the engine loop) is responsible for
    /// bumping `rev` before publishing.
    pub async fn publish(&self, state: SessionState) {
        *self.inner.write().await = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_snapshot() {
        let handle = StateHandle::new(SessionState::default());
        let mut next = SessionState::default();
        next.rev = 3;
        next.configured_secs = 120;
        handle.publish(next.clone()).await;
        assert_eq!(handle.snapshot().await, next);
    }
}
