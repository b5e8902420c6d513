//! Registry of temp files created for acquired downloads.
//!
//! Paths are registered the moment they are allocated, before the download
//! starts, so cleanup covers jobs that never complete. Deletion is
//! best-effort and deferred: a cancelled subprocess may still hold its file
//! open, so we retry at every natural cleanup point (stop, new-song,
//! shutdown) instead of assuming synchronous release.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub struct TempFileRegistry {
    dir: PathBuf,
    files: Vec<PathBuf>,
    seq: u64,
}

impl TempFileRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: Vec::new(),
            seq: 0,
        }
    }

    /// Allocate a fresh, collision-free output path and register it for
    /// cleanup. Timestamp plus a per-run sequence keeps names unique even
    /// within the same millisecond.
    pub fn allocate(&mut self, ext: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        self.seq += 1;
        let name = format!(
            "stagelit_{}_{}.{}",
            chrono::Utc::now().timestamp_millis(),
            self.seq,
            ext
        );
        let path = self.dir.join(name);
        self.files.push(path.clone());
        Ok(path)
    }

    /// Delete everything we created, ignoring errors. Paths that fail to
    /// delete are kept for the next attempt.
    pub fn cleanup(&mut self) {
        self.files.retain(|f| !try_remove(f));
    }

    #[cfg(test)]
    pub fn registered(&self) -> &[PathBuf] {
        &self.files
    }
}

fn try_remove(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed temp file {:?}", path);
            true
        }
        Err(e) => {
            warn!("Could not remove temp file {:?}: {}", path, e);
            false
        }
    }
}
