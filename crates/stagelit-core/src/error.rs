//! Error taxonomy for the session engine.
//!
//! Every variant is surfaced to the user as a single dismissible message; no
//! error is fatal to the process and every failure path returns the session
//! to Idle, ready for a fresh start.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    /// No usable downloader anywhere. The message lists manual install
    /// options since the only remediation is on the user's side.
    #[error(
        "yt-dlp is required for online playback.\n\nInstall:\n\
         • macOS: brew install yt-dlp\n\
         • Windows: winget install yt-dlp\n\
         • pip install yt-dlp"
    )]
    DiscoveryNotFound,

    /// The downloader ran but exited with an error; `detail` carries the
    /// tail of its stderr when available, else a generic exit-code message.
    #[error("{detail}")]
    DownloadProcess { detail: String },

    /// Exit code 0 but a zero-byte output file, which is almost always
    /// access-restricted content rather than a transport failure.
    #[error("Download produced an empty file. Video may be restricted.")]
    DownloadEmptyResult,

    /// The subprocess could not start at all (missing binary, permissions).
    #[error("Failed to run yt-dlp: {0}")]
    DownloadLaunchFailure(String),

    /// The media surface rejected the file we handed it.
    #[error("Media playback failed: {0}")]
    MediaPlayback(String),

    /// Directory scan I/O failure, with the underlying message.
    #[error("Folder scan failed: {0}")]
    FolderScan(String),
}

impl StageError {
    /// Process failure carrying the last few captured stderr lines, or a
    /// generic exit-code message when stderr was silent.
    pub fn process_failure(exit_code: Option<i32>, stderr_tail: &[String]) -> Self {
        let detail = if stderr_tail.is_empty() {
            let code = exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "Download failed (exit code {}). The video may be unavailable or restricted.",
                code
            )
        } else {
            format!("yt-dlp error:\n{}", stderr_tail.join("\n"))
        };
        StageError::DownloadProcess { detail }
    }
}
