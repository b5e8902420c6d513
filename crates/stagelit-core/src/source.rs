//! Media sources and folder scanning.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StageError;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "opus",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// A playable file found by the folder scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaFile {
    pub name: String,
    pub path: PathBuf,
    pub kind: MediaKind,
    pub ext: String,
}

/// Where the session's media comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum MediaSource {
    /// A video file on disk.
    LocalVideo { path: PathBuf },
    /// An audio file on disk.
    LocalAudio { path: PathBuf },
    /// A URL that points straight at a media file; streamed as-is.
    DirectStream { url: String },
    /// Downloaded to a temporary file; the path is registered for deletion.
    AcquiredStream { path: PathBuf },
    /// Playback delegated to a separate browser surface. The countdown still
    /// runs, but there is no media-length ground truth.
    BrowserView { url: String },
}

impl MediaSource {
    /// Whether the source renders as video (browser views count: they host a
    /// video surface even though we cannot inspect it).
    pub fn is_video(&self) -> bool {
        !matches!(self, MediaSource::LocalAudio { .. })
    }

    /// Short human label for logs and the completion summary.
    pub fn describe(&self) -> String {
        match self {
            MediaSource::LocalVideo { path } | MediaSource::LocalAudio { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            MediaSource::DirectStream { url } | MediaSource::BrowserView { url } => url.clone(),
            MediaSource::AcquiredStream { .. } => "Online Stream".to_string(),
        }
    }
}

/// Classify a file extension (lowercase, no dot). `None` for non-media files.
pub fn classify_extension(ext: &str) -> Option<MediaKind> {
    if VIDEO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

/// True when the URL points straight at a media file and can be streamed
/// without involving the downloader.
pub fn is_direct_media_url(url: &str) -> bool {
    static DIRECT_MEDIA_RE: OnceLock<Regex> = OnceLock::new();
    let re = DIRECT_MEDIA_RE.get_or_init(|| {
        Regex::new(r"(?i)\.(mp4|mp3|wav|webm|ogg|m4a|flac|aac)(\?.*)?$").expect("valid regex")
    });
    re.is_match(url)
}

/// List the playable files directly inside `dir`, ordered by name.
pub fn scan_folder(dir: &Path) -> Result<Vec<MediaFile>, StageError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| StageError::FolderScan(e.to_string()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StageError::FolderScan(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => continue,
        };
        let kind = match classify_extension(&ext) {
            Some(k) => k,
            None => continue,
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push(MediaFile {
            name,
            path,
            kind,
            ext,
        });
    }

    files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn direct_media_url_detection() {
        assert!(is_direct_media_url("https://cdn.example.com/clip.mp4"));
        assert!(is_direct_media_url("https://cdn.example.com/clip.MP4"));
        assert!(is_direct_media_url("https://cdn.example.com/a.m4a?token=xyz"));
        assert!(!is_direct_media_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_direct_media_url("https://example.com/page.mp4.html"));
    }

    #[test]
    fn extension_classification() {
        assert_eq!(classify_extension("mkv"), Some(MediaKind::Video));
        assert_eq!(classify_extension("opus"), Some(MediaKind::Audio));
        assert_eq!(classify_extension("txt"), None);
    }

    #[test]
    fn scan_orders_by_name_and_skips_non_media() {
        let dir = TempDir::new().unwrap();
        for name in ["zeta.mp3", "Alpha.mp4", "notes.txt", "mid.webm"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.mp4")).unwrap();

        let files = scan_folder(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha.mp4", "mid.webm", "zeta.mp3"]);
        assert_eq!(files[0].kind, MediaKind::Video);
        assert_eq!(files[2].kind, MediaKind::Audio);
        assert_eq!(files[2].ext, "mp3");
    }

    #[test]
    fn scan_missing_dir_is_folder_scan_error() {
        let err = scan_folder(Path::new("/nonexistent/stagelit-test")).unwrap_err();
        assert!(matches!(err, StageError::FolderScan(_)));
    }

    #[test]
    fn source_descriptions() {
        let src = MediaSource::LocalAudio {
            path: PathBuf::from("/music/track.flac"),
        };
        assert_eq!(src.describe(), "track.flac");
        assert!(!src.is_video());

        let src = MediaSource::BrowserView {
            url: "https://youtu.be/abc".into(),
        };
        assert!(src.is_video());
    }
}
