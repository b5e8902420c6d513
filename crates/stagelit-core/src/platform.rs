//! Per-platform paths and downloader candidate locations.

use std::path::PathBuf;

/// Bundled binaries below this size are not trusted (a real yt-dlp build is
/// several MB; anything smaller is a broken or placeholder file).
pub const BUNDLED_MIN_SIZE_BYTES: u64 = 1_000_000;

/// Whether this is a packaged (distributed) build rather than a developer
/// build. Packaged builds trust a bundled downloader on existence + size
/// alone, since executing it can be blocked by code-signing or read-only
/// filesystem policies. `STAGELIT_PACKAGED=0/1` overrides for testing.
pub fn is_packaged_build() -> bool {
    match std::env::var("STAGELIT_PACKAGED") {
        Ok(v) => v != "0",
        Err(_) => !cfg!(debug_assertions),
    }
}

pub fn data_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("stagelit")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagelit")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("stagelit")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagelit")
    }
}

/// Per-run scratch directory for acquired downloads.
pub fn temp_dir() -> PathBuf {
    std::env::temp_dir().join("stagelit")
}

#[cfg(target_os = "macos")]
pub fn bundled_binary_names() -> &'static [&'static str] {
    &["yt-dlp", "yt-dlp_macos"]
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn bundled_binary_names() -> &'static [&'static str] {
    &["yt-dlp", "yt-dlp_linux"]
}

#[cfg(windows)]
pub fn bundled_binary_names() -> &'static [&'static str] {
    &["yt-dlp.exe"]
}

#[cfg(unix)]
pub fn system_binary_names() -> &'static [&'static str] {
    &["yt-dlp"]
}

#[cfg(windows)]
pub fn system_binary_names() -> &'static [&'static str] {
    &["yt-dlp.exe", "yt-dlp"]
}

/// Launcher used for the `python -m yt_dlp` module invocation.
#[cfg(unix)]
pub fn python_launcher() -> &'static str {
    "python3"
}

#[cfg(windows)]
pub fn python_launcher() -> &'static str {
    "python"
}

/// Directories that may carry a downloader shipped with the application:
/// beside the executable and in its `bin/` subdirectory.
pub fn bundled_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.join("bin"));
            dirs.push(dir.to_path_buf());
        }
    }
    dirs
}

/// Fixed per-platform locations where users commonly end up with a
/// downloader that is not on PATH.
#[cfg(target_os = "macos")]
pub fn common_install_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/opt/homebrew/bin/yt-dlp"),
        PathBuf::from("/usr/local/bin/yt-dlp"),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".local/bin/yt-dlp"));
    }
    paths
}

#[cfg(windows)]
pub fn common_install_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(
            home.join("AppData")
                .join("Local")
                .join("Programs")
                .join("yt-dlp")
                .join("yt-dlp.exe"),
        );
        paths.push(home.join("scoop").join("shims").join("yt-dlp.exe"));
    }
    paths.push(PathBuf::from(r"C:\ProgramData\chocolatey\bin\yt-dlp.exe"));
    paths
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn common_install_paths() -> Vec<PathBuf> {
    Vec::new()
}
