use serde::{Deserialize, Serialize};

use super::platform;

/// Format selector handed to the downloader: prefer an mp4 container capped
/// at 1080p, degrading gracefully to best-available.
pub const DEFAULT_FORMAT: &str = "best[ext=mp4][height<=1080]/best[ext=mp4]/best[height<=1080]/best";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Countdown length used until the operator picks one, in seconds.
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// yt-dlp `-f` selector.
    #[serde(default = "default_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Hostnames the browser surface may navigate within: the media services
    /// themselves plus their auth/redirect partners.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: default_duration_secs(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_duration_secs() -> u64 {
    180
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_allowed_hosts() -> Vec<String> {
    [
        "youtube.com",
        "youtu.be",
        "vimeo.com",
        "dailymotion.com",
        "google.com",
        "accounts.google.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7667
}

impl Config {
    /// Read the config file if the user created one, else fall back to
    /// defaults. Settings are never written back; nothing persists across
    /// runs unless the user maintains the file by hand.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn config_path() -> std::path::PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timer.default_duration_secs, 180);
        assert_eq!(config.engine.bind_address, "127.0.0.1");
        assert!(config.downloads.format.starts_with("best[ext=mp4]"));
        assert!(config
            .browser
            .allowed_hosts
            .iter()
            .any(|h| h == "youtube.com"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[timer]\ndefault_duration_secs = 240\n").unwrap();
        assert_eq!(config.timer.default_duration_secs, 240);
        assert_eq!(config.downloads.format, DEFAULT_FORMAT);
        assert_eq!(config.engine.port, 7667);
    }
}
