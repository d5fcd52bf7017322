//! snapbeam configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/snapbeam/config.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/snapbeam/config.toml`
//!
//! Saved sessions live next to it in `sessions.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use snapbeam_transport::Timeouts;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name shown to paired devices (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Stable identifier sent when pairing.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Where received files are written. `~` expands to the home directory.
    #[serde(default = "default_save_dir")]
    pub save_dir: String,

    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,

    #[serde(default = "default_pairing_port")]
    pub pairing_port: u16,

    /// Media library root; images and videos are copied here when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_dir: Option<String>,

    /// Files larger than this are streamed instead of read into memory.
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Per-step connection deadlines, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "snapbeam".into())
}

fn default_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_save_dir() -> String {
    "~/Downloads/snapbeam".into()
}

fn default_transfer_port() -> u16 {
    50505
}

fn default_pairing_port() -> u16 {
    50506
}

fn default_memory_limit() -> u64 {
    16 * 1024 * 1024
}

fn default_connect_secs() -> u64 {
    30
}

fn default_handshake_secs() -> u64 {
    5
}

fn default_idle_secs() -> u64 {
    60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            handshake_secs: default_handshake_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_timeouts(self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_secs),
            handshake: Duration::from_secs(self.handshake_secs),
            idle: Duration::from_secs(self.idle_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            device_id: default_device_id(),
            save_dir: default_save_dir(),
            transfer_port: default_transfer_port(),
            pairing_port: default_pairing_port(),
            library_dir: None,
            memory_limit_bytes: default_memory_limit(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn save_dir_path(&self) -> PathBuf {
        expand_home(&self.save_dir)
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_dir.as_deref().map(expand_home)
    }
}

/// Returns the configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    snapbeam_session::config_dir()
        .map(|d| d.join("snapbeam").join("config.toml"))
        .context("cannot determine the configuration directory")
}

/// Returns the saved-sessions path, next to the configuration file.
pub fn sessions_path() -> anyhow::Result<PathBuf> {
    Ok(config_path()?.with_file_name("sessions.json"))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None if path == "~" => home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var_os(var).map(PathBuf::from)
}
