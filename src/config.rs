use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Loopback port the local asset server binds to by default.
pub const DEFAULT_PORT: u16 = 8000;

/// Release metadata endpoint for the packaged game builds.
pub const DEFAULT_RELEASE_URL: &str =
    "https://api.github.com/repos/Admiral-Billy/pokerogue/releases/latest";

/// Connect timeout for the archive download, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout for the archive download, in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// The release API rejects requests without a User-Agent.
pub const USER_AGENT: &str = concat!("offline-play-engine/", env!("CARGO_PKG_VERSION"));

/// Read buffer used when streaming asset files to the browser (64 KB).
pub const STREAM_BUFFER_BYTES: usize = 64 * 1024;

/// Top-level configuration for the offline play engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the installed game's static files.
    pub asset_dir: PathBuf,
    /// Directory used for the transient downloaded archive.
    pub cache_dir: PathBuf,
    /// Release metadata endpoint returning the asset manifest.
    pub release_url: String,
    /// Port the local asset server listens on (loopback only).
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// When set, the standard build is chosen by this asset name instead of position.
    pub standard_asset_name: Option<String>,
    /// When set, the modified build is chosen by this asset name instead of position.
    pub modified_asset_name: Option<String>,
}

impl EngineConfig {
    /// Build a config rooted at `base_dir`: assets under `game/`, archives under `cache/`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base = base_dir.into();
        Self {
            asset_dir: base.join("game"),
            cache_dir: base.join("cache"),
            ..Self::default()
        }
    }

    /// Parse a JSON config handed over by the host; missing fields take defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("game"),
            cache_dir: std::env::temp_dir(),
            release_url: DEFAULT_RELEASE_URL.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            standard_asset_name: None,
            modified_asset_name: None,
        }
    }
}
