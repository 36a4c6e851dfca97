//! Coordinator configuration loaded from `~/.config/ferry/config.toml`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Immutable per-instance configuration for the transfer coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FerryConfig {
    /// Maximum number of transfers admitted at once.
    pub max_concurrent: usize,
    /// Optional per-transfer time budget in seconds, passed through to the
    /// transfer driver (the engine does not enforce it).
    #[serde(default)]
    pub transfer_timeout_secs: Option<u64>,
    /// Upper bound on automatic reconnect retries per task.
    pub max_retry_attempts: u32,
    /// Minimum interval between progress events per task, in milliseconds.
    pub progress_interval_ms: u64,
    /// Re-enqueue network-class failures when connectivity returns.
    pub auto_resume_on_reconnect: bool,
    /// Reachability poll interval in seconds.
    pub net_poll_interval_secs: u64,
    /// Address the TCP reachability probe connects to.
    pub probe_addr: String,
    /// Directory new transfers are written to (CLI defaults to cwd when unset).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            transfer_timeout_secs: None,
            max_retry_attempts: 5,
            progress_interval_ms: 500,
            auto_resume_on_reconnect: true,
            net_poll_interval_secs: 15,
            probe_addr: "1.1.1.1:443".to_string(),
            download_dir: None,
        }
    }
}

impl FerryConfig {
    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout_secs.map(Duration::from_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn net_poll_interval(&self) -> Duration {
        Duration::from_secs(self.net_poll_interval_secs.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ferry")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FerryConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FerryConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FerryConfig = toml::from_str(&data)?;
    Ok(cfg)
}
