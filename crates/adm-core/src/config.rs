use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Browser-like default User-Agent; some CDNs reject obviously non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Retry tuning stored under `[retry]` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum retry attempts after the first failure.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Randomize each delay by a uniform factor in [0.75, 1.25].
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

/// Global configuration loaded from `~/.config/adm/config.toml`.
///
/// This is the settings snapshot the engine, queue, and fetchers consume;
/// the GUI/CLI owns persistence of any richer preference set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmConfig {
    /// Directory new downloads are saved into.
    pub download_dir: PathBuf,
    /// Maximum downloads running at once (queue admission cap).
    pub max_concurrent_downloads: usize,
    /// Planned connections per resumable download, clamped to [1, 16].
    pub threads_per_download: usize,
    /// Global bandwidth cap in bytes/sec; 0 means unlimited.
    pub max_bytes_per_sec: u64,
    /// Re-enqueue failed downloads with capped backoff.
    pub auto_retry_failed: bool,
    /// Seconds without a received byte before an open response is torn down.
    pub stall_timeout_secs: u64,
    /// User-Agent sent on every request.
    pub user_agent: String,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for AdmConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: 3,
            threads_per_download: 4,
            max_bytes_per_sec: 0,
            auto_retry_failed: true,
            stall_timeout_secs: 45,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetrySettings::default(),
        }
    }
}

impl AdmConfig {
    /// Threads clamped to a sane span; servers rarely benefit past 16.
    pub fn effective_threads(&self) -> usize {
        self.threads_per_download.clamp(1, 16)
    }

    /// Per-connection byte rate when a global cap is set, 0 otherwise.
    pub fn per_connection_rate(&self, connections: usize) -> u64 {
        if self.max_bytes_per_sec == 0 {
            return 0;
        }
        let n = connections.max(1) as u64;
        (self.max_bytes_per_sec + n - 1) / n
    }
}

fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|h| h.join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("adm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// State directory for the database, log file, and ingress socket.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("adm")?;
    Ok(xdg_dirs.get_state_home().join("adm"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = AdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: AdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = AdmConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 3);
        assert_eq!(cfg.threads_per_download, 4);
        assert_eq!(cfg.max_bytes_per_sec, 0);
        assert!(cfg.auto_retry_failed);
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.initial_delay_ms, 1_000);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = AdmConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_downloads, cfg.max_concurrent_downloads);
        assert_eq!(parsed.threads_per_download, cfg.threads_per_download);
        assert_eq!(parsed.retry.max_retries, cfg.retry.max_retries);
    }

    #[test]
    fn threads_are_clamped() {
        let mut cfg = AdmConfig::default();
        cfg.threads_per_download = 0;
        assert_eq!(cfg.effective_threads(), 1);
        cfg.threads_per_download = 64;
        assert_eq!(cfg.effective_threads(), 16);
    }

    #[test]
    fn per_connection_rate_splits_cap() {
        let mut cfg = AdmConfig::default();
        assert_eq!(cfg.per_connection_rate(4), 0);
        cfg.max_bytes_per_sec = 1_000_000;
        assert_eq!(cfg.per_connection_rate(4), 250_000);
        assert_eq!(cfg.per_connection_rate(3), 333_334);
        assert_eq!(cfg.per_connection_rate(0), 1_000_000);
    }
}
