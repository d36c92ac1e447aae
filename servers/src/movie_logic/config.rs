use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_common::admission::{AdmissionConfig, DEFAULT_EVICT_AFTER_WINDOWS, DEFAULT_LIMIT, DEFAULT_WINDOW_MS};
use lib_common::retrieve::{BackendClient, DEFAULT_BACKEND_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "server_movies.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "ReelStream movie recommendation gateway", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "REEL_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "REEL_HOST", help = "Address to bind the listener to.")]
    pub host: Option<IpAddr>,

    #[clap(long, env = "REEL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REEL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REEL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error, fatal).")]
    pub log_level: Option<String>,

    #[clap(long, env = "BACKEND_API_URL", help = "Base URL of the recommendation backend.")]
    pub backend_url: Option<String>,

    #[clap(long, env = "REEL_RATE_LIMIT", help = "Requests allowed per client per window.")]
    pub rate_limit: Option<u32>,

    #[clap(long, env = "REEL_RATE_WINDOW_MS", help = "Length of one admission window in milliseconds.")]
    pub rate_window_ms: Option<u64>,

    #[clap(long, env = "REEL_RATE_LIMIT_PREFIX", help = "Path prefix guarded by the admission gate.")]
    pub rate_limit_prefix: Option<String>,

    #[clap(long, env = "REEL_EVICT_AFTER_WINDOWS", help = "Idle windows after which a client record is evicted.")]
    pub evict_after_windows: Option<u32>,

    #[clap(long, env = "REEL_SWEEP_INTERVAL_SECS", help = "Seconds between stale-record sweeps.")]
    pub sweep_interval_secs: Option<u64>,
}

impl Config {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Config {
        Config {
            port: Some(3000),
            host: Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            backend_url: Some(DEFAULT_BACKEND_URL.to_string()),
            rate_limit: Some(DEFAULT_LIMIT),
            rate_window_ms: Some(DEFAULT_WINDOW_MS),
            rate_limit_prefix: Some("/api/".to_string()),
            evict_after_windows: Some(DEFAULT_EVICT_AFTER_WINDOWS),
            sweep_interval_secs: Some(60),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    pub fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            backend_url: other.backend_url.or(self.backend_url),
            rate_limit: other.rate_limit.or(self.rate_limit),
            rate_window_ms: other.rate_window_ms.or(self.rate_window_ms),
            rate_limit_prefix: other.rate_limit_prefix.or(self.rate_limit_prefix),
            evict_after_windows: other.evict_after_windows.or(self.evict_after_windows),
            sweep_interval_secs: other.sweep_interval_secs.or(self.sweep_interval_secs),
        }
    }

    /// Reads a JSON config file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Option<Config>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str::<Config>(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(Some(config))
    }
}

/// Fully resolved, validated settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub host: IpAddr,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub backend_url: String,
    pub admission: AdmissionConfig,
    pub rate_limit_prefix: String,
    pub sweep_interval: Duration,
}

impl Settings {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self> {
        let config = Config::defaults().merge(config);

        // `defaults()` fills every field, so the fallbacks below are never hit.
        let limit = config.rate_limit.unwrap_or(DEFAULT_LIMIT);
        let window_ms = config.rate_window_ms.unwrap_or(DEFAULT_WINDOW_MS);
        let sweep_secs = config.sweep_interval_secs.unwrap_or(60);
        let backend_url = config.backend_url.unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        if limit == 0 {
            bail!("rate limit must be at least 1");
        }
        if window_ms == 0 {
            bail!("rate window must be longer than 0 ms");
        }
        if sweep_secs == 0 {
            bail!("sweep interval must be at least 1 second");
        }
        BackendClient::new(&backend_url)
            .with_context(|| format!("invalid backend url {:?}", backend_url))?;

        let mut prefix = config.rate_limit_prefix.unwrap_or_else(|| "/api/".to_string());
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }

        Ok(Settings {
            port: config.port.unwrap_or(3000),
            host: config.host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            backend_url,
            admission: AdmissionConfig {
                limit,
                window_ms,
                evict_after_windows: config.evict_after_windows.unwrap_or(DEFAULT_EVICT_AFTER_WINDOWS),
            },
            rate_limit_prefix: prefix,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

/// Layers defaults, the config file and `cli` (which already carries env vars).
pub fn resolve(cli: Config) -> Result<Settings> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = Config::from_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }
    current_config = current_config.merge(cli);

    Settings::try_from(current_config)
}

pub fn load_config() -> Result<Settings> {
    resolve(Config::parse())
}
