use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use station_util::{env_override, state_file_path, write_json_atomic};
use tracing::warn;

const CLIENT_CONFIG_FILE: &str = "client-config.json";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const BASE_URL_ENV: &str = "STATION_BASE_URL";
const API_PREFIX_ENV: &str = "STATION_API_PREFIX";
const POLL_INTERVAL_ENV: &str = "STATION_POLL_INTERVAL_MS";
const REQUEST_TIMEOUT_ENV: &str = "STATION_REQUEST_TIMEOUT_SECS";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: station_util::DEFAULT_BASE_URL.into(),
            api_prefix: station_util::DEFAULT_API_PREFIX.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Defaults, overlaid by the saved config file, overlaid by the environment.
    pub fn load() -> Self {
        let mut cfg = Self::load_file(&client_config_path());
        cfg.apply_env();
        cfg
    }

    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load_file(path: &Path) -> Self {
        let mut cfg = ClientConfig::default();
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<ClientConfig>(&data) {
                Ok(file_cfg) => {
                    if !file_cfg.base_url.trim().is_empty() {
                        cfg.base_url = file_cfg.base_url;
                    }
                    cfg.api_prefix = file_cfg.api_prefix;
                    if file_cfg.poll_interval_ms > 0 {
                        cfg.poll_interval_ms = file_cfg.poll_interval_ms;
                    }
                    if file_cfg.request_timeout_secs > 0 {
                        cfg.request_timeout_secs = file_cfg.request_timeout_secs;
                    }
                }
                Err(err) => warn!("Failed to parse {}: {err}", path.display()),
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {err}", path.display());
                }
            }
        }
        cfg
    }

    fn apply_env(&mut self) {
        if let Some(base_url) = env_override(BASE_URL_ENV) {
            self.base_url = base_url;
        }
        if let Ok(prefix) = std::env::var(API_PREFIX_ENV) {
            self.api_prefix = prefix;
        }
        if let Some(raw) = env_override(POLL_INTERVAL_ENV) {
            match raw.parse::<u64>() {
                Ok(value) => self.poll_interval_ms = value,
                Err(_) => warn!("Ignoring invalid {POLL_INTERVAL_ENV}={raw}"),
            }
        }
        if let Some(raw) = env_override(REQUEST_TIMEOUT_ENV) {
            match raw.parse::<u64>() {
                Ok(value) if value > 0 => self.request_timeout_secs = value,
                _ => warn!("Ignoring invalid {REQUEST_TIMEOUT_ENV}={raw}"),
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn save(&self) -> io::Result<PathBuf> {
        let path = client_config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        write_json_atomic(path, self)
    }
}

pub fn client_config_path() -> PathBuf {
    state_file_path(CLIENT_CONFIG_FILE)
}
