use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kline_core::BackoffPolicy;
use kline_engine::{CompactFileStore, FetchSettings};
use kline_logging::kline_info;
use serde::{Deserialize, Serialize};

/// Read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "kline_export.ron";

/// Host settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Primary snapshot directory; the fallback tier lives in `fallback/` below it.
    pub state_dir: PathBuf,
    pub fallback_max_bytes: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// `None` retries transient failures without limit.
    pub max_attempts: Option<u32>,
    pub log_to_file: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./kline_state"),
            fallback_max_bytes: CompactFileStore::DEFAULT_MAX_BYTES,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: None,
            log_to_file: false,
        }
    }
}

impl AppConfig {
    /// Loads `explicit`, which must exist, or else the default file if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::read(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    Self::read(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        kline_info!("loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(ron::from_str(content)?)
    }

    pub fn fallback_dir(&self) -> PathBuf {
        self.state_dir.join("fallback")
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..FetchSettings::default()
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            ..BackoffPolicy::default()
        }
    }
}
