use crate::core::{Result, StoreError};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_PATH: &str = "data.json";

pub const ENV_DATA_PATH: &str = "SONGQUEUE_DATA";
pub const ENV_RECOVER_ON_OPEN: &str = "SONGQUEUE_RECOVER_ON_OPEN";
pub const ENV_SYNC_WRITES: &str = "SONGQUEUE_SYNC_WRITES";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Canonical snapshot file. The temp sibling lives next to it.
    pub data_path: PathBuf,

    /// Run the recovery pass before loading.
    pub recover_on_open: bool,

    /// fsync the temp file before renaming it into place.
    pub sync_writes: bool,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(data_path: P) -> Self {
        Self {
            data_path: data_path.as_ref().to_path_buf(),
            recover_on_open: true,
            sync_writes: true,
        }
    }

    pub fn recover_on_open(mut self, enabled: bool) -> Self {
        self.recover_on_open = enabled;
        self
    }

    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_path = lookup(ENV_DATA_PATH)
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_PATH.to_string());

        let mut config = Self::new(data_path);
        if let Some(raw) = lookup(ENV_RECOVER_ON_OPEN) {
            config.recover_on_open = parse_flag(ENV_RECOVER_ON_OPEN, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SYNC_WRITES) {
            config.sync_writes = parse_flag(ENV_SYNC_WRITES, &raw)?;
        }
        Ok(config)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_PATH)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StoreError::Config(format!(
            "{} must be a boolean (got '{}')",
            key, raw
        ))),
    }
}
