use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::log_warn;

const ENABLE_LOGS: bool = true;

pub const DB_PATH_ENV: &str = "NAVHISTORY_DB_PATH";
pub const DEBUG_ENV: &str = "NAVHISTORY_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Read-only connections serving queries (at least one is always opened).
    pub reader_connections: usize,
    pub busy_timeout_ms: u64,
    pub log_level: String,
    /// Default cap for [`crate::HistoryStore::navigation_paths`].
    pub path_limit: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("navhistory.sqlite3"),
            reader_connections: 2,
            busy_timeout_ms: 5_000,
            log_level: "info".into(),
            path_limit: None,
        }
    }
}

impl StoreConfig {
    /// Load from a JSON file if it exists, then apply environment overrides.
    /// An unreadable file is an error; an unparsable one falls back to
    /// defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("Ignoring malformed config {}: {err}", path.display());
                StoreConfig::default()
            })
        } else {
            StoreConfig::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup(DB_PATH_ENV).filter(|value| !value.is_empty()) {
            self.database_path = PathBuf::from(db_path);
        }

        let debug_mode = lookup(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.log_level = "debug".into();
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}
