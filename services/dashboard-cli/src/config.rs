//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is never read from the TOML; it comes from the
//! DASHBOARD_PASSWORD env var at login time.

use api_client::ClientConfig;
use serde::Deserialize;
use session_store::DEFAULT_SESSION_KEY;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ClientConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where remembered sessions are kept
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    #[serde(default = "default_session_key")]
    pub session_key: String,
}

fn default_session_file() -> PathBuf {
    PathBuf::from("dashboard-session.json")
}

fn default_session_key() -> String {
    DEFAULT_SESSION_KEY.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
            session_key: default_session_key(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API_BASE_URL replaces `api.base_url` when set and non-empty.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = common::read_toml(path)?;

        if let Ok(base) = std::env::var("API_BASE_URL")
            && !base.trim().is_empty()
        {
            config.api.base_url = Some(base);
        }

        config.api.validate()?;

        if config.storage.session_key.trim().is_empty() {
            return Err(common::Error::Config(
                "storage.session_key must not be empty".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("dashboard-cli.toml")
    }
}
