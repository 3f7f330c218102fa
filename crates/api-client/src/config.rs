//! Client configuration
//!
//! Deserialized from the `[api]` table of the service config. Every field has
//! a default, so an empty table is valid; only `base_url` normally needs
//! setting (and the `API_BASE_URL` env var can supply it instead).

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Prefix for relative endpoints. Absent means relative endpoints are sent
    /// as-is, which fails at the transport layer.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    /// Unauthenticated entry route handed to the redirect handler.
    #[serde(default = "default_login_route")]
    pub login_route: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_timeout() -> u64 {
    10
}

fn default_refresh_path() -> String {
    "/auth/refresh".into()
}

fn default_login_path() -> String {
    "/auth/login".into()
}

fn default_logout_path() -> String {
    "/auth/logout".into()
}

fn default_login_route() -> String {
    "/login".into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout(),
            refresh_timeout_secs: default_refresh_timeout(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            logout_path: default_logout_path(),
            login_route: default_login_route(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Configured base URL, treating an empty string as unset.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|b| !b.trim().is_empty())
    }

    /// Reject values that would make every call fail.
    pub fn validate(&self) -> common::Result<()> {
        if let Some(base) = self.base_url()
            && !base.starts_with("http://")
            && !base.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {base}"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
