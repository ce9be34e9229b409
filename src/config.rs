//! Application configuration loaded from the environment

use crate::error::{LinkSwipeError, Result};
use crate::links::DEFAULT_LINK_LIMIT;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub const ENV_BACKEND_URL: &str = "LINKSWIPE_BACKEND_URL";
pub const ENV_BACKEND_KEY: &str = "LINKSWIPE_BACKEND_KEY";
pub const ENV_DATA_DIR: &str = "LINKSWIPE_DATA_DIR";
pub const ENV_LINK_LIMIT: &str = "LINKSWIPE_LINK_LIMIT";
pub const ENV_PREVIEW_TIMEOUT_SECS: &str = "LINKSWIPE_PREVIEW_TIMEOUT_SECS";

const DEFAULT_PREVIEW_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the hosted backend
    pub backend_url: String,

    /// Public (anonymous) API key of the backend project
    pub backend_key: String,

    /// Directory for local persistence
    pub data_dir: PathBuf,

    /// Maximum number of links per list read
    pub link_limit: usize,

    pub preview_timeout: Duration,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| LinkSwipeError::ConfigError(format!("{} is not set", name)))
        };

        let data_dir = match lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let link_limit = match lookup(ENV_LINK_LIMIT) {
            Some(raw) => parse_number(ENV_LINK_LIMIT, &raw)?,
            None => DEFAULT_LINK_LIMIT,
        };

        let preview_timeout = match lookup(ENV_PREVIEW_TIMEOUT_SECS) {
            Some(raw) => Duration::from_secs(parse_number(ENV_PREVIEW_TIMEOUT_SECS, &raw)? as u64),
            None => DEFAULT_PREVIEW_TIMEOUT,
        };

        let config = Self {
            backend_url: required(ENV_BACKEND_URL)?.trim().trim_end_matches('/').to_string(),
            backend_key: required(ENV_BACKEND_KEY)?.trim().to_string(),
            data_dir,
            link_limit,
            preview_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.backend_url.starts_with("https://") || self.backend_url.starts_with("http://")) {
            return Err(LinkSwipeError::ConfigError(format!(
                "{} must be an http(s) URL, got '{}'",
                ENV_BACKEND_URL, self.backend_url
            )));
        }
        if self.backend_key.is_empty() {
            return Err(LinkSwipeError::ConfigError(format!("{} is empty", ENV_BACKEND_KEY)));
        }
        if self.link_limit == 0 {
            return Err(LinkSwipeError::ConfigError(format!(
                "{} must be greater than 0",
                ENV_LINK_LIMIT
            )));
        }
        if self.preview_timeout.is_zero() {
            return Err(LinkSwipeError::ConfigError(format!(
                "{} must be greater than 0",
                ENV_PREVIEW_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

fn parse_number(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| LinkSwipeError::ConfigError(format!("{} is not a number: '{}'", name, raw)))
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("linkswipe"))
        .ok_or_else(|| {
            LinkSwipeError::ConfigError(format!(
                "no platform data directory; set {}",
                ENV_DATA_DIR
            ))
        })
}
