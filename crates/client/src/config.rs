//! Client configuration
//!
//! Read once at startup and passed explicitly. Precedence, lowest first:
//! built-in defaults, `ROBODECK_*` environment variables (a `.env` file is
//! honoured), then the URL the operator saved in settings storage.
//!
//! Supported environment variables:
//! - `ROBODECK_ROSBRIDGE_URL`: bus URL (`ws://` or `wss://`)
//! - `ROBODECK_RECONNECT_BASE_MS`: first reconnect delay
//! - `ROBODECK_RECONNECT_MAX_ATTEMPTS`: reconnect attempts before giving up
//! - `ROBODECK_CMD_VEL_TOPIC`: velocity command topic
//! - `ROBODECK_PUBLISH_INTERVAL_MS`: cadence of held-key publishing
//! - `ROBODECK_MAX_LINEAR_SPEED`, `ROBODECK_MAX_ANGULAR_SPEED`: speed limits

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::application::services::ControllerConfig;
use crate::infrastructure::messaging::BusConnection;
use crate::infrastructure::websocket::{validate_bus_url, ReconnectPolicy};
use crate::ports::outbound::{storage_keys, StorageError, StorageProvider, TransportError};

pub const DEFAULT_BUS_URL: &str = "ws://localhost:9090";

pub const ENV_ROSBRIDGE_URL: &str = "ROBODECK_ROSBRIDGE_URL";
pub const ENV_RECONNECT_BASE_MS: &str = "ROBODECK_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "ROBODECK_RECONNECT_MAX_ATTEMPTS";
pub const ENV_CMD_VEL_TOPIC: &str = "ROBODECK_CMD_VEL_TOPIC";
pub const ENV_PUBLISH_INTERVAL_MS: &str = "ROBODECK_PUBLISH_INTERVAL_MS";
pub const ENV_MAX_LINEAR_SPEED: &str = "ROBODECK_MAX_LINEAR_SPEED";
pub const ENV_MAX_ANGULAR_SPEED: &str = "ROBODECK_MAX_ANGULAR_SPEED";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    InvalidUrl(#[from] TransportError),

    #[error("Failed to load .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub controller: ControllerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BUS_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            controller: ControllerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from the process environment (and `.env`) plus `storage`.
    pub fn load(storage: &dyn StorageProvider) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok(), storage))
    }

    /// Build from an arbitrary variable source. Invalid values are logged and ignored.
    pub fn from_lookup<F>(lookup: F, storage: &dyn StorageProvider) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_ROSBRIDGE_URL) {
            match validate_bus_url(&url) {
                Ok(_) => config.url = url,
                Err(e) => tracing::warn!(error = %e, "{} ignored", ENV_ROSBRIDGE_URL),
            }
        }

        let base_delay = parse_var::<u64, _>(&lookup, ENV_RECONNECT_BASE_MS)
            .map(Duration::from_millis)
            .unwrap_or(config.reconnect.base_delay());
        let max_attempts = parse_var::<u32, _>(&lookup, ENV_RECONNECT_MAX_ATTEMPTS)
            .unwrap_or(config.reconnect.max_attempts());
        config.reconnect = ReconnectPolicy::new(base_delay, max_attempts);

        if let Some(topic) = lookup(ENV_CMD_VEL_TOPIC).filter(|t| t.starts_with('/')) {
            config.controller.topic = topic;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_PUBLISH_INTERVAL_MS).filter(|ms| *ms > 0) {
            config.controller.cadence = Duration::from_millis(ms);
        }
        if let Some(speed) = parse_var::<f64, _>(&lookup, ENV_MAX_LINEAR_SPEED).filter(|s| *s > 0.0) {
            config.controller.limits.max_linear = speed;
        }
        if let Some(speed) = parse_var::<f64, _>(&lookup, ENV_MAX_ANGULAR_SPEED).filter(|s| *s > 0.0) {
            config.controller.limits.max_angular = speed;
        }

        if let Some(saved) = storage.load(storage_keys::ROSBRIDGE_URL) {
            match validate_bus_url(&saved) {
                Ok(_) => config.url = saved,
                Err(e) => tracing::warn!(error = %e, "Saved bus URL ignored"),
            }
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            tracing::debug!(key, value = %raw, "Environment override");
            Some(value)
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "Not a valid value, ignoring");
            None
        }
    }
}

/// Persist a new bus URL and switch the live connection to it.
///
/// The connection is left alone when the URL could not be saved.
pub fn apply_url(
    storage: &dyn StorageProvider,
    connection: &BusConnection,
    url: &str,
) -> Result<(), ConfigError> {
    let url = url.trim();
    validate_bus_url(url)?;
    storage.save(storage_keys::ROSBRIDGE_URL, url)?;
    connection.set_url(url);
    tracing::info!(%url, "Bus URL saved");
    Ok(())
}

/// Forget the saved URL and go back to the default.
pub fn reset_url(
    storage: &dyn StorageProvider,
    connection: &BusConnection,
) -> Result<(), ConfigError> {
    storage.remove(storage_keys::ROSBRIDGE_URL)?;
    connection.set_url(DEFAULT_BUS_URL);
    Ok(())
}
