//! Environment-driven configuration.
//!
//! All knobs come from environment variables (loaded from `.env` by the
//! binary via dotenvy before this runs). Only the credential path is required
//! by the core; everything else has a serviceable default.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default HTTP listen port.
const DEFAULT_PORT: u16 = 3000;
/// Default dispatcher tick interval in seconds.
const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 3;
/// Default bound on a single pairing-code request.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port for the submission/status surface.
    pub port: u16,
    /// Externally visible base URL, if deployed behind one.
    pub public_url: Option<String>,
    /// Path of the persisted credential file.
    pub creds_path: PathBuf,
    /// How often the dispatcher scans for pending submissions.
    pub dispatch_interval: Duration,
    /// Upper bound on a single pairing-code request.
    pub request_timeout: Duration,
    /// Message sent to the session's own user once the connection opens.
    /// Empty disables the greeting.
    pub ready_message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            public_url: None,
            creds_path: default_creds_path(),
            dispatch_interval: Duration::from_secs(DEFAULT_DISPATCH_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            ready_message: "Session generated successfully.".to_string(),
        }
    }
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Self {
            port: parse_env("PAIRCLAW_PORT", defaults.port)?,
            public_url: std::env::var("PAIRCLAW_PUBLIC_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            creds_path: std::env::var("PAIRCLAW_CREDS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.creds_path),
            dispatch_interval: Duration::from_secs(parse_env(
                "PAIRCLAW_DISPATCH_INTERVAL_SECS",
                DEFAULT_DISPATCH_INTERVAL_SECS,
            )?),
            request_timeout: Duration::from_secs(parse_env(
                "PAIRCLAW_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            ready_message: std::env::var("PAIRCLAW_READY_MESSAGE")
                .unwrap_or(defaults.ready_message),
        })
    }

    /// Socket address string for the HTTP listener.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Credential file under the user's home directory.
fn default_creds_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pairclaw")
        .join("credentials.json")
}

/// Read an env var and parse it, falling back to `default` when unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{}", e),
        }),
        Err(_) => Ok(default),
    }
}
