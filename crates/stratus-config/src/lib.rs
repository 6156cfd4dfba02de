//! Configuration for Stratus reconciliation.
//!
//! TOML file + `STRATUS_` environment overrides, API token resolution, and
//! translation to [`stratus_core::ReconcileSettings`] and
//! [`stratus_api::TransportConfig`]. The core crate never reads files; this
//! crate is the only place user configuration is interpreted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stratus_api::{ComputeClient, TlsMode, TransportConfig};
use stratus_core::{ReconcileSettings, Timeouts, ValidationPolicy};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no API token configured (set api_token, api_token_env, or STRATUS_API_TOKEN)")]
    NoCredentials,

    #[error("no endpoint configured")]
    NoEndpoint,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to build compute client: {0}")]
    Client(#[from] stratus_api::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
///
/// Durations are human-readable strings (`"30s"`, `"10m"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Compute API base URL (e.g., "https://compute.example.com").
    pub endpoint: Option<String>,

    /// API token (plaintext; prefer `api_token_env`).
    pub api_token: Option<String>,

    /// Environment variable name containing the API token.
    pub api_token_env: Option<String>,

    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default)]
    pub timeouts: TimeoutSection,

    /// Every attachment must name at least one security group.
    #[serde(default)]
    pub require_security_group: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            api_token_env: None,
            insecure: false,
            ca_cert: None,
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
            timeouts: TimeoutSection::default(),
            require_security_group: false,
        }
    }
}

/// `[timeouts]`: how long to wait for each kind of operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutSection {
    #[serde(default = "default_create")]
    pub create: String,
    #[serde(default = "default_update")]
    pub update: String,
    #[serde(default = "default_delete")]
    pub delete: String,
    #[serde(default = "default_associate")]
    pub associate: String,
    #[serde(default = "default_associate")]
    pub disassociate: String,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            create: default_create(),
            update: default_update(),
            delete: default_delete(),
            associate: default_associate(),
            disassociate: default_associate(),
        }
    }
}

fn default_request_timeout() -> String {
    "30s".into()
}
fn default_poll_interval() -> String {
    "5s".into()
}
fn default_create() -> String {
    "10m".into()
}
fn default_update() -> String {
    "5m".into()
}
fn default_delete() -> String {
    "10m".into()
}
fn default_associate() -> String {
    "2m".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "stratus", "stratus").map_or_else(
        || PathBuf::from(".stratus").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an
/// error; defaults and environment still apply.
///
/// Nested keys use a double underscore: `STRATUS_TIMEOUTS__CREATE=15m`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STRATUS_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML at `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let duration = humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("{raw:?} is not a duration: {e}"),
    })?;
    if duration.is_zero() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(duration)
}

impl Config {
    /// Wait budgets, poll cadence, and validation policy for the core.
    pub fn reconcile_settings(&self) -> Result<ReconcileSettings, ConfigError> {
        Ok(ReconcileSettings {
            timeouts: Timeouts {
                create: parse_duration("timeouts.create", &self.timeouts.create)?,
                update: parse_duration("timeouts.update", &self.timeouts.update)?,
                delete: parse_duration("timeouts.delete", &self.timeouts.delete)?,
                associate: parse_duration("timeouts.associate", &self.timeouts.associate)?,
                disassociate: parse_duration(
                    "timeouts.disassociate",
                    &self.timeouts.disassociate,
                )?,
            },
            poll_interval: parse_duration("poll_interval", &self.poll_interval)?,
            validation: ValidationPolicy {
                require_security_group: self.require_security_group,
            },
        })
    }

    /// TLS and request-timeout settings for the HTTP client.
    pub fn transport(&self) -> Result<TransportConfig, ConfigError> {
        let tls = if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };

        Ok(TransportConfig {
            tls,
            timeout: parse_duration("request_timeout", &self.request_timeout)?,
        })
    }

    /// The endpoint, checked to be an absolute http(s) URL.
    pub fn endpoint_url(&self) -> Result<url::Url, ConfigError> {
        let raw = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::NoEndpoint)?;
        let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
            field: "endpoint".into(),
            reason: format!("invalid URL: {raw}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "endpoint".into(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// Resolve the API token: `api_token_env` first, then plaintext.
    pub fn resolve_token(&self) -> Result<SecretString, ConfigError> {
        if let Some(ref env_name) = self.api_token_env {
            if let Ok(val) = std::env::var(env_name) {
                return Ok(SecretString::from(val));
            }
        }

        if let Some(ref token) = self.api_token {
            return Ok(SecretString::from(token.clone()));
        }

        Err(ConfigError::NoCredentials)
    }

    /// Build an authenticated compute client from this configuration.
    pub fn client(&self) -> Result<ComputeClient, ConfigError> {
        let url = self.endpoint_url()?;
        let token = self.resolve_token()?;
        let transport = self.transport()?;
        Ok(ComputeClient::from_token(url.as_str(), &token, &transport)?)
    }
}
