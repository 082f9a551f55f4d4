//! Environment-driven runtime configuration.
//!
//! # Responsibility
//! - Load `.env` (when present) and read service settings from variables.
//! - Validate values up front so the runner fails before its first tick.
//!
//! # Invariants
//! - SMTP variables are validated only when a real transport is requested,
//!   so dry runs start regardless of their state.
//! - The tick interval is never zero.

use crate::logging::{default_log_level, normalize_level};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "TASKBELL_DB_PATH";
pub const ENV_TICK_SECS: &str = "TASKBELL_TICK_SECS";
pub const ENV_LOG_LEVEL: &str = "TASKBELL_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "TASKBELL_LOG_DIR";
pub const ENV_APP_URL: &str = "TASKBELL_APP_URL";
pub const ENV_SMTP_HOST: &str = "SMTP_HOST";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";
pub const ENV_SMTP_TLS: &str = "SMTP_TLS";
pub const ENV_SMTP_USER: &str = "SMTP_USER";
pub const ENV_SMTP_PASSWORD: &str = "SMTP_PASSWORD";
pub const ENV_SMTP_FROM: &str = "SMTP_FROM";
pub const ENV_SMTP_TIMEOUT_SECS: &str = "SMTP_TIMEOUT_SECS";

const SMTP_KEYS: [&str; 7] = [
    ENV_SMTP_HOST,
    ENV_SMTP_PORT,
    ENV_SMTP_TLS,
    ENV_SMTP_USER,
    ENV_SMTP_PASSWORD,
    ENV_SMTP_FROM,
    ENV_SMTP_TIMEOUT_SECS,
];

const DEFAULT_DB_PATH: &str = "taskbell.sqlite3";
const DEFAULT_TICK_SECS: u64 = 60;
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required setting `{key}`"),
            Self::Invalid { key, value, reason } => {
                write!(f, "invalid value `{value}` for `{key}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Transport security mode for the SMTP relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// Implicit TLS from the first byte (port 465).
    Wrapper,
    /// Plain connection upgraded with STARTTLS (port 587).
    StartTls,
    /// No TLS at all; local relays and mail catchers only.
    None,
}

impl SmtpTls {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wrapper" | "tls" | "smtps" => Some(Self::Wrapper),
            "starttls" => Some(Self::StartTls),
            "none" | "plain" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: Option<u16>,
    pub tls: SmtpTls,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Taskbell <bell@example.com>`.
    pub from: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub tick_interval: Duration,
    pub log_level: &'static str,
    pub log_dir: Option<String>,
    /// Link target for "View Task" in reminder emails.
    pub app_url: Option<String>,
    /// Raw `SMTP_*` values, parsed by `require_smtp`.
    smtp_vars: BTreeMap<&'static str, String>,
}

impl Config {
    /// Reads configuration from the process environment after loading `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal production case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let tick_secs = match get(ENV_TICK_SECS) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => return Err(invalid(ENV_TICK_SECS, &raw, "must be at least 1")),
                Ok(secs) => secs,
                Err(err) => return Err(invalid(ENV_TICK_SECS, &raw, err)),
            },
            None => DEFAULT_TICK_SECS,
        };

        let log_level = match get(ENV_LOG_LEVEL) {
            Some(raw) => {
                normalize_level(&raw).map_err(|reason| invalid(ENV_LOG_LEVEL, &raw, reason))?
            }
            None => default_log_level(),
        };

        let smtp_vars = SMTP_KEYS
            .iter()
            .filter_map(|&key| get(key).map(|value| (key, value)))
            .collect();

        Ok(Self {
            db_path: PathBuf::from(get(ENV_DB_PATH).unwrap_or_else(|| DEFAULT_DB_PATH.into())),
            tick_interval: Duration::from_secs(tick_secs),
            log_level,
            log_dir: get(ENV_LOG_DIR),
            app_url: get(ENV_APP_URL),
            smtp_vars,
        })
    }

    pub fn has_smtp(&self) -> bool {
        self.smtp_vars.contains_key(ENV_SMTP_HOST)
    }

    /// Parses and validates SMTP settings, required for anything but dry runs.
    pub fn require_smtp(&self) -> Result<SmtpSettings, ConfigError> {
        let get = |key: &str| self.smtp_vars.get(key).cloned();
        let host = get(ENV_SMTP_HOST).ok_or(ConfigError::Missing(ENV_SMTP_HOST))?;
        read_smtp(host, &get)
    }
}

fn read_smtp(
    host: String,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<SmtpSettings, ConfigError> {
    let port = match get(ENV_SMTP_PORT) {
        Some(raw) => Some(
            raw.parse::<u16>()
                .map_err(|err| invalid(ENV_SMTP_PORT, &raw, err))?,
        ),
        None => None,
    };

    let tls = match get(ENV_SMTP_TLS) {
        Some(raw) => SmtpTls::parse(&raw)
            .ok_or_else(|| invalid(ENV_SMTP_TLS, &raw, "expected wrapper|starttls|none"))?,
        None => SmtpTls::Wrapper,
    };

    let timeout_secs = match get(ENV_SMTP_TIMEOUT_SECS) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|err| invalid(ENV_SMTP_TIMEOUT_SECS, &raw, err))?,
        None => DEFAULT_SMTP_TIMEOUT_SECS,
    };

    let username = get(ENV_SMTP_USER);
    let password = get(ENV_SMTP_PASSWORD);
    if username.is_some() && password.is_none() {
        return Err(ConfigError::Missing(ENV_SMTP_PASSWORD));
    }

    let from = get(ENV_SMTP_FROM)
        .or_else(|| username.clone())
        .ok_or(ConfigError::Missing(ENV_SMTP_FROM))?;

    Ok(SmtpSettings {
        host,
        port,
        tls,
        username,
        password,
        from,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn invalid(key: &'static str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
