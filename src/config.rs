//! Configuration types.
//!
//! Everything is read from environment variables. Each `from_env()` has a
//! `from_lookup()` twin that takes the variable source as a closure so tests
//! never have to mutate the process environment.

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Application-wide settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the JSON rule file.
    pub rules_file: PathBuf,
    /// Path to the local message store.
    pub db_path: PathBuf,
    /// When set, logs are also written to a daily-rotated file here.
    pub log_dir: Option<PathBuf>,
    pub processor: ProcessorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rules_file: PathBuf::from("rules.json"),
            db_path: PathBuf::from("./data/emails.db"),
            log_dir: None,
            processor: ProcessorConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            rules_file: lookup("INBOX_RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_file),
            db_path: lookup("INBOX_RULES_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_dir: lookup("INBOX_RULES_LOG_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            processor: ProcessorConfig::from_lookup(&lookup)?,
        })
    }
}

/// Processing loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Messages evaluated and dispatched at once. Outcomes are still folded
    /// into the run summary in message order.
    pub concurrency: usize,
    /// Log a progress line every N messages. 0 disables it.
    pub progress_every: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            progress_every: 10,
        }
    }
}

impl ProcessorConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let concurrency: usize = parse_or(&lookup, "INBOX_RULES_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RULES_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(Self {
            concurrency,
            progress_every: parse_or(&lookup, "INBOX_RULES_PROGRESS_EVERY", defaults.progress_every)?,
        })
    }
}

/// Gmail REST API settings.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_base: String,
    pub user_id: String,
    /// OAuth2 bearer token. Obtaining and refreshing it happens outside this tool.
    pub access_token: SecretString,
    pub timeout_secs: u64,
}

impl GmailConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://gmail.googleapis.com";

    /// Defaults for everything but the token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            api_base: Self::DEFAULT_API_BASE.to_string(),
            user_id: "me".to_string(),
            access_token: SecretString::from(token.into()),
            timeout_secs: 30,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("GMAIL_ACCESS_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_ACCESS_TOKEN".into()))?;
        let defaults = Self::with_token(token);

        Ok(Self {
            api_base: lookup("GMAIL_API_BASE").unwrap_or(defaults.api_base),
            user_id: lookup("GMAIL_USER_ID").unwrap_or(defaults.user_id),
            timeout_secs: parse_or(&lookup, "GMAIL_TIMEOUT_SECS", defaults.timeout_secs)?,
            access_token: defaults.access_token,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}
