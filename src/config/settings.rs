//! Application settings read from the environment.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::processing::TransferLimits;
use crate::storage::{AccountDefaults, AccountId};

/// Link shortener endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortenerConfig {
    /// Base URL queried with `?api=<key>&url=<link>`.
    pub url: String,

    /// API key of the shortener account.
    pub api_key: String,
}

/// Bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Bot API token.
    #[serde(skip_serializing)]
    pub bot_token: String,

    /// Users that are administrators from their first contact.
    #[serde(default)]
    pub admins: HashSet<AccountId>,

    /// Daily limit given to new accounts.
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: i64,

    /// sqlx connection URL of the user store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Parent directory of per-request scratch directories.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Where saved thumbnails live.
    #[serde(default = "default_thumb_dir")]
    pub thumb_dir: PathBuf,

    /// Chunk size for split, in MB.
    #[serde(default = "default_split_size_mb")]
    pub split_size_mb: u64,

    /// Largest single upload, in MB.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,

    /// Public bot username for share links. Fetched at start-up when unset.
    #[serde(default)]
    pub bot_username: Option<String>,

    #[serde(default)]
    pub shortener: Option<ShortenerConfig>,

    /// Refuse files whose names look like adult content.
    #[serde(default)]
    pub use_nsfw_filter: bool,

    /// Minimum gap between consecutive outgoing files or broadcast messages.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
}

fn default_daily_limit() -> i64 {
    2
}

fn default_database_url() -> String {
    "sqlite://renamer.db".to_owned()
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_thumb_dir() -> PathBuf {
    PathBuf::from("./thumbs")
}

fn default_split_size_mb() -> u64 {
    45
}

fn default_max_upload_mb() -> u64 {
    50
}

fn default_send_interval_ms() -> u64 {
    600
}

impl BotSettings {
    /// Creates settings with defaults for everything but the token.
    #[must_use]
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            admins: HashSet::new(),
            default_daily_limit: default_daily_limit(),
            database_url: default_database_url(),
            tmp_dir: default_tmp_dir(),
            thumb_dir: default_thumb_dir(),
            split_size_mb: default_split_size_mb(),
            max_upload_mb: default_max_upload_mb(),
            bot_username: None,
            shortener: None,
            use_nsfw_filter: false,
            send_interval_ms: default_send_interval_ms(),
        }
    }

    /// Creates settings from environment variables.
    ///
    /// Expects `BOT_TOKEN` to be set; every other variable has a default.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = var("BOT_TOKEN").ok_or(ConfigError::MissingEnvVar("BOT_TOKEN"))?;
        let mut settings = Self::new(bot_token.trim());

        if let Some(raw) = var("ADMINS") {
            settings.admins = parse_admins(&raw)?;
        }
        if let Some(raw) = var("DEFAULT_DAILY_LIMIT") {
            settings.default_daily_limit = parse_number("DEFAULT_DAILY_LIMIT", &raw)?;
        }
        if let Some(url) = var("DATABASE_URL") {
            settings.database_url = url;
        }
        if let Some(dir) = var("TMP_DIR") {
            settings.tmp_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("THUMB_DIR") {
            settings.thumb_dir = PathBuf::from(dir);
        }
        if let Some(raw) = var("SPLIT_SIZE_MB") {
            settings.split_size_mb = parse_number("SPLIT_SIZE_MB", &raw)?;
        }
        if let Some(raw) = var("MAX_UPLOAD_MB") {
            settings.max_upload_mb = parse_number("MAX_UPLOAD_MB", &raw)?;
        }
        if let Some(raw) = var("SEND_INTERVAL_MS") {
            settings.send_interval_ms = parse_number("SEND_INTERVAL_MS", &raw)?;
        }

        settings.bot_username = var("BOT_USERNAME").map(|name| name.trim_start_matches('@').to_owned());
        settings.shortener = match (var("SHORTENER_URL"), var("SHORTENER_API")) {
            (Some(url), Some(api_key)) => Some(ShortenerConfig { url, api_key }),
            _ => None,
        };
        settings.use_nsfw_filter = var("USE_NSFW").is_some_and(|v| parse_flag(&v));

        settings.validate()?;
        Ok(settings)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.split_size_mb == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "SPLIT_SIZE_MB",
                value: "0".to_owned(),
            });
        }
        if self.max_upload_mb == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "MAX_UPLOAD_MB",
                value: "0".to_owned(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn account_defaults(&self) -> AccountDefaults {
        AccountDefaults::new(self.default_daily_limit, self.admins.iter().copied())
    }

    #[must_use]
    pub const fn transfer_limits(&self) -> TransferLimits {
        TransferLimits::from_mb(self.split_size_mb, self.max_upload_mb)
    }

    #[must_use]
    pub const fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

/// Parses a comma or whitespace separated list of user ids.
fn parse_admins(raw: &str) -> Result<HashSet<AccountId>, ConfigError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ConfigError::InvalidAdminId(s.to_owned())))
        .collect()
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_owned(),
    })
}

/// `1`, `true`, `yes` and `on` (any case) are true.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {var}: {value:?} (must be a non-negative integer)")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Invalid admin id in ADMINS: {0:?}")]
    InvalidAdminId(String),
}
