//! Configuration module for the renamer bot.
//!
//! Settings come from environment variables, optionally loaded from a
//! `.env` file before [`BotSettings::from_env`] runs.

mod settings;

pub use settings::{parse_flag, BotSettings, ConfigError, ShortenerConfig};
