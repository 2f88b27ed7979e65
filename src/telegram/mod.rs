//! Telegram transport module.
//!
//! Routes Bot API updates to the command handler and the action dispatcher,
//! and implements file delivery on top of teloxide.

mod bot;
mod rate_limiter;
mod safety;
mod shortener;
mod transfer;

pub use bot::{run, schema, BotApp};
pub use rate_limiter::RateLimiter;
pub use safety::is_flagged_name;
pub use shortener::{extract_short_link, share_link, Shortener};
pub use transfer::TelegramTransfer;
