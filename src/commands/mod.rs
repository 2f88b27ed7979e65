//! Command handling module.
//!
//! Processes `/commands` sent to the bot: quota display, thumbnail prompt,
//! and the admin commands that change limits, roles and premium status.

mod handler;
mod types;

use async_trait::async_trait;

pub use handler::{CommandHandler, ADMINS_ONLY};
pub use types::{BotCommand, CommandResult, UsageError};

use crate::processing::TransferError;
use crate::storage::AccountId;

/// Outgoing plain-text channel to a user.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, to: AccountId, text: &str) -> Result<(), TransferError>;
}
