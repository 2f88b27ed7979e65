//! Command handler implementation.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::types::{BotCommand, CommandResult, UsageError};
use super::Messenger;
use crate::quota::QuotaEngine;
use crate::storage::{AccountId, LogAction, LogDetails, LogEntry, StoreError};

/// Reply to non-admins invoking admin commands.
pub const ADMINS_ONLY: &str = "🚫 Admins only.";

const STORE_FAILURE: &str = "❌ Something went wrong. Please try again later.";

/// Handles bot commands against the user store.
pub struct CommandHandler {
    quota: QuotaEngine,
    messenger: Arc<dyn Messenger>,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(quota: QuotaEngine, messenger: Arc<dyn Messenger>) -> Self {
        Self { quota, messenger }
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(
        &self,
        caller: AccountId,
        message_text: &str,
        bot_username: Option<&str>,
    ) -> Option<CommandResult> {
        let parsed = BotCommand::parse(message_text, bot_username)?;

        let result = match parsed {
            Ok(command) => {
                debug!("Handling command from {}: {}", caller, command);
                self.execute(caller, command).await
            }
            Err(usage) => self.reject_usage(caller, &usage).await,
        };
        info!("Command result for {}: success={}", caller, result.success);

        Some(result)
    }

    /// Executes a parsed command.
    pub async fn execute(&self, caller: AccountId, command: BotCommand) -> CommandResult {
        if command.is_privileged() {
            match self.require_admin(caller).await {
                Ok(true) => {}
                Ok(false) => return CommandResult::error(ADMINS_ONLY),
                Err(e) => return store_failure(&e),
            }
        }

        let result = match command {
            BotCommand::Start => self.handle_start(caller).await,
            BotCommand::Help => Ok(Self::handle_help()),
            BotCommand::Me => self.handle_me(caller).await,
            BotCommand::Thumbnail => Ok(CommandResult::success(
                "Send the image you want to save as your default thumbnail (will be used for uploads).",
            )),
            BotCommand::SetLimit { user, limit } => self.handle_set_limit(user, limit).await,
            BotCommand::Promote(user) => self.handle_set_admin(user, true).await,
            BotCommand::Demote(user) => self.handle_set_admin(user, false).await,
            BotCommand::Premium { user, enabled } => self.handle_premium(user, enabled).await,
            BotCommand::Broadcast(text) => self.handle_broadcast(caller, &text).await,
        };

        result.unwrap_or_else(|e| store_failure(&e))
    }

    /// Usage hints for admin commands are only shown to admins.
    async fn reject_usage(&self, caller: AccountId, usage: &UsageError) -> CommandResult {
        if usage.is_privileged() {
            match self.require_admin(caller).await {
                Ok(true) => {}
                Ok(false) => return CommandResult::error(ADMINS_ONLY),
                Err(e) => return store_failure(&e),
            }
        }
        CommandResult::error(usage.to_string())
    }

    async fn require_admin(&self, caller: AccountId) -> Result<bool, StoreError> {
        let account = self.quota.account(caller).await?;
        Ok(account.is_admin)
    }

    async fn handle_start(&self, caller: AccountId) -> Result<CommandResult, StoreError> {
        self.quota.account(caller).await?;
        Ok(CommandResult::success(
            "👋 Send a file and choose an action.\n\
             Use /me to view quota. Admins use /broadcast, /setlimit, /promote, /demote.",
        ))
    }

    /// Full help text, also shown by the help button.
    #[must_use]
    pub fn help_text() -> String {
        let mut text = String::from(
            "Send a file → choose action: Rename / Compress / Split / Set Thumb / Save Caption.\n\
             Or reply to the file with a new name, `compress` or `split`.\n\nCommands:\n",
        );
        for (cmd, desc) in BotCommand::all_commands() {
            let _ = writeln!(text, "{cmd} - {desc}");
        }
        text.push_str("\nAdmin:\n");
        for (cmd, desc) in BotCommand::admin_commands() {
            let _ = writeln!(text, "{cmd} - {desc}");
        }
        text
    }

    fn handle_help() -> CommandResult {
        CommandResult::success(Self::help_text())
    }

    async fn handle_me(&self, caller: AccountId) -> Result<CommandResult, StoreError> {
        let status = self.quota.status(caller).await?;
        Ok(CommandResult::success(status.describe()))
    }

    async fn handle_set_limit(
        &self,
        user: AccountId,
        limit: i64,
    ) -> Result<CommandResult, StoreError> {
        self.quota.set_limit(user, limit).await?;
        Ok(CommandResult::success(format!("✅ Set limit for {user} to {limit}.")))
    }

    async fn handle_set_admin(
        &self,
        user: AccountId,
        is_admin: bool,
    ) -> Result<CommandResult, StoreError> {
        self.quota.set_admin(user, is_admin).await?;
        let message = if is_admin {
            format!("✅ Promoted {user} to admin.")
        } else {
            format!("✅ Demoted {user} from admin.")
        };
        Ok(CommandResult::success(message))
    }

    async fn handle_premium(
        &self,
        user: AccountId,
        enabled: bool,
    ) -> Result<CommandResult, StoreError> {
        self.quota.set_premium(user, enabled).await?;
        Ok(CommandResult::success(format!(
            "✅ Premium set to {enabled} for {user}."
        )))
    }

    /// Sends `text` to every known user, skipping unreachable ones.
    async fn handle_broadcast(
        &self,
        caller: AccountId,
        text: &str,
    ) -> Result<CommandResult, StoreError> {
        let store = self.quota.store();
        let recipients = store.user_ids().await?;
        info!("Broadcast by {} to {} users started", caller, recipients.len());

        let mut sent = 0u64;
        for user in recipients {
            match self.messenger.send_text(user, text).await {
                Ok(()) => sent += 1,
                Err(e) => debug!("Broadcast to {} skipped: {}", user, e),
            }
        }

        let entry = LogEntry::new(
            caller,
            LogAction::Broadcast,
            self.quota.now(),
            LogDetails {
                sent: Some(sent),
                ..LogDetails::default()
            },
        );
        store.append_log(&entry).await?;
        info!("Broadcast by {} finished, sent={}", caller, sent);

        Ok(CommandResult::success(format!(
            "Broadcast finished. Sent to {sent} users."
        )))
    }
}

fn store_failure(e: &StoreError) -> CommandResult {
    error!("Store error while handling command: {}", e);
    CommandResult::error(STORE_FAILURE)
}
