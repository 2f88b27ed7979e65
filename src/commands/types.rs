//! Command types and definitions.

use std::fmt;

use thiserror::Error;

use crate::config::parse_flag;
use crate::storage::AccountId;

/// Available bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Greet the user and create their account.
    Start,

    /// Show help information.
    Help,

    /// Show the caller's quota.
    Me,

    /// Ask for a photo to use as thumbnail.
    Thumbnail,

    /// Set a user's daily limit.
    SetLimit { user: AccountId, limit: i64 },

    /// Grant admin rights.
    Promote(AccountId),

    /// Revoke admin rights.
    Demote(AccountId),

    /// Toggle premium status.
    Premium { user: AccountId, enabled: bool },

    /// Send a message to every known user.
    Broadcast(String),
}

/// A known command with missing or malformed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Usage: {usage}")]
pub struct UsageError {
    pub command: &'static str,
    pub usage: &'static str,
}

impl UsageError {
    const fn new(command: &'static str, usage: &'static str) -> Self {
        Self { command, usage }
    }

    /// Whether the failed command needs admin rights.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        ADMIN_COMMANDS.contains(&self.command)
    }
}

const ADMIN_COMMANDS: [&str; 5] = ["setlimit", "promote", "demote", "premium", "broadcast"];

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a command of this bot, and
    /// `Some(Err(_))` if it is one but the arguments are unusable.
    /// `/cmd@other_bot` is ignored when `bot_username` is known.
    #[must_use]
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Result<Self, UsageError>> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;

        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (body, ""),
        };

        let cmd = match head.split_once('@') {
            Some((cmd, mention)) => {
                if let Some(me) = bot_username
                    && !mention.eq_ignore_ascii_case(me)
                {
                    return None;
                }
                cmd
            }
            None => head,
        };

        let command = match cmd.to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "help" => Ok(Self::Help),
            "me" => Ok(Self::Me),
            "thumbnail" | "thumb" => Ok(Self::Thumbnail),
            "setlimit" => Self::parse_set_limit(args),
            "promote" => parse_id(args)
                .map(Self::Promote)
                .ok_or(UsageError::new("promote", "/promote <user_id>")),
            "demote" => parse_id(args)
                .map(Self::Demote)
                .ok_or(UsageError::new("demote", "/demote <user_id>")),
            "premium" => Self::parse_premium(args),
            "broadcast" => {
                if args.is_empty() {
                    Err(UsageError::new("broadcast", "/broadcast <message text>"))
                } else {
                    Ok(Self::Broadcast(args.to_owned()))
                }
            }
            _ => return None,
        };

        Some(command)
    }

    /// Parses setlimit arguments: `<user_id> <limit>`
    fn parse_set_limit(args: &str) -> Result<Self, UsageError> {
        let usage = UsageError::new("setlimit", "/setlimit <user_id> <limit>");
        let mut parts = args.split_whitespace();
        let user = parts.next().and_then(parse_id).ok_or_else(|| usage.clone())?;
        let limit = parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| usage.clone())?;

        if parts.next().is_some() {
            return Err(usage);
        }
        Ok(Self::SetLimit { user, limit })
    }

    /// Parses premium arguments: `<user_id> <on/off>`
    fn parse_premium(args: &str) -> Result<Self, UsageError> {
        let usage = UsageError::new("premium", "/premium <user_id> <on/off>");
        let mut parts = args.split_whitespace();
        let user = parts.next().and_then(parse_id).ok_or_else(|| usage.clone())?;
        let flag = parts.next().ok_or(usage)?;

        Ok(Self::Premium {
            user,
            enabled: parse_flag(flag),
        })
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Me => "me",
            Self::Thumbnail => "thumbnail",
            Self::SetLimit { .. } => "setlimit",
            Self::Promote(_) => "promote",
            Self::Demote(_) => "demote",
            Self::Premium { .. } => "premium",
            Self::Broadcast(_) => "broadcast",
        }
    }

    /// Whether only admins may run this command.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(
            self,
            Self::SetLimit { .. }
                | Self::Promote(_)
                | Self::Demote(_)
                | Self::Premium { .. }
                | Self::Broadcast(_)
        )
    }

    /// Returns all user commands with their descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/me", "Show your daily usage"),
            ("/thumbnail", "Set a thumbnail (send a photo afterwards)"),
            ("/help", "Show this help message"),
        ]
    }

    /// Returns the admin commands with their descriptions.
    #[must_use]
    pub fn admin_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/setlimit <id> <limit>", "Set a user's daily limit"),
            ("/promote <id>", "Make a user admin"),
            ("/demote <id>", "Remove admin rights"),
            ("/premium <id> <on/off>", "Toggle premium"),
            ("/broadcast <text>", "Message every user"),
        ]
    }
}

fn parse_id(s: &str) -> Option<AccountId> {
    s.parse().ok()
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetLimit { user, limit } => write!(f, "setlimit {user} {limit}"),
            Self::Promote(user) => write!(f, "promote {user}"),
            Self::Demote(user) => write!(f, "demote {user}"),
            Self::Premium { user, enabled } => {
                write!(f, "premium {user} {}", if *enabled { "on" } else { "off" })
            }
            Self::Broadcast(_) => write!(f, "broadcast"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
