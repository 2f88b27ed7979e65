//! Audit log entries for completed actions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Kind of action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Rename,
    Compress,
    /// A compressed archive too large for one upload, sent in parts.
    CompressSplit,
    Split,
    Broadcast,
}

impl LogAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Compress => "compress",
            Self::CompressSplit => "compress_split",
            Self::Split => "split",
            Self::Broadcast => "broadcast",
        }
    }

    /// Parses the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rename" => Some(Self::Rename),
            "compress" => Some(Self::Compress),
            "compress_split" => Some(Self::CompressSplit),
            "split" => Some(Self::Split),
            "broadcast" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific fields of a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<u64>,
}

/// Write-once record of a completed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub user: AccountId,
    pub action: LogAction,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub details: LogDetails,
}

impl LogEntry {
    #[must_use]
    pub const fn new(user: AccountId, action: LogAction, time: DateTime<Utc>, details: LogDetails) -> Self {
        Self {
            user,
            action,
            time,
            details,
        }
    }
}
