//! Per-user account records.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Quota state and preferences of a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: AccountId,

    /// Operations performed since the last reset.
    pub daily_count: u32,

    /// When the counter was last reset. `None` for records that predate the
    /// field; those are treated as overdue.
    pub daily_reset: Option<DateTime<Utc>>,

    /// Maximum operations per quota window. Admins may set any value.
    pub limit: i64,

    pub is_admin: bool,
    pub premium: bool,

    /// Path of the saved thumbnail image.
    pub thumb: Option<String>,

    /// Default caption for uploads.
    pub caption: Option<String>,
}

impl UserAccount {
    /// Creates a fresh record with the configured defaults.
    #[must_use]
    pub fn new(id: AccountId, defaults: &AccountDefaults, now: DateTime<Utc>) -> Self {
        Self {
            id,
            daily_count: 0,
            daily_reset: Some(now),
            limit: defaults.daily_limit,
            is_admin: defaults.admins.contains(&id),
            premium: false,
            thumb: None,
            caption: None,
        }
    }

    /// Whether this account is exempt from the daily limit.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.is_admin || self.premium
    }
}

/// Values applied to records created on first contact.
#[derive(Debug, Clone, Default)]
pub struct AccountDefaults {
    pub daily_limit: i64,
    pub admins: HashSet<AccountId>,
}

impl AccountDefaults {
    #[must_use]
    pub fn new(daily_limit: i64, admins: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            daily_limit,
            admins: admins.into_iter().collect(),
        }
    }
}

/// Field-level merge for [`UserAccount`].
///
/// Only the fields that are `Some` are written, so two patches touching
/// disjoint fields never overwrite each other. The usage counter is not part
/// of the patch: it only moves through the quota engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPatch {
    pub limit: Option<i64>,
    pub is_admin: Option<bool>,
    pub premium: Option<bool>,
    pub thumb: Option<Option<String>>,
    pub caption: Option<Option<String>>,
}

impl AccountPatch {
    #[must_use]
    pub const fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = Some(is_admin);
        self
    }

    #[must_use]
    pub const fn with_premium(mut self, premium: bool) -> Self {
        self.premium = Some(premium);
        self
    }

    #[must_use]
    pub fn with_thumb(mut self, thumb: Option<String>) -> Self {
        self.thumb = Some(thumb);
        self
    }

    #[must_use]
    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = Some(caption);
        self
    }

    /// Returns true if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.is_admin.is_none()
            && self.premium.is_none()
            && self.thumb.is_none()
            && self.caption.is_none()
    }

    /// Applies the set fields to an in-memory record.
    pub fn apply(&self, account: &mut UserAccount) {
        if let Some(limit) = self.limit {
            account.limit = limit;
        }
        if let Some(is_admin) = self.is_admin {
            account.is_admin = is_admin;
        }
        if let Some(premium) = self.premium {
            account.premium = premium;
        }
        if let Some(thumb) = &self.thumb {
            account.thumb.clone_from(thumb);
        }
        if let Some(caption) = &self.caption {
            account.caption.clone_from(caption);
        }
    }
}
