//! Daily quota accounting.
//!
//! Every check re-reads the account from the store and resets the counter
//! lazily when the quota window has elapsed. There is no background job and
//! no cached user state.

mod clock;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

pub use clock::{Clock, ManualClock, SystemClock};

use crate::storage::{AccountId, AccountPatch, StoreError, UserAccount, UserStore};

/// Length of the rolling quota window, in hours.
pub const QUOTA_WINDOW_HOURS: i64 = 24;

/// Length of the rolling quota window.
#[must_use]
pub fn quota_window() -> Duration {
    Duration::hours(QUOTA_WINDOW_HOURS)
}

/// Snapshot of a user's quota, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: i64,
    pub premium: bool,
    pub admin: bool,
}

impl QuotaStatus {
    /// Renders the status the way `/me` shows it.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Your daily usage: {}/{}\nPremium: {}\nAdmin: {}",
            self.used, self.limit, self.premium, self.admin
        )
    }
}

impl From<&UserAccount> for QuotaStatus {
    fn from(account: &UserAccount) -> Self {
        Self {
            used: account.daily_count,
            limit: account.limit,
            premium: account.premium,
            admin: account.is_admin,
        }
    }
}

/// Gates file-producing actions and tracks consumption.
#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaEngine {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Fetches (creating if needed) the account and normalizes its counter.
    pub async fn account(&self, id: AccountId) -> Result<UserAccount, StoreError> {
        let account = self.store.ensure(id, self.now()).await?;
        self.reset_if_due(account).await
    }

    /// Resets the counter if the last reset is at least a window old.
    ///
    /// An account without a recorded reset is always due.
    pub async fn reset_if_due(&self, account: UserAccount) -> Result<UserAccount, StoreError> {
        let now = self.now();
        let cutoff = now - quota_window();

        if account.daily_reset.is_some_and(|reset| reset > cutoff) {
            return Ok(account);
        }

        if self.store.reset_usage_if_due(account.id, cutoff, now).await? {
            debug!("Quota window elapsed for user {}, counter reset", account.id);
            return Ok(UserAccount {
                daily_count: 0,
                daily_reset: Some(now),
                ..account
            });
        }

        // a concurrent request reset it first
        Ok(self.store.get(account.id).await?.unwrap_or(account))
    }

    /// Whether the account may run one more quota-governed action.
    #[must_use]
    pub fn may_perform(account: &UserAccount) -> bool {
        account.is_privileged() || i64::from(account.daily_count) < account.limit
    }

    /// Counts one completed action.
    pub async fn record_usage(&self, id: AccountId) -> Result<(), StoreError> {
        self.store.increment_usage(id).await
    }

    /// Current quota for display, after a lazy reset.
    pub async fn status(&self, id: AccountId) -> Result<QuotaStatus, StoreError> {
        Ok(QuotaStatus::from(&self.account(id).await?))
    }

    /// Sets the daily limit. The current count is left as is.
    pub async fn set_limit(&self, id: AccountId, limit: i64) -> Result<(), StoreError> {
        self.mutate(id, AccountPatch::default().with_limit(limit)).await?;
        info!("Limit for user {} set to {}", id, limit);
        Ok(())
    }

    pub async fn set_admin(&self, id: AccountId, is_admin: bool) -> Result<(), StoreError> {
        self.mutate(id, AccountPatch::default().with_admin(is_admin)).await?;
        info!("Admin flag for user {} set to {}", id, is_admin);
        Ok(())
    }

    pub async fn set_premium(&self, id: AccountId, premium: bool) -> Result<(), StoreError> {
        self.mutate(id, AccountPatch::default().with_premium(premium)).await?;
        info!("Premium flag for user {} set to {}", id, premium);
        Ok(())
    }

    async fn mutate(&self, id: AccountId, patch: AccountPatch) -> Result<(), StoreError> {
        self.store.ensure(id, self.now()).await?;
        self.store.update(id, &patch).await
    }
}

impl std::fmt::Debug for QuotaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEngine").finish_non_exhaustive()
    }
}
