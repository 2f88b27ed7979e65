//! In-process store backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{AccountDefaults, AccountId, AccountPatch, LogEntry, StoreError, UserAccount, UserStore};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<AccountId, UserAccount>,
    logs: Vec<LogEntry>,
}

/// Store that keeps all records in memory. Nothing survives a restart.
///
/// Every operation takes the table lock for its whole duration, which makes
/// increments and conditional resets atomic.
#[derive(Debug)]
pub struct MemoryStore {
    defaults: AccountDefaults,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(defaults: AccountDefaults) -> Self {
        Self {
            defaults,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Inserts a record as is, replacing any existing one.
    #[cfg(test)]
    pub(crate) async fn seed(&self, account: UserAccount) {
        self.tables.lock().await.users.insert(account.id, account);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ensure(&self, id: AccountId, now: DateTime<Utc>) -> Result<UserAccount, StoreError> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .users
            .entry(id)
            .or_insert_with(|| UserAccount::new(id, &self.defaults, now));
        Ok(account.clone())
    }

    async fn get(&self, id: AccountId) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn update(&self, id: AccountId, patch: &AccountPatch) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let account = tables.users.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(account);
        Ok(())
    }

    async fn increment_usage(&self, id: AccountId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let account = tables.users.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        account.daily_count = account.daily_count.saturating_add(1);
        Ok(())
    }

    async fn reset_usage_if_due(
        &self,
        id: AccountId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let account = tables.users.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if account.daily_reset.is_some_and(|reset| reset > cutoff) {
            return Ok(false);
        }
        account.daily_count = 0;
        account.daily_reset = Some(now);
        Ok(true)
    }

    async fn user_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        Ok(self.tables.lock().await.users.keys().copied().collect())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.tables.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn logs_for(&self, id: AccountId) -> Result<Vec<LogEntry>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.logs.iter().filter(|e| e.user == id).cloned().collect())
    }

    async fn close(&self) {}
}
