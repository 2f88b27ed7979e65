//! User record store and audit log.
//!
//! The store is injected wherever it is needed as an `Arc<dyn UserStore>`.
//! Two backends exist: [`SqliteStore`] for persistent deployments and
//! [`MemoryStore`] for ephemeral runs and tests.

mod account;
mod log;
mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use account::{AccountDefaults, AccountId, AccountPatch, UserAccount};
pub use log::{LogAction, LogDetails, LogEntry};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No record for user {0}")]
    NotFound(AccountId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode log details: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence contract for user accounts and the audit log.
///
/// `increment_usage` and `reset_usage_if_due` are reserved for the quota
/// engine; other callers read accounts and write preferences via `update`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns the existing record or creates one with defaults.
    ///
    /// Repeated calls never reset an existing record.
    async fn ensure(&self, id: AccountId, now: DateTime<Utc>) -> Result<UserAccount, StoreError>;

    async fn get(&self, id: AccountId) -> Result<Option<UserAccount>, StoreError>;

    /// Applies a field-level merge. Fails with `NotFound` if there is no record.
    async fn update(&self, id: AccountId, patch: &AccountPatch) -> Result<(), StoreError>;

    /// Atomically adds one to `daily_count`.
    async fn increment_usage(&self, id: AccountId) -> Result<(), StoreError>;

    /// Zeroes `daily_count` and stamps `daily_reset = now`, but only if the
    /// last reset is missing or not later than `cutoff`.
    ///
    /// Returns whether a reset happened. The condition is evaluated by the
    /// backend so two overlapping requests reset at most once.
    async fn reset_usage_if_due(
        &self,
        id: AccountId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// All known user ids, in ascending order.
    async fn user_ids(&self) -> Result<Vec<AccountId>, StoreError>;

    /// Appends an entry to the audit log.
    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Audit entries for one user, oldest first.
    async fn logs_for(&self, id: AccountId) -> Result<Vec<LogEntry>, StoreError>;

    /// Releases backend resources. The store must not be used afterwards.
    async fn close(&self);

    async fn set_thumb(&self, id: AccountId, thumb: Option<String>) -> Result<(), StoreError> {
        self.update(id, &AccountPatch::default().with_thumb(thumb)).await
    }

    async fn set_caption(&self, id: AccountId, caption: Option<String>) -> Result<(), StoreError> {
        self.update(id, &AccountPatch::default().with_caption(caption))
            .await
    }
}
