//! SQLite store backend.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::info;

use super::{
    AccountDefaults, AccountId, AccountPatch, LogAction, LogDetails, LogEntry, StoreError,
    UserAccount, UserStore,
};

/// Store backed by a SQLite database through a `sqlx` pool.
///
/// Timestamps are stored as Unix milliseconds. Counter changes are single
/// `UPDATE` statements so they stay atomic across connections and processes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    defaults: AccountDefaults,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `database_url`.
    pub async fn open(database_url: &str, defaults: AccountDefaults) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::init(pool, defaults).await
    }

    /// Opens a private in-memory database.
    pub async fn open_in_memory(defaults: AccountDefaults) -> Result<Self, StoreError> {
        // every connection to `:memory:` is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::init(pool, defaults).await
    }

    async fn init(pool: SqlitePool, defaults: AccountDefaults) -> Result<Self, StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                daily_count INTEGER NOT NULL DEFAULT 0,
                daily_reset INTEGER,
                daily_limit INTEGER NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                premium INTEGER NOT NULL DEFAULT 0,
                thumb TEXT,
                caption TEXT
            )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                time INTEGER NOT NULL,
                details TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await?;

        info!("User store initialized");
        Ok(Self { pool, defaults })
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}

fn account_from_row(row: &SqliteRow) -> Result<UserAccount, StoreError> {
    let count: i64 = row.try_get("daily_count")?;
    let reset: Option<i64> = row.try_get("daily_reset")?;

    Ok(UserAccount {
        id: AccountId(row.try_get("id")?),
        daily_count: u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("daily_count out of range: {count}")))?,
        daily_reset: reset.map(from_millis).transpose()?,
        limit: row.try_get("daily_limit")?,
        is_admin: row.try_get("is_admin")?,
        premium: row.try_get("premium")?,
        thumb: row.try_get("thumb")?,
        caption: row.try_get("caption")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<LogEntry, StoreError> {
    let action: String = row.try_get("action")?;
    let details: String = row.try_get("details")?;

    Ok(LogEntry {
        user: AccountId(row.try_get("user_id")?),
        action: LogAction::parse(&action)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown log action: {action}")))?,
        time: from_millis(row.try_get("time")?)?,
        details: serde_json::from_str::<LogDetails>(&details)?,
    })
}

fn require_row(id: AccountId, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn ensure(&self, id: AccountId, now: DateTime<Utc>) -> Result<UserAccount, StoreError> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO users (id, daily_count, daily_reset, daily_limit, is_admin, premium)
            VALUES (?, 0, ?, ?, ?, 0)
            ",
        )
        .bind(id.0)
        .bind(to_millis(now))
        .bind(self.defaults.daily_limit)
        .bind(self.defaults.admins.contains(&id))
        .execute(&self.pool)
        .await?;

        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn get(&self, id: AccountId) -> Result<Option<UserAccount>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, daily_count, daily_reset, daily_limit, is_admin, premium, thumb, caption
            FROM users
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn update(&self, id: AccountId, patch: &AccountPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return self.get(id).await?.map(|_| ()).ok_or(StoreError::NotFound(id));
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        {
            let mut fields = query.separated(", ");
            if let Some(limit) = patch.limit {
                fields.push("daily_limit = ").push_bind_unseparated(limit);
            }
            if let Some(is_admin) = patch.is_admin {
                fields.push("is_admin = ").push_bind_unseparated(is_admin);
            }
            if let Some(premium) = patch.premium {
                fields.push("premium = ").push_bind_unseparated(premium);
            }
            if let Some(thumb) = &patch.thumb {
                fields.push("thumb = ").push_bind_unseparated(thumb.clone());
            }
            if let Some(caption) = &patch.caption {
                fields.push("caption = ").push_bind_unseparated(caption.clone());
            }
        }
        query.push(" WHERE id = ").push_bind(id.0);

        let result = query.build().execute(&self.pool).await?;
        require_row(id, result.rows_affected())
    }

    async fn increment_usage(&self, id: AccountId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET daily_count = daily_count + 1 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        require_row(id, result.rows_affected())
    }

    async fn reset_usage_if_due(
        &self,
        id: AccountId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET daily_count = 0, daily_reset = ?
            WHERE id = ? AND (daily_reset IS NULL OR daily_reset <= ?)
            ",
        )
        .bind(to_millis(now))
        .bind(id.0)
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // distinguish "not due" from "no such user"
        self.get(id).await?.map(|_| false).ok_or(StoreError::NotFound(id))
    }

    async fn user_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|(id,)| AccountId(id)).collect())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let details = serde_json::to_string(&entry.details)?;
        sqlx::query("INSERT INTO logs (user_id, action, time, details) VALUES (?, ?, ?, ?)")
            .bind(entry.user.0)
            .bind(entry.action.as_str())
            .bind(to_millis(entry.time))
            .bind(details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn logs_for(&self, id: AccountId) -> Result<Vec<LogEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, action, time, details
            FROM logs
            WHERE user_id = ?
            ORDER BY seq
            ",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("User store closed");
    }
}
