//! SQLite-backed usage storage.
//!
//! Every accounting mutation is one `UPDATE` statement, so the conditional
//! variants (limit check, period expiry) are evaluated atomically by SQLite.

use crate::{Allowance, Result, Tier, UsageError, UsageRecord, UsageStorage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const SELECT_COLUMNS: &str = "user_id, tier, message_count, message_limit, last_reset_ms";

type UsageRow = (String, Option<String>, i64, i64, i64);

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        info!("Opened usage database: {}", url);
        Self::from_pool(pool).await
    }

    /// Private in-memory database; a single pinned connection keeps it alive.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        create_usage_table(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM user_usage WHERE user_id = ?");
        let row: Option<UsageRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(record_from_row).transpose()
    }
}

async fn create_usage_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_usage (
            user_id TEXT PRIMARY KEY,
            tier TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            message_limit INTEGER NOT NULL,
            last_reset_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn record_from_row(row: UsageRow) -> Result<UsageRecord> {
    let (user_id, tier, message_count, message_limit, last_reset_ms) = row;

    // Unset tier falls back to the lowest tier
    let tier = match tier {
        Some(name) => name.parse::<Tier>()?,
        None => Tier::default(),
    };

    Ok(UsageRecord {
        user_id,
        tier,
        message_count: u32::try_from(message_count.max(0)).unwrap_or(u32::MAX),
        message_limit: Allowance::from_column(message_limit),
        // An unreadable timestamp counts as the epoch, which forces a reset
        last_reset: DateTime::<Utc>::from_timestamp_millis(last_reset_ms).unwrap_or_default(),
    })
}

fn not_found(user_id: &str) -> UsageError {
    UsageError::UserNotFound(user_id.to_string())
}

#[async_trait]
impl UsageStorage for SqliteStorage {
    async fn get_user(&self, user_id: &str) -> Result<UsageRecord> {
        self.fetch_user(user_id)
            .await?
            .ok_or_else(|| not_found(user_id))
    }

    async fn insert_user(&self, record: &UsageRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_usage \
             (user_id, tier, message_count, message_limit, last_reset_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.user_id)
        .bind(record.tier.as_str())
        .bind(i64::from(record.message_count))
        .bind(record.message_limit.to_column())
        .bind(record.last_reset.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_messages(&self, user_id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE user_usage SET message_count = message_count + 1 WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(not_found(user_id));
        }
        Ok(())
    }

    async fn increment_if_below_limit(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        let sql = format!(
            "UPDATE user_usage SET message_count = message_count + 1 \
             WHERE user_id = ? AND (message_limit < 0 OR message_count < message_limit) \
             RETURNING {SELECT_COLUMNS}"
        );
        let row: Option<UsageRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => record_from_row(row).map(Some),
            None => {
                // Distinguish "at limit" from "no such user"
                self.get_user(user_id).await?;
                Ok(None)
            }
        }
    }

    async fn reset_period_if_expired(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_usage SET message_count = 0, last_reset_ms = ? \
             WHERE user_id = ? AND last_reset_ms <= ?",
        )
        .bind(now.timestamp_millis())
        .bind(user_id)
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.get_user(user_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_tier(
        &self,
        user_id: &str,
        tier: Tier,
        limit: Allowance,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let sql = format!(
            "UPDATE user_usage SET tier = ?, message_limit = ?, message_count = 0, last_reset_ms = ? \
             WHERE user_id = ? RETURNING {SELECT_COLUMNS}"
        );
        let row: Option<UsageRow> = sqlx::query_as(&sql)
            .bind(tier.as_str())
            .bind(limit.to_column())
            .bind(now.timestamp_millis())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(record_from_row)
            .transpose()?
            .ok_or_else(|| not_found(user_id))
    }
}
