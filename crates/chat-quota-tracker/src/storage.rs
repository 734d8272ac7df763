use crate::{Allowance, Result, Tier, UsageError, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence for per-user usage records.
///
/// Every mutating method is a single atomic step at the storage layer;
/// conditional variants evaluate their condition inside that step.
#[async_trait]
pub trait UsageStorage: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<UsageRecord>;
    /// Returns false when a record for the user already exists.
    async fn insert_user(&self, record: &UsageRecord) -> Result<bool>;
    async fn increment_messages(&self, user_id: &str) -> Result<()>;
    /// Adds one message only if the stored limit still permits it.
    /// `None` means the user is at their limit.
    async fn increment_if_below_limit(&self, user_id: &str) -> Result<Option<UsageRecord>>;
    /// Zeroes the count if `last_reset <= cutoff`. Returns whether it did.
    async fn reset_period_if_expired(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn set_tier(
        &self,
        user_id: &str,
        tier: Tier,
        limit: Allowance,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord>;
}

// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    users: Arc<RwLock<HashMap<String, UsageRecord>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Overwrites a record as-is, bypassing all accounting rules.
    pub async fn put_user(&self, record: UsageRecord) {
        self.users
            .write()
            .await
            .insert(record.user_id.clone(), record);
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(user_id: &str) -> UsageError {
    UsageError::UserNotFound(user_id.to_string())
}

#[async_trait]
impl UsageStorage for InMemoryStorage {
    async fn get_user(&self, user_id: &str) -> Result<UsageRecord> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found(user_id))
    }

    async fn insert_user(&self, record: &UsageRecord) -> Result<bool> {
        let mut users = self.users.write().await;
        if users.contains_key(&record.user_id) {
            return Ok(false);
        }
        users.insert(record.user_id.clone(), record.clone());
        Ok(true)
    }

    async fn increment_messages(&self, user_id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or_else(|| not_found(user_id))?;
        user.message_count = user.message_count.saturating_add(1);
        Ok(())
    }

    async fn increment_if_below_limit(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or_else(|| not_found(user_id))?;
        if !user.message_limit.permits(user.message_count) {
            return Ok(None);
        }
        user.message_count = user.message_count.saturating_add(1);
        Ok(Some(user.clone()))
    }

    async fn reset_period_if_expired(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or_else(|| not_found(user_id))?;
        if user.last_reset > cutoff {
            return Ok(false);
        }
        user.message_count = 0;
        user.last_reset = now;
        Ok(true)
    }

    async fn set_tier(
        &self,
        user_id: &str,
        tier: Tier,
        limit: Allowance,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or_else(|| not_found(user_id))?;
        user.tier = tier;
        user.message_limit = limit;
        user.message_count = 0;
        user.last_reset = now;
        Ok(user.clone())
    }
}
