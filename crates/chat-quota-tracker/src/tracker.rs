use crate::{
    reset_period, Allowance, Result, Tier, TierCatalog, UsageCheck, UsageRecord, UsageStorage,
    UsageSummary,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct UsageTracker {
    storage: Arc<dyn UsageStorage>,
    catalog: Arc<TierCatalog>,
}

impl UsageTracker {
    pub fn new(storage: Arc<dyn UsageStorage>, catalog: Arc<TierCatalog>) -> Self {
        Self { storage, catalog }
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// Creates the user's record if missing; an existing record is returned untouched.
    pub async fn register_user(&self, user_id: &str, tier: Option<Tier>) -> Result<UsageRecord> {
        let tier = tier.unwrap_or_default();
        let record = UsageRecord::new(user_id, tier, self.catalog.allowance(tier), Utc::now());

        if self.storage.insert_user(&record).await? {
            info!(user_id, %tier, "registered user");
            Ok(record)
        } else {
            self.storage.get_user(user_id).await
        }
    }

    pub async fn get_record(&self, user_id: &str) -> Result<UsageRecord> {
        self.storage.get_user(user_id).await
    }

    pub async fn check_usage(&self, user_id: &str) -> Result<UsageCheck> {
        let mut record = self.storage.get_user(user_id).await?;
        let now = Utc::now();

        if record.period_expired(now) {
            if self.reset_if_expired(&record, now).await? {
                return Ok(UsageCheck {
                    allowed: true,
                    remaining: self.catalog.allowance(record.tier),
                    tier: record.tier,
                    reset: true,
                });
            }
            // Another request reset the period first
            record = self.storage.get_user(user_id).await?;
        }

        let check = UsageCheck {
            allowed: record.message_limit.permits(record.message_count),
            remaining: record.remaining(),
            tier: record.tier,
            reset: false,
        };
        debug!(
            user_id,
            count = record.message_count,
            allowed = check.allowed,
            "checked usage"
        );
        Ok(check)
    }

    /// Unconditional +1. Callers pairing this with `check_usage` can overshoot
    /// the limit under concurrency; `try_consume` cannot.
    pub async fn increment_usage(&self, user_id: &str) -> Result<()> {
        self.storage.increment_messages(user_id).await
    }

    /// Applies any due period reset, then consumes one message only if the
    /// limit still permits it, as a single storage-level step.
    pub async fn try_consume(&self, user_id: &str) -> Result<UsageCheck> {
        let record = self.storage.get_user(user_id).await?;
        let reset = self.reset_if_expired(&record, Utc::now()).await?;

        match self.storage.increment_if_below_limit(user_id).await? {
            Some(updated) => Ok(UsageCheck {
                allowed: true,
                remaining: updated.remaining(),
                tier: updated.tier,
                reset,
            }),
            None => {
                warn!(user_id, tier = %record.tier, "message limit reached");
                Ok(UsageCheck {
                    allowed: false,
                    remaining: Allowance::Limited(0),
                    tier: record.tier,
                    reset,
                })
            }
        }
    }

    /// Moves the user to `tier` and starts a fresh period. Transition policy
    /// (upgrade vs downgrade) is the caller's concern.
    pub async fn update_tier(&self, user_id: &str, tier: Tier) -> Result<UsageRecord> {
        let limit = self.catalog.allowance(tier);
        let record = self.storage.set_tier(user_id, tier, limit, Utc::now()).await?;
        info!(user_id, %tier, "updated tier");
        Ok(record)
    }

    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary> {
        let record = self.storage.get_user(user_id).await?;
        let plan = self.catalog.plan(record.tier);

        Ok(UsageSummary {
            user_id: record.user_id.clone(),
            tier: record.tier,
            tier_name: plan.name.clone(),
            message_count: record.message_count,
            message_limit: record.message_limit,
            remaining: record.remaining(),
            percent_used: record.message_limit.percent_used(record.message_count),
            features: plan.features.clone(),
            last_reset: record.last_reset,
            period_ends_at: record.period_ends_at(),
        })
    }

    async fn reset_if_expired(&self, record: &UsageRecord, now: DateTime<Utc>) -> Result<bool> {
        if !record.period_expired(now) {
            return Ok(false);
        }

        let cutoff = now - reset_period();
        let reset = self
            .storage
            .reset_period_if_expired(&record.user_id, cutoff, now)
            .await?;
        if reset {
            info!(user_id = %record.user_id, "reset monthly message count");
        }
        Ok(reset)
    }
}
