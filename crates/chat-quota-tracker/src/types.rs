use crate::{Allowance, Tier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// Rolling window after which a user's message count returns to zero
pub const RESET_PERIOD_DAYS: i64 = 30;

pub fn reset_period() -> Duration {
    Duration::days(RESET_PERIOD_DAYS)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub user_id: String,
    pub tier: Tier,
    pub message_count: u32,
    // Denormalized copy of the tier allowance, refreshed on tier change
    pub message_limit: Allowance,
    pub last_reset: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(user_id: impl Into<String>, tier: Tier, limit: Allowance, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            tier,
            message_count: 0,
            message_limit: limit,
            last_reset: now,
        }
    }

    pub fn period_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_reset >= reset_period()
    }

    pub fn period_ends_at(&self) -> DateTime<Utc> {
        self.last_reset + reset_period()
    }

    pub fn remaining(&self) -> Allowance {
        self.message_limit.remaining_after(self.message_count)
    }
}

/// Outcome of a usage check; denial is a normal result, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageCheck {
    pub allowed: bool,
    pub remaining: Allowance,
    pub tier: Tier,
    pub reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub user_id: String,
    pub tier: Tier,
    pub tier_name: String,
    pub message_count: u32,
    pub message_limit: Allowance,
    pub remaining: Allowance,
    pub percent_used: u8,
    pub features: Vec<String>,
    pub last_reset: DateTime<Utc>,
    pub period_ends_at: DateTime<Utc>,
}
