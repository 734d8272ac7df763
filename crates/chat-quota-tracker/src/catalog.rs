use crate::Tier;
use serde::{Deserialize, Serialize};

/// Monthly message allowance of a tier, also used for remaining quota.
///
/// Serialized as a plain number, or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "AllowanceRepr", try_from = "AllowanceRepr")]
pub enum Allowance {
    Limited(u32),
    Unlimited,
}

const UNLIMITED: &str = "unlimited";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AllowanceRepr {
    Limited(u32),
    Named(String),
}

impl From<Allowance> for AllowanceRepr {
    fn from(allowance: Allowance) -> Self {
        match allowance {
            Allowance::Limited(limit) => AllowanceRepr::Limited(limit),
            Allowance::Unlimited => AllowanceRepr::Named(UNLIMITED.to_string()),
        }
    }
}

impl TryFrom<AllowanceRepr> for Allowance {
    type Error = String;

    fn try_from(repr: AllowanceRepr) -> Result<Self, Self::Error> {
        match repr {
            AllowanceRepr::Limited(limit) => Ok(Allowance::Limited(limit)),
            AllowanceRepr::Named(name) if name == UNLIMITED => Ok(Allowance::Unlimited),
            AllowanceRepr::Named(name) => Err(format!("invalid allowance: {name}")),
        }
    }
}

impl Allowance {
    // Column encoding for the denormalized limit
    const UNLIMITED_COLUMN: i64 = -1;

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }

    /// Whether one more message fits on top of `count`.
    pub fn permits(&self, count: u32) -> bool {
        match self {
            Allowance::Limited(limit) => count < *limit,
            Allowance::Unlimited => true,
        }
    }

    /// Quota left after `count` messages, never below zero.
    pub fn remaining_after(&self, count: u32) -> Allowance {
        match self {
            Allowance::Limited(limit) => Allowance::Limited(limit.saturating_sub(count)),
            Allowance::Unlimited => Allowance::Unlimited,
        }
    }

    /// Share of the allowance consumed by `count`, rounded and clamped to [0, 100].
    pub fn percent_used(&self, count: u32) -> u8 {
        match self {
            Allowance::Unlimited => 0,
            Allowance::Limited(0) => {
                if count > 0 {
                    100
                } else {
                    0
                }
            }
            Allowance::Limited(limit) => {
                let limit = u64::from(*limit);
                let percent = (u64::from(count) * 100 + limit / 2) / limit;
                percent.min(100) as u8
            }
        }
    }

    pub fn to_column(self) -> i64 {
        match self {
            Allowance::Limited(limit) => i64::from(limit),
            Allowance::Unlimited => Self::UNLIMITED_COLUMN,
        }
    }

    pub fn from_column(value: i64) -> Allowance {
        if value < 0 {
            Allowance::Unlimited
        } else {
            Allowance::Limited(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPlan {
    pub tier: Tier,
    pub name: String,
    pub monthly_messages: Allowance,
    pub monthly_price: f64,
    pub features: Vec<String>,
}

/// Immutable tier table, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    plans: [TierPlan; 4],
}

impl TierCatalog {
    pub fn standard() -> Self {
        fn plan(tier: Tier, name: &str, messages: Allowance, price: f64, features: &[&str]) -> TierPlan {
            TierPlan {
                tier,
                name: name.to_string(),
                monthly_messages: messages,
                monthly_price: price,
                features: features.iter().map(|f| f.to_string()).collect(),
            }
        }

        Self {
            plans: [
                plan(
                    Tier::Free,
                    "Free",
                    Allowance::Limited(50),
                    0.0,
                    &["Basic chat", "Conversation history"],
                ),
                plan(
                    Tier::Starter,
                    "Starter",
                    Allowance::Limited(1000),
                    9.99,
                    &["Basic chat", "Conversation history", "Text-to-speech"],
                ),
                plan(
                    Tier::Pro,
                    "Pro",
                    Allowance::Limited(5000),
                    29.99,
                    &[
                        "Basic chat",
                        "Conversation history",
                        "Text-to-speech",
                        "Priority responses",
                        "Advanced models",
                    ],
                ),
                plan(
                    Tier::Enterprise,
                    "Enterprise",
                    Allowance::Unlimited,
                    99.99,
                    &[
                        "Basic chat",
                        "Conversation history",
                        "Text-to-speech",
                        "Priority responses",
                        "Advanced models",
                        "Dedicated support",
                    ],
                ),
            ],
        }
    }

    pub fn plan(&self, tier: Tier) -> &TierPlan {
        let index = match tier {
            Tier::Free => 0,
            Tier::Starter => 1,
            Tier::Pro => 2,
            Tier::Enterprise => 3,
        };
        &self.plans[index]
    }

    pub fn allowance(&self, tier: Tier) -> Allowance {
        self.plan(tier).monthly_messages
    }

    /// Plans ordered from the lowest tier to the highest.
    pub fn plans(&self) -> &[TierPlan] {
        &self.plans
    }

    pub fn has_feature(&self, tier: Tier, feature: &str) -> bool {
        self.plan(tier).features.iter().any(|f| f == feature)
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
