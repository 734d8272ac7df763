// Chat Quota Tracker - per-user monthly message accounting against subscription tiers
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod catalog;
mod sqlite;
mod storage;
mod tracker;
mod types;

pub use catalog::{Allowance, TierCatalog, TierPlan};
pub use sqlite::SqliteStorage;
pub use storage::{InMemoryStorage, UsageStorage};
pub use tracker::UsageTracker;
pub use types::*;

// Error Types
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Invalid tier: {0}")]
    InvalidTier(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, UsageError>;

// Core Types
#[derive(
    Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Starter, Tier::Pro, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "starter" => Ok(Tier::Starter),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(UsageError::InvalidTier(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parsing() {
        assert_eq!("starter".parse::<Tier>().unwrap(), Tier::Starter);
        assert_eq!(" PRO ".parse::<Tier>().unwrap(), Tier::Pro);
        assert!(matches!(
            "platinum".parse::<Tier>(),
            Err(UsageError::InvalidTier(_))
        ));
    }

    #[test]
    fn test_default_tier_is_lowest() {
        assert_eq!(Tier::default(), Tier::Free);
        assert!(Tier::ALL.iter().all(|t| *t >= Tier::default()));
    }

    #[test]
    fn test_tier_serde_is_lowercase() {
        let json = serde_json::to_string(&Tier::Enterprise).unwrap();
        assert_eq!(json, "\"enterprise\"");
        assert_eq!(Tier::Enterprise.to_string(), "enterprise");
    }
}
