// src/policy.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Kind of sports data being requested. Drives both cache TTL and store freshness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    LiveGames,
    ScheduledGames,
    FinishedGames,
    Teams,
    Odds,
    Predictions,
    Other(String),
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LiveGames => "live_games",
            Self::ScheduledGames => "scheduled_games",
            Self::FinishedGames => "finished_games",
            Self::Teams => "teams",
            Self::Odds => "odds",
            Self::Predictions => "predictions",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "live_games" | "live" => Self::LiveGames,
            "scheduled_games" | "scheduled" | "schedule" => Self::ScheduledGames,
            "finished_games" | "finished" | "historical" => Self::FinishedGames,
            "teams" => Self::Teams,
            "odds" => Self::Odds,
            "predictions" => Self::Predictions,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for DataType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// TTL used for data types without an explicit entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Store freshness threshold for data types without an explicit entry.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

fn default_cache_ttl(data_type: &DataType) -> Duration {
    match data_type {
        DataType::LiveGames => Duration::from_secs(30),
        DataType::ScheduledGames => Duration::from_secs(5 * 60),
        DataType::FinishedGames => Duration::from_secs(60 * 60),
        DataType::Teams => Duration::from_secs(30 * 60),
        DataType::Odds => Duration::from_secs(2 * 60),
        DataType::Predictions => Duration::from_secs(5 * 60),
        DataType::Other(_) => DEFAULT_CACHE_TTL,
    }
}

fn default_max_age(data_type: &DataType) -> Duration {
    match data_type {
        DataType::LiveGames => Duration::from_secs(30),
        DataType::ScheduledGames => Duration::from_secs(60 * 60),
        DataType::FinishedGames => Duration::from_secs(24 * 60 * 60),
        DataType::Teams => Duration::from_secs(30 * 60),
        DataType::Odds => Duration::from_secs(2 * 60),
        DataType::Predictions => Duration::from_secs(15 * 60),
        DataType::Other(_) => DEFAULT_MAX_AGE,
    }
}

/// Per-data-type cache TTL and store max-age tables, with configured overrides.
#[derive(Debug, Clone, Default)]
pub struct FreshnessPolicy {
    ttl_overrides: HashMap<DataType, Duration>,
    max_age_overrides: HashMap<DataType, Duration>,
}

impl FreshnessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the policy from the `data_type -> seconds` maps found in configuration.
    pub fn from_seconds(ttl: &HashMap<String, u64>, max_age: &HashMap<String, u64>) -> Self {
        let convert = |table: &HashMap<String, u64>, label: &str| {
            table
                .iter()
                .map(|(name, secs)| {
                    let data_type = DataType::from(name.as_str());
                    if let DataType::Other(ref other) = data_type {
                        warn!(data_type = %other, table = label, "Override for unrecognised data type");
                    }
                    (data_type, Duration::from_secs(*secs))
                })
                .collect()
        };
        Self {
            ttl_overrides: convert(ttl, "cache_ttl_secs"),
            max_age_overrides: convert(max_age, "max_age_secs"),
        }
    }

    pub fn with_ttl(mut self, data_type: DataType, ttl: Duration) -> Self {
        self.ttl_overrides.insert(data_type, ttl);
        self
    }

    pub fn with_max_age(mut self, data_type: DataType, max_age: Duration) -> Self {
        self.max_age_overrides.insert(data_type, max_age);
        self
    }

    pub fn cache_ttl(&self, data_type: &DataType) -> Duration {
        self.ttl_overrides
            .get(data_type)
            .copied()
            .unwrap_or_else(|| default_cache_ttl(data_type))
    }

    pub fn max_age(&self, data_type: &DataType) -> Duration {
        self.max_age_overrides
            .get(data_type)
            .copied()
            .unwrap_or_else(|| default_max_age(data_type))
    }
}
