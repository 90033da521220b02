// src/config/app.rs

use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Per-window request ceilings for one provider. `None` leaves a window unchecked.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProviderLimits {
    #[serde(default)]
    pub minute: Option<u32>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub burst: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    pub secret: SecretString,
    #[serde(default)]
    pub priority: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub limits: ProviderLimits,
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, limits: ProviderLimits) -> Self {
        Self {
            name: name.into(),
            base_url: None,
            limits,
            burst_window_secs: default_burst_window_secs(),
            credentials: Vec::new(),
        }
    }

    pub fn with_credential(mut self, secret: impl Into<String>, priority: u32) -> Self {
        self.credentials.push(CredentialConfig {
            secret: SecretString::new(secret.into()),
            priority: Some(priority),
        });
        self
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_secs)
    }
}

/// A periodic refresh job.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    pub name: String,
    pub data_type: String,
    pub providers: Vec<String>,
    pub interval_secs: u64,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default)]
    pub cache_ttl_secs: HashMap<String, u64>,
    #[serde(default)]
    pub max_age_secs: HashMap<String, u64>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub schedule: Vec<ScheduleConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_history: default_max_history(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_secs: HashMap::new(),
            max_age_secs: HashMap::new(),
            providers: Vec::new(),
            schedule: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

// Default value functions
fn default_burst_window_secs() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    15
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_max_history() -> usize {
    1000
}

fn default_cache_max_entries() -> usize {
    10_000
}
