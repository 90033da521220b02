// src/provider.rs

use crate::clock::{elapsed_since, to_chrono, SharedClock};
use crate::config::{AppConfig, ProviderConfig, ProviderLimits};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,   // Recent failures, still serving
    CoolingDown, // Failing fast until the cool-down elapses
}

#[derive(Debug)]
struct HealthInner {
    state: HealthState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    next_attempt: Option<DateTime<Utc>>,
}

/// Health of one provider, driven by transport outcomes.
///
/// `healthy -> degraded` on the first failure, `degraded -> cooling-down` once
/// `failure_threshold` consecutive failures accumulate. After `cooldown` the
/// provider is let through again as `degraded`; a success restores `healthy`.
#[derive(Debug)]
pub struct ProviderHealth {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<HealthInner>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub total_successes: u64,
    pub total_failures: u64,
}

impl ProviderHealth {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(HealthInner {
                state: HealthState::Healthy,
                consecutive_failures: 0,
                last_failure: None,
                next_attempt: None,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// `Ok(())` when calls may be attempted, otherwise the time left in the cool-down.
    pub fn check(&self, now: DateTime<Utc>) -> std::result::Result<(), Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            HealthState::Healthy | HealthState::Degraded => Ok(()),
            HealthState::CoolingDown => match inner.next_attempt {
                Some(next_attempt) if now >= next_attempt => {
                    info!(provider = %self.name, "Provider cool-down elapsed, probing as degraded");
                    inner.state = HealthState::Degraded;
                    Ok(())
                }
                Some(next_attempt) => Err(elapsed_since(now, next_attempt)),
                None => Err(self.cooldown),
            },
        }
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        if inner.state != HealthState::Healthy {
            info!(provider = %self.name, "Provider recovered");
        }
        inner.state = HealthState::Healthy;
        inner.consecutive_failures = 0;
        inner.next_attempt = None;
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(now);

        if inner.consecutive_failures >= self.failure_threshold {
            if inner.state != HealthState::CoolingDown {
                warn!(
                    provider = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.failure_threshold,
                    "Provider cooling down after repeated failures"
                );
            }
            inner.state = HealthState::CoolingDown;
            inner.next_attempt = Some(now + to_chrono(self.cooldown));
        } else {
            debug!(provider = %self.name, failures = inner.consecutive_failures, "Provider degraded");
            inner.state = HealthState::Degraded;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = HealthState::Healthy;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.next_attempt = None;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.lock();
        HealthSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

/// One external sports-data API.
#[derive(Debug)]
pub struct Provider {
    pub name: String,
    pub base_url: Option<String>,
    pub limits: ProviderLimits,
    pub burst_window: Duration,
    pub health: ProviderHealth,
}

impl Provider {
    pub fn from_config(config: &ProviderConfig, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            limits: config.limits,
            burst_window: config.burst_window(),
            health: ProviderHealth::new(config.name.clone(), failure_threshold, cooldown),
        }
    }
}

/// Providers known to the process, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Arc<HashMap<String, Arc<Provider>>>,
    clock: SharedClock,
}

impl ProviderRegistry {
    pub fn from_config(config: &AppConfig, clock: SharedClock) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|p| {
                let provider = Provider::from_config(p, config.failure_threshold, config.cooldown());
                (p.name.clone(), Arc::new(provider))
            })
            .collect();
        Self {
            providers: Arc::new(providers),
            clock,
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::unknown_provider(name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Provider>> {
        self.providers.values()
    }

    pub fn check_health(&self, provider: &Provider) -> std::result::Result<(), Duration> {
        provider.health.check(self.clock.now())
    }

    pub fn record_failure(&self, provider: &Provider) {
        provider.health.record_failure(self.clock.now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn cools_down_after_threshold_and_recovers() {
        let health = ProviderHealth::new("odds", 2, Duration::from_secs(60));
        let t0 = Utc::now();

        health.record_failure(t0);
        assert_eq!(health.snapshot().state, HealthState::Degraded);
        assert!(health.check(t0).is_ok());

        health.record_failure(t0);
        assert_eq!(health.snapshot().state, HealthState::CoolingDown);
        let wait = health.check(t0 + chrono::Duration::seconds(10)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(50));

        assert!(health.check(t0 + chrono::Duration::seconds(61)).is_ok());
        assert_eq!(health.snapshot().state, HealthState::Degraded);

        health.record_success();
        let snapshot = health.snapshot();
        assert_eq!(snapshot.state, HealthState::Healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.total_failures, 2);
        assert_eq!(snapshot.total_successes, 1);
    }

    #[test]
    fn failure_after_probe_reopens_cooldown() {
        let health = ProviderHealth::new("odds", 1, Duration::from_secs(30));
        let t0 = Utc::now();
        health.record_failure(t0);
        let later = t0 + chrono::Duration::seconds(31);
        assert!(health.check(later).is_ok());
        health.record_failure(later);
        assert_eq!(health.snapshot().state, HealthState::CoolingDown);
        assert!(health.check(later).is_err());
    }
}
