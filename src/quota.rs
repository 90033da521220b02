// src/quota.rs

//! Per-provider request quotas.
//!
//! Each provider carries up to four windows (burst, minute, hour, day). A window
//! keeps the timestamps of the calls it admitted, so the ceiling holds over any
//! rolling span of the window's length, not only over aligned buckets. Checking
//! every window and recording the call in every window happen under one lock,
//! with no await in between.

use crate::clock::{elapsed_since, SharedClock};
use crate::config::ProviderLimits;
use crate::error::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Usage ratio above which [`QuotaTracker::recommended_delay`] starts pacing.
const PACING_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Burst,
    Minute,
    Hour,
    Day,
}

impl Granularity {
    fn default_length(self) -> Duration {
        match self {
            Self::Burst => Duration::from_secs(1),
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(60 * 60),
            Self::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Burst => "burst",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        };
        f.write_str(name)
    }
}

/// One granularity of one provider's quota.
#[derive(Debug, Clone)]
pub struct QuotaWindow {
    granularity: Granularity,
    limit: u32,
    length: Duration,
    hits: VecDeque<DateTime<Utc>>,
}

impl QuotaWindow {
    pub fn new(granularity: Granularity, limit: u32, length: Duration) -> Self {
        Self {
            granularity,
            limit,
            length,
            hits: VecDeque::with_capacity(limit.min(1024) as usize),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Start of the span currently being counted: the oldest admitted call still inside the window.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        self.hits.front().copied()
    }

    pub fn count(&self) -> u32 {
        self.hits.len() as u32
    }

    fn is_live(&self, hit: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A hit stamped in the future (clock skew) counts as elapsed zero, so it stays live.
        elapsed_since(hit, now) < self.length
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(&front) = self.hits.front() {
            if self.is_live(front, now) {
                break;
            }
            self.hits.pop_front();
        }
    }

    fn used_at(&self, now: DateTime<Utc>) -> u32 {
        self.hits.iter().filter(|hit| self.is_live(**hit, now)).count() as u32
    }

    fn reset_in_at(&self, now: DateTime<Utc>) -> Duration {
        if self.limit == 0 {
            return self.length;
        }
        self.hits
            .iter()
            .find(|hit| self.is_live(**hit, now))
            .map(|oldest| self.length.saturating_sub(elapsed_since(*oldest, now)))
            .unwrap_or(Duration::ZERO)
    }

    fn has_room(&self) -> bool {
        self.count() < self.limit
    }

    fn record(&mut self, now: DateTime<Utc>) {
        self.hits.push_back(now);
    }

    fn clear(&mut self) {
        self.hits.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied {
        window: Granularity,
        retry_after: Duration,
    },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub used: u32,
    pub limit: u32,
    pub reset_in: Duration,
}

/// Read-only snapshot of a provider's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub provider: String,
    pub burst: Option<WindowStatus>,
    pub minute: Option<WindowStatus>,
    pub hour: Option<WindowStatus>,
    pub day: Option<WindowStatus>,
}

#[derive(Debug)]
struct ProviderQuota {
    // Sorted shortest first.
    windows: Vec<QuotaWindow>,
}

impl ProviderQuota {
    fn from_limits(provider: &str, limits: &ProviderLimits, burst_window: Duration) -> Self {
        let mut windows: Vec<QuotaWindow> = [
            (Granularity::Burst, limits.burst, burst_window),
            (Granularity::Minute, limits.minute, Granularity::Minute.default_length()),
            (Granularity::Hour, limits.hour, Granularity::Hour.default_length()),
            (Granularity::Day, limits.day, Granularity::Day.default_length()),
        ]
        .into_iter()
        .filter_map(|(granularity, limit, length)| {
            limit.map(|limit| {
                if limit == 0 {
                    warn!(provider, window = %granularity, "Quota window limit is 0; denying every call");
                }
                QuotaWindow::new(granularity, limit, length)
            })
        })
        .collect();
        windows.sort_by_key(|w| w.length);
        Self { windows }
    }
}

/// Single source of truth for "may I call this provider now".
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    providers: Arc<RwLock<HashMap<String, Arc<Mutex<ProviderQuota>>>>>,
    clock: SharedClock,
}

impl QuotaTracker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Registers (or reconfigures) a provider. Reconfiguring drops its recorded calls.
    pub fn register(&self, provider: &str, limits: &ProviderLimits, burst_window: Duration) {
        let quota = ProviderQuota::from_limits(provider, limits, burst_window);
        debug!(provider, windows = quota.windows.len(), "Registered quota windows");
        self.providers
            .write()
            .insert(provider.to_string(), Arc::new(Mutex::new(quota)));
    }

    fn quota_for(&self, provider: &str) -> Result<Arc<Mutex<ProviderQuota>>> {
        self.providers
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| AppError::unknown_provider(provider))
    }

    /// Admits a call if every window has room, recording it in all of them.
    pub fn try_acquire(&self, provider: &str) -> Result<QuotaDecision> {
        let quota = self.quota_for(provider)?;
        let now = self.clock.now();
        let mut quota = quota.lock();

        for window in &mut quota.windows {
            window.prune(now);
        }

        if let Some(exceeded) = quota.windows.iter().find(|w| !w.has_room()) {
            let retry_after = exceeded.reset_in_at(now);
            let window = exceeded.granularity;
            debug!(
                provider,
                window = %window,
                used = exceeded.count(),
                limit = exceeded.limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Quota denied"
            );
            metrics::record_quota_decision(provider, false);
            return Ok(QuotaDecision::Denied { window, retry_after });
        }

        for window in &mut quota.windows {
            window.record(now);
        }
        metrics::record_quota_decision(provider, true);
        Ok(QuotaDecision::Allowed)
    }

    /// Pacing delay derived from the most heavily used window.
    ///
    /// Below 80% usage no delay is suggested. Above it, the time until the
    /// window frees up is spread over the calls that remain.
    pub fn recommended_delay(&self, provider: &str) -> Result<Duration> {
        let quota = self.quota_for(provider)?;
        let now = self.clock.now();
        let quota = quota.lock();

        let mut delay = Duration::ZERO;
        for window in &quota.windows {
            if window.limit == 0 {
                delay = delay.max(window.length);
                continue;
            }
            let used = window.used_at(now);
            let ratio = f64::from(used) / f64::from(window.limit);
            if ratio < PACING_THRESHOLD {
                continue;
            }
            let reset_in = window.reset_in_at(now);
            let remaining = window.limit.saturating_sub(used);
            let candidate = if remaining == 0 {
                reset_in
            } else {
                reset_in / remaining
            };
            delay = delay.max(candidate);
        }
        Ok(delay)
    }

    pub fn status(&self, provider: &str) -> Result<QuotaStatus> {
        let quota = self.quota_for(provider)?;
        let now = self.clock.now();
        let quota = quota.lock();

        let mut status = QuotaStatus {
            provider: provider.to_string(),
            burst: None,
            minute: None,
            hour: None,
            day: None,
        };
        for window in &quota.windows {
            let snapshot = Some(WindowStatus {
                used: window.used_at(now),
                limit: window.limit,
                reset_in: window.reset_in_at(now),
            });
            match window.granularity {
                Granularity::Burst => status.burst = snapshot,
                Granularity::Minute => status.minute = snapshot,
                Granularity::Hour => status.hour = snapshot,
                Granularity::Day => status.day = snapshot,
            }
        }
        Ok(status)
    }

    /// Administrative: forget every recorded call for a provider.
    pub fn reset(&self, provider: &str) -> Result<()> {
        let quota = self.quota_for(provider)?;
        let mut quota = quota.lock();
        for window in &mut quota.windows {
            window.clear();
        }
        info!(provider, "Quota windows reset");
        Ok(())
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
