// src/metrics.rs

//! Governance counters. Recorded through the `metrics` facade when the
//! `metrics` feature is on; the embedding application installs the recorder.

use crate::cache::CacheStatus;
use crate::credentials::RotationAction;
use crate::orchestrator::DataSource;

#[cfg(feature = "metrics")]
use metrics::counter;

#[cfg(feature = "metrics")]
pub fn record_quota_decision(provider: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!("governor_quota_decisions_total", "provider" => provider.to_string(), "outcome" => outcome).increment(1);
}

#[cfg(feature = "metrics")]
pub fn record_cache_lookup(status: CacheStatus) {
    counter!("governor_cache_lookups_total", "status" => status.as_str()).increment(1);
}

#[cfg(feature = "metrics")]
pub fn record_fetch(source: DataSource) {
    counter!("governor_fetch_total", "source" => source.as_str()).increment(1);
}

#[cfg(feature = "metrics")]
pub fn record_rotation_event(provider: &str, action: RotationAction) {
    counter!(
        "governor_rotation_events_total",
        "provider" => provider.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
pub fn record_quota_decision(_provider: &str, _allowed: bool) {}

#[cfg(not(feature = "metrics"))]
pub fn record_cache_lookup(_status: CacheStatus) {}

#[cfg(not(feature = "metrics"))]
pub fn record_fetch(_source: DataSource) {}

#[cfg(not(feature = "metrics"))]
pub fn record_rotation_event(_provider: &str, _action: RotationAction) {}
