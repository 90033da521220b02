// tests/quota_tests.rs

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use rstest::rstest;
use sports_data_governor::config::ProviderLimits;
use sports_data_governor::quota::Granularity;
use sports_data_governor::{Clock, ManualClock, QuotaDecision, QuotaTracker};
use std::sync::Arc;
use std::time::Duration;

fn tracker(limits: ProviderLimits) -> (QuotaTracker, ManualClock) {
    let clock = ManualClock::default();
    let tracker = QuotaTracker::new(Arc::new(clock.clone()));
    tracker.register("odds", &limits, Duration::from_secs(1));
    (tracker, clock)
}

/// Largest number of timestamps falling inside any span of `window` starting at one of them.
fn max_in_any_window(allowed: &[DateTime<Utc>], window: Duration) -> usize {
    let window = chrono::Duration::from_std(window).unwrap();
    allowed
        .iter()
        .enumerate()
        .map(|(i, start)| allowed[i..].iter().take_while(|t| **t - *start < window).count())
        .max()
        .unwrap_or(0)
}

proptest! {
    #[test]
    fn allowed_calls_never_exceed_any_rolling_window(
        minute in 1u32..8,
        burst in 1u32..4,
        gaps_ms in prop::collection::vec(0u64..15_000, 1..150),
    ) {
        let (tracker, clock) = tracker(ProviderLimits {
            minute: Some(minute),
            burst: Some(burst),
            ..Default::default()
        });

        let mut allowed = Vec::new();
        for gap in gaps_ms {
            clock.advance(Duration::from_millis(gap));
            if tracker.try_acquire("odds").unwrap().is_allowed() {
                allowed.push(clock.now());
            }
        }

        prop_assert!(max_in_any_window(&allowed, Duration::from_secs(60)) <= minute as usize);
        prop_assert!(max_in_any_window(&allowed, Duration::from_secs(1)) <= burst as usize);
    }

    #[test]
    fn denial_always_carries_a_positive_retry_hint(
        hour in 1u32..5,
        calls in 1usize..20,
    ) {
        let (tracker, clock) = tracker(ProviderLimits {
            hour: Some(hour),
            ..Default::default()
        });
        for _ in 0..calls {
            clock.advance(Duration::from_secs(7));
            if let QuotaDecision::Denied { retry_after, .. } = tracker.try_acquire("odds").unwrap() {
                prop_assert!(retry_after > Duration::ZERO);
                prop_assert!(retry_after <= Duration::from_secs(3600));
            }
        }
    }
}

#[test]
fn test_sixth_rapid_call_is_denied() {
    let (tracker, _clock) = tracker(ProviderLimits {
        minute: Some(5),
        ..Default::default()
    });
    let decisions: Vec<QuotaDecision> = (0..6).map(|_| tracker.try_acquire("odds").unwrap()).collect();

    assert!(decisions[..5].iter().all(QuotaDecision::is_allowed));
    match &decisions[5] {
        QuotaDecision::Denied { window, retry_after } => {
            assert_eq!(*window, Granularity::Minute);
            assert!(*retry_after > Duration::ZERO);
        }
        QuotaDecision::Allowed => panic!("sixth call must be denied"),
    }
}

#[rstest]
#[case::hour(ProviderLimits { hour: Some(3), ..Default::default() }, 3, Granularity::Hour)]
#[case::day(ProviderLimits { day: Some(2), ..Default::default() }, 2, Granularity::Day)]
#[case::tightest_wins(ProviderLimits { minute: Some(4), hour: Some(2), ..Default::default() }, 2, Granularity::Hour)]
fn test_each_window_is_enforced(
    #[case] limits: ProviderLimits,
    #[case] allowed: usize,
    #[case] denied_by: Granularity,
) {
    let (tracker, clock) = tracker(limits);
    for _ in 0..allowed {
        assert!(tracker.try_acquire("odds").unwrap().is_allowed());
        clock.advance(Duration::from_secs(61));
    }
    match tracker.try_acquire("odds").unwrap() {
        QuotaDecision::Denied { window, .. } => assert_eq!(window, denied_by),
        QuotaDecision::Allowed => panic!("limit of {allowed} must be enforced"),
    }
}

#[test]
fn test_unknown_provider_is_an_error() {
    let (tracker, _clock) = tracker(ProviderLimits::default());
    assert!(tracker.try_acquire("missing").is_err());
    assert!(tracker.status("missing").is_err());
}

#[test]
fn test_unlimited_provider_always_allows() {
    let (tracker, _clock) = tracker(ProviderLimits::default());
    for _ in 0..1_000 {
        assert!(tracker.try_acquire("odds").unwrap().is_allowed());
    }
    assert_eq!(tracker.recommended_delay("odds").unwrap(), Duration::ZERO);
}

#[test]
fn test_reset_restores_full_quota() {
    let (tracker, _clock) = tracker(ProviderLimits {
        minute: Some(2),
        ..Default::default()
    });
    tracker.try_acquire("odds").unwrap();
    tracker.try_acquire("odds").unwrap();
    assert!(!tracker.try_acquire("odds").unwrap().is_allowed());

    tracker.reset("odds").unwrap();
    let status = tracker.status("odds").unwrap();
    assert_eq!(status.minute.unwrap().used, 0);
    assert!(tracker.try_acquire("odds").unwrap().is_allowed());
}
