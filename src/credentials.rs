// src/credentials.rs

use crate::clock::{elapsed_since, to_chrono, SharedClock};
use crate::error::TransportError;
use crate::metrics;
use crate::transport::CredentialProbe;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Priority assigned when the caller does not pick one. Lower values are preferred.
pub const DEFAULT_PRIORITY: u32 = 10;

/// Redacted form of a secret, safe for logs and audit records.
pub fn preview(secret: &str) -> String {
    if secret.len() > 8 && secret.is_char_boundary(4) && secret.is_char_boundary(secret.len() - 4) {
        format!("{}...{}", &secret[..4], &secret[secret.len() - 4..])
    } else {
        "****".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Active,
    Exhausted,
    CoolingDown,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationAction {
    Add,
    Remove,
    Rotate,
    Reset,
    Validate,
}

impl fmt::Display for RotationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Rotate => "rotate",
            Self::Reset => "reset",
            Self::Validate => "validate",
        };
        f.write_str(name)
    }
}

/// Append-only audit record of a credential change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub action: RotationAction,
    pub credential_ref: String,
}

/// An API key owned by the pool.
#[derive(Debug, Clone)]
pub struct Credential {
    secret: SecretString,
    pub provider: String,
    pub priority: u32,
    pub usage_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub state: CredentialState,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl Credential {
    fn new(provider: &str, secret: SecretString, priority: u32) -> Self {
        Self {
            secret,
            provider: provider.to_string(),
            priority,
            usage_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            state: CredentialState::Active,
            cooldown_until: None,
            last_used: None,
        }
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn preview(&self) -> String {
        preview(self.secret.expose_secret())
    }

    fn matches(&self, secret: &str) -> bool {
        self.secret.expose_secret() == secret
    }
}

/// Serializable view of a credential without its secret.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub credential_ref: String,
    pub priority: u32,
    pub usage_count: u64,
    pub failure_count: u64,
    pub state: CredentialState,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            credential_ref: c.preview(),
            priority: c.priority,
            usage_count: c.usage_count,
            failure_count: c.failure_count,
            state: c.state,
            cooldown_until: c.cooldown_until,
            last_used: c.last_used,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub max_history: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
            max_history: 1000,
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    keys: HashMap<String, Vec<Credential>>,
    history: VecDeque<RotationEvent>,
}

impl PoolInner {
    fn record_event(&mut self, now: DateTime<Utc>, provider: &str, action: RotationAction, credential_ref: String, max: usize) {
        info!(provider, action = %action, api_key.preview = %credential_ref, "Rotation event");
        metrics::record_rotation_event(provider, action);
        self.history.push_front(RotationEvent {
            id: Uuid::new_v4(),
            timestamp: now,
            provider: provider.to_string(),
            action,
            credential_ref,
        });
        self.history.truncate(max.max(1));
    }
}

/// Per-provider set of credentials with usage statistics and rotation policy.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    inner: Arc<Mutex<PoolInner>>,
    policy: RotationPolicy,
    clock: SharedClock,
}

impl CredentialPool {
    pub fn new(policy: RotationPolicy, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner::default())),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Adds a credential. Returns `false` if the secret is already known for the provider.
    pub fn add_key(&self, provider: &str, secret: SecretString, priority: Option<u32>) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let keys = inner.keys.entry(provider.to_string()).or_default();
        if keys.iter().any(|c| c.matches(secret.expose_secret())) {
            debug!(provider, api_key.preview = %preview(secret.expose_secret()), "Credential already present");
            return false;
        }
        let credential = Credential::new(provider, secret, priority.unwrap_or(DEFAULT_PRIORITY));
        let credential_ref = credential.preview();
        keys.push(credential);
        inner.record_event(now, provider, RotationAction::Add, credential_ref, self.policy.max_history);
        true
    }

    /// Removes a credential. Returns `false` if it was not found.
    pub fn remove_key(&self, provider: &str, secret: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(keys) = inner.keys.get_mut(provider) else {
            return false;
        };
        let Some(index) = keys.iter().position(|c| c.matches(secret)) else {
            return false;
        };
        let removed = keys.remove(index);
        inner.record_event(now, provider, RotationAction::Remove, removed.preview(), self.policy.max_history);
        true
    }

    /// Brings back cooling-down and exhausted credentials whose back-off has elapsed.
    fn revive_elapsed(keys: &mut [Credential], now: DateTime<Utc>) {
        for credential in keys.iter_mut() {
            if !matches!(credential.state, CredentialState::CoolingDown | CredentialState::Exhausted) {
                continue;
            }
            let elapsed = credential.cooldown_until.map_or(true, |until| now >= until);
            if elapsed {
                info!(
                    provider = %credential.provider,
                    api_key.preview = %credential.preview(),
                    "Credential cool-down elapsed, reactivating"
                );
                credential.state = CredentialState::Active;
                credential.consecutive_failures = 0;
                credential.cooldown_until = None;
            }
        }
    }

    fn select_index(keys: &[Credential]) -> Option<usize> {
        keys.iter()
            .enumerate()
            .filter(|(_, c)| c.state == CredentialState::Active)
            .min_by_key(|(_, c)| (c.priority, c.usage_count))
            .map(|(index, _)| index)
    }

    /// Best active credential: lowest priority value, ties broken by lowest usage.
    pub fn current_key(&self, provider: &str) -> Option<Credential> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let keys = inner.keys.get_mut(provider)?;
        Self::revive_elapsed(keys, now);
        match Self::select_index(keys) {
            Some(index) => Some(keys[index].clone()),
            None => {
                warn!(provider, "No active credential available");
                None
            }
        }
    }

    pub fn record_usage(&self, provider: &str, secret: &str) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if let Some(credential) = inner
            .keys
            .get_mut(provider)
            .and_then(|keys| keys.iter_mut().find(|c| c.matches(secret)))
        {
            credential.usage_count += 1;
            credential.consecutive_failures = 0;
            credential.last_used = Some(now);
        }
    }

    /// Counts a failure; crossing the threshold puts the credential into cool-down.
    pub fn record_failure(&self, provider: &str, secret: &str) {
        let now = self.clock.now();
        let policy = self.policy;
        let mut inner = self.inner.lock();
        let Some(credential) = inner
            .keys
            .get_mut(provider)
            .and_then(|keys| keys.iter_mut().find(|c| c.matches(secret)))
        else {
            return;
        };

        credential.failure_count += 1;
        credential.consecutive_failures += 1;
        warn!(
            provider,
            api_key.preview = %credential.preview(),
            failures = credential.consecutive_failures,
            threshold = policy.failure_threshold,
            "Credential failure recorded"
        );

        if credential.state == CredentialState::Active
            && credential.consecutive_failures >= policy.failure_threshold
        {
            credential.state = CredentialState::CoolingDown;
            credential.cooldown_until = Some(now + to_chrono(policy.cooldown));
            let credential_ref = credential.preview();
            inner.record_event(now, provider, RotationAction::Rotate, credential_ref, policy.max_history);
        }
    }

    /// Marks a credential exhausted (provider reported its own quota spent) until the cool-down elapses.
    pub fn mark_exhausted(&self, provider: &str, secret: &str, retry_after: Option<Duration>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if let Some(credential) = inner
            .keys
            .get_mut(provider)
            .and_then(|keys| keys.iter_mut().find(|c| c.matches(secret)))
        {
            let back_off = retry_after.unwrap_or(self.policy.cooldown);
            credential.state = CredentialState::Exhausted;
            credential.cooldown_until = Some(now + to_chrono(back_off));
            warn!(
                provider,
                api_key.preview = %credential.preview(),
                back_off_secs = back_off.as_secs(),
                "Credential rate limited by provider"
            );
        }
    }

    /// Forces the credential `current_key` would return into cool-down.
    pub fn manual_rotate(&self, provider: &str) -> bool {
        let now = self.clock.now();
        let policy = self.policy;
        let mut inner = self.inner.lock();
        let Some(keys) = inner.keys.get_mut(provider) else {
            return false;
        };
        Self::revive_elapsed(keys, now);
        let Some(index) = Self::select_index(keys) else {
            return false;
        };
        let credential = &mut keys[index];
        credential.state = CredentialState::CoolingDown;
        credential.cooldown_until = Some(now + to_chrono(policy.cooldown));
        let credential_ref = credential.preview();
        inner.record_event(now, provider, RotationAction::Rotate, credential_ref, policy.max_history);
        true
    }

    /// Runs a lightweight probe through the credential. A failed probe marks it invalid.
    #[instrument(skip(self, secret, probe), fields(api_key.preview = %preview(secret)))]
    pub async fn validate_key(&self, provider: &str, secret: &str, probe: &dyn CredentialProbe) -> bool {
        let credential = {
            let inner = self.inner.lock();
            inner
                .keys
                .get(provider)
                .and_then(|keys| keys.iter().find(|c| c.matches(secret)))
                .map(|c| c.secret.clone())
        };
        let Some(credential) = credential else {
            return false;
        };

        let outcome: Result<(), TransportError> = probe.probe(provider, &credential).await;
        if let Err(e) = outcome {
            let now = self.clock.now();
            let mut inner = self.inner.lock();
            let invalidated = inner
                .keys
                .get_mut(provider)
                .and_then(|keys| keys.iter_mut().find(|c| c.matches(secret)))
                .map(|c| {
                    c.state = CredentialState::Invalid;
                    c.cooldown_until = None;
                    c.preview()
                });
            if let Some(credential_ref) = invalidated {
                warn!(provider, error = %e, "Credential failed validation and was invalidated");
                inner.record_event(now, provider, RotationAction::Validate, credential_ref, self.policy.max_history);
            }
            return false;
        }
        debug!(provider, "Credential validated");
        true
    }

    /// Zeroes usage and failure counters for one credential, or every credential of the provider.
    /// Cool-downs are lifted; invalid credentials stay invalid. Returns how many were reset.
    pub fn reset_usage(&self, provider: &str, secret: Option<&str>) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(keys) = inner.keys.get_mut(provider) else {
            return 0;
        };
        let mut refs = Vec::new();
        for credential in keys
            .iter_mut()
            .filter(|c| secret.map_or(true, |s| c.matches(s)))
        {
            credential.usage_count = 0;
            credential.failure_count = 0;
            credential.consecutive_failures = 0;
            if matches!(credential.state, CredentialState::CoolingDown | CredentialState::Exhausted) {
                credential.state = CredentialState::Active;
                credential.cooldown_until = None;
            }
            refs.push(credential.preview());
        }
        let count = refs.len();
        if count > 0 {
            let credential_ref = match secret {
                Some(_) => refs.swap_remove(0),
                None => "*".to_string(),
            };
            inner.record_event(now, provider, RotationAction::Reset, credential_ref, self.policy.max_history);
        }
        count
    }

    /// Most recent events first. A snapshot taken at call time.
    pub fn history(&self, limit: usize) -> Vec<RotationEvent> {
        self.inner.lock().history.iter().take(limit).cloned().collect()
    }

    pub fn credentials(&self, provider: &str) -> Vec<CredentialSummary> {
        let inner = self.inner.lock();
        let mut summaries: Vec<CredentialSummary> = inner
            .keys
            .get(provider)
            .map(|keys| keys.iter().map(CredentialSummary::from).collect())
            .unwrap_or_default();
        summaries.sort_by_key(|s| s.priority);
        summaries
    }

    /// Time until the next cooling-down credential comes back, if any.
    pub fn next_revival(&self, provider: &str) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner
            .keys
            .get(provider)?
            .iter()
            .filter(|c| matches!(c.state, CredentialState::CoolingDown | CredentialState::Exhausted))
            .filter_map(|c| c.cooldown_until)
            .map(|until| elapsed_since(now, until))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use async_trait::async_trait;

    fn pool() -> (CredentialPool, ManualClock) {
        let clock = ManualClock::default();
        let pool = CredentialPool::new(RotationPolicy::default(), Arc::new(clock.clone()));
        (pool, clock)
    }

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    struct RejectingProbe;

    #[async_trait]
    impl CredentialProbe for RejectingProbe {
        async fn probe(&self, _provider: &str, _credential: &SecretString) -> Result<(), TransportError> {
            Err(TransportError::Unauthorized("401".into()))
        }
    }

    struct AcceptingProbe;

    #[async_trait]
    impl CredentialProbe for AcceptingProbe {
        async fn probe(&self, _provider: &str, _credential: &SecretString) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn preview_redacts_secrets() {
        assert_eq!(preview("sk-1234567890abcdef"), "sk-1...cdef");
        assert_eq!(preview("short"), "****");
    }

    #[test]
    fn add_is_idempotent_and_remove_reports_missing() {
        let (pool, _) = pool();
        assert!(pool.add_key("x", secret("key-aaaa-0001"), None));
        assert!(!pool.add_key("x", secret("key-aaaa-0001"), None));
        assert!(!pool.remove_key("x", "key-zzzz-9999"));
        assert!(pool.remove_key("x", "key-aaaa-0001"));
        assert!(!pool.remove_key("x", "key-aaaa-0001"));
    }

    #[test]
    fn three_failures_rotate_to_next_priority() {
        let (pool, _) = pool();
        pool.add_key("x", secret("k1-secret-0001"), Some(1));
        pool.add_key("x", secret("k2-secret-0002"), Some(2));
        assert_eq!(pool.current_key("x").unwrap().secret().expose_secret(), "k1-secret-0001");

        for _ in 0..3 {
            pool.record_failure("x", "k1-secret-0001");
        }
        assert_eq!(pool.current_key("x").unwrap().secret().expose_secret(), "k2-secret-0002");

        let history = pool.history(1);
        assert_eq!(history[0].action, RotationAction::Rotate);
        assert_eq!(history[0].credential_ref, "k1-s...0001");
    }

    #[test]
    fn ties_are_broken_by_usage() {
        let (pool, _) = pool();
        pool.add_key("x", secret("first-key-0001"), Some(1));
        pool.add_key("x", secret("second-key-0002"), Some(1));
        pool.record_usage("x", "first-key-0001");
        assert_eq!(pool.current_key("x").unwrap().secret().expose_secret(), "second-key-0002");
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (pool, _) = pool();
        pool.add_key("x", secret("k1-secret-0001"), Some(1));
        pool.record_failure("x", "k1-secret-0001");
        pool.record_failure("x", "k1-secret-0001");
        pool.record_usage("x", "k1-secret-0001");
        pool.record_failure("x", "k1-secret-0001");
        let current = pool.current_key("x").unwrap();
        assert_eq!(current.state, CredentialState::Active);
        assert_eq!(current.failure_count, 3);
    }

    #[test]
    fn cooled_down_credential_revives_after_backoff() {
        let (pool, clock) = pool();
        pool.add_key("x", secret("only-key-00001"), None);
        for _ in 0..3 {
            pool.record_failure("x", "only-key-00001");
        }
        assert!(pool.current_key("x").is_none());
        assert_eq!(pool.next_revival("x"), Some(Duration::from_secs(300)));

        clock.advance(Duration::from_secs(301));
        let revived = pool.current_key("x").unwrap();
        assert_eq!(revived.state, CredentialState::Active);
        assert_eq!(revived.consecutive_failures, 0);
    }

    #[test]
    fn exhausted_credential_returns_after_retry_after() {
        let (pool, clock) = pool();
        pool.add_key("x", secret("k1-secret-0001"), Some(1));
        pool.add_key("x", secret("k2-secret-0002"), Some(2));

        pool.mark_exhausted("x", "k1-secret-0001", Some(Duration::from_secs(10)));
        assert_eq!(pool.credentials("x")[0].state, CredentialState::Exhausted);
        assert_eq!(pool.current_key("x").unwrap().secret().expose_secret(), "k2-secret-0002");
        assert_eq!(pool.next_revival("x"), Some(Duration::from_secs(10)));

        clock.advance(Duration::from_secs(10));
        let revived = pool.current_key("x").unwrap();
        assert_eq!(revived.secret().expose_secret(), "k1-secret-0001");
        assert_eq!(revived.state, CredentialState::Active);
        assert_eq!(pool.next_revival("x"), None);
    }

    #[test]
    fn exhausted_without_hint_uses_policy_cooldown() {
        let (pool, clock) = pool();
        pool.add_key("x", secret("only-key-00001"), None);
        pool.mark_exhausted("x", "only-key-00001", None);
        clock.advance(Duration::from_secs(299));
        assert!(pool.current_key("x").is_none());
        clock.advance(Duration::from_secs(1));
        assert!(pool.current_key("x").is_some());
    }

    #[test]
    fn summary_exposes_last_use() {
        let (pool, clock) = pool();
        pool.add_key("x", secret("k1-secret-0001"), None);
        assert_eq!(pool.credentials("x")[0].last_used, None);
        pool.record_usage("x", "k1-secret-0001");
        assert_eq!(pool.credentials("x")[0].last_used, Some(clock.now()));
    }

    #[test]
    fn manual_rotate_moves_to_next_credential() {
        let (pool, _) = pool();
        assert!(!pool.manual_rotate("x"));
        pool.add_key("x", secret("k1-secret-0001"), Some(1));
        pool.add_key("x", secret("k2-secret-0002"), Some(2));
        assert!(pool.manual_rotate("x"));
        assert_eq!(pool.current_key("x").unwrap().secret().expose_secret(), "k2-secret-0002");
        assert!(pool.manual_rotate("x"));
        assert!(!pool.manual_rotate("x"));
        assert!(pool.current_key("x").is_none());
    }

    #[tokio::test]
    async fn failed_validation_invalidates_permanently() {
        let (pool, clock) = pool();
        pool.add_key("x", secret("k1-secret-0001"), Some(1));
        pool.add_key("x", secret("k2-secret-0002"), Some(2));

        assert!(pool.validate_key("x", "k2-secret-0002", &AcceptingProbe).await);
        assert!(!pool.validate_key("x", "k1-secret-0001", &RejectingProbe).await);
        assert!(!pool.validate_key("x", "missing-key-000", &AcceptingProbe).await);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(pool.current_key("x").unwrap().secret().expose_secret(), "k2-secret-0002");
        assert_eq!(pool.history(1)[0].action, RotationAction::Validate);

        pool.reset_usage("x", None);
        let summaries = pool.credentials("x");
        assert_eq!(summaries[0].state, CredentialState::Invalid);
    }

    #[test]
    fn reset_usage_clears_counters_and_logs() {
        let (pool, _) = pool();
        pool.add_key("x", secret("k1-secret-0001"), Some(1));
        pool.add_key("x", secret("k2-secret-0002"), Some(2));
        for _ in 0..3 {
            pool.record_failure("x", "k1-secret-0001");
        }
        pool.record_usage("x", "k2-secret-0002");

        assert_eq!(pool.reset_usage("x", Some("k1-secret-0001")), 1);
        let current = pool.current_key("x").unwrap();
        assert_eq!(current.secret().expose_secret(), "k1-secret-0001");
        assert_eq!(current.failure_count, 0);

        assert_eq!(pool.reset_usage("x", None), 2);
        assert_eq!(pool.reset_usage("y", None), 0);
        let event = &pool.history(1)[0];
        assert_eq!(event.action, RotationAction::Reset);
        assert_eq!(event.credential_ref, "*");
    }

    #[test]
    fn history_is_newest_first_and_bounded() {
        let clock = ManualClock::default();
        let policy = RotationPolicy {
            max_history: 3,
            ..Default::default()
        };
        let pool = CredentialPool::new(policy, Arc::new(clock));
        for i in 0..5 {
            pool.add_key("x", secret(&format!("key-number-{i:04}")), None);
        }
        let history = pool.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].credential_ref, "key-...0004");
        assert_eq!(pool.history(1).len(), 1);
    }
}
