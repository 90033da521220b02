//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde_json::json;
use sports_data_governor::config::{AppConfig, ProviderConfig, ProviderLimits, ScheduleConfig};
use sports_data_governor::{
    DataStore, DataType, GovernorState, InMemoryStore, ManualClock, StoreError, StoredRow, Transport,
    TransportError, UpstreamRequest,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Test configuration builder
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_provider(mut self, name: &str, limits: ProviderLimits) -> Self {
        self.config.providers.push(ProviderConfig::new(name, limits));
        self
    }

    pub fn with_credential(mut self, provider: &str, secret: &str, priority: u32) -> Self {
        let index = self
            .config
            .providers
            .iter()
            .position(|p| p.name == provider)
            .expect("provider must be added before its credentials");
        let existing = self.config.providers.remove(index);
        self.config
            .providers
            .insert(index, existing.with_credential(secret, priority));
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn with_cache_ttl(mut self, data_type: &str, secs: u64) -> Self {
        self.config.cache_ttl_secs.insert(data_type.to_string(), secs);
        self
    }

    pub fn with_max_age(mut self, data_type: &str, secs: u64) -> Self {
        self.config.max_age_secs.insert(data_type.to_string(), secs);
        self
    }

    pub fn with_schedule(mut self, name: &str, data_type: &str, providers: &[&str], interval_secs: u64) -> Self {
        self.config.schedule.push(ScheduleConfig {
            name: name.to_string(),
            data_type: data_type.to_string(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
            interval_secs,
            params: BTreeMap::new(),
        });
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One provider `odds` with a minute limit of 5 and two credentials.
pub fn odds_config() -> TestConfigBuilder {
    TestConfigBuilder::new()
        .with_provider(
            "odds",
            ProviderLimits {
                minute: Some(5),
                ..Default::default()
            },
        )
        .with_credential("odds", "odds-primary-0001", 1)
        .with_credential("odds", "odds-backup-0002", 2)
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    Respond(Vec<serde_json::Value>),
    Delay(Duration, Vec<serde_json::Value>),
    Fail(TransportError),
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub provider: String,
    pub credential: String,
    pub params: BTreeMap<String, String>,
}

/// Transport whose responses are scripted per provider, or per credential.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    by_provider: Mutex<HashMap<String, Behaviour>>,
    by_credential: Mutex<HashMap<String, Behaviour>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, provider: &str, behaviour: Behaviour) {
        self.by_provider.lock().insert(provider.to_string(), behaviour);
    }

    pub fn script_credential(&self, secret: &str, behaviour: Behaviour) {
        self.by_credential.lock().insert(secret.to_string(), behaviour);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: UpstreamRequest<'_>) -> Result<Vec<serde_json::Value>, TransportError> {
        let secret = request.credential.expose_secret().clone();
        self.calls.lock().push(RecordedCall {
            provider: request.provider.to_string(),
            credential: secret.clone(),
            params: request.params.clone(),
        });
        let behaviour = self
            .by_credential
            .lock()
            .get(&secret)
            .cloned()
            .or_else(|| self.by_provider.lock().get(request.provider).cloned())
            .unwrap_or_else(|| Behaviour::Respond(rows("upstream", 1)));

        match behaviour {
            Behaviour::Respond(rows) => Ok(rows),
            Behaviour::Delay(delay, rows) => {
                tokio::time::sleep(delay).await;
                Ok(rows)
            }
            Behaviour::Fail(error) => Err(error),
            Behaviour::Hang => std::future::pending::<Result<Vec<serde_json::Value>, TransportError>>().await,
        }
    }
}

/// Store wrapper that counts writes and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    upserts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn seed(&self, data_type: DataType, rows: &[serde_json::Value], at: DateTime<Utc>) {
        self.inner
            .upsert(&data_type, &BTreeMap::new(), rows, at)
            .await
            .expect("seeding the in-memory store cannot fail");
    }
}

#[async_trait]
impl DataStore for RecordingStore {
    async fn read(
        &self,
        data_type: &DataType,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::new("read", "connection refused"));
        }
        self.inner.read(data_type, params).await
    }

    async fn upsert(
        &self,
        data_type: &DataType,
        params: &BTreeMap<String, String>,
        rows: &[serde_json::Value],
        updated_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::new("upsert", "disk full"));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(data_type, params, rows, updated_at).await
    }
}

/// Rows tagged with `origin` so tests can tell local from upstream data.
pub fn rows(origin: &str, count: usize) -> Vec<serde_json::Value> {
    (0..count).map(|i| json!({ "id": i, "origin": origin })).collect()
}

pub struct Harness {
    pub state: GovernorState,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<RecordingStore>,
    pub clock: ManualClock,
}

pub fn harness(config: AppConfig) -> Harness {
    let transport = ScriptedTransport::new();
    let store = RecordingStore::new();
    let clock = ManualClock::default();
    let state = GovernorState::with_clock(config, store.clone(), transport.clone(), Arc::new(clock.clone()))
        .expect("test configuration must be valid");
    Harness {
        state,
        transport,
        store,
        clock,
    }
}

pub fn providers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
