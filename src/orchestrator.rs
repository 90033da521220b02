// src/orchestrator.rs

use crate::cache::{canonical_key, CacheStatus, RequestCoalescer};
use crate::clock::{elapsed_since, SharedClock};
use crate::credentials::CredentialPool;
use crate::error::{AppError, FetchError, Result, TransportError};
use crate::metrics;
use crate::policy::DataType;
use crate::provider::ProviderRegistry;
use crate::quota::{QuotaDecision, QuotaTracker};
use crate::storage::{DataStore, StoredRow};
use crate::transport::{Transport, UpstreamRequest};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One logical data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub data_type: DataType,
    pub params: BTreeMap<String, String>,
    pub force_refresh: bool,
}

impl DataRequest {
    pub fn new(data_type: impl Into<DataType>) -> Self {
        Self {
            data_type: data_type.into(),
            params: BTreeMap::new(),
            force_refresh: false,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn cache_key(&self) -> String {
        canonical_key(&self.data_type, &self.params)
    }
}

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Database,
    DatabaseFallback,
    ExternalApiRefreshed,
    Cache,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::DatabaseFallback => "database_fallback",
            Self::ExternalApiRefreshed => "external_api_refreshed",
            Self::Cache => "cache",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why local data was served instead of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    QuotaExceeded,
    NoCredentialAvailable,
    ProviderCoolingDown,
    TransportFailure,
    NoProviders,
}

impl FallbackReason {
    fn from_error(error: &FetchError) -> Self {
        match error {
            FetchError::QuotaExceeded { .. } => Self::QuotaExceeded,
            FetchError::NoCredentialAvailable { .. } => Self::NoCredentialAvailable,
            FetchError::ProviderCoolingDown { .. } => Self::ProviderCoolingDown,
            FetchError::NoProviders => Self::NoProviders,
            FetchError::Transport { .. } | FetchError::Store(_) => Self::TransportFailure,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchMeta {
    pub stale: bool,
    /// Age of the returned data. `None` when there is no data at all.
    pub age: Option<Duration>,
    pub provider: Option<String>,
    pub fallback_reason: Option<FallbackReason>,
    pub retry_after: Option<Duration>,
    pub cache_status: Option<CacheStatus>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub data: Vec<serde_json::Value>,
    pub source: DataSource,
    pub meta: FetchMeta,
}

/// Rows returned by one successful upstream call, shared by every coalesced subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamBatch {
    pub provider: String,
    pub rows: Vec<serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
}

/// Injected outbound collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DataStore>,
    pub transport: Arc<dyn Transport>,
    pub clock: SharedClock,
}

/// Decides between the local store and an upstream refresh, and degrades to
/// local data when quota, credentials or providers run out.
#[derive(Clone)]
pub struct FallbackOrchestrator {
    registry: ProviderRegistry,
    quota: QuotaTracker,
    credentials: CredentialPool,
    cache: RequestCoalescer<Arc<UpstreamBatch>>,
    store: Arc<dyn DataStore>,
    transport: Arc<dyn Transport>,
    clock: SharedClock,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("providers", &self.registry.names())
            .field("cache", &self.cache)
            .field("request_timeout", &self.request_timeout)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl FallbackOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        quota: QuotaTracker,
        credentials: CredentialPool,
        cache: RequestCoalescer<Arc<UpstreamBatch>>,
        collaborators: Collaborators,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            quota,
            credentials,
            cache,
            store: collaborators.store,
            transport: collaborators.transport,
            clock: collaborators.clock,
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    pub fn cache(&self) -> &RequestCoalescer<Arc<UpstreamBatch>> {
        &self.cache
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels in-flight transport calls and stops scheduled jobs.
    pub fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.shutdown.cancel();
    }

    /// Serves `request` from the store when fresh enough, otherwise refreshes it
    /// from the first usable provider in `providers`.
    ///
    /// Staleness, quota denial and credential exhaustion never produce an
    /// error: local data (possibly empty) is returned with
    /// `source = database_fallback`. Errors are reserved for store failures,
    /// unknown providers, and transport failures with no local data to fall back on.
    #[instrument(skip(self, request, providers), fields(data_type = %request.data_type, force = request.force_refresh))]
    pub async fn fetch_with_policy(&self, request: &DataRequest, providers: &[String]) -> Result<FetchResult> {
        for name in providers {
            self.registry.get(name)?;
        }

        let rows = self
            .store
            .read(&request.data_type, &request.params)
            .await
            .map_err(|e| AppError::StoreFailure {
                data_type: request.data_type.to_string(),
                message: e.to_string(),
            })?;

        let now = self.clock.now();
        let max_age = self.cache.policy().max_age(&request.data_type);
        let age = local_age(&rows, now);
        let fresh = age.is_some_and(|age| age <= max_age);

        if fresh && !request.force_refresh {
            debug!(age_ms = age.map(|a| a.as_millis() as u64), "Serving fresh local data");
            return Ok(self.finish(
                DataSource::Database,
                into_data(rows),
                FetchMeta {
                    stale: false,
                    age,
                    ..FetchMeta::default()
                },
            ));
        }

        let key = request.cache_key();
        let upstream = {
            let this = self.clone();
            let request = request.clone();
            let candidates = providers.to_vec();
            move || async move { this.fetch_upstream(request, candidates).await }
        };
        let outcome = if request.force_refresh {
            self.cache.refresh(&key, &request.data_type, upstream).await
        } else {
            self.cache.get_with_status(&key, &request.data_type, upstream).await
        };

        match outcome {
            Ok((batch, cache_status)) => {
                let source = if cache_status == CacheStatus::Hit {
                    DataSource::Cache
                } else {
                    DataSource::ExternalApiRefreshed
                };
                let meta = FetchMeta {
                    stale: false,
                    age: Some(elapsed_since(batch.fetched_at, self.clock.now())),
                    provider: Some(batch.provider.clone()),
                    cache_status: Some(cache_status),
                    ..FetchMeta::default()
                };
                Ok(self.finish(source, batch.rows.clone(), meta))
            }
            Err(FetchError::Store(e)) => Err(AppError::StoreFailure {
                data_type: request.data_type.to_string(),
                message: e.to_string(),
            }),
            Err(error) => {
                if !error.is_exhaustion() && rows.is_empty() {
                    let err = match &error {
                        FetchError::Transport { provider, source } => AppError::Transport {
                            provider: provider.clone(),
                            message: source.to_string(),
                        },
                        other => AppError::Transport {
                            provider: String::new(),
                            message: other.to_string(),
                        },
                    };
                    err.log();
                    return Err(err);
                }
                warn!(error = %error, local_rows = rows.len(), "Serving local data after failed refresh");
                let meta = FetchMeta {
                    stale: !fresh,
                    age,
                    provider: match &error {
                        FetchError::QuotaExceeded { provider, .. }
                        | FetchError::NoCredentialAvailable { provider }
                        | FetchError::ProviderCoolingDown { provider, .. }
                        | FetchError::Transport { provider, .. } => Some(provider.clone()),
                        _ => None,
                    },
                    fallback_reason: Some(FallbackReason::from_error(&error)),
                    retry_after: error.retry_after(),
                    cache_status: None,
                    error: Some(error.to_string()),
                };
                Ok(self.finish(DataSource::DatabaseFallback, into_data(rows), meta))
            }
        }
    }

    fn finish(&self, source: DataSource, data: Vec<serde_json::Value>, meta: FetchMeta) -> FetchResult {
        metrics::record_fetch(source);
        debug!(source = %source, rows = data.len(), stale = meta.stale, "Fetch completed");
        FetchResult { data, source, meta }
    }

    /// The coalesced unit: walks the candidates in order until one yields data.
    async fn fetch_upstream(
        self,
        request: DataRequest,
        candidates: Vec<String>,
    ) -> std::result::Result<Arc<UpstreamBatch>, FetchError> {
        let mut last_error = FetchError::NoProviders;

        for name in &candidates {
            let Ok(provider) = self.registry.get(name) else {
                continue;
            };

            if let Err(retry_after) = self.registry.check_health(&provider) {
                debug!(provider = %name, "Provider cooling down, trying next candidate");
                last_error = FetchError::ProviderCoolingDown {
                    provider: name.clone(),
                    retry_after,
                };
                continue;
            }

            match self.quota.try_acquire(name) {
                Ok(QuotaDecision::Allowed) => {}
                Ok(QuotaDecision::Denied { retry_after, .. }) => {
                    last_error = FetchError::QuotaExceeded {
                        provider: name.clone(),
                        retry_after,
                    };
                    continue;
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "No quota registered for provider, denying");
                    last_error = FetchError::QuotaExceeded {
                        provider: name.clone(),
                        retry_after: Duration::ZERO,
                    };
                    continue;
                }
            }

            let Some(credential) = self.credentials.current_key(name) else {
                last_error = FetchError::NoCredentialAvailable { provider: name.clone() };
                continue;
            };

            let call = self.transport.fetch(UpstreamRequest {
                provider: name,
                base_url: provider.base_url.as_deref(),
                data_type: &request.data_type,
                params: &request.params,
                credential: credential.secret(),
            });
            let outcome = tokio::select! {
                () = self.shutdown.cancelled() => Err(TransportError::Cancelled),
                timed = tokio::time::timeout(self.request_timeout, call) => {
                    timed.unwrap_or(Err(TransportError::Timeout(self.request_timeout)))
                }
            };

            let secret = credential.secret().expose_secret();
            match outcome {
                Ok(rows) => {
                    // The upstream call is spent whether or not the write lands.
                    self.credentials.record_usage(name, secret);
                    provider.health.record_success();
                    let fetched_at = self.clock.now();
                    let written = self
                        .store
                        .upsert(&request.data_type, &request.params, &rows, fetched_at)
                        .await
                        .map_err(FetchError::Store)?;
                    info!(
                        provider = %name,
                        api_key.preview = %credential.preview(),
                        rows = written,
                        "Refreshed data from provider"
                    );
                    return Ok(Arc::new(UpstreamBatch {
                        provider: name.clone(),
                        rows,
                        fetched_at,
                    }));
                }
                Err(TransportError::Cancelled) => {
                    return Err(FetchError::Transport {
                        provider: name.clone(),
                        source: TransportError::Cancelled,
                    });
                }
                Err(TransportError::RateLimited { retry_after }) => {
                    self.credentials.mark_exhausted(name, secret, retry_after);
                    last_error = FetchError::Transport {
                        provider: name.clone(),
                        source: TransportError::RateLimited { retry_after },
                    };
                }
                Err(source) => {
                    warn!(
                        provider = %name,
                        api_key.preview = %credential.preview(),
                        error = %source,
                        "Upstream call failed, trying next candidate"
                    );
                    self.credentials.record_failure(name, secret);
                    // A rejected key says nothing about the provider itself.
                    if !matches!(source, TransportError::Unauthorized(_)) {
                        self.registry.record_failure(&provider);
                    }
                    last_error = FetchError::Transport {
                        provider: name.clone(),
                        source,
                    };
                }
            }
        }

        Err(last_error)
    }
}

fn local_age(rows: &[StoredRow], now: DateTime<Utc>) -> Option<Duration> {
    rows.iter()
        .map(|row| row.last_updated_at)
        .max()
        .map(|latest| elapsed_since(latest, now))
}

fn into_data(rows: Vec<StoredRow>) -> Vec<serde_json::Value> {
    rows.into_iter().map(|row| row.data).collect()
}
