// src/admin.rs

use crate::cache::CacheStats;
use crate::credentials::{CredentialSummary, RotationEvent};
use crate::error::Result;
use crate::orchestrator::FallbackOrchestrator;
use crate::provider::HealthSnapshot;
use crate::quota::QuotaStatus;
use crate::transport::CredentialProbe;
use secrecy::SecretString;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument};

/// Everything an operator needs to know about one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub quota: QuotaStatus,
    pub recommended_delay: Duration,
    pub health: HealthSnapshot,
    pub credentials: Vec<CredentialSummary>,
    pub next_credential_revival: Option<Duration>,
}

/// Administrative surface consumed by route handlers outside this crate.
#[derive(Debug, Clone)]
pub struct Admin {
    orchestrator: FallbackOrchestrator,
}

impl Admin {
    pub fn new(orchestrator: FallbackOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Forces the provider's current credential into cool-down. `false` when no active credential remains.
    #[instrument(skip(self))]
    pub fn rotate(&self, provider: &str) -> Result<bool> {
        self.orchestrator.registry().get(provider)?;
        Ok(self.orchestrator.credentials().manual_rotate(provider))
    }

    /// Resets usage counters for one credential, or every credential when `credential` is `None`.
    #[instrument(skip(self, credential))]
    pub fn reset_usage(&self, provider: &str, credential: Option<&str>) -> Result<usize> {
        self.orchestrator.registry().get(provider)?;
        Ok(self.orchestrator.credentials().reset_usage(provider, credential))
    }

    /// Clears cache entries matching `pattern`, or everything when no pattern is given.
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => self.orchestrator.cache().clear(pattern),
            None => self.orchestrator.cache().clear_all(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.orchestrator.cache().stats()
    }

    pub fn provider_status(&self, provider: &str) -> Result<ProviderStatus> {
        let handle = self.orchestrator.registry().get(provider)?;
        let credentials = self.orchestrator.credentials();
        Ok(ProviderStatus {
            provider: provider.to_string(),
            quota: self.orchestrator.quota().status(provider)?,
            recommended_delay: self.orchestrator.quota().recommended_delay(provider)?,
            health: handle.health.snapshot(),
            credentials: credentials.credentials(provider),
            next_credential_revival: credentials.next_revival(provider),
        })
    }

    /// Most recent rotation events first.
    pub fn rotation_history(&self, limit: usize) -> Vec<RotationEvent> {
        self.orchestrator.credentials().history(limit)
    }

    pub fn add_credential(&self, provider: &str, secret: SecretString, priority: Option<u32>) -> Result<bool> {
        self.orchestrator.registry().get(provider)?;
        Ok(self.orchestrator.credentials().add_key(provider, secret, priority))
    }

    pub fn remove_credential(&self, provider: &str, secret: &str) -> Result<bool> {
        self.orchestrator.registry().get(provider)?;
        Ok(self.orchestrator.credentials().remove_key(provider, secret))
    }

    pub async fn validate_credential(&self, provider: &str, secret: &str, probe: &dyn CredentialProbe) -> Result<bool> {
        self.orchestrator.registry().get(provider)?;
        Ok(self.orchestrator.credentials().validate_key(provider, secret, probe).await)
    }

    /// Manual recovery: forgets recorded calls and clears the provider's health state.
    #[instrument(skip(self))]
    pub fn reset_quota(&self, provider: &str) -> Result<()> {
        let handle = self.orchestrator.registry().get(provider)?;
        self.orchestrator.quota().reset(provider)?;
        handle.health.reset();
        info!(provider, "Provider quota and health reset by operator");
        Ok(())
    }
}
