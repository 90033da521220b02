// src/state.rs

use crate::admin::Admin;
use crate::cache::RequestCoalescer;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{AppConfig, ConfigValidator};
use crate::credentials::{CredentialPool, RotationPolicy};
use crate::error::Result;
use crate::orchestrator::{Collaborators, FallbackOrchestrator};
use crate::policy::FreshnessPolicy;
use crate::provider::ProviderRegistry;
use crate::quota::QuotaTracker;
use crate::scheduler::RefreshScheduler;
use crate::storage::DataStore;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::info;

/// Every governance component, built once from configuration.
#[derive(Debug, Clone)]
pub struct GovernorState {
    pub orchestrator: FallbackOrchestrator,
    pub admin: Admin,
    config: Arc<AppConfig>,
}

impl GovernorState {
    /// Builds the governor using the system clock.
    pub fn new(config: AppConfig, store: Arc<dyn DataStore>, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_clock(config, store, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AppConfig,
        store: Arc<dyn DataStore>,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
    ) -> Result<Self> {
        ConfigValidator::validate(&config)?;
        info!("Creating governor state: providers, quotas and credential pools");

        let registry = ProviderRegistry::from_config(&config, Arc::clone(&clock));

        let quota = QuotaTracker::new(Arc::clone(&clock));
        for provider in registry.iter() {
            quota.register(&provider.name, &provider.limits, provider.burst_window);
        }

        let credentials = CredentialPool::new(
            RotationPolicy {
                failure_threshold: config.failure_threshold,
                cooldown: config.cooldown(),
                max_history: config.max_history,
            },
            Arc::clone(&clock),
        );
        for provider in &config.providers {
            for credential in &provider.credentials {
                credentials.add_key(&provider.name, credential.secret.clone(), credential.priority);
            }
        }

        let policy = FreshnessPolicy::from_seconds(&config.cache_ttl_secs, &config.max_age_secs);
        let cache = RequestCoalescer::new(policy, config.cache_max_entries, Arc::clone(&clock));

        let orchestrator = FallbackOrchestrator::new(
            registry,
            quota,
            credentials,
            cache,
            Collaborators { store, transport, clock },
            config.request_timeout(),
        );
        info!(providers = config.providers.len(), "Governor state ready");

        Ok(Self {
            admin: Admin::new(orchestrator.clone()),
            orchestrator,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::from_config(self.orchestrator.clone(), &self.config.schedule)
    }

    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}
