// src/scheduler.rs

use crate::config::ScheduleConfig;
use crate::error::Result;
use crate::orchestrator::{DataRequest, FallbackOrchestrator, FetchResult};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A periodic forced refresh of one entity set.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub name: String,
    pub request: DataRequest,
    pub providers: Vec<String>,
    pub every: Duration,
}

impl RefreshJob {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        let mut request = DataRequest::new(config.data_type.as_str()).force_refresh();
        request.params = config.params.clone();
        Self {
            name: config.name.clone(),
            request,
            providers: config.providers.clone(),
            every: Duration::from_secs(config.interval_secs.max(1)),
        }
    }
}

/// Runs refresh jobs on fixed intervals until the orchestrator shuts down.
#[derive(Debug)]
pub struct RefreshScheduler {
    orchestrator: FallbackOrchestrator,
    jobs: Vec<RefreshJob>,
}

impl RefreshScheduler {
    pub fn new(orchestrator: FallbackOrchestrator, jobs: Vec<RefreshJob>) -> Self {
        Self { orchestrator, jobs }
    }

    pub fn from_config(orchestrator: FallbackOrchestrator, schedule: &[ScheduleConfig]) -> Self {
        Self::new(orchestrator, schedule.iter().map(RefreshJob::from_config).collect())
    }

    pub fn jobs(&self) -> &[RefreshJob] {
        &self.jobs
    }

    /// Runs one job immediately.
    pub async fn run_once(&self, job: &RefreshJob) -> Result<FetchResult> {
        self.orchestrator.fetch_with_policy(&job.request, &job.providers).await
    }

    /// Spawns one task per job. The first run happens immediately.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        info!(jobs = self.jobs.len(), "Starting refresh scheduler");
        self.jobs
            .into_iter()
            .map(|job| {
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(run_job(orchestrator, job))
            })
            .collect()
    }
}

async fn run_job(orchestrator: FallbackOrchestrator, job: RefreshJob) {
    let shutdown = orchestrator.shutdown_token();
    let mut ticker = interval(job.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(job = %job.name, "Refresh job stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match orchestrator.fetch_with_policy(&job.request, &job.providers).await {
            Ok(result) if result.meta.fallback_reason.is_some() => {
                warn!(
                    job = %job.name,
                    source = %result.source,
                    reason = ?result.meta.fallback_reason,
                    "Scheduled refresh fell back to local data"
                );
            }
            Ok(result) => {
                info!(job = %job.name, source = %result.source, rows = result.data.len(), "Scheduled refresh completed");
            }
            Err(e) => {
                error!(job = %job.name, error = %e, "Scheduled refresh failed");
            }
        }
    }
}
