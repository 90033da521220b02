// src/lib.rs

//! Resource governance for rate-limited sports data APIs.
//!
//! Four pieces sit between route handlers and the upstream providers:
//! [`QuotaTracker`] enforces per-provider ceilings, [`CredentialPool`] owns and
//! rotates API keys, [`RequestCoalescer`] caches results and collapses
//! concurrent identical requests, and [`FallbackOrchestrator`] ties them to the
//! persisted store, degrading to local data whenever a refresh is not possible.
//!
//! All state is per process. When several instances run side by side each
//! governs only its own calls; the persisted store remains the shared source
//! of truth.

pub mod admin;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod provider;
pub mod quota;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod transport;

// Re-exports of the main types
pub use admin::{Admin, ProviderStatus};
pub use cache::{canonical_key, CacheStatus, RequestCoalescer};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::AppConfig;
pub use credentials::{CredentialPool, CredentialState, RotationAction, RotationEvent};
pub use error::{AppError, FetchError, Result, StoreError, TransportError};
pub use orchestrator::{DataRequest, DataSource, FallbackOrchestrator, FallbackReason, FetchMeta, FetchResult};
pub use policy::{DataType, FreshnessPolicy};
pub use quota::{QuotaDecision, QuotaTracker};
pub use scheduler::{RefreshJob, RefreshScheduler};
pub use state::GovernorState;
pub use storage::{DataStore, InMemoryStore, StoredRow};
pub use transport::{CredentialProbe, Transport, UpstreamRequest};
