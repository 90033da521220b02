// src/error.rs
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Crate-level error.
///
/// Staleness, quota denial and credential exhaustion never show up here: those
/// are reported through [`crate::orchestrator::FetchMeta`]. Only configuration
/// problems, unknown providers, store failures and transport failures that
/// have no fallback data reach the caller as an `AppError`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String, line: Option<usize> },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },

    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("Store failure for '{data_type}': {message}")]
    StoreFailure { data_type: String, message: String },

    #[error("Transport failure for provider '{provider}': {message}")]
    Transport { provider: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl AppError {
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    pub fn unknown_provider(provider: impl Into<String>) -> Self {
        Self::UnknownProvider {
            provider: provider.into(),
        }
    }

    /// True for errors that abort the current request regardless of fallback data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreFailure { .. })
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            Self::StoreFailure { .. } | Self::Io { .. } => {
                error!(error = %self, "Governor error occurred");
            }
            _ => {
                warn!(error = %self, "Governor request failed");
            }
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            operation: "io".to_string(),
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            message: e.to_string(),
            line: e.location().map(|loc| loc.line()),
        }
    }
}

impl From<std::fmt::Error> for AppError {
    fn from(e: std::fmt::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure reported by the injected transport or credential probe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Failed(String),

    #[error("credential rejected by provider: {0}")]
    Unauthorized(String),

    /// The provider reports the credential's own quota spent (HTTP 429).
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// Failure reported by the injected persistence callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct StoreError {
    pub operation: String,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Outcome shared by every subscriber of one coalesced upstream call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("quota exceeded for provider '{provider}', retry after {retry_after:?}")]
    QuotaExceeded { provider: String, retry_after: Duration },

    #[error("no credential available for provider '{provider}'")]
    NoCredentialAvailable { provider: String },

    #[error("provider '{provider}' is cooling down, retry after {retry_after:?}")]
    ProviderCoolingDown { provider: String, retry_after: Duration },

    #[error("transport failure for provider '{provider}': {source}")]
    Transport {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("no provider candidates supplied")]
    NoProviders,
}

impl FetchError {
    /// Quota and credential exhaustion are recoverable by waiting or falling back.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. }
                | Self::NoCredentialAvailable { .. }
                | Self::ProviderCoolingDown { .. }
                | Self::NoProviders
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::QuotaExceeded { retry_after, .. } | Self::ProviderCoolingDown { retry_after, .. } => {
                Some(*retry_after)
            }
            Self::Transport {
                source: TransportError::RateLimited { retry_after },
                ..
            } => *retry_after,
            _ => None,
        }
    }
}
