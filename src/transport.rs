// src/transport.rs

use crate::error::TransportError;
use crate::policy::DataType;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::BTreeMap;

/// One outbound call as seen by the injected transport.
#[derive(Debug, Clone)]
pub struct UpstreamRequest<'a> {
    pub provider: &'a str,
    pub base_url: Option<&'a str>,
    pub data_type: &'a DataType,
    pub params: &'a BTreeMap<String, String>,
    pub credential: &'a SecretString,
}

/// The actual HTTP client lives outside this crate. Implementations return the
/// provider's records as JSON values, already mapped to the store's shape.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: UpstreamRequest<'_>) -> Result<Vec<serde_json::Value>, TransportError>;
}

/// Lightweight check that a credential is still accepted by its provider.
#[async_trait]
pub trait CredentialProbe: Send + Sync {
    async fn probe(&self, provider: &str, credential: &SecretString) -> Result<(), TransportError>;
}
