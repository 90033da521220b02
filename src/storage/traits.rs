// src/storage/traits.rs

use crate::error::StoreError;
use crate::policy::DataType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A persisted domain row together with the time it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub data: serde_json::Value,
    pub last_updated_at: DateTime<Utc>,
}

/// Persistence callback for domain rows. The relational store behind it is not part of this crate.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Rows currently held for the requested entity set.
    async fn read(
        &self,
        data_type: &DataType,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<StoredRow>, StoreError>;

    /// Insert-or-update rows, stamping them with `updated_at`. Returns how many rows were written.
    async fn upsert(
        &self,
        data_type: &DataType,
        params: &BTreeMap<String, String>,
        rows: &[serde_json::Value],
        updated_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}
