// src/storage/memory.rs

use crate::cache::canonical_key;
use crate::error::StoreError;
use crate::policy::DataType;
use crate::storage::{DataStore, StoredRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// Identity of a row for upsert purposes: its `id` field when present, else the whole row.
fn row_identity(row: &serde_json::Value) -> String {
    match row.get("id") {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(id) => id.to_string(),
        None => row.to_string(),
    }
}

/// In-memory implementation of the data store, keyed by entity set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<String, BTreeMap<String, StoredRow>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row_count(&self, data_type: &DataType, params: &BTreeMap<String, String>) -> usize {
        let key = canonical_key(data_type, params);
        self.tables.read().await.get(&key).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn read(
        &self,
        data_type: &DataType,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let key = canonical_key(data_type, params);
        trace!("InMemoryStore::read: waiting for read lock");
        let tables = self.tables.read().await;
        trace!("InMemoryStore::read: got read lock");
        Ok(tables
            .get(&key)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        data_type: &DataType,
        params: &BTreeMap<String, String>,
        rows: &[serde_json::Value],
        updated_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let key = canonical_key(data_type, params);
        trace!("InMemoryStore::upsert: waiting for write lock");
        let mut tables = self.tables.write().await;
        trace!("InMemoryStore::upsert: got write lock");
        let table = tables.entry(key).or_default();
        for row in rows {
            table.insert(
                row_identity(row),
                StoredRow {
                    data: row.clone(),
                    last_updated_at: updated_at,
                },
            );
        }
        Ok(rows.len())
    }
}
