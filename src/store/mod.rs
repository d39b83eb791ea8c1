//! Tag-indexed record store.
//!
//! Each record lives as a flat field map under `health_record:<id>`. Three
//! families of secondary index sets point back at record ids:
//!
//! | Index key | Members |
//! |-----------|---------|
//! | `patient:<patient_id>` | ids of that patient's records |
//! | `type:<record_type>` | ids of records of that variant |
//! | `provider:<provider>` | ids of records naming that provider (only when non-empty) |
//!
//! The record map is authoritative; index sets are advisory. Queries
//! intersect index sets and skip ids whose record has gone. Deletion
//! re-reads each record to learn which index sets still reference it.
//!
//! There is no cross-key transaction. A write that fails part-way leaves the
//! keyspace inconsistent until the operation is re-run or
//! [`RecordStore::repair`] is called.

pub mod audit;
pub mod backend;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod sqlite_store;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::record::{self, FieldMap, HealthRecord, RecordType};

pub use audit::{ConsistencyReport, IndexEntry};
pub use backend::{Backend, BackendResult};
pub use memory::InMemoryBackend;
pub use sqlite_store::SqliteBackend;

pub const RECORD_PREFIX: &str = "health_record:";
pub const PATIENT_PREFIX: &str = "patient:";
pub const TYPE_PREFIX: &str = "type:";
pub const PROVIDER_PREFIX: &str = "provider:";

pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

pub fn patient_key(patient_id: &str) -> String {
    format!("{}{}", PATIENT_PREFIX, patient_id)
}

pub fn type_key(record_type: &str) -> String {
    format!("{}{}", TYPE_PREFIX, record_type)
}

pub fn provider_key(provider: &str) -> String {
    format!("{}{}", PROVIDER_PREFIX, provider)
}

/// Index sets a stored field map belongs in: patient, type, then provider
/// when one is named.
pub fn index_keys_for(fields: &FieldMap) -> Vec<String> {
    let mut keys = Vec::with_capacity(3);
    if let Some(patient_id) = fields.get("patient_id") {
        keys.push(patient_key(patient_id));
    }
    if let Some(record_type) = fields.get("type") {
        keys.push(type_key(record_type));
    }
    if let Some(provider) = fields.get("provider").filter(|p| !p.is_empty()) {
        keys.push(provider_key(provider));
    }
    keys
}

/// Filter for [`RecordStore::query`]. Every supplied predicate must match.
///
/// Empty strings count as absent. The record type is matched as an opaque
/// tag and never validated here.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub patient_id: Option<String>,
    pub record_type: Option<String>,
    pub provider: Option<String>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Index keys of the active predicates.
    fn index_keys(&self) -> Vec<String> {
        let active = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        [
            active(&self.patient_id).map(|p| patient_key(&p)),
            active(&self.record_type).map(|t| type_key(&t)),
            active(&self.provider).map(|p| provider_key(&p)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Record counts, by variant and overall.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Health record repository over a [`Backend`].
///
/// Construct one at process start ([`RecordStore::open`] or
/// [`RecordStore::new`]), hand clones of the `Arc` to whatever needs it, and
/// call [`RecordStore::close`] at shutdown.
pub struct RecordStore {
    backend: Arc<dyn Backend>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Open the backend selected by `[store].backend`.
    pub async fn open(config: &Config) -> BackendResult<Self> {
        let backend: Arc<dyn Backend> = match config.store.backend {
            BackendKind::Memory => Arc::new(InMemoryBackend::new()),
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.sqlite).await?),
            #[cfg(feature = "redis")]
            BackendKind::Redis => Arc::new(redis_store::RedisBackend::open(&config.redis).await?),
            #[cfg(not(feature = "redis"))]
            BackendKind::Redis => {
                return Err(crate::error::BackendError::new(
                    "connect",
                    &config.redis.host,
                    "built without the `redis` feature",
                ))
            }
        };
        backend.ping().await?;
        tracing::info!(backend = backend.name(), "record store opened");
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn close(&self) -> BackendResult<()> {
        tracing::debug!(backend = self.backend.name(), "closing record store");
        self.backend.close().await
    }

    /// Validate input, build the record and store it.
    pub async fn create(
        &self,
        record_type: &str,
        patient_id: &str,
        provider: Option<&str>,
        fields: &FieldMap,
    ) -> Result<FieldMap> {
        let record = record::build(record_type, patient_id, provider, fields)?;
        Ok(self.put(&record).await?)
    }

    /// Store a record and add it to its index sets.
    ///
    /// Returns the rendered field map. An existing map under the same id is
    /// replaced. On failure nothing is rolled back; re-run the whole `put`.
    pub async fn put(&self, record: &HealthRecord) -> BackendResult<FieldMap> {
        let fields = record::render(record);
        self.backend
            .write_map(&record_key(record.id()), &fields)
            .await?;
        for key in index_keys_for(&fields) {
            self.backend.set_add(&key, record.id()).await?;
        }
        tracing::debug!(
            id = record.id(),
            patient_id = record.patient_id(),
            record_type = %record.record_type(),
            "record stored"
        );
        Ok(fields)
    }

    /// Fetch one record by id.
    pub async fn get(&self, id: &str) -> BackendResult<Option<FieldMap>> {
        self.backend.read_map(&record_key(id)).await
    }

    /// Records matching every supplied predicate, in no particular order.
    ///
    /// With no predicates, returns every record reachable from a patient
    /// index set.
    pub async fn query(&self, query: &RecordQuery) -> BackendResult<Vec<FieldMap>> {
        let keys = query.index_keys();
        let ids = match keys.as_slice() {
            [] => self.all_indexed_ids().await?,
            [single] => self.backend.set_members(single).await?,
            _ => self.backend.set_intersect(&keys).await?,
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.backend.read_map(&record_key(id)).await? {
                Some(fields) => records.push(fields),
                None => tracing::warn!(id = %id, "index references missing record, skipping"),
            }
        }
        tracing::debug!(predicates = keys.len(), matched = records.len(), "query evaluated");
        Ok(records)
    }

    async fn all_indexed_ids(&self) -> BackendResult<HashSet<String>> {
        let mut ids = HashSet::new();
        for bucket in self.backend.keys_with_prefix(PATIENT_PREFIX).await? {
            ids.extend(self.backend.set_members(&bucket).await?);
        }
        Ok(ids)
    }

    /// Delete every record of `patient_id` and drop it from all index sets.
    ///
    /// Reads the patient's own index set, then re-reads each record and only
    /// deletes those whose stored `patient_id` matches. Ids in the set with no
    /// matching record are removed from the set and not counted. Returns the
    /// number of records removed; `0` when there were none.
    ///
    /// Not atomic: on error some records may already be gone. The error is
    /// returned so the caller can re-run the operation.
    pub async fn delete_by_patient(&self, patient_id: &str) -> BackendResult<usize> {
        let bucket = patient_key(patient_id);
        let ids = self.backend.set_members(&bucket).await?;

        let mut deleted = 0;
        for id in &ids {
            let key = record_key(id);
            match self.backend.read_map(&key).await? {
                Some(fields) if fields.get("patient_id").map(String::as_str) == Some(patient_id) => {
                    for index in index_keys_for(&fields).iter().filter(|k| **k != bucket) {
                        self.backend.set_remove(index, id).await?;
                    }
                    self.backend.delete(&key).await?;
                    // Patient set last, so a retried delete still finds the record.
                    self.backend.set_remove(&bucket, id).await?;
                    deleted += 1;
                }
                _ => {
                    tracing::warn!(id = %id, bucket = %bucket, "dropping stale patient index entry");
                    self.backend.set_remove(&bucket, id).await?;
                }
            }
        }

        tracing::info!(patient_id, deleted, "patient records deleted");
        Ok(deleted)
    }

    /// Total record count and per-variant counts.
    ///
    /// Both come from the record table, so index sets that have drifted do
    /// not skew the numbers; [`RecordStore::audit`] reports those.
    pub async fn stats(&self) -> BackendResult<StoreStats> {
        let mut by_type: BTreeMap<String, usize> = RecordType::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), 0))
            .collect();
        let mut total = 0;
        for key in self.backend.keys_with_prefix(RECORD_PREFIX).await? {
            let Some(fields) = self.backend.read_map(&key).await? else {
                continue;
            };
            total += 1;
            if let Some(record_type) = fields.get("type") {
                *by_type.entry(record_type.clone()).or_insert(0) += 1;
            }
        }
        Ok(StoreStats { total, by_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keys_for_skips_empty_provider() {
        let mut fields = FieldMap::new();
        fields.insert("patient_id".into(), "123".into());
        fields.insert("type".into(), "lab_result".into());
        fields.insert("provider".into(), String::new());
        assert_eq!(index_keys_for(&fields), vec!["patient:123", "type:lab_result"]);

        fields.insert("provider".into(), "Dr. Smith".into());
        assert_eq!(
            index_keys_for(&fields),
            vec!["patient:123", "type:lab_result", "provider:Dr. Smith"]
        );
    }

    #[test]
    fn test_query_index_keys_ignore_empty_predicates() {
        assert!(RecordQuery::new().index_keys().is_empty());

        let q = RecordQuery::new().with_patient("").with_type("prescription");
        assert_eq!(q.index_keys(), vec!["type:prescription"]);

        let q = RecordQuery::new()
            .with_patient("1")
            .with_type("lab_result")
            .with_provider("Dr. Jones");
        assert_eq!(
            q.index_keys(),
            vec!["patient:1", "type:lab_result", "provider:Dr. Jones"]
        );
    }
}
