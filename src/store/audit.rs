//! Index consistency audit and repair.
//!
//! Because writes span several keys without a transaction, an interrupted
//! `put` or `delete_by_patient` can leave an index set pointing at a record
//! that is gone (dangling) or a record absent from a set it belongs in
//! (missing). [`RecordStore::audit`] finds both; [`RecordStore::repair`]
//! fixes them using the record maps as the source of truth.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::record::FieldMap;

use super::{
    index_keys_for, BackendResult, RecordStore, PATIENT_PREFIX, PROVIDER_PREFIX, RECORD_PREFIX,
    TYPE_PREFIX,
};

/// One (index set, record id) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IndexEntry {
    pub index: String,
    pub id: String,
}

/// Result of an audit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Records found in the record table.
    pub records: usize,
    /// Index members whose record is missing or no longer matches the set.
    pub dangling: Vec<IndexEntry>,
    /// Records absent from an index set their fields place them in.
    pub missing: Vec<IndexEntry>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.missing.is_empty()
    }
}

impl RecordStore {
    /// Compare every index set against the record table.
    pub async fn audit(&self) -> BackendResult<ConsistencyReport> {
        let mut records: HashMap<String, FieldMap> = HashMap::new();
        for key in self.backend.keys_with_prefix(RECORD_PREFIX).await? {
            if let Some(fields) = self.backend.read_map(&key).await? {
                let id = key[RECORD_PREFIX.len()..].to_string();
                records.insert(id, fields);
            }
        }

        let mut report = ConsistencyReport {
            records: records.len(),
            ..Default::default()
        };

        let mut indexed: HashSet<IndexEntry> = HashSet::new();
        for prefix in [PATIENT_PREFIX, TYPE_PREFIX, PROVIDER_PREFIX] {
            for index in self.backend.keys_with_prefix(prefix).await? {
                for id in self.backend.set_members(&index).await? {
                    let belongs = records
                        .get(&id)
                        .is_some_and(|fields| index_keys_for(fields).contains(&index));
                    let entry = IndexEntry {
                        index: index.clone(),
                        id,
                    };
                    if !belongs {
                        report.dangling.push(entry.clone());
                    }
                    indexed.insert(entry);
                }
            }
        }

        for (id, fields) in &records {
            for index in index_keys_for(fields) {
                let entry = IndexEntry {
                    index,
                    id: id.clone(),
                };
                if !indexed.contains(&entry) {
                    report.missing.push(entry);
                }
            }
        }

        report.dangling.sort();
        report.missing.sort();
        Ok(report)
    }

    /// Audit, then remove dangling members and add missing ones.
    ///
    /// Returns the report describing what was fixed.
    pub async fn repair(&self) -> BackendResult<ConsistencyReport> {
        let report = self.audit().await?;
        for entry in &report.dangling {
            tracing::warn!(index = %entry.index, id = %entry.id, "removing dangling index entry");
            self.backend.set_remove(&entry.index, &entry.id).await?;
        }
        for entry in &report.missing {
            tracing::warn!(index = %entry.index, id = %entry.id, "restoring missing index entry");
            self.backend.set_add(&entry.index, &entry.id).await?;
        }
        Ok(report)
    }
}
