//! In-memory [`Backend`] for tests and single-process use.
//!
//! Maps and sets live in `HashMap`s behind `std::sync::RwLock`. Nothing is
//! persisted; dropping the backend drops the data.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::BackendError;
use crate::record::FieldMap;

use super::backend::{Backend, BackendResult};

#[derive(Default)]
struct Keyspace {
    maps: HashMap<String, FieldMap>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory key-value backend.
pub struct InMemoryBackend {
    inner: RwLock<Keyspace>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Keyspace::default()),
        }
    }

    fn read(&self, op: &'static str, key: &str) -> BackendResult<RwLockReadGuard<'_, Keyspace>> {
        self.inner
            .read()
            .map_err(|_| BackendError::new(op, key, "in-memory keyspace lock poisoned"))
    }

    fn write(&self, op: &'static str, key: &str) -> BackendResult<RwLockWriteGuard<'_, Keyspace>> {
        self.inner
            .write()
            .map_err(|_| BackendError::new(op, key, "in-memory keyspace lock poisoned"))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_map(&self, key: &str, fields: &FieldMap) -> BackendResult<()> {
        let mut ks = self.write("write_map", key)?;
        if fields.is_empty() {
            ks.maps.remove(key);
        } else {
            ks.maps.insert(key.to_string(), fields.clone());
        }
        Ok(())
    }

    async fn read_map(&self, key: &str) -> BackendResult<Option<FieldMap>> {
        let ks = self.read("read_map", key)?;
        Ok(ks.maps.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let mut ks = self.write("delete", key)?;
        ks.maps.remove(key);
        ks.sets.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()> {
        let mut ks = self.write("set_add", key)?;
        ks.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()> {
        let mut ks = self.write("set_remove", key)?;
        if let Some(set) = ks.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                ks.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> BackendResult<HashSet<String>> {
        let ks = self.read("set_members", key)?;
        Ok(ks.sets.get(key).cloned().unwrap_or_default())
    }

    async fn set_intersect(&self, keys: &[String]) -> BackendResult<HashSet<String>> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(HashSet::new());
        };
        let ks = self.read("set_intersect", first)?;
        let Some(base) = ks.sets.get(first) else {
            return Ok(HashSet::new());
        };
        Ok(base
            .iter()
            .filter(|m| {
                rest.iter()
                    .all(|k| ks.sets.get(k).is_some_and(|s| s.contains(*m)))
            })
            .cloned()
            .collect())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let ks = self.read("keys_with_prefix", prefix)?;
        Ok(ks
            .maps
            .keys()
            .chain(ks.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
