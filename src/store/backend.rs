//! Key-value backend abstraction.
//!
//! The [`Backend`] trait is the narrow surface the record store needs from
//! its storage service: flat string maps under a key, string sets under a
//! key, set intersection, and key enumeration by prefix. Every operation is
//! atomic on its own key; nothing spans keys.
//!
//! Implementations decode whatever the storage hands back into `String`
//! before returning, so the store never deals with raw bytes.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`write_map`](Backend::write_map) | Replace the map stored under a key |
//! | [`read_map`](Backend::read_map) | Read a whole map |
//! | [`delete`](Backend::delete) | Remove a key of any kind |
//! | [`set_add`](Backend::set_add) / [`set_remove`](Backend::set_remove) | Set membership |
//! | [`set_members`](Backend::set_members) | List a set |
//! | [`set_intersect`](Backend::set_intersect) | Members common to every listed set |
//! | [`keys_with_prefix`](Backend::keys_with_prefix) | Enumerate keys |

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::record::FieldMap;

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs (`memory`, `sqlite`, `redis`).
    fn name(&self) -> &'static str;

    /// Store `fields` under `key`, replacing any previous map there.
    async fn write_map(&self, key: &str, fields: &FieldMap) -> BackendResult<()>;

    /// Read the map under `key`. Absent keys and empty maps read as `None`.
    async fn read_map(&self, key: &str) -> BackendResult<Option<FieldMap>>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()>;

    /// Remove `member` from the set. Absent members are a no-op; a set left
    /// empty disappears.
    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()>;

    async fn set_members(&self, key: &str) -> BackendResult<HashSet<String>>;

    /// Members present in every set named by `keys`. An empty `keys` slice
    /// yields an empty set.
    async fn set_intersect(&self, keys: &[String]) -> BackendResult<HashSet<String>>;

    /// All keys (maps or sets) starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Round-trip check that the backend is reachable.
    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Release connections. The backend must not be used afterwards.
    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}
