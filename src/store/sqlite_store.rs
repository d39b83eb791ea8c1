//! SQLite-backed [`Backend`] implementation.
//!
//! Maps and sets are rows in two tables (`kv_maps`, `kv_sets`) keyed by the
//! same string keys a Redis deployment would use, so the store logic is
//! identical across backends.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::SqliteConfig;
use crate::db;
use crate::error::BackendError;
use crate::migrate;
use crate::record::FieldMap;

use super::backend::{Backend, BackendResult};

/// SQLite implementation of the [`Backend`] trait.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect to the configured database file and run migrations.
    pub async fn open(config: &SqliteConfig) -> BackendResult<Self> {
        let path = config.path.display().to_string();
        let pool = db::connect(config)
            .await
            .map_err(|e| BackendError::new("connect", &path, format!("{:#}", e)))?;
        migrate::run_migrations(&pool)
            .await
            .map_err(|e| BackendError::new("migrate", &path, e))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write_map(&self, key: &str, fields: &FieldMap) -> BackendResult<()> {
        let err = |e: sqlx::Error| BackendError::new("write_map", key, e);
        let mut tx = self.pool.begin().await.map_err(err)?;

        sqlx::query("DELETE FROM kv_maps WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(err)?;

        for (field, value) in fields {
            sqlx::query("INSERT INTO kv_maps (key, field, value) VALUES (?, ?, ?)")
                .bind(key)
                .bind(field)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(err)?;
        }

        tx.commit().await.map_err(err)?;
        Ok(())
    }

    async fn read_map(&self, key: &str) -> BackendResult<Option<FieldMap>> {
        let rows = sqlx::query("SELECT field, value FROM kv_maps WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BackendError::new("read_map", key, e))?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.iter()
                .map(|row| (row.get("field"), row.get("value")))
                .collect(),
        ))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let err = |e: sqlx::Error| BackendError::new("delete", key, e);
        let mut tx = self.pool.begin().await.map_err(err)?;
        sqlx::query("DELETE FROM kv_maps WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        sqlx::query("DELETE FROM kv_sets WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        tx.commit().await.map_err(err)?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()> {
        sqlx::query("INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?, ?)")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::new("set_add", key, e))?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()> {
        // A set with no rows does not exist, matching Redis semantics.
        sqlx::query("DELETE FROM kv_sets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::new("set_remove", key, e))?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> BackendResult<HashSet<String>> {
        let rows = sqlx::query("SELECT member FROM kv_sets WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BackendError::new("set_members", key, e))?;
        Ok(rows.iter().map(|row| row.get("member")).collect())
    }

    async fn set_intersect(&self, keys: &[String]) -> BackendResult<HashSet<String>> {
        let distinct: Vec<&String> = {
            let mut seen = HashSet::new();
            keys.iter().filter(|k| seen.insert(k.as_str())).collect()
        };
        if distinct.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; distinct.len()].join(", ");
        let sql = format!(
            "SELECT member FROM kv_sets WHERE key IN ({}) \
             GROUP BY member HAVING COUNT(DISTINCT key) = ?",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for key in &distinct {
            query = query.bind(key.as_str());
        }
        let rows = query
            .bind(distinct.len() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BackendError::new("set_intersect", keys.join(","), e))?;

        Ok(rows.iter().map(|row| row.get("member")).collect())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        // substr comparison: LIKE is case-insensitive for ASCII in SQLite.
        let len = prefix.chars().count() as i64;
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT key FROM kv_maps WHERE substr(key, 1, ?) = ?
            UNION
            SELECT DISTINCT key FROM kv_sets WHERE substr(key, 1, ?) = ?
            "#,
        )
        .bind(len)
        .bind(prefix)
        .bind(len)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BackendError::new("keys_with_prefix", prefix, e))?;

        Ok(rows.iter().map(|row| row.get("key")).collect())
    }

    async fn ping(&self) -> BackendResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::new("ping", "", e))?;
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp(tmp: &TempDir) -> SqliteBackend {
        let cfg = SqliteConfig {
            path: tmp.path().join("kv.sqlite"),
            max_connections: 1,
        };
        SqliteBackend::open(&cfg).await.unwrap()
    }

    #[tokio::test]
    async fn test_prefix_scan_is_literal_and_case_sensitive() {
        let tmp = TempDir::new().unwrap();
        let backend = open_temp(&tmp).await;
        backend.set_add("patient:p", "1").await.unwrap();
        backend.set_add("patient:P", "2").await.unwrap();
        backend.set_add("patient:p_x", "3").await.unwrap();
        backend.set_add("patient%", "4").await.unwrap();

        let mut keys = backend.keys_with_prefix("patient:p").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["patient:p", "patient:p_x"]);

        let keys = backend.keys_with_prefix("patient%").await.unwrap();
        assert_eq!(keys, vec!["patient%"]);
    }

    #[tokio::test]
    async fn test_intersect_ignores_repeated_keys() {
        let tmp = TempDir::new().unwrap();
        let backend = open_temp(&tmp).await;
        backend.set_add("a", "x").await.unwrap();
        backend.set_add("a", "y").await.unwrap();
        backend.set_add("b", "y").await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let both = backend.set_intersect(&keys).await.unwrap();
        assert_eq!(both, HashSet::from(["y".to_string()]));

        let only_a = backend.set_intersect(&["a".to_string(), "a".to_string()]).await.unwrap();
        assert_eq!(only_a.len(), 2);
    }

    #[tokio::test]
    async fn test_map_replace_and_delete() {
        let tmp = TempDir::new().unwrap();
        let backend = open_temp(&tmp).await;
        let mut fields = FieldMap::new();
        fields.insert("a".into(), "1".into());
        fields.insert("b".into(), "2".into());
        backend.write_map("m", &fields).await.unwrap();

        fields.remove("b");
        backend.write_map("m", &fields).await.unwrap();
        assert_eq!(backend.read_map("m").await.unwrap(), Some(fields));

        backend.delete("m").await.unwrap();
        backend.delete("m").await.unwrap();
        assert_eq!(backend.read_map("m").await.unwrap(), None);
    }
}
