//! Redis-backed [`Backend`] implementation (cargo feature `redis`).
//!
//! Maps are Redis hashes, sets are Redis sets. Replacing a map is a
//! `MULTI`/`EXEC` pipeline of `DEL` + `HSET`, so readers never observe a
//! half-written record. Prefix enumeration uses `SCAN MATCH` rather than
//! `KEYS` to avoid blocking the server.
//!
//! All replies are requested as `String`, so byte decoding happens inside the
//! driver and a non-UTF-8 value surfaces as a [`BackendError`].

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisResult};

use crate::config::RedisConfig;
use crate::error::BackendError;
use crate::record::FieldMap;

use super::backend::{Backend, BackendResult};

const SCAN_BATCH: usize = 500;

/// Redis implementation of the [`Backend`] trait.
pub struct RedisBackend {
    conn: MultiplexedConnection,
    retry_on_timeout: bool,
}

impl RedisBackend {
    pub async fn open(config: &RedisConfig) -> BackendResult<Self> {
        let target = format!("{}:{}/{}", config.host, config.port, config.db);
        let addr = if config.ssl {
            ConnectionAddr::TcpTls {
                host: config.host.clone(),
                port: config.port,
                insecure: false,
                tls_params: None,
            }
        } else {
            ConnectionAddr::Tcp(config.host.clone(), config.port)
        };
        let info = ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: config.db,
                username: config.username.clone(),
                password: config.password.clone(),
                ..Default::default()
            },
        };

        let client =
            redis::Client::open(info).map_err(|e| BackendError::new("connect", &target, e))?;
        let conn = client
            .get_multiplexed_async_connection_with_timeouts(
                Duration::from_secs(config.socket_timeout_secs),
                Duration::from_secs(config.connect_timeout_secs),
            )
            .await
            .map_err(|e| BackendError::new("connect", &target, e))?;

        tracing::info!(target = %target, tls = config.ssl, "connected to redis");
        Ok(Self {
            conn,
            retry_on_timeout: config.retry_on_timeout,
        })
    }

    /// Run one command on a fresh handle to the multiplexed connection,
    /// retrying once on timeout when configured to.
    async fn run<T, F, Fut>(&self, op: &'static str, key: &str, command: F) -> BackendResult<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let result = match command(self.conn.clone()).await {
            Err(e) if e.is_timeout() && self.retry_on_timeout => {
                tracing::warn!(op, key, "redis command timed out, retrying once");
                command(self.conn.clone()).await
            }
            other => other,
        };
        result.map_err(|e| BackendError::new(op, key, e))
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn glob_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl Backend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn write_map(&self, key: &str, fields: &FieldMap) -> BackendResult<()> {
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(f, v)| (f.as_str(), v.as_str()))
            .collect();
        self.run("write_map", key, |mut conn| {
            let items = &items;
            async move {
                let mut pipe = redis::pipe();
                pipe.atomic().del(key).ignore();
                if !items.is_empty() {
                    pipe.hset_multiple(key, items).ignore();
                }
                pipe.query_async(&mut conn).await
            }
        })
        .await
    }

    async fn read_map(&self, key: &str) -> BackendResult<Option<FieldMap>> {
        let map: FieldMap = self
            .run("read_map", key, |mut conn| async move { conn.hgetall(key).await })
            .await?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.run("delete", key, |mut conn| async move { conn.del(key).await })
            .await
    }

    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()> {
        self.run("set_add", key, |mut conn| async move {
            conn.sadd(key, member).await
        })
        .await
    }

    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()> {
        self.run("set_remove", key, |mut conn| async move {
            conn.srem(key, member).await
        })
        .await
    }

    async fn set_members(&self, key: &str) -> BackendResult<HashSet<String>> {
        self.run("set_members", key, |mut conn| async move {
            conn.smembers(key).await
        })
        .await
    }

    async fn set_intersect(&self, keys: &[String]) -> BackendResult<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let label = keys.join(",");
        self.run("set_intersect", &label, |mut conn| async move {
            conn.sinter(keys).await
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let pattern = glob_prefix(prefix);
        let mut cursor: u64 = 0;
        let mut keys = HashSet::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run("keys_with_prefix", prefix, |mut conn| {
                    let pattern = &pattern;
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(pattern)
                            .arg("COUNT")
                            .arg(SCAN_BATCH)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;
            // SCAN may return a key more than once across batches.
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }

    async fn ping(&self) -> BackendResult<()> {
        let _pong: String = self
            .run("ping", "", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_prefix_escapes_metacharacters() {
        assert_eq!(glob_prefix("patient:"), "patient:*");
        assert_eq!(glob_prefix("provider:Dr. [X]*"), "provider:Dr. \\[X\\]\\**");
    }
}
