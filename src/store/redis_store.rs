//! Redis store backend.
//!
//! The connection is established lazily on the first primitive call. A
//! [`ConnectionManager`] is shared by all callers and re-dials on its own
//! after the server drops the connection.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, IntoConnectionInfo, RedisResult, Script};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::store::{check_ttl, KeyValueStore};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Dial attempts before a call reports the store as unreachable.
const CONNECT_RETRIES: usize = 2;

// == Redis Store ==
/// [`KeyValueStore`] backed by a Redis server.
pub struct RedisStore {
    client: Client,
    manager: OnceCell<ConnectionManager>,
    compare_and_delete: Script,
    label: String,
}

impl RedisStore {
    /// Creates a store from configuration without connecting.
    ///
    /// Fails with [`CacheError::Configuration`] when the connection string
    /// is missing or invalid.
    pub fn new(config: &Config) -> Result<Self> {
        let conn = config.validate()?;
        let mut info = conn.into_connection_info().map_err(|e| {
            CacheError::Configuration(format!("invalid Redis connection string: {e}"))
        })?;
        info.redis.db = config.db_index;

        let label = match &config.db_name {
            Some(name) => format!("{}/{} ({})", info.addr, config.db_index, name),
            None => format!("{}/{}", info.addr, config.db_index),
        };

        let client = Client::open(info)
            .map_err(|e| CacheError::Configuration(format!("failed to create redis client: {e}")))?;

        info!("Redis store configured for {}", label);

        Ok(Self {
            client,
            manager: OnceCell::new(),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            label,
        })
    }

    /// Returns a handle to the shared connection, dialing on first use.
    ///
    /// A failed first dial leaves the cell empty so the next call tries again.
    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                debug!("Connecting to Redis at {}", self.label);
                let config = ConnectionManagerConfig::new().set_number_of_retries(CONNECT_RETRIES);
                ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(|e| CacheError::Transport(format!("failed to connect redis: {e}")))
            })
            .await?;
        Ok(manager.clone())
    }

    /// Runs one command, surfacing failures as transport errors.
    async fn run<T, F, Fut>(&self, op: &'static str, command: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        command(conn)
            .await
            .map_err(|err| CacheError::Transport(format!("Redis {op} failed: {err}")))
    }
}

/// Expiry in milliseconds for PX / PEXPIRE, which reject zero.
fn millis(ttl: Duration) -> Result<u64> {
    check_ttl(ttl)?;
    let ms = u64::try_from(ttl.as_millis())
        .map_err(|_| CacheError::InvalidRequest(format!("TTL {ttl:?} out of range")))?;
    Ok(ms.max(1))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let px = millis(ttl)?;
        self.run("SET NX", |mut conn| async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(px)
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run("GET", |mut conn| async move {
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let px = ttl.map(millis).transpose()?;
        self.run("SET", |mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(px) = px {
                cmd.arg("PX").arg(px);
            }
            let _: () = cmd.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.run("DEL", |mut conn| async move {
            let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let px = millis(ttl)?;
        self.run("PEXPIRE", |mut conn| async move {
            let _: i64 = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(px)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run("EXISTS", |mut conn| async move {
            let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
            Ok(count > 0)
        })
        .await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let script = &self.compare_and_delete;
        self.run("compare-and-delete", |mut conn| async move {
            let deleted: i64 = script
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.run("PING", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
