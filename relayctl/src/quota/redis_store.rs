use super::{CounterStore, CounterStoreError};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

// Expiry is only set by the increment that creates the key, inside the same script, so a
// counter can never be left without a TTL.
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
  redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

/// Quota counters in Redis, shared by every gateway instance.
pub struct RedisCounterStore {
    client: redis::Client,
    prefix: String,
    timeout: Duration,
    script: redis::Script,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCounterStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, CounterStoreError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            prefix: "relayctl".to_string(),
            timeout: Duration::from_millis(500),
            script: redis::Script::new(INCR_WITH_EXPIRY_SCRIPT),
            conn: Mutex::new(None),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let cached = self.conn.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *self.conn.lock() = Some(conn.clone());
        Ok(conn)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, redis::RedisError> {
        let mut conn = self.connection().await?;
        let result = self
            .script
            .key(self.key(key))
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await;
        if result.is_err() {
            // Reconnect on the next call
            *self.conn.lock() = None;
        }
        result
    }
}

#[async_trait::async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError> {
        match tokio::time::timeout(self.timeout, self.incr(key, ttl)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CounterStoreError::Timeout(self.timeout)),
        }
    }
}
