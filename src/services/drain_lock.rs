use async_trait::async_trait;
use redis::Script;
use thiserror::Error;
use uuid::Uuid;

use crate::core::redis::RedisHandle;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    end
    return 0
"#;

#[derive(Debug, Error)]
#[error("drain lock backend error: {0}")]
pub(crate) struct LockError(String);

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        Self(err.to_string())
    }
}

/// Mutual exclusion between drains of the same queue.
#[async_trait]
pub(crate) trait DrainLock: Send + Sync {
    /// Returns the holder token, or `None` when another drain holds the lock.
    async fn try_acquire(&self) -> Result<Option<String>, LockError>;

    /// Releases the lock if `token` still owns it.
    async fn release(&self, token: &str) -> Result<bool, LockError>;
}

#[derive(Clone)]
pub(crate) struct RedisDrainLock {
    redis: RedisHandle,
    key: String,
    ttl_ms: u64,
}

impl RedisDrainLock {
    pub(crate) fn new(redis: RedisHandle, queue_name: &str, ttl: std::time::Duration) -> Self {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        Self { redis, key: format!("exam-ingest:drain-lock:{queue_name}"), ttl_ms }
    }
}

#[async_trait]
impl DrainLock for RedisDrainLock {
    async fn try_acquire(&self) -> Result<Option<String>, LockError> {
        let mut conn = self.redis.connection().await?;
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn release(&self, token: &str) -> Result<bool, LockError> {
        let mut conn = self.redis.connection().await?;
        let removed: i64 =
            Script::new(RELEASE_SCRIPT).key(&self.key).arg(token).invoke_async(&mut conn).await?;
        Ok(removed == 1)
    }
}
