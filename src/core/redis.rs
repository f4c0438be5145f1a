use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, ErrorKind, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    /// Clone of the shared connection manager; fails while disconnected.
    pub(crate) async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        let manager = { self.manager.read().await.clone() };
        manager.ok_or_else(|| RedisError::from((ErrorKind::IoError, "Redis is not connected")))
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RedisHandle, RedisHealth};
    use crate::core::config::Settings;
    use crate::test_support;

    #[tokio::test]
    async fn connection_fails_before_connect() {
        let redis = RedisHandle::new("redis://127.0.0.1:6379/1".to_string());
        assert!(redis.connection().await.is_err());
        assert!(matches!(redis.health().await, RedisHealth::Disconnected));
    }

    #[tokio::test]
    async fn health_reports_connected_redis() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        let redis = RedisHandle::new(settings.redis().redis_url());
        redis.connect().await.expect("redis connect");

        assert!(matches!(redis.health().await, RedisHealth::Healthy));

        redis.disconnect().await;
        assert!(matches!(redis.health().await, RedisHealth::Disconnected));
    }
}
