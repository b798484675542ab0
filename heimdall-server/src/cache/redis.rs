use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl RedisCache {
    /// Connect and verify the server answers PING
    pub async fn new(redis_url: &str) -> Result<Self, String> {
        let client =
            Client::open(redis_url).map_err(|err| format!("Failed to connect to Redis: {}", err))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|err| format!("Failed to create Redis connection manager: {}", err))?;

        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self { conn_manager })
    }
}

/// Redis expiries are whole seconds; round up so nothing is stored without one
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();

        conn.set_ex::<_, _, ()>(key, serialized, ttl_secs(ttl))
            .await
            .map_err(|err| {
                error!("Redis error while setting cache entry: {}", err);
                CacheError::Redis(err.to_string())
            })
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let mut conn = self.conn_manager.clone();

        let result: Option<String> = match conn.get(key).await {
            Ok(value) => value,
            Err(err) => {
                if err.kind() == redis::ErrorKind::TypeError {
                    return Ok(None);
                }
                error!("Redis error while reading cache entry: {}", err);
                return Err(CacheError::Redis(err.to_string()));
            }
        };

        match result {
            Some(value) => serde_json::from_str(&value)
                .map_err(|e| CacheError::Deserialization(e.to_string()))
                .map(Some),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        conn.del::<_, ()>(key).await.map_err(|err| {
            error!("Redis error while deleting cache entry: {}", err);
            CacheError::Redis(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_test::server::RedisServer;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        field: String,
    }

    fn get_redis_url(server: &RedisServer) -> String {
        match &server.addr {
            redis::ConnectionAddr::Tcp(host, port) => {
                format!("redis://{}:{}/", host, port)
            }
            _ => "redis://127.0.0.1:6379/".to_string(),
        }
    }

    #[test]
    fn test_ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(3)), 3);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_cache_operations() {
        let server = RedisServer::new();
        let redis_url = get_redis_url(&server);
        let cache = RedisCache::new(&redis_url).await.unwrap();

        let data = TestData {
            field: "test".to_string(),
        };

        cache
            .set("test_key", &data, Duration::from_secs(1))
            .await
            .unwrap();
        let retrieved: TestData = cache.get("test_key").await.unwrap().unwrap();
        assert_eq!(data, retrieved);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get::<TestData>("test_key").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_health_check() {
        let server = RedisServer::new();
        let redis_url = get_redis_url(&server);
        let cache = RedisCache::new(&redis_url).await.unwrap();

        let result = cache.health_check().await;

        assert!(result.is_ok(), "health check failed: {:?}", result);
    }
}
