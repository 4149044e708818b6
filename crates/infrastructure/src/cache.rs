use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use taskhub_config::CacheConfig;
use taskhub_core::HealthCheck;
use taskhub_errors::{AppError, AppResult};

struct CacheInner {
    connections: RwLock<Vec<ConnectionManager>>,
    next: AtomicUsize,
    key_prefix: String,
}

/// Redis缓存，持有固定数量的多路复用连接并轮询使用
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    pub async fn connect(config: &CacheConfig) -> AppResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;

        let mut connections = Vec::with_capacity(config.pool_size as usize);
        for _ in 0..config.pool_size.max(1) {
            connections.push(client.get_connection_manager().await?);
        }

        let cache = Self {
            inner: Arc::new(CacheInner {
                connections: RwLock::new(connections),
                next: AtomicUsize::new(0),
                key_prefix: config.key_prefix.clone(),
            }),
        };
        cache.ping().await?;

        info!(pool_size = config.pool_size, "Redis缓存连接已建立");
        Ok(cache)
    }

    /// 按轮询顺序取出一个连接
    pub fn connection(&self) -> AppResult<ConnectionManager> {
        let connections = self
            .inner
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if connections.is_empty() {
            return Err(AppError::invalid_state("缓存连接已关闭"));
        }
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % connections.len();
        Ok(connections[index].clone())
    }

    /// 加上统一前缀的完整键名
    pub fn key(&self, key: &str) -> String {
        format!("{}{key}", self.inner.key_prefix)
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn get_string(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection()?;
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection()?;
        let full_key = self.key(key);
        let _: () = conn.set_ex(&full_key, value, ttl.as_secs().max(1)).await?;
        debug!(key = %full_key, ttl_secs = ttl.as_secs(), "缓存写入");
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.get_string(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_ex(key, &raw, ttl).await
    }

    /// 删除键，返回键是否存在
    pub async fn delete(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    /// 释放所有连接，之后的操作返回错误
    pub fn close(&self) {
        let mut connections = self
            .inner
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if !connections.is_empty() {
            connections.clear();
            info!("Redis缓存连接已释放");
        }
    }
}

#[async_trait]
impl HealthCheck for Cache {
    fn component(&self) -> &str {
        "cache"
    }

    async fn check(&self) -> AppResult<()> {
        self.ping().await
    }
}
