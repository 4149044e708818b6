use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use taskhub_config::AppConfig;
use taskhub_core::HealthCheck;
use taskhub_errors::AppResult;

use crate::cache::Cache;
use crate::database::Database;
use crate::message_queue::{QueueManager, QueueManagerOptions};

/// 进程内共享的外部资源
pub struct Dependencies {
    pub database: Database,
    pub cache: Cache,
    pub queue: QueueManager,
    cleaned: AtomicBool,
}

impl Dependencies {
    /// 依次建立数据库、缓存和消息队列连接，任一失败时释放已经建立的资源
    pub async fn build(config: &AppConfig) -> AppResult<Arc<Self>> {
        let database = Database::connect(&config.database).await?;

        let cache = match Cache::connect(&config.cache).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(error = %e, "连接Redis失败");
                database.close().await;
                return Err(e);
            }
        };

        let queue = match QueueManager::connect(QueueManagerOptions::from(&config.message_queue)).await {
            Ok(queue) => queue,
            Err(e) => {
                error!(error = %e, "连接RabbitMQ失败");
                cache.close();
                database.close().await;
                return Err(e);
            }
        };

        info!("外部依赖初始化完成");
        Ok(Arc::new(Self::from_parts(database, cache, queue)))
    }

    pub fn from_parts(database: Database, cache: Cache, queue: QueueManager) -> Self {
        Self {
            database,
            cache,
            queue,
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn health_checks(&self) -> Vec<Arc<dyn HealthCheck>> {
        vec![
            Arc::new(self.database.clone()),
            Arc::new(self.cache.clone()),
            Arc::new(self.queue.clone()),
        ]
    }

    /// 按 消息队列 → 缓存 → 数据库 的顺序释放资源，只执行一次
    pub async fn cleanup(&self) -> AppResult<()> {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("正在释放外部依赖");
        let result = self.queue.close().await;
        if let Err(e) = &result {
            error!(error = %e, "关闭消息队列失败");
        }
        self.cache.close();
        self.database.close().await;
        info!("外部依赖已释放");
        result
    }
}
