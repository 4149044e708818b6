use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::{info, warn};

use taskhub_config::DatabaseConfig;
use taskhub_core::HealthCheck;
use taskhub_errors::AppResult;

/// PostgreSQL连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "数据库连接池已建立"
        );
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> AppResult<()> {
        ping(&self.pool).await
    }

    /// 在事务中执行 `f`：返回 `Ok` 时提交，返回错误时回滚。
    ///
    /// `f` 拿到的连接可以直接传给接受 [`PgExecutor`] 的仓储函数，
    /// 同一份仓储代码因此既能在连接池上运行也能在事务中运行。
    pub async fn transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        let mut tx = self.pool.begin().await?;

        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "事务回滚失败");
                }
                Err(e)
            }
        }
    }

    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("数据库连接池已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// 最轻量的连通性检查，可在连接池、单个连接或事务上执行
pub async fn ping<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<()> {
    sqlx::query("SELECT 1").execute(executor).await?;
    Ok(())
}

#[async_trait]
impl HealthCheck for Database {
    fn component(&self) -> &str {
        "database"
    }

    async fn check(&self) -> AppResult<()> {
        self.ping().await
    }
}
