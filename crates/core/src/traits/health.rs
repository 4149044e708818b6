use async_trait::async_trait;
use taskhub_errors::AppResult;

/// 共享资源的健康探针
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn component(&self) -> &str;

    async fn check(&self) -> AppResult<()>;
}
