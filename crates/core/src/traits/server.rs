use async_trait::async_trait;
use taskhub_errors::AppResult;

use crate::Context;

/// 由应用生命周期管理器统一启停的服务
#[async_trait]
pub trait Server: Send + Sync {
    /// 用于日志的服务名称
    fn name(&self) -> &str;

    /// 启动服务，阻塞直到 `ctx` 被取消或服务出错
    async fn start(&self, ctx: Context) -> AppResult<()>;

    /// 优雅停止服务。必须幂等，并且在 `start` 尚未返回时也能安全调用
    async fn stop(&self, ctx: Context) -> AppResult<()>;
}
