use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskhub_core::{Context, Server};
use taskhub_errors::{AppError, AppResult};

/// 以生命周期服务方式运行的HTTP服务器
///
/// 构造时立即绑定端口，端口冲突在启动前暴露；`start` 阻塞到上下文取消或 `stop` 被调用，
/// 然后等待进行中的请求处理完毕。
pub struct HttpServer {
    router: Router,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    shutdown: CancellationToken,
    finished: CancellationToken,
}

impl HttpServer {
    pub async fn bind(addr: &str, router: Router) -> AppResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::config_error(format!("监听地址 {addr} 绑定失败: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::internal(format!("获取监听地址失败: {e}")))?;

        Ok(Self {
            router,
            local_addr,
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Server for HttpServer {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self, ctx: Context) -> AppResult<()> {
        let listener = {
            let mut slot = self.listener.lock().await;
            // stop 先于 start 到达
            if self.shutdown.is_cancelled() || ctx.is_done() {
                slot.take();
                self.finished.cancel();
                return Ok(());
            }
            slot.take()
                .ok_or_else(|| AppError::invalid_state("HTTP服务器已经启动过"))?
        };

        info!(addr = %self.local_addr, "HTTP服务器开始监听");
        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = ctx.done() => {}
                    _ = shutdown.cancelled() => {}
                }
            })
            .await;
        self.finished.cancel();
        info!(addr = %self.local_addr, "HTTP服务器已停止");

        result.map_err(|e| AppError::internal(format!("HTTP服务异常退出: {e}")))
    }

    async fn stop(&self, ctx: Context) -> AppResult<()> {
        self.shutdown.cancel();

        // 从未启动时直接释放端口
        if self.listener.lock().await.take().is_some() {
            self.finished.cancel();
            return Ok(());
        }

        ctx.run(self.finished.cancelled()).await
    }
}
