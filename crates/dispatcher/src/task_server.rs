use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskhub_core::{Context, Server};
use taskhub_errors::AppResult;

use crate::poller::Poller;
use crate::scheduler::Scheduler;

/// 把调度器与轮询器组合成一个可由应用管理生命周期的服务
pub struct TaskServer {
    scheduler: Scheduler,
    poller: Poller,
    shutdown: CancellationToken,
    /// 串行化启停，`stop` 之后的 `start` 不再启动运行器
    stopped: Mutex<bool>,
}

impl TaskServer {
    pub fn new(scheduler: Scheduler, poller: Poller) -> Self {
        Self {
            scheduler,
            poller,
            shutdown: CancellationToken::new(),
            stopped: Mutex::new(false),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }
}

#[async_trait]
impl Server for TaskServer {
    fn name(&self) -> &str {
        "task-runner"
    }

    /// 启动两个运行器后阻塞，直到应用上下文结束或服务被停止。
    ///
    /// `stop` 先于 `start` 到达时不再启动运行器，直接返回。
    async fn start(&self, ctx: Context) -> AppResult<()> {
        {
            let stopped = self.stopped.lock().await;
            if *stopped || ctx.is_done() {
                info!("任务运行服务在启动前已被停止");
                return Ok(());
            }
            self.scheduler.start().await?;
            self.poller.start().await?;
        }

        let cron_tasks = self.scheduler.list_tasks().await.len();
        let poll_tasks = self.poller.list_tasks().await.len();
        info!(cron_tasks, poll_tasks, "任务运行服务已启动");

        tokio::select! {
            _ = ctx.done() => {}
            _ = self.shutdown.cancelled() => {}
        }
        Ok(())
    }

    async fn stop(&self, ctx: Context) -> AppResult<()> {
        let mut stopped = self.stopped.lock().await;
        *stopped = true;
        let result = ctx
            .run(async {
                self.poller.stop().await?;
                self.scheduler.stop().await
            })
            .await
            .and_then(|r| r);
        drop(stopped);
        self.shutdown.cancel();
        info!("任务运行服务已停止");
        result
    }
}
