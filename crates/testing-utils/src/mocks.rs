use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskhub_core::{Context, Server};
use taskhub_errors::{AppError, AppResult};

/// 按发生顺序记录事件，供钩子和模拟服务共享
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }

    /// `event` 第一次出现的位置
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }
}

/// 记录启停调用的模拟服务
///
/// 事件格式为 `<name>:start`、`<name>:stop`、`<name>:exit`。
pub struct MockServer {
    name: String,
    log: EventLog,
    start_error: Option<String>,
    stop_delay: Duration,
    stopped: CancellationToken,
}

impl MockServer {
    pub fn new(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
            start_error: None,
            stop_delay: Duration::ZERO,
            stopped: CancellationToken::new(),
        }
    }

    /// 启动时立即返回内部错误
    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// 停止时忽略上下文并等待 `delay`
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

#[async_trait]
impl Server for MockServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: Context) -> AppResult<()> {
        self.log.push(format!("{}:start", self.name));
        if let Some(message) = &self.start_error {
            return Err(AppError::internal(message.clone()));
        }

        tokio::select! {
            _ = ctx.done() => {}
            _ = self.stopped.cancelled() => {}
        }
        self.log.push(format!("{}:exit", self.name));
        Ok(())
    }

    async fn stop(&self, _ctx: Context) -> AppResult<()> {
        self.log.push(format!("{}:stop", self.name));
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.stopped.cancel();
        Ok(())
    }
}
