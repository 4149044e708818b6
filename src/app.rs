//! 应用生命周期管理
//!
//! 启停顺序：`before_start` → 各服务并行启动 → `after_start` →（信号或服务出错）→
//! `before_stop` → 各服务并行停止（每个受 `stop_timeout` 约束）→ `after_stop`。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio_util::sync::DropGuard;
use tracing::{debug, error, info, warn};

use taskhub_core::{Context, Server};
use taskhub_errors::{AppError, AppResult};

use crate::shutdown::{Signal, SignalListener, DEFAULT_SIGNALS};

/// 默认的单个服务停止超时
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// 生命周期钩子，接收应用上下文
pub type Hook = Arc<dyn Fn(Context) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Arc::new(move |ctx: Context| -> BoxFuture<'static, AppResult<()>> { Box::pin(f(ctx)) })
}

/// 应用标识
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
}

pub struct AppBuilder {
    info: AppInfo,
    root: Context,
    guard: DropGuard,
    signals: Vec<Signal>,
    stop_timeout: Duration,
    servers: Vec<Arc<dyn Server>>,
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        let (root, guard) = Context::background().with_cancel();
        Self {
            info: AppInfo {
                id: uuid::Uuid::new_v4().to_string(),
                name: String::new(),
                version: String::new(),
                metadata: HashMap::new(),
            },
            root,
            guard,
            signals: DEFAULT_SIGNALS.to_vec(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            servers: Vec::new(),
            before_start: Vec::new(),
            after_start: Vec::new(),
            before_stop: Vec::new(),
            after_stop: Vec::new(),
        }
    }
}

impl AppBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.info.id = id.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.metadata.insert(key.into(), value.into());
        self
    }

    /// 父上下文，取消它等同于停止应用（但不会执行 `before_stop`）。
    ///
    /// 需在 [`AppBuilder::app_context`] 之前调用，否则先前取得的应用上下文会被取消。
    pub fn context(mut self, ctx: Context) -> Self {
        let (root, guard) = ctx.with_cancel();
        self.root = root;
        self.guard = guard;
        self
    }

    /// 应用上下文，运行器等组件以它为父级，应用停止时随之取消
    pub fn app_context(&self) -> Context {
        self.root.clone()
    }

    /// 监听的停止信号，传入空切片表示不监听
    pub fn signals(mut self, signals: &[Signal]) -> Self {
        self.signals = signals.to_vec();
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn server(mut self, server: Arc<dyn Server>) -> Self {
        self.servers.push(server);
        self
    }

    pub fn before_start(mut self, hook: Hook) -> Self {
        self.before_start.push(hook);
        self
    }

    pub fn after_start(mut self, hook: Hook) -> Self {
        self.after_start.push(hook);
        self
    }

    pub fn before_stop(mut self, hook: Hook) -> Self {
        self.before_stop.push(hook);
        self
    }

    pub fn after_stop(mut self, hook: Hook) -> Self {
        self.after_stop.push(hook);
        self
    }

    pub fn build(self) -> App {
        App {
            inner: Arc::new(AppInner {
                info: self.info,
                signals: self.signals,
                stop_timeout: self.stop_timeout,
                servers: self.servers,
                before_start: self.before_start,
                after_start: self.after_start,
                before_stop: self.before_stop,
                after_stop: self.after_stop,
                root: self.root,
                _guard: self.guard,
                ran: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
            }),
        }
    }
}

/// 应用：按固定顺序启停一组服务，并在收到信号时优雅退出
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    info: AppInfo,
    signals: Vec<Signal>,
    stop_timeout: Duration,
    servers: Vec<Arc<dyn Server>>,
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
    root: Context,
    _guard: DropGuard,
    ran: AtomicBool,
    stopping: AtomicBool,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    pub fn info(&self) -> &AppInfo {
        &self.inner.info
    }

    pub fn id(&self) -> &str {
        &self.inner.info.id
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn version(&self) -> &str {
        &self.inner.info.version
    }

    /// 所有服务共享的应用上下文
    pub fn context(&self) -> &Context {
        &self.inner.root
    }

    /// 运行应用直到收到停止信号、调用 [`App::stop`] 或某个服务启动失败。
    ///
    /// 返回第一个非取消类的服务错误；没有服务错误时返回 `after_start` 或 `after_stop` 钩子的错误。
    pub async fn run(&self) -> AppResult<()> {
        if self.inner.ran.swap(true, Ordering::SeqCst) {
            return Err(AppError::invalid_state("应用只能运行一次"));
        }

        let inner = &self.inner;
        let ctx = inner.root.clone();
        info!(id = %inner.info.id, name = %inner.info.name, version = %inner.info.version, "应用启动");

        for hook in &inner.before_start {
            hook(ctx.clone()).await?;
        }

        let barrier = Arc::new(Barrier::new(inner.servers.len() + 1));
        let mut workers = JoinSet::new();
        for server in &inner.servers {
            workers.spawn(watch(server.clone(), ctx.clone(), inner.stop_timeout));
            workers.spawn(serve(server.clone(), ctx.clone(), barrier.clone()));
        }
        barrier.wait().await;
        debug!(servers = inner.servers.len(), "所有服务已进入启动流程");

        let mut first_error: Option<AppError> = None;
        for hook in &inner.after_start {
            if let Err(e) = hook(ctx.clone()).await {
                error!(error = %e, "after_start钩子执行失败，开始停止应用");
                first_error = Some(e);
                break;
            }
        }
        if first_error.is_some() {
            if let Err(e) = self.stop().await {
                warn!(error = %e, "停止应用失败");
            }
        }

        let signal_task = match SignalListener::install(&inner.signals) {
            Ok(listener) => Some(tokio::spawn(listen(self.clone(), listener))),
            Err(e) => {
                error!(error = %e, "安装信号处理器失败");
                first_error.get_or_insert(e);
                if let Err(e) = self.stop().await {
                    warn!(error = %e, "停止应用失败");
                }
                None
            }
        };

        let mut server_error: Option<AppError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(AppError::Panic(e.to_string())));
            if let Err(e) = result {
                if !e.is_cancellation() && server_error.is_none() {
                    server_error = Some(e);
                }
            }
        }
        if let Some(task) = signal_task {
            task.abort();
        }

        let mut hook_error: Option<AppError> = None;
        for hook in &inner.after_stop {
            if let Err(e) = hook(ctx.clone()).await {
                warn!(error = %e, "after_stop钩子执行失败");
                hook_error.get_or_insert(e);
            }
        }

        info!(id = %inner.info.id, name = %inner.info.name, "应用已退出");
        match server_error.or(first_error).or(hook_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 执行 `before_stop` 钩子后取消应用上下文，各服务的看守协程随即调用 `Server::stop`。
    ///
    /// 重复调用是空操作。
    pub async fn stop(&self) -> AppResult<()> {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(name = %self.inner.info.name, "开始停止应用");
        let mut first_error = None;
        for hook in &self.inner.before_stop {
            if let Err(e) = hook(self.inner.root.clone()).await {
                warn!(error = %e, "before_stop钩子执行失败");
                first_error.get_or_insert(e);
            }
        }

        self.inner.root.token().cancel();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// 启动单个服务；启动失败时取消应用上下文，让其余服务一起退出
async fn serve(server: Arc<dyn Server>, ctx: Context, barrier: Arc<Barrier>) -> AppResult<()> {
    debug!(server = server.name(), "启动服务");

    // 先推进一次启动流程再到达屏障，保证 after_start 执行时每个服务都已进入 start
    let mut start = server.start(ctx.clone());
    let first = futures::poll!(&mut start);
    barrier.wait().await;

    let result = match first {
        Poll::Ready(result) => result,
        Poll::Pending => start.await,
    };
    if let Err(e) = &result {
        if !e.is_cancellation() {
            error!(server = server.name(), error = %e, "服务运行失败");
            ctx.token().cancel();
        }
    }
    result
}

/// 等待应用上下文结束后停止服务，超过 `stop_timeout` 的服务被放弃
async fn watch(server: Arc<dyn Server>, ctx: Context, stop_timeout: Duration) -> AppResult<()> {
    ctx.done().await;

    let (stop_ctx, _guard) = Context::background().with_timeout(stop_timeout);
    match tokio::time::timeout(stop_timeout, server.stop(stop_ctx)).await {
        Ok(Ok(())) => debug!(server = server.name(), "服务已停止"),
        Ok(Err(e)) => warn!(server = server.name(), error = %e, "停止服务失败"),
        Err(_) => error!(
            server = server.name(),
            timeout_ms = stop_timeout.as_millis() as u64,
            "停止服务超时，放弃等待"
        ),
    }
    Ok(())
}

async fn listen(app: App, mut listener: SignalListener) {
    tokio::select! {
        _ = app.context().done() => {}
        received = listener.recv() => {
            if let Some(signal) = received {
                info!(signal = %signal, "收到停止信号");
                if let Err(e) = app.stop().await {
                    warn!(error = %e, "停止应用失败");
                }
            }
        }
    }
}
