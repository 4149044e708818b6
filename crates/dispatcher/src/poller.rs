//! 固定间隔轮询器
//!
//! 每个任务拥有一个工作协程：启动后立即执行一次，之后按照间隔执行。间隔从上一次执行的开始时刻计算，
//! 执行超时后错过的节拍直接跳过。每次执行的超时为间隔的80%。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use taskhub_core::{catch_panic, log_task_failure, Context, ExecutionRecord, TaskHandler};
use taskhub_errors::{AppError, AppResult};

use crate::state::{RunnerState, TaskStats};

const RUNNER: &str = "poller";

/// 单次执行可以占用的间隔比例
const EXECUTION_BUDGET_RATIO: f64 = 0.8;

struct PolledTask {
    interval: Duration,
    handler: TaskHandler,
    token: CancellationToken,
    stats: Arc<TaskStats>,
    worker: Option<JoinHandle<()>>,
}

struct Registry {
    state: RunnerState,
    tasks: HashMap<String, PolledTask>,
}

struct PollerInner {
    root: Context,
    registry: RwLock<Registry>,
}

/// 固定间隔任务轮询器
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(Context::background())
    }
}

impl Poller {
    pub fn new(parent: Context) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                root: Context::from_token(parent.token().child_token()),
                registry: RwLock::new(Registry {
                    state: RunnerState::Idle,
                    tasks: HashMap::new(),
                }),
            }),
        }
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        interval: Duration,
        handler: TaskHandler,
    ) -> AppResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::invalid_argument("任务名称不能为空"));
        }
        if interval.is_zero() {
            return Err(AppError::invalid_argument(format!(
                "轮询任务 {name} 的间隔必须大于0"
            )));
        }

        let mut registry = self.inner.registry.write().await;
        if registry.state == RunnerState::Stopped {
            return Err(AppError::invalid_state("轮询器已停止，不能再注册任务"));
        }
        if registry.tasks.contains_key(&name) {
            return Err(AppError::task_already_exists(&name));
        }

        let mut task = PolledTask {
            interval,
            handler,
            token: self.inner.root.token().child_token(),
            stats: Arc::new(TaskStats::default()),
            worker: None,
        };
        if registry.state == RunnerState::Running {
            task.worker = Some(spawn_worker(&name, &task));
        }
        registry.tasks.insert(name.clone(), task);

        info!(task = %name, interval_ms = interval.as_millis() as u64, "注册轮询任务");
        Ok(())
    }

    /// 注销任务并等待其工作协程退出
    pub async fn unregister(&self, name: &str) -> AppResult<()> {
        let task = self.inner.registry.write().await.tasks.remove(name);
        let Some(task) = task else {
            return Err(AppError::task_not_found(name));
        };

        task.token.cancel();
        if let Some(worker) = task.worker {
            if let Err(e) = worker.await {
                warn!(task = %name, error = %e, "轮询任务工作协程异常退出");
            }
        }
        info!(task = %name, "注销轮询任务");
        Ok(())
    }

    pub async fn start(&self) -> AppResult<()> {
        let mut registry = self.inner.registry.write().await;
        match registry.state {
            RunnerState::Running => {
                warn!("轮询器已经在运行");
                return Ok(());
            }
            RunnerState::Stopped => {
                return Err(AppError::invalid_state("轮询器已停止，不能重新启动"));
            }
            RunnerState::Idle => {}
        }

        for (name, task) in registry.tasks.iter_mut() {
            task.worker = Some(spawn_worker(name, task));
        }
        registry.state = RunnerState::Running;

        info!(tasks = registry.tasks.len(), "轮询器已启动");
        Ok(())
    }

    /// 取消所有任务并等待工作协程退出。未启动时同样进入 `Stopped`，重复调用是空操作
    pub async fn stop(&self) -> AppResult<()> {
        let workers: Vec<JoinHandle<()>> = {
            let mut registry = self.inner.registry.write().await;
            match registry.state {
                RunnerState::Stopped => return Ok(()),
                RunnerState::Idle => {
                    registry.state = RunnerState::Stopped;
                    self.inner.root.token().cancel();
                    debug!("轮询器未启动即被停止");
                    return Ok(());
                }
                RunnerState::Running => registry.state = RunnerState::Stopped,
            }
            registry
                .tasks
                .values_mut()
                .filter_map(|task| task.worker.take())
                .collect()
        };

        info!(workers = workers.len(), "正在停止轮询器");
        self.inner.root.token().cancel();
        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "轮询任务工作协程异常退出");
            }
        }
        info!("轮询器已停止");
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<String> {
        let registry = self.inner.registry.read().await;
        let mut names: Vec<String> = registry.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_task_interval(&self, name: &str) -> AppResult<Duration> {
        self.inner
            .registry
            .read()
            .await
            .tasks
            .get(name)
            .map(|task| task.interval)
            .ok_or_else(|| AppError::task_not_found(name))
    }

    pub async fn is_running(&self) -> bool {
        self.inner.registry.read().await.state == RunnerState::Running
    }

    pub async fn state(&self) -> RunnerState {
        self.inner.registry.read().await.state
    }

    pub async fn last_execution(&self, name: &str) -> AppResult<Option<ExecutionRecord>> {
        self.with_stats(name, |stats| stats.last()).await
    }

    pub async fn execution_count(&self, name: &str) -> AppResult<u64> {
        self.with_stats(name, |stats| stats.count()).await
    }

    async fn with_stats<T>(&self, name: &str, f: impl FnOnce(&TaskStats) -> T) -> AppResult<T> {
        let registry = self.inner.registry.read().await;
        registry
            .tasks
            .get(name)
            .map(|task| f(&task.stats))
            .ok_or_else(|| AppError::task_not_found(name))
    }
}

fn spawn_worker(name: &str, task: &PolledTask) -> JoinHandle<()> {
    let worker = PollWorker {
        name: name.to_string(),
        interval: task.interval,
        handler: task.handler.clone(),
        ctx: Context::from_token(task.token.clone()),
        stats: task.stats.clone(),
    };
    tokio::spawn(worker.run())
}

struct PollWorker {
    name: String,
    interval: Duration,
    handler: TaskHandler,
    ctx: Context,
    stats: Arc<TaskStats>,
}

impl PollWorker {
    #[instrument(name = "poll_task", skip_all, fields(task = %self.name))]
    async fn run(self) {
        let first = tokio::time::Instant::now();
        self.execute().await;

        let mut ticker = tokio::time::interval_at(first + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.done() => break,
                _ = ticker.tick() => self.execute().await,
            }
        }
        debug!("轮询任务工作协程退出");
    }

    async fn execute(&self) {
        if self.ctx.is_done() {
            return;
        }

        let (ctx, _guard) = self.ctx.with_timeout(self.interval.mul_f64(EXECUTION_BUDGET_RATIO));
        let handler = self.handler.clone();
        let started_at = Utc::now();
        let start = Instant::now();

        let result = catch_panic(async move { handler(ctx).await })
            .await
            .and_then(|r| r);
        let duration = start.elapsed();

        match &result {
            Ok(()) => debug!(elapsed_ms = duration.as_millis() as u64, "轮询任务执行完成"),
            Err(e) => log_task_failure(RUNNER, &self.name, duration, e),
        }
        self.stats.record(ExecutionRecord::new(started_at, duration, &result));
    }
}
