//! 秒级精度的定时任务调度器
//!
//! 每个任务由一个独立的调度循环驱动：计算下一次触发时间、等待、再把执行交给新的工作协程并等待其结束，
//! 因此同一任务的执行永远串行，执行期间错过的触发会被跳过。不同任务之间互不影响。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use taskhub_config::SchedulerConfig;
use taskhub_core::{catch_panic, log_task_failure, Context, ExecutionRecord, TaskHandler};
use taskhub_errors::{AppError, AppResult};

use crate::cron_utils::CronSchedule;
use crate::state::{RunnerState, TaskStats};

const RUNNER: &str = "scheduler";

/// 单次执行的默认超时上限
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub timezone: Tz,
    pub execution_timeout: Duration,
    /// 调度器根上下文的父级，父级取消时所有任务随之停止
    pub parent: Context,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            parent: Context::background(),
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &SchedulerConfig) -> AppResult<Self> {
        let timezone = config
            .tz()
            .map_err(|e| AppError::config_error(e.to_string()))?;
        Ok(Self {
            timezone,
            execution_timeout: config.execution_timeout(),
            ..Self::default()
        })
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_parent(mut self, parent: Context) -> Self {
        self.parent = parent;
        self
    }
}

struct ScheduledTask {
    schedule: Arc<CronSchedule>,
    handler: TaskHandler,
    token: CancellationToken,
    stats: Arc<TaskStats>,
}

struct Registry {
    state: RunnerState,
    tasks: HashMap<String, ScheduledTask>,
}

struct SchedulerInner {
    timezone: Tz,
    execution_timeout: Duration,
    root: Context,
    tracker: TaskTracker,
    registry: RwLock<Registry>,
}

/// 定时任务调度器，克隆后共享同一组任务
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerOptions::default())
    }
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        let root = Context::from_token(options.parent.token().child_token());
        Self {
            inner: Arc::new(SchedulerInner {
                timezone: options.timezone,
                execution_timeout: options.execution_timeout,
                root,
                tracker: TaskTracker::new(),
                registry: RwLock::new(Registry {
                    state: RunnerState::Idle,
                    tasks: HashMap::new(),
                }),
            }),
        }
    }

    /// 注册定时任务。调度器已启动时任务立即开始调度，否则等到 [`Scheduler::start`]
    pub async fn register(
        &self,
        name: impl Into<String>,
        cron_expr: &str,
        handler: TaskHandler,
    ) -> AppResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::invalid_argument("任务名称不能为空"));
        }

        let mut registry = self.inner.registry.write().await;
        if registry.state == RunnerState::Stopped {
            return Err(AppError::invalid_state("调度器已停止，不能再注册任务"));
        }
        if registry.tasks.contains_key(&name) {
            return Err(AppError::task_already_exists(&name));
        }

        let task = ScheduledTask {
            schedule: Arc::new(CronSchedule::parse(cron_expr)?),
            handler,
            token: self.inner.root.token().child_token(),
            stats: Arc::new(TaskStats::default()),
        };
        if registry.state == RunnerState::Running {
            self.spawn_loop(&name, &task);
        }
        registry.tasks.insert(name.clone(), task);

        info!(task = %name, cron = cron_expr, "注册定时任务");
        Ok(())
    }

    /// 注销任务：停止后续触发，正在进行的执行会继续完成
    pub async fn unregister(&self, name: &str) -> AppResult<()> {
        let task = self.inner.registry.write().await.tasks.remove(name);
        match task {
            Some(task) => {
                task.token.cancel();
                info!(task = %name, "注销定时任务");
                Ok(())
            }
            None => Err(AppError::task_not_found(name)),
        }
    }

    pub async fn start(&self) -> AppResult<()> {
        let mut registry = self.inner.registry.write().await;
        match registry.state {
            RunnerState::Running => {
                warn!("调度器已经在运行");
                return Ok(());
            }
            RunnerState::Stopped => {
                return Err(AppError::invalid_state("调度器已停止，不能重新启动"));
            }
            RunnerState::Idle => {}
        }

        for (name, task) in &registry.tasks {
            self.spawn_loop(name, task);
        }
        registry.state = RunnerState::Running;

        info!(
            tasks = registry.tasks.len(),
            timezone = %self.inner.timezone,
            "定时任务调度器已启动"
        );
        Ok(())
    }

    /// 停止调度并等待所有正在进行的执行结束。
    ///
    /// 未启动时直接进入 `Stopped`，之后的 `start` 会被拒绝；重复调用是空操作。
    pub async fn stop(&self) -> AppResult<()> {
        {
            let mut registry = self.inner.registry.write().await;
            match registry.state {
                RunnerState::Stopped => return Ok(()),
                RunnerState::Idle => {
                    registry.state = RunnerState::Stopped;
                    self.inner.root.token().cancel();
                    debug!("调度器未启动即被停止");
                    return Ok(());
                }
                RunnerState::Running => registry.state = RunnerState::Stopped,
            }
        }

        info!("正在停止定时任务调度器");
        self.inner.root.token().cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("定时任务调度器已停止");
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<String> {
        let registry = self.inner.registry.read().await;
        let mut names: Vec<String> = registry.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_running(&self) -> bool {
        self.inner.registry.read().await.state == RunnerState::Running
    }

    pub async fn state(&self) -> RunnerState {
        self.inner.registry.read().await.state
    }

    /// 任务在调度器时区下的下一次触发时间
    pub async fn next_fire_time(&self, name: &str) -> AppResult<Option<DateTime<Tz>>> {
        let registry = self.inner.registry.read().await;
        let task = registry
            .tasks
            .get(name)
            .ok_or_else(|| AppError::task_not_found(name))?;
        let now = Utc::now().with_timezone(&self.inner.timezone);
        Ok(task.schedule.next_after(&now))
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

    fn spawn_loop(&self, name: &str, task: &ScheduledTask) {
        let job = ScheduleLoop {
            inner: self.inner.clone(),
            name: name.to_string(),
            schedule: task.schedule.clone(),
            handler: task.handler.clone(),
            token: task.token.clone(),
            stats: task.stats.clone(),
        };
        self.inner.tracker.spawn(job.run());
    }
}

struct ScheduleLoop {
    inner: Arc<SchedulerInner>,
    name: String,
    schedule: Arc<CronSchedule>,
    handler: TaskHandler,
    token: CancellationToken,
    stats: Arc<TaskStats>,
}

impl ScheduleLoop {
    #[instrument(name = "cron_task", skip_all, fields(task = %self.name))]
    async fn run(self) {
        let mut last_fire: Option<DateTime<Tz>> = None;

        loop {
            let now = Utc::now().with_timezone(&self.inner.timezone);
            // 计时器可能比墙上时间略早醒来，不能在同一个触发点上重复执行
            let from = match last_fire {
                Some(last) if last > now => last,
                _ => now,
            };
            let Some(next) = self.schedule.next_after(&from) else {
                warn!("没有后续触发时间，停止调度");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("调度循环退出");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            last_fire = Some(next);

            let execution = self.inner.tracker.spawn(execute(
                self.inner.root.clone(),
                self.name.clone(),
                self.handler.clone(),
                self.inner.execution_timeout,
                self.stats.clone(),
            ));
            // 等待本次执行结束后再计算下一次触发
            let _ = execution.await;
        }
    }
}

async fn execute(
    root: Context,
    name: String,
    handler: TaskHandler,
    timeout: Duration,
    stats: Arc<TaskStats>,
) {
    let (ctx, _guard) = root.with_timeout(timeout);
    let started_at = Utc::now();
    let start = Instant::now();
    debug!(task = %name, "开始执行定时任务");

    let result = catch_panic(async move { handler(ctx).await })
        .await
        .and_then(|r| r);
    let duration = start.elapsed();

    match &result {
        Ok(()) => debug!(
            task = %name,
            elapsed_ms = duration.as_millis() as u64,
            "定时任务执行完成"
        ),
        Err(e) => log_task_failure(RUNNER, &name, duration, e),
    }
    stats.record(ExecutionRecord::new(started_at, duration, &result));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskhub_core::task_handler;

    fn noop() -> TaskHandler {
        task_handler(|_ctx| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let scheduler = Scheduler::default();
        scheduler.register("x", "@every 1m", noop()).await.unwrap();

        let err = scheduler.register("x", "@every 1m", noop()).await.unwrap_err();
        assert!(matches!(err, AppError::TaskAlreadyExists { .. }));
        assert_eq!(scheduler.list_tasks().await, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_register_invalid_cron() {
        let scheduler = Scheduler::default();
        let err = scheduler.register("bad", "every tuesday", noop()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCron { .. }));
        assert!(scheduler.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_empty_name() {
        let scheduler = Scheduler::default();
        assert!(scheduler.register("  ", "@every 1m", noop()).await.is_err());
    }

    #[tokio::test]
    async fn test_unregister() {
        let scheduler = Scheduler::default();
        scheduler.register("a", "@hourly", noop()).await.unwrap();
        scheduler.register("b", "@daily", noop()).await.unwrap();

        scheduler.unregister("a").await.unwrap();
        assert_eq!(scheduler.list_tasks().await, vec!["b".to_string()]);
        assert!(matches!(
            scheduler.unregister("a").await,
            Err(AppError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_rejects_later_start() {
        let scheduler = Scheduler::default();
        scheduler.register("a", "@hourly", noop()).await.unwrap();
        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.state().await, RunnerState::Stopped);

        assert!(scheduler.start().await.is_err());
        assert!(!scheduler.is_running().await);
        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.state().await, RunnerState::Stopped);
    }

    #[tokio::test]
    async fn test_register_after_stop_fails() {
        let scheduler = Scheduler::default();
        scheduler.start().await.unwrap();
        scheduler.stop().await.unwrap();

        assert!(scheduler.register("late", "@hourly", noop()).await.is_err());
        assert!(scheduler.start().await.is_err());
    }

    #[test]
    fn test_options_from_config() {
        let options = SchedulerOptions::from_config(&SchedulerConfig::default()).unwrap();
        assert_eq!(options.timezone, Tz::UTC);
        assert_eq!(options.execution_timeout, DEFAULT_EXECUTION_TIMEOUT);

        let config = SchedulerConfig {
            timezone: "Asia/Shanghai".to_string(),
            execution_timeout_seconds: 30,
        };
        let options = SchedulerOptions::from_config(&config).unwrap();
        assert_eq!(options.timezone, Tz::Asia__Shanghai);
        assert_eq!(options.execution_timeout, Duration::from_secs(30));

        let config = SchedulerConfig {
            timezone: "+08:00".to_string(),
            ..Default::default()
        };
        assert!(SchedulerOptions::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_next_fire_time() {
        let scheduler = Scheduler::default();
        scheduler.register("hourly", "0 0 * * * *", noop()).await.unwrap();

        let next = scheduler.next_fire_time("hourly").await.unwrap().unwrap();
        assert!(next > Utc::now());
        assert!(scheduler.next_fire_time("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_handler_panic_is_recorded() {
        let scheduler = Scheduler::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        scheduler
            .register(
                "boom",
                "* * * * * *",
                task_handler(move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if true {
                            panic!("boom");
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2200)).await;
        scheduler.stop().await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 1);
        let record = scheduler.last_execution("boom").await.unwrap().unwrap();
        assert!(!record.is_success());
        assert!(record.error.unwrap().contains("boom"));
    }
}
