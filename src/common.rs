//! 进程启动流程：加载配置、初始化日志、建立依赖并装配应用

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::info;

use taskhub_api::{create_routes, AppState, HttpServer, ServiceIdentity};
use taskhub_config::AppConfig;
use taskhub_dispatcher::{Poller, Scheduler, SchedulerOptions, TaskServer};
use taskhub_infrastructure::Dependencies;

use crate::app::App;
use crate::jobs;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// 定时任务、轮询任务与队列消费者
    Worker,
    /// 仅HTTP健康检查接口
    Api,
    /// 运行所有组件
    All,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Worker => "worker",
            RunMode::Api => "api",
            RunMode::All => "all",
        }
    }

    pub fn runs_worker(&self) -> bool {
        matches!(self, RunMode::Worker | RunMode::All)
    }

    pub fn runs_api(&self) -> bool {
        matches!(self, RunMode::Api | RunMode::All)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "worker" => Ok(RunMode::Worker),
            "api" => Ok(RunMode::Api),
            "all" => Ok(RunMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 命令行传入的启动参数
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub mode: RunMode,
    pub log_level: Option<String>,
}

/// 加载应用配置，命令行指定的日志级别覆盖配置文件
pub fn load_config(startup: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = &startup.log_level {
        config.logging.level = level.clone();
        config.logging.validate().context("日志级别无效")?;
    }

    if startup.mode == RunMode::Api && !config.api.enabled {
        return Err(anyhow::anyhow!("API模式被禁用，请检查配置"));
    }
    Ok(config)
}

pub fn init_logging(config: &AppConfig) -> Result<()> {
    taskhub_observability::init_logging(&config.logging)
}

pub async fn build_dependencies(config: &AppConfig) -> Result<Arc<Dependencies>> {
    Dependencies::build(config)
        .await
        .context("初始化外部依赖失败")
}

/// 按运行模式装配应用：注册内置任务与消费者，并挂载HTTP服务器
pub async fn build_app(config: &AppConfig, mode: RunMode, deps: Arc<Dependencies>) -> Result<App> {
    let mut builder = App::builder()
        .name(config.app.name.clone())
        .version(config.app.version.clone())
        .metadata("mode", mode.as_str())
        .stop_timeout(config.app.stop_timeout());
    let node_id = uuid::Uuid::new_v4().to_string();
    builder = builder.id(node_id.clone());

    if mode.runs_worker() {
        // 运行器的根上下文挂在应用上下文之下
        let app_ctx = builder.app_context();
        let options = SchedulerOptions::from_config(&config.scheduler)?.with_parent(app_ctx.clone());
        let scheduler = Scheduler::new(options);
        let poller = Poller::new(app_ctx);

        jobs::register_database_health(&scheduler, deps.database.clone()).await?;
        jobs::register_cache_heartbeat(&poller, deps.cache.clone(), node_id.clone()).await?;
        jobs::register_audit_consumer(&deps.queue, deps.cache.clone()).await?;

        builder = builder.server(Arc::new(TaskServer::new(scheduler, poller)));
    }

    if mode.runs_api() && config.api.enabled {
        let identity = ServiceIdentity {
            id: node_id,
            name: config.app.name.clone(),
            version: config.app.version.clone(),
        };
        let router = create_routes(AppState::new(identity, deps.health_checks()));
        let server = HttpServer::bind(&config.api.bind_address, router).await?;
        info!(addr = %server.local_addr(), "HTTP服务器已绑定");
        builder = builder.server(Arc::new(server));
    }

    Ok(builder.build())
}
