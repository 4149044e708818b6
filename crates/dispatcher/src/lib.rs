//! 任务运行组件
//!
//! 提供秒级CRON调度器、固定间隔轮询器，以及把二者组合为单个服务的 [`TaskServer`]。

pub mod cron_utils;
pub mod poller;
pub mod scheduler;
pub mod state;
pub mod task_server;

pub use cron_utils::CronSchedule;
pub use poller::Poller;
pub use scheduler::{Scheduler, SchedulerOptions, DEFAULT_EXECUTION_TIMEOUT};
pub use state::RunnerState;
pub use task_server::TaskServer;
