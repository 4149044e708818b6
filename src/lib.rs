//! taskhub：定时任务、轮询任务与消息队列消费者的后台运行时
//!
//! 应用由 [`app::App`] 统一管理生命周期，[`common`] 负责进程启动装配，[`jobs`] 是进程内置的后台任务。

pub mod app;
pub mod common;
pub mod jobs;
pub mod shutdown;

pub use app::{hook, App, AppBuilder, AppInfo, Hook, DEFAULT_STOP_TIMEOUT};
pub use common::{RunMode, StartupConfig};
pub use shutdown::{Signal, DEFAULT_SIGNALS};
