//! 应用配置
//!
//! 加载顺序：内置默认值 → TOML配置文件 → `TASKHUB__` 前缀的环境变量（优先级最高）。
//! 每个配置段都提供 `validate()`，`AppConfig::load` 在返回前统一校验。

pub mod models;


pub use models::{
    ApiConfig, AppConfig, ApplicationConfig, CacheConfig, DatabaseConfig, LogFileConfig,
    LoggingConfig, MessageQueueConfig, SchedulerConfig,
};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "TASKHUB";

/// 未指定配置文件时依次查找的路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/taskhub.toml",
    "taskhub.toml",
    "/etc/taskhub/config.toml",
];
