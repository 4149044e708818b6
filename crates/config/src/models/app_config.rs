use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api::ApiConfig, cache::CacheConfig, database::DatabaseConfig, logging::LoggingConfig,
    message_queue::MessageQueueConfig, scheduler::SchedulerConfig,
};
use crate::{DEFAULT_CONFIG_PATHS, ENV_PREFIX};

/// 应用标识与生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub version: String,
    pub stop_timeout_seconds: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "taskhub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stop_timeout_seconds: 10,
        }
    }
}

impl ApplicationConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("应用名称不能为空"));
        }
        if self.stop_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("停止超时时间必须大于0"));
        }
        Ok(())
    }
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub app: ApplicationConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub message_queue: MessageQueueConfig,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: TASKHUB__, separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .add_source(ConfigBuilder::try_from(&AppConfig::default()).context("加载默认配置失败")?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.app.validate().context("应用配置验证失败")?;
        self.database.validate().context("数据库配置验证失败")?;
        self.cache.validate().context("缓存配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        Ok(())
    }
}
