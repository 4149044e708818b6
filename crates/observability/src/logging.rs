use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use taskhub_config::LoggingConfig;

use crate::log_rotation::{LogRotationConfig, RotatingFileWriter};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志级别过滤器，`RUST_LOG` 环境变量优先于配置
pub fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// 根据配置构建输出层：控制台一层，配置了日志文件时再加一层JSON文件输出
pub fn build_layers(config: &LoggingConfig) -> Result<Vec<BoxedLayer>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.development {
        layers.push(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .boxed(),
        );
    }

    if let Some(file) = &config.file {
        let writer = RotatingFileWriter::new(LogRotationConfig::from(file))
            .with_context(|| format!("初始化日志文件失败: {}", file.path))?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(writer))
                .boxed(),
        );
    }

    Ok(layers)
}

/// 初始化全局日志系统，进程内只能调用一次
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let layers = build_layers(config)?;

    tracing_subscriber::registry()
        .with(layers)
        .with(build_env_filter(&config.level))
        .try_init()
        .context("初始化日志系统失败")?;

    info!(
        logging.level = %config.level,
        logging.development = config.development,
        logging.file = config.file.as_ref().map(|f| f.path.as_str()).unwrap_or("-"),
        "日志系统初始化完成"
    );
    Ok(())
}
