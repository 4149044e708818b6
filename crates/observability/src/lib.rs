//! 日志初始化与滚动日志文件

pub mod log_rotation;
pub mod logging;

pub use log_rotation::{LogRotationConfig, LogRotationStats, RotatingFileWriter};
pub use logging::{build_env_filter, build_layers, init_logging};
