use serde::{Deserialize, Serialize};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 滚动日志文件配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogFileConfig {
    pub path: String,
    /// 单个文件的最大大小（MB），超过后滚动
    pub max_size_mb: u64,
    /// 旧文件的最长保留天数，0 表示不按时间清理
    pub max_age_days: u64,
    /// 最多保留的旧文件数量，0 表示不按数量清理
    pub max_backups: usize,
    /// 是否使用gzip压缩滚动出的旧文件
    pub compress: bool,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            path: "logs/taskhub.log".to_string(),
            max_size_mb: 100,
            max_age_days: 7,
            max_backups: 10,
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// 开发模式使用pretty格式输出，否则输出JSON
    pub development: bool,
    pub file: Option<LogFileConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            development: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let level = self.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，可选值: {}",
                self.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if let Some(file) = &self.file {
            if file.path.trim().is_empty() {
                return Err(anyhow::anyhow!("日志文件路径不能为空"));
            }
            if file.max_size_mb == 0 {
                return Err(anyhow::anyhow!("日志文件大小上限必须大于0"));
            }
        }

        Ok(())
    }
}
