use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// 定时任务调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 计算CRON触发时间使用的IANA时区，如 `UTC`、`Asia/Shanghai`，夏令时按时区规则处理
    pub timezone: String,
    /// 单次执行的超时上限
    pub execution_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            execution_timeout_seconds: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }

    pub fn tz(&self) -> anyhow::Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.tz()?;
        if self.execution_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务执行超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 解析时区配置，空字符串视为UTC
pub fn parse_timezone(timezone: &str) -> anyhow::Result<Tz> {
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return Ok(Tz::UTC);
    }
    tz.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("无效的时区: {tz} - {e}"))
}
