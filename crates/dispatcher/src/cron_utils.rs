use chrono::{DateTime, Duration, TimeZone, Timelike};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use taskhub_errors::{AppError, AppResult};

const EVERY_PREFIX: &str = "@every";

#[derive(Debug, Clone)]
enum Trigger {
    Cron(Box<Schedule>),
    /// `@every <duration>` 固定间隔，按整秒对齐
    Every(Duration),
}

/// CRON表达式解析和调度工具
///
/// 支持秒级精度的6/7字段表达式、`@hourly` 等描述符，以及 `@every 1m30s` 形式的固定间隔。
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    trigger: Trigger,
}

impl CronSchedule {
    pub fn parse(cron_expr: &str) -> AppResult<Self> {
        let expr = cron_expr.trim();
        let invalid = |message: String| AppError::InvalidCron {
            expr: cron_expr.to_string(),
            message,
        };

        let trigger = if let Some(rest) = expr.strip_prefix(EVERY_PREFIX) {
            let every = humantime::parse_duration(rest.trim()).map_err(|e| invalid(e.to_string()))?;
            // 小于1秒的间隔没有意义，间隔只保留整秒部分
            if every.as_secs() == 0 {
                return Err(invalid("间隔必须至少为1秒".to_string()));
            }
            let every = Duration::seconds(every.as_secs() as i64);
            Trigger::Every(every)
        } else {
            let schedule = Schedule::from_str(expr).map_err(|e| invalid(e.to_string()))?;
            Trigger::Cron(Box::new(schedule))
        };

        debug!(expr, "CRON表达式解析成功");
        Ok(Self {
            expr: expr.to_string(),
            trigger,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn validate(cron_expr: &str) -> AppResult<()> {
        Self::parse(cron_expr).map(|_| ())
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match &self.trigger {
            Trigger::Cron(schedule) => schedule.after(after).next(),
            Trigger::Every(every) => {
                let base = after.clone().with_nanosecond(0)?;
                Some(base + *every)
            }
        }
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming<Tz: TimeZone>(&self, from: &DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from.clone();
        while times.len() < count {
            match self.next_after(&cursor) {
                Some(next) => {
                    cursor = next.clone();
                    times.push(next);
                }
                None => break,
            }
        }
        times
    }

    /// 计算下次执行时间距离 `now` 的时长
    pub fn time_until_next<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<Duration> {
        self.next_after(now).map(|next| next - now.clone())
    }

    /// 获取任务的执行频率描述
    pub fn frequency_description<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> String {
        let upcoming = self.upcoming(from, 2);
        if upcoming.len() < 2 {
            return "无法确定频率".to_string();
        }

        match (upcoming[1].clone() - upcoming[0].clone()).num_seconds() {
            s if s < 60 => format!("每{s}秒"),
            s if s < 3600 => format!("每{}分钟", s / 60),
            s if s < 86400 => format!("每{}小时", s / 3600),
            s if s < 604800 => format!("每{}天", s / 86400),
            s => format!("每{}周", s / 604800),
        }
    }
}
