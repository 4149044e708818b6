use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use taskhub_errors::{AppError, AppResult, ErrorKind};
use tracing::{error, info};

/// 单次执行的结果记录
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(started_at: DateTime<Utc>, duration: Duration, result: &AppResult<()>) -> Self {
        Self {
            started_at,
            duration,
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// 运行 `fut` 并捕获其中的panic，panic被转换为 [`AppError::Panic`]
pub async fn catch_panic<F: Future>(fut: F) -> AppResult<F::Output> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| AppError::Panic(panic_message(payload.as_ref())))
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 按错误分类记录任务失败：基础设施错误记为error，业务与校验错误记为info
pub fn log_task_failure(runner: &str, task: &str, duration: Duration, err: &AppError) {
    let elapsed_ms = duration.as_millis() as u64;
    match err.kind() {
        ErrorKind::Internal => error!(
            runner,
            task,
            elapsed_ms,
            error = %err,
            details = ?err,
            "任务执行失败"
        ),
        ErrorKind::Business | ErrorKind::Validation => info!(
            runner,
            task,
            elapsed_ms,
            reason = err.reason().map(|r| r.as_str()).unwrap_or("-"),
            error = %err,
            "任务执行未通过业务校验"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catch_panic_passes_through_output() {
        let result = catch_panic(async { 41 + 1 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_catch_panic_converts_panic() {
        let result = catch_panic(async {
            if true {
                panic!("handler exploded");
            }
        })
        .await;

        match result {
            Err(AppError::Panic(msg)) => assert_eq!(msg, "handler exploded"),
            other => panic!("expected panic error, got {other:?}"),
        }
    }

    #[test]
    fn test_execution_record() {
        let ok = ExecutionRecord::new(Utc::now(), Duration::from_millis(5), &Ok(()));
        assert!(ok.is_success());

        let failed = ExecutionRecord::new(
            Utc::now(),
            Duration::from_millis(5),
            &Err(AppError::DeadlineExceeded),
        );
        assert_eq!(failed.error.as_deref(), Some("context deadline exceeded"));
    }
}
