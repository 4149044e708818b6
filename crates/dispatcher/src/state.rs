use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use taskhub_core::ExecutionRecord;

/// 运行器生命周期：只能 Idle -> Running -> Stopped 单向迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Stopped,
}

/// 单个任务的执行统计
#[derive(Debug, Default)]
pub(crate) struct TaskStats {
    runs: AtomicU64,
    last: Mutex<Option<ExecutionRecord>>,
}

impl TaskStats {
    pub(crate) fn record(&self, record: ExecutionRecord) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(record);
    }

    pub(crate) fn count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub(crate) fn last(&self) -> Option<ExecutionRecord> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
