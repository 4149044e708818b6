//! 取消与截止时间上下文
//!
//! 应用上下文是所有运行器根上下文的父级，运行器根上下文又是每个任务上下文的父级，
//! 任务上下文再派生出每次执行的上下文。取消沿这条链向下传播，截止时间只在最靠近策略的一层设置一次。

use std::future::Future;
use std::time::Duration;

use taskhub_errors::{AppError, AppResult};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// 永不超时、只能被显式取消的根上下文
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 派生可单独取消的子上下文，返回的守卫被丢弃时取消子上下文
    pub fn with_cancel(&self) -> (Context, DropGuard) {
        let child = self.token.child_token();
        let guard = child.clone().drop_guard();
        (
            Context {
                token: child,
                deadline: self.deadline,
            },
            guard,
        )
    }

    pub fn with_timeout(&self, timeout: Duration) -> (Context, DropGuard) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 派生带截止时间的子上下文，实际截止时间取父级与请求值中较早的一个。
    ///
    /// 必须在tokio运行时内调用：到期后由后台计时器取消子上下文。
    pub fn with_deadline(&self, deadline: Instant) -> (Context, DropGuard) {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };

        let child = self.token.child_token();
        let timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });

        let guard = child.clone().drop_guard();
        (
            Context {
                token: child,
                deadline: Some(deadline),
            },
            guard,
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 距截止时间的剩余时长，没有截止时间时返回 `None`
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// 等待上下文被取消或到达截止时间
    pub async fn done(&self) {
        self.token.cancelled().await
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline_passed()
    }

    /// 上下文结束的原因，仍然有效时返回 `None`
    pub fn err(&self) -> Option<AppError> {
        if self.deadline_passed() {
            return Some(AppError::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Some(AppError::Cancelled);
        }
        None
    }

    /// 在上下文结束前完成 `fut`，否则返回上下文的结束原因
    pub async fn run<F: Future>(&self, fut: F) -> AppResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.err().unwrap_or(AppError::Cancelled)),
            output = fut => Ok(output),
        }
    }

    /// 可被取消的睡眠
    pub async fn sleep(&self, duration: Duration) -> AppResult<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates_to_children() {
        let root = Context::background();
        let (child, _guard) = root.with_cancel();
        let (grandchild, _guard2) = child.with_timeout(Duration::from_secs(60));

        root.token().cancel();

        assert!(child.is_done());
        assert!(grandchild.is_done());
        assert!(matches!(grandchild.err(), Some(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_affect_parent() {
        let root = Context::background();
        let (child, guard) = root.with_cancel();
        drop(guard);

        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_with_deadline_exceeded() {
        let root = Context::background();
        let (ctx, _guard) = root.with_timeout(Duration::from_millis(800));

        ctx.done().await;

        assert!(matches!(ctx.err(), Some(AppError::DeadlineExceeded)));
        assert!(!root.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_never_exceeds_parent() {
        let root = Context::background();
        let (parent, _g1) = root.with_timeout(Duration::from_secs(1));
        let (child, _g2) = parent.with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());

        let (shorter, _g3) = parent.with_timeout(Duration::from_millis(100));
        assert!(shorter.deadline().unwrap() < parent.deadline().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_err_when_deadline_hits() {
        let (ctx, _guard) = Context::background().with_timeout(Duration::from_millis(50));

        let result = ctx.sleep(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AppError::DeadlineExceeded)));

        let (ctx, _guard) = Context::background().with_timeout(Duration::from_secs(1));
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }
}
