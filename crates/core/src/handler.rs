use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use taskhub_errors::AppResult;

use crate::Context;

pub type TaskFuture = BoxFuture<'static, AppResult<()>>;

/// 定时任务与轮询任务共用的处理函数
pub type TaskHandler = Arc<dyn Fn(Context) -> TaskFuture + Send + Sync>;

/// 把普通的异步闭包包装成 [`TaskHandler`]
pub fn task_handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Arc::new(move |ctx: Context| -> TaskFuture { Box::pin(f(ctx)) })
}
