use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::StreamExt;
use lapin::{Channel, Consumer};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn, Instrument};

use taskhub_core::{catch_panic, log_task_failure, Context};
use taskhub_errors::AppResult;

use super::message::{Acknowledger, Action, Message, QueueHandler};
use super::options::ConsumerOptions;
use super::QueueManager;

const RUNNER: &str = "queue";

/// 消费者注册信息，重连后据此重新声明和订阅
#[derive(Clone)]
pub(crate) struct ConsumerSpec {
    pub name: String,
    pub queue: String,
    pub handler: QueueHandler,
    pub options: ConsumerOptions,
}

/// 调用处理函数并按裁决确认消息，处理函数panic时按重新入队处理。
///
/// 每条消息使用独立的后台上下文，停止消费者不会中断正在处理的消息。
pub(crate) async fn dispatch(
    consumer: &str,
    handler: &QueueHandler,
    message: Message,
    requeue_delay: Duration,
) -> AppResult<Action> {
    let acker = message.acknowledger();
    let delivery_tag = message.delivery_tag;
    let start = Instant::now();

    let handler = handler.clone();
    let outcome = catch_panic(async move { handler(Context::background(), message).await }).await;
    let (action, result) = match outcome {
        Ok(outcome) => outcome,
        Err(panic) => (Action::NackRequeue, Err(panic)),
    };

    if let Err(e) = &result {
        log_task_failure(RUNNER, consumer, start.elapsed(), e);
    }
    debug!(consumer, delivery_tag, ?action, "消息处理完成");

    settle(acker.as_ref(), action, requeue_delay).await?;
    Ok(action)
}

async fn settle(acker: &dyn Acknowledger, action: Action, requeue_delay: Duration) -> AppResult<()> {
    match action {
        Action::Ack => acker.ack().await,
        Action::NackDiscard => acker.nack(false).await,
        Action::NackRequeue => {
            // 失败后稍等再还给broker，避免同一条消息被反复快速投递
            if !requeue_delay.is_zero() {
                tokio::time::sleep(requeue_delay).await;
            }
            acker.nack(true).await
        }
        Action::Manual => Ok(()),
    }
}

/// 消费者守护循环：订阅、分发，通道或连接断开后等待重连间隔再重新订阅
#[instrument(name = "consumer", skip_all, fields(consumer = %spec.name, queue = %spec.queue))]
pub(crate) async fn supervise(
    manager: QueueManager,
    spec: ConsumerSpec,
    ctx: Context,
    mut initial: Option<(Channel, Consumer)>,
) {
    let reconnect_delay = manager.options().reconnect_delay;

    loop {
        let (channel, consumer) = match initial.take() {
            Some(subscription) => subscription,
            None => match manager.open_consumer(&spec).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(error = %e, delay_ms = reconnect_delay.as_millis() as u64, "订阅队列失败，稍后重试");
                    if ctx.sleep(reconnect_delay).await.is_err() {
                        break;
                    }
                    continue;
                }
            },
        };

        info!(concurrency = spec.options.concurrency, "消费者开始接收消息");
        let consumer = Arc::new(Mutex::new(consumer));
        let dispatchers = (0..spec.options.concurrency).map(|worker| {
            tokio::spawn(
                run_dispatcher(worker, spec.clone(), consumer.clone(), ctx.clone())
                    .in_current_span(),
            )
        });
        for result in join_all(dispatchers).await {
            if let Err(e) = result {
                warn!(error = %e, "分发协程异常退出");
            }
        }

        if channel.status().connected() {
            if let Err(e) = channel.close(200, "消费者停止").await {
                debug!(error = %e, "关闭消费者通道失败");
            }
        }
        if ctx.is_done() {
            break;
        }

        warn!(delay_ms = reconnect_delay.as_millis() as u64, "消费者通道已断开，准备重连");
        if ctx.sleep(reconnect_delay).await.is_err() {
            break;
        }
    }

    info!("消费者已停止");
}

/// 单个分发协程：严格串行地取消息、处理、确认
async fn run_dispatcher(
    worker: usize,
    spec: ConsumerSpec,
    consumer: Arc<Mutex<Consumer>>,
    ctx: Context,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => return,
            next = async { consumer.lock().await.next().await } => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                warn!(worker, error = %e, "接收消息失败");
                return;
            }
            None => {
                debug!(worker, "消息流已结束");
                return;
            }
        };

        let message = Message::from_delivery(delivery);
        let requeue_delay = spec.options.requeue_delay;
        if let Err(e) = dispatch(&spec.name, &spec.handler, message, requeue_delay).await {
            warn!(worker, error = %e, "确认消息失败");
        }
    }
}
