use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::BasicProperties;
use serde::de::DeserializeOwned;

use taskhub_core::Context;
use taskhub_errors::{AppError, AppResult};

/// 处理函数对一条消息的裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 确认并从队列删除
    Ack,
    /// 拒绝且不重新入队，由broker策略决定是否进入死信
    NackDiscard,
    /// 等待 `requeue_delay` 后拒绝并重新入队
    NackRequeue,
    /// 处理函数已通过 [`Message::ack`] / [`Message::nack`] 自行确认
    Manual,
}

/// 消息确认的底层操作
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> AppResult<()>;

    async fn nack(&self, requeue: bool) -> AppResult<()>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> AppResult<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map_err(|e| AppError::message_queue(format!("确认消息失败: {e}")))?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> AppResult<()> {
        Acker::nack(
            self,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| AppError::message_queue(format!("拒绝消息失败: {e}")))?;
        Ok(())
    }
}

/// 投递给处理函数的消息
#[derive(Clone)]
pub struct Message {
    pub body: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub properties: BasicProperties,
    acker: Arc<dyn Acknowledger>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            body: body.into(),
            exchange: String::new(),
            routing_key: String::new(),
            delivery_tag: 0,
            redelivered: false,
            properties: BasicProperties::default(),
            acker,
        }
    }

    pub fn from_delivery(delivery: Delivery) -> Self {
        Self {
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            body: delivery.data,
            acker: Arc::new(delivery.acker),
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// 把消息体按JSON解码
    pub fn json<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type().as_ref().map(|c| c.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id().as_ref().map(|c| c.as_str())
    }

    /// 手动确认，仅在处理函数返回 [`Action::Manual`] 时使用
    pub async fn ack(&self) -> AppResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> AppResult<()> {
        self.acker.nack(requeue).await
    }

    pub(crate) fn acknowledger(&self) -> Arc<dyn Acknowledger> {
        self.acker.clone()
    }
}

/// 处理结果：裁决决定如何确认，错误仅用于日志
pub type HandlerOutcome = (Action, AppResult<()>);

pub type QueueHandler = Arc<dyn Fn(Context, Message) -> BoxFuture<'static, HandlerOutcome> + Send + Sync>;

pub fn queue_handler<F, Fut>(f: F) -> QueueHandler
where
    F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    Arc::new(move |ctx: Context, message: Message| -> BoxFuture<'static, HandlerOutcome> {
        Box::pin(f(ctx, message))
    })
}

/// 只关心消息体的简单处理函数：成功时确认，失败时延迟重新入队
pub fn simple_handler<F, Fut>(f: F) -> QueueHandler
where
    F: Fn(Context, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx: Context, message: Message| -> BoxFuture<'static, HandlerOutcome> {
        let f = f.clone();
        Box::pin(async move {
            match f(ctx, message.body).await {
                Ok(()) => (Action::Ack, Ok(())),
                Err(e) => (Action::NackRequeue, Err(e)),
            }
        })
    })
}
