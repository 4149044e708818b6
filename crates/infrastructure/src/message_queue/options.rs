use std::collections::BTreeMap;
use std::time::Duration;

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::BasicProperties;

use taskhub_config::MessageQueueConfig;
use taskhub_errors::{AppError, AppResult};

/// AMQP允许的最大消息优先级
pub const MAX_PRIORITY: u8 = 9;

/// 消息投递模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// broker重启后丢失
    Transient,
    /// 写入磁盘，broker重启后保留
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// AMQP协议中的取值
    pub fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

/// 队列管理器的连接参数
#[derive(Debug, Clone)]
pub struct QueueManagerOptions {
    pub url: String,
    /// 默认交换机，发布与消费未单独指定时使用
    pub exchange: String,
    pub reconnect_delay: Duration,
    pub connection_timeout: Duration,
}

impl Default for QueueManagerOptions {
    fn default() -> Self {
        Self::from(&MessageQueueConfig::default())
    }
}

impl From<&MessageQueueConfig> for QueueManagerOptions {
    fn from(config: &MessageQueueConfig) -> Self {
        Self {
            url: config.url.clone(),
            exchange: config.exchange.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_seconds),
            connection_timeout: Duration::from_secs(config.connection_timeout_seconds),
        }
    }
}

/// 单个消费者的参数
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// 并行处理消息的分发协程数量
    pub concurrency: usize,
    /// broker推送给该消费者的未确认消息上限
    pub prefetch: u16,
    pub requeue_delay: Duration,
    /// 绑定使用的路由键，默认与队列名相同
    pub routing_key: Option<String>,
    /// 覆盖管理器的默认交换机，空字符串表示直接使用默认交换机不做绑定
    pub exchange: Option<String>,
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            prefetch: 10,
            requeue_delay: Duration::from_secs(1),
            routing_key: None,
            exchange: None,
            durable: true,
            auto_delete: false,
        }
    }
}

impl ConsumerOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.concurrency == 0 {
            return Err(AppError::invalid_argument("消费者并发数必须大于0"));
        }
        Ok(())
    }
}

/// 发布消息的参数
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    pub exchange: Option<String>,
    pub content_type: String,
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    /// 毫秒数的字符串形式
    pub expiration: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            exchange: None,
            content_type: "application/json".to_string(),
            delivery_mode: DeliveryMode::Persistent,
            priority: 0,
            expiration: None,
            correlation_id: None,
            reply_to: None,
            message_id: None,
            headers: BTreeMap::new(),
        }
    }
}

impl PublishOptions {
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_delivery_mode(mut self, delivery_mode: DeliveryMode) -> Self {
        self.delivery_mode = delivery_mode;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_expiration_milliseconds(mut self, millis: u64) -> Self {
        self.expiration = Some(millis.to_string());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// 转换为AMQP消息属性
    pub fn to_properties(&self) -> BasicProperties {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(self.content_type.clone()))
            .with_delivery_mode(self.delivery_mode.as_u8())
            .with_priority(self.priority.min(MAX_PRIORITY));

        if let Some(expiration) = &self.expiration {
            properties = properties.with_expiration(ShortString::from(expiration.clone()));
        }
        if let Some(id) = &self.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(id.clone()));
        }
        if let Some(reply_to) = &self.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to.clone()));
        }
        if let Some(id) = &self.message_id {
            properties = properties.with_message_id(ShortString::from(id.clone()));
        }
        if !self.headers.is_empty() {
            let mut headers = FieldTable::default();
            for (key, value) in &self.headers {
                headers.insert(
                    ShortString::from(key.clone()),
                    AMQPValue::LongString(LongString::from(value.clone())),
                );
            }
            properties = properties.with_headers(headers);
        }

        properties
    }
}
