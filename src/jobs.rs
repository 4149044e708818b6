//! 进程内置的后台任务：数据库巡检、工作节点心跳与审计事件消费

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use taskhub_core::{task_handler, Context};
use taskhub_dispatcher::{Poller, Scheduler};
use taskhub_errors::{AppError, AppResult};
use taskhub_infrastructure::{
    queue_handler, Action, Cache, ConsumerOptions, Database, Message, QueueHandler, QueueManager,
};

pub const DATABASE_HEALTH_JOB: &str = "database-health";
/// 每分钟第0秒
pub const DATABASE_HEALTH_CRON: &str = "0 * * * * *";

pub const CACHE_HEARTBEAT_JOB: &str = "cache-heartbeat";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// 心跳键的存活时间，连续错过两次心跳后过期
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(90);

pub const AUDIT_CONSUMER: &str = "audit-events";
pub const AUDIT_QUEUE: &str = "taskhub.audit";
const AUDIT_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// 注册定时巡检数据库连接的任务
pub async fn register_database_health(scheduler: &Scheduler, database: Database) -> AppResult<()> {
    scheduler
        .register(
            DATABASE_HEALTH_JOB,
            DATABASE_HEALTH_CRON,
            task_handler(move |ctx: Context| {
                let database = database.clone();
                async move {
                    ctx.run(database.ping()).await??;
                    debug!("数据库连接正常");
                    Ok(())
                }
            }),
        )
        .await
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub node_id: String,
    pub beat_at: DateTime<Utc>,
}

pub fn heartbeat_key(node_id: &str) -> String {
    format!("worker:heartbeat:{node_id}")
}

/// 注册定期向缓存写入节点心跳的任务
pub async fn register_cache_heartbeat(poller: &Poller, cache: Cache, node_id: String) -> AppResult<()> {
    poller
        .register(
            CACHE_HEARTBEAT_JOB,
            HEARTBEAT_INTERVAL,
            task_handler(move |ctx: Context| {
                let cache = cache.clone();
                let node_id = node_id.clone();
                async move {
                    let beat = Heartbeat {
                        node_id: node_id.clone(),
                        beat_at: Utc::now(),
                    };
                    ctx.run(cache.set_json(&heartbeat_key(&node_id), &beat, HEARTBEAT_TTL))
                        .await??;
                    Ok(())
                }
            }),
        )
        .await
}

/// 审计事件，由业务服务发布到 `taskhub.audit` 队列
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub resource: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    fn validate(&self) -> AppResult<()> {
        if self.actor.trim().is_empty() {
            return Err(AppError::validation_error("审计事件缺少actor"));
        }
        if self.action.trim().is_empty() {
            return Err(AppError::validation_error("审计事件缺少action"));
        }
        Ok(())
    }
}

/// 审计事件的落地位置
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn remember(&self, event: &AuditEvent) -> AppResult<()>;
}

/// 在缓存中保存每个操作者最近一次的审计事件
#[async_trait]
impl AuditStore for Cache {
    async fn remember(&self, event: &AuditEvent) -> AppResult<()> {
        self.set_json(&format!("audit:last:{}", event.actor), event, AUDIT_RETENTION)
            .await
    }
}

/// 审计事件处理函数：格式错误的消息直接丢弃，存储失败时延迟重新入队
pub fn audit_handler(store: Arc<dyn AuditStore>) -> QueueHandler {
    queue_handler(move |_ctx, message: Message| {
        let store = store.clone();
        async move {
            let event = match message.json::<AuditEvent>() {
                Ok(event) => event,
                Err(e) => return (Action::NackDiscard, Err(e)),
            };
            if let Err(e) = event.validate() {
                return (Action::NackDiscard, Err(e));
            }

            match store.remember(&event).await {
                Ok(()) => {
                    debug!(actor = %event.actor, action = %event.action, "记录审计事件");
                    (Action::Ack, Ok(()))
                }
                Err(e) => (Action::NackRequeue, Err(e)),
            }
        }
    })
}

pub async fn register_audit_consumer(queue: &QueueManager, cache: Cache) -> AppResult<()> {
    queue
        .register_consumer(
            AUDIT_CONSUMER,
            AUDIT_QUEUE,
            audit_handler(Arc::new(cache)),
            ConsumerOptions::default()
                .with_concurrency(2)
                .with_prefetch(20),
        )
        .await?;
    info!(consumer = AUDIT_CONSUMER, queue = AUDIT_QUEUE, "审计事件消费者已注册");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use taskhub_infrastructure::Acknowledger;

    struct NoopAcker;

    #[async_trait]
    impl Acknowledger for NoopAcker {
        async fn ack(&self) -> AppResult<()> {
            Ok(())
        }

        async fn nack(&self, _requeue: bool) -> AppResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        events: Mutex<Vec<AuditEvent>>,
        failing: bool,
    }

    #[async_trait]
    impl AuditStore for MemoryStore {
        async fn remember(&self, event: &AuditEvent) -> AppResult<()> {
            if self.failing {
                return Err(AppError::internal("redis unavailable"));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn message(body: &str) -> Message {
        Message::new(body.as_bytes().to_vec(), Arc::new(NoopAcker))
    }

    const VALID: &str =
        r#"{"actor":"alice","action":"task.create","occurred_at":"2024-05-01T08:00:00Z"}"#;

    #[tokio::test]
    async fn test_valid_event_is_stored_and_acked() {
        let store = Arc::new(MemoryStore::default());
        let handler = audit_handler(store.clone());

        let (action, result) = handler(Context::background(), message(VALID)).await;
        assert_eq!(action, Action::Ack);
        assert!(result.is_ok());

        let events = store.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "alice");
        assert!(events[0].resource.is_none());
    }

    #[tokio::test]
    async fn test_malformed_event_is_discarded() {
        let store = Arc::new(MemoryStore::default());
        let handler = audit_handler(store.clone());

        let (action, result) = handler(Context::background(), message("not json")).await;
        assert_eq!(action, Action::NackDiscard);
        assert!(result.is_err());

        let blank_actor = r#"{"actor":" ","action":"x","occurred_at":"2024-05-01T08:00:00Z"}"#;
        let (action, _) = handler(Context::background(), message(blank_actor)).await;
        assert_eq!(action, Action::NackDiscard);
        assert!(store.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_requeues() {
        let store = Arc::new(MemoryStore {
            failing: true,
            ..Default::default()
        });
        let (action, result) = audit_handler(store)(Context::background(), message(VALID)).await;
        assert_eq!(action, Action::NackRequeue);
        assert!(result.unwrap_err().to_string().contains("redis unavailable"));
    }

    #[test]
    fn test_heartbeat_key() {
        assert_eq!(heartbeat_key("node-1"), "worker:heartbeat:node-1");
    }
}
