//! 外部资源：PostgreSQL、Redis与RabbitMQ

pub mod cache;
pub mod database;
pub mod dependencies;
pub mod message_queue;

pub use cache::Cache;
pub use database::Database;
pub use dependencies::Dependencies;
pub use message_queue::{
    queue_handler, simple_handler, Acknowledger, Action, ConsumerOptions, DeliveryMode,
    HandlerOutcome, Message, PublishOptions, QueueHandler, QueueManager, QueueManagerOptions,
};
