//! 测试辅助工具：容器环境与模拟服务

pub mod containers;
pub mod mocks;

pub use containers::{PostgresTestContainer, RabbitMqTestContainer, RedisTestContainer};
pub use mocks::{EventLog, MockServer};
