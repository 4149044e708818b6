//! HTTP接口：存活与就绪探针
//!
//! `HttpServer` 把axum路由包装成生命周期管理器可以统一启停的 [`Server`](taskhub_core::Server)。
//!
//! - `GET /health` 存活探针，返回服务标识
//! - `GET /health/ready` 就绪探针，依次检查数据库、缓存与消息队列，任何一项失败返回503

pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod server;

pub use response::ApiResponse;
pub use routes::{create_routes, AppState, ServiceIdentity};
pub use server::HttpServer;
