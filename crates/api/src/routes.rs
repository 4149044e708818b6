use std::sync::Arc;

use axum::{middleware::from_fn, routing::get, Router};
use serde::Serialize;

use taskhub_core::HealthCheck;

use crate::handlers::health::{liveness, readiness};
use crate::middleware::{request_logging, trace_layer};

/// 存活探针返回的服务标识
#[derive(Debug, Clone, Serialize)]
pub struct ServiceIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub identity: ServiceIdentity,
    pub checks: Arc<Vec<Arc<dyn HealthCheck>>>,
}

impl AppState {
    pub fn new(identity: ServiceIdentity, checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        Self {
            identity,
            checks: Arc::new(checks),
        }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
        .layer(from_fn(request_logging))
        .layer(trace_layer())
        .with_state(state)
}
