use std::time::Duration;

use axum::extract::State;
use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::response::ApiResponse;
use crate::routes::{AppState, ServiceIdentity};

/// 单个探针的最长等待时间
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn liveness(State(state): State<AppState>) -> ApiResponse<ServiceIdentity> {
    ApiResponse::success(state.identity)
}

pub async fn readiness(State(state): State<AppState>) -> ApiResponse<Vec<ComponentStatus>> {
    let probes = state.checks.iter().map(|check| async move {
        let component = check.component().to_string();
        let error = match tokio::time::timeout(PROBE_TIMEOUT, check.check()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("探测超时({}s)", PROBE_TIMEOUT.as_secs())),
        };
        if let Some(error) = &error {
            warn!(component = %component, error = %error, "就绪检查失败");
        }
        ComponentStatus {
            healthy: error.is_none(),
            component,
            error,
        }
    });
    let statuses = join_all(probes).await;

    if statuses.iter().all(|s| s.healthy) {
        ApiResponse::success(statuses)
    } else {
        ApiResponse::failure(statuses, "依赖组件不可用")
    }
}
