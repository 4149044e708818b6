use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

use taskhub_api::{create_routes, AppState, HttpServer, ServiceIdentity};
use taskhub_core::{Context, HealthCheck, Server};
use taskhub_errors::{AppError, AppResult};

struct StubCheck {
    component: &'static str,
    healthy: AtomicBool,
}

impl StubCheck {
    fn new(component: &'static str, healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            component,
            healthy: AtomicBool::new(healthy),
        })
    }
}

#[async_trait]
impl HealthCheck for StubCheck {
    fn component(&self) -> &str {
        self.component
    }

    async fn check(&self) -> AppResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::internal("connection refused"))
        }
    }
}

fn identity() -> ServiceIdentity {
    ServiceIdentity {
        id: "node-1".to_string(),
        name: "taskhub".to_string(),
        version: "0.1.0".to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_liveness_reports_identity() {
    let app = create_routes(AppState::new(identity(), Vec::new()));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["name"], "taskhub");
    assert_eq!(json["data"]["id"], "node-1");
}

#[tokio::test]
async fn test_readiness_all_healthy() {
    let checks: Vec<Arc<dyn HealthCheck>> =
        vec![StubCheck::new("database", true), StubCheck::new("cache", true)];
    let app = create_routes(AppState::new(identity(), checks));

    let response = app.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let components = json["data"].as_array().unwrap();
    assert_eq!(components.len(), 2);
    assert!(components.iter().all(|c| c["healthy"] == true));
}

#[tokio::test]
async fn test_readiness_reports_failed_component() {
    let cache = StubCheck::new("cache", true);
    let checks: Vec<Arc<dyn HealthCheck>> = vec![StubCheck::new("database", true), cache.clone()];
    let app = create_routes(AppState::new(identity(), checks));

    cache.healthy.store(false, Ordering::SeqCst);
    let response = app.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    let failed: Vec<&Value> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["healthy"] == false)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["component"], "cache");
    assert!(failed[0]["error"].as_str().unwrap().contains("connection refused"));

    cache.healthy.store(true, Ordering::SeqCst);
    let response = app.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = create_routes(AppState::new(identity(), Vec::new()));
    let response = app.oneshot(get("/api/tasks")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_server_serves_until_stopped() {
    let router = create_routes(AppState::new(identity(), Vec::new()));
    let server = Arc::new(HttpServer::bind("127.0.0.1:0", router).await.unwrap());
    let addr = server.local_addr();

    let running = {
        let server = server.clone();
        tokio::spawn(async move { server.start(Context::background()).await })
    };

    let url = format!("http://{addr}/health");
    let mut body = None;
    for _ in 0..50 {
        if let Ok(response) = reqwest::get(&url).await {
            body = Some(response.json::<Value>().await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(body.unwrap()["data"]["version"], "0.1.0");

    let (stop_ctx, _guard) = Context::background().with_timeout(Duration::from_secs(5));
    server.stop(stop_ctx).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert!(reqwest::get(&url).await.is_err());
}
