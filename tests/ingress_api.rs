// Alert acknowledgement API tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ppe_sentinel::error::{StorageError, StorageResult};
use ppe_sentinel::ingress::router;
use ppe_sentinel::store::{AlertRecord, AlertStore, SqliteAlertStore};
use serde_json::{json, Value};
use tower::ServiceExt;

fn post(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn test_app() -> (Router, Arc<SqliteAlertStore>) {
    let store = Arc::new(SqliteAlertStore::open_in_memory().unwrap());
    (router(store.clone()), store)
}

#[tokio::test]
async fn test_missing_id_and_title_is_rejected() {
    let (app, store) = test_app();

    let response = app
        .oneshot(post(
            "/api/log-alert",
            json!({ "type": "warning", "description": "x" }).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "Missing required alert data");
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let (app, store) = test_app();

    let response = app
        .oneshot(post("/api/log-alert", "not json".to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_valid_alert_is_logged() {
    let (app, store) = test_app();

    let payload = json!({
        "id": "4f0c2f7e-1c1a-4a55-9f57-2f3f1d2f9a10",
        "type": "critical",
        "title": "CRITICAL: PPE Missing",
        "description": "Person at [10,10,50,100] is missing: gloves",
        "priority": "HIGH"
    });
    let response = app
        .clone()
        .oneshot(post("/api/log-alert", payload.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Alert logged successfully");

    let saved = store
        .get("4f0c2f7e-1c1a-4a55-9f57-2f3f1d2f9a10")
        .unwrap()
        .unwrap();
    assert_eq!(saved.alert_type, "critical");
    assert_eq!(saved.priority.as_deref(), Some("HIGH"));

    // 同一 id 再次提交覆盖旧记录
    let response = app
        .clone()
        .oneshot(post("/api/log-alert", payload.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(store.count().unwrap(), 1);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/alerts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["alerts"][0]["title"], "CRITICAL: PPE Missing");
}

struct BrokenStore;

impl AlertStore for BrokenStore {
    fn upsert(&self, _record: &AlertRecord) -> StorageResult<()> {
        Err(StorageError::Poisoned)
    }

    fn list(&self, _limit: usize) -> StorageResult<Vec<AlertRecord>> {
        Err(StorageError::Poisoned)
    }
}

#[tokio::test]
async fn test_storage_failure_returns_500() {
    let app = router(Arc::new(BrokenStore));

    let response = app
        .oneshot(post(
            "/api/log-alert",
            json!({ "id": 7, "type": "info", "title": "t" }).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Database error");
}
