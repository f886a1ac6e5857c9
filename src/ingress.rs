//! 告警确认接口 (HTTP)
//!
//! - POST /api/log-alert  记录前端确认的告警
//! - GET  /api/alerts     最近确认的告警

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::{StorageError, ValidationError};
use crate::store::{AlertRecord, AlertStore};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct IngressState {
    pub store: Arc<dyn AlertStore>,
}

pub fn router(store: Arc<dyn AlertStore>) -> Router {
    Router::new()
        .route("/api/log-alert", post(log_alert_handler))
        .route("/api/alerts", get(list_alerts_handler))
        .layer(CorsLayer::permissive())
        .with_state(IngressState { store })
}

/// 启动服务, 直到出错才返回
pub async fn serve(addr: &str, store: Arc<dyn AlertStore>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 告警接口监听 http://{}", listener.local_addr()?);
    axum::serve(listener, router(store)).await?;
    Ok(())
}

/// 解析原始请求体
pub fn parse_body(body: &[u8]) -> Result<AlertRecord, ValidationError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    parse_alert(&payload)
}

/// 校验请求体: id/type/title 必填, 数字 id 按十进制字符串保存
pub fn parse_alert(payload: &Value) -> Result<AlertRecord, ValidationError> {
    let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;
    let field = |key: &str| object.get(key).and_then(scalar_to_string);

    let id = field("id");
    let alert_type = field("type");
    let title = field("title");

    let mut missing = Vec::new();
    if id.is_none() {
        missing.push("id");
    }
    if alert_type.is_none() {
        missing.push("type");
    }
    if title.is_none() {
        missing.push("title");
    }

    match (id, alert_type, title) {
        (Some(id), Some(alert_type), Some(title)) => Ok(AlertRecord {
            id,
            alert_type,
            title,
            description: field("description"),
            priority: field("priority"),
            acknowledged_at: None,
        }),
        _ => Err(ValidationError::MissingFields(missing)),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn reply(status: StatusCode, outcome: &str, message: &str) -> Response {
    (status, Json(json!({ "status": outcome, "message": message }))).into_response()
}

async fn log_alert_handler(State(state): State<IngressState>, body: Bytes) -> Response {
    let record = match parse_body(&body) {
        Ok(record) => record,
        Err(e) => {
            warn!("⚠️ 拒绝告警确认: {}", e);
            return reply(StatusCode::BAD_REQUEST, "error", "Missing required alert data");
        }
    };

    let store = state.store.clone();
    let id = record.id.clone();
    let result = tokio::task::spawn_blocking(move || store.upsert(&record))
        .await
        .map_err(|e| StorageError::Task(e.to_string()))
        .and_then(|inner| inner);

    match result {
        Ok(()) => {
            info!("📝 告警已确认: {}", id);
            reply(StatusCode::CREATED, "success", "Alert logged successfully")
        }
        Err(e) => {
            error!("❌ 告警写库失败 {}: {}", id, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "error", "Database error")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_alerts_handler(
    State(state): State<IngressState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let store = state.store.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let result = tokio::task::spawn_blocking(move || store.list(limit))
        .await
        .map_err(|e| StorageError::Task(e.to_string()))
        .and_then(|inner| inner);

    match result {
        Ok(alerts) => Json(json!({ "status": "success", "alerts": alerts })).into_response(),
        Err(e) => {
            error!("❌ 读取告警失败: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "error", "Database error")
        }
    }
}
