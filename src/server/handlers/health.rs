use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::AppState;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "scope": "gateway" }))
}

/// 就绪探测：检查上游是否可达。
pub async fn upstream_health(State(app_state): State<Arc<AppState>>) -> Json<Value> {
    let ok = app_state.upstream.ping().await;
    Json(json!({
        "status": if ok { "ok" } else { "degraded" },
        "upstream": ok,
    }))
}
