use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": if state.coordinator.is_running() { "ok" } else { "stopping" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "batchhost",
        "version": env!("CARGO_PKG_VERSION"),
        "startedModules": state.registry.started_modules().await.len(),
        "workers": state.coordinator.workers().await.len(),
    }))
}
