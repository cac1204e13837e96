use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::models::StatsResponse;
use crate::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "EventStream Intelligence Gateway",
        "status": "running",
        "endpoints": {
            "simulate": "/api/simulate",
            "scenario": "/api/scenario/{name}",
            "templates": "/api/templates",
            "summaries": "/api/summaries",
            "stats": "/api/stats",
            "metrics": "/metrics",
            "websocket": "/ws"
        }
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "module": "stream-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        websocket_connections: state.broadcaster.count().await,
        gemini_available: state.augmenter.available(),
        bus_configured: state.config.bus_configured(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {e}")),
    }
}
