//! Health Check Endpoint
//!
//! Deep health check: 프로세스 + 데이터베이스 왕복까지 확인.
//! DB가 응답하지 않으면 `degraded`로 보고 (로드밸런서가 트래픽 차단).

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_start = std::time::Instant::now();
    let database = match state.engine.health_check().await {
        Ok(()) => DatabaseStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(err) => {
            tracing::warn!(error = %err, "Health check failed");
            DatabaseStatus {
                connected: false,
                latency_ms: None,
            }
        }
    };

    Json(HealthResponse {
        status: if database.connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
