//! Health and readiness probes.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use sqlx::PgPool;

/// `GET /health`: basic service health.
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "broker-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /livez`: liveness: the process is running.
pub async fn livez_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /readyz`: readiness: the database answers.
pub async fn readyz_handler(State(pool): State<PgPool>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => {
            tracing::error!(target: "health", error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
        }
    }
}
