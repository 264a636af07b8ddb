use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

use crate::AppState;

/// Health probe.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Meta",
    operation_id = "healthz_doc",
    description = "Service readiness probe.",
    responses(
        (status = 200, description = "Service healthy", body = crate::openapi::HealthOk)
    )
)]
pub async fn healthz() -> impl IntoResponse {
    crate::responses::json_ok(json!({"ok": true}))
}

/// Service metadata and endpoints index.
#[utoipa::path(
    get,
    path = "/about",
    tag = "Meta",
    operation_id = "about_doc",
    description = "Service metadata, configured windows, and endpoints index.",
    responses(
        (status = 200, description = "Service metadata", body = crate::openapi::AboutResponse)
    )
)]
pub async fn about(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = state.config();
    let windows: Vec<_> = cfg
        .windows
        .iter()
        .map(|w| json!({"id": w.id, "span_secs": w.span_secs}))
        .collect();
    let endpoints = state.endpoints();
    crate::responses::json_ok(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "http": {"bind": cfg.http.bind, "port": cfg.http.port},
        "tick_ms": cfg.tick_ms,
        "windows": windows,
        "stream_topics": pulse_topics::STREAM_TOPICS,
        "uptime_secs": state.uptime_secs(),
        "endpoints": endpoints.as_ref(),
        "endpoints_meta": state.endpoints_meta().as_ref(),
    }))
}
