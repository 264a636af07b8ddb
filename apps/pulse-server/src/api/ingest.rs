use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::AppState;

/// Upper bound on a single ingest call.
const MAX_COUNT_PER_REQUEST: u64 = 1_000_000;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct IngestRequest {
    /// Number of events to record; defaults to 1.
    pub count: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub accepted: u64,
    /// Events recorded since the service started.
    pub total: u64,
}

/// Record raw events.
#[utoipa::path(
    post,
    path = "/events",
    tag = "Events",
    operation_id = "events_ingest_doc",
    description = "Record one or more events. An empty body records a single event.",
    request_body(content = IngestRequest, description = "Optional event count", content_type = "application/json"),
    responses(
        (status = 202, description = "Events recorded", body = IngestResponse),
        (status = 400, description = "Malformed body", body = pulse_protocol::ProblemDetails)
    )
)]
pub async fn events_ingest(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        match serde_json::from_slice::<IngestRequest>(&body) {
            Ok(req) => req,
            Err(err) => return crate::responses::bad_request(&format!("invalid body: {err}")),
        }
    };
    let count = req.count.unwrap_or(1);
    if count > MAX_COUNT_PER_REQUEST {
        return crate::responses::bad_request(&format!(
            "count must not exceed {MAX_COUNT_PER_REQUEST}"
        ));
    }
    let counter = state.counter();
    counter.record_events(count);
    crate::responses::json_status(
        StatusCode::ACCEPTED,
        IngestResponse {
            accepted: count,
            total: counter.total(),
        },
    )
}
