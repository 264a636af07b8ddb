use axum::extract::{Query, State};
use axum::response::IntoResponse;
use pulse_core::{frames_from_records, HubStats, WindowId};
use pulse_protocol::MetricFrame;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct MetricsHistoryQuery {
    /// Window id, e.g. `5s`.
    pub window: Option<String>,
    /// Only records strictly newer than this timestamp (ms).
    pub since: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MetricsHistoryResponse {
    pub window: String,
    pub capacity: usize,
    pub frames: Vec<MetricFrame>,
}

/// Retained history for one window.
#[utoipa::path(
    get,
    path = "/state/metrics",
    tag = "State",
    operation_id = "state_metrics_doc",
    description = "Records retained for one window, oldest first.",
    params(
        ("window" = String, Query, description = "Window id"),
        ("since" = Option<i64>, Query, description = "Exclusive lower bound in epoch milliseconds")
    ),
    responses(
        (status = 200, description = "Window history", body = MetricsHistoryResponse),
        (status = 400, description = "Bad query", body = pulse_protocol::ProblemDetails),
        (status = 404, description = "Unknown window", body = pulse_protocol::ProblemDetails)
    )
)]
pub async fn state_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsHistoryQuery>,
) -> impl IntoResponse {
    let Some(window) = q.window.as_deref().map(str::trim).filter(|w| !w.is_empty()) else {
        return crate::responses::bad_request("missing `window` parameter");
    };
    let since = match q.since.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(ms) => Some(ms),
            Err(_) => return crate::responses::bad_request("`since` must be an integer"),
        },
        None => None,
    };
    let id = WindowId::new(window);
    let Some(records) = state.hub().history(&id, since) else {
        return crate::responses::not_found(&format!("unknown window `{window}`"));
    };
    crate::responses::json_ok(MetricsHistoryResponse {
        window: id.to_string(),
        capacity: state.hub().options().store_capacity,
        frames: frames_from_records(&records),
    })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HubStateResponse {
    pub windows: Vec<String>,
    pub queue_capacity: usize,
    #[schema(value_type = Object)]
    pub stats: HubStats,
    pub events_total: u64,
    pub uptime_secs: u64,
}

/// Subscriber and publication counters.
#[utoipa::path(
    get,
    path = "/state/hub",
    tag = "State",
    operation_id = "state_hub_doc",
    description = "Live subscriber count and delivery counters.",
    responses(
        (status = 200, description = "Hub statistics", body = HubStateResponse)
    )
)]
pub async fn state_hub(State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.hub();
    crate::responses::json_ok(HubStateResponse {
        windows: hub.windows().iter().map(ToString::to_string).collect(),
        queue_capacity: hub.options().queue_capacity,
        stats: hub.stats(),
        events_total: state.counter().total(),
        uptime_secs: state.uptime_secs(),
    })
}
