use utoipa::{OpenApi, ToSchema};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthOk {
    pub ok: bool,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HttpInfo {
    pub bind: String,
    pub port: u16,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct WindowInfo {
    #[schema(example = "5s")]
    pub id: String,
    pub span_secs: u64,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct AboutResponse {
    pub service: String,
    pub version: String,
    pub http: HttpInfo,
    pub tick_ms: u64,
    pub windows: Vec<WindowInfo>,
    /// SSE event names in the order a fresh attach emits them.
    pub stream_topics: Vec<String>,
    pub uptime_secs: u64,
    #[schema(example = json!(["GET /healthz", "GET /metrics/stream"]))]
    pub endpoints: Vec<String>,
    #[schema(value_type = Vec<serde_json::Value>)]
    pub endpoints_meta: Vec<serde_json::Value>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::meta::healthz,
        crate::api::meta::about,
        crate::api::ingest::events_ingest,
        crate::api::stream::metrics_stream,
        crate::api::stream::metrics_attach,
        crate::api::state::state_metrics,
        crate::api::state::state_hub,
    ),
    components(
        schemas(
            HealthOk,
            HttpInfo,
            WindowInfo,
            AboutResponse,
            crate::api::ingest::IngestRequest,
            crate::api::ingest::IngestResponse,
            crate::api::state::MetricsHistoryResponse,
            crate::api::state::HubStateResponse,
            pulse_protocol::MetricFrame,
            pulse_protocol::LastSeen,
            pulse_protocol::AttachRequest,
            pulse_protocol::ReplayResponse,
            pulse_protocol::ProblemDetails,
        )
    ),
    tags(
        (name = "Meta", description = "Service metadata and health"),
        (name = "Events", description = "Raw event ingestion"),
        (name = "Metrics", description = "Rate frames: SSE stream and replay"),
        (name = "State", description = "Retained history and hub counters")
    )
)]
pub struct ApiDoc;
