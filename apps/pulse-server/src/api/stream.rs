use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, StreamExt as _};
use pulse_core::{frames_from_records, Delivery};
use pulse_protocol::{AttachRequest, LastSeen, MetricFrame, ReplayResponse};
use pulse_topics as topics;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StreamQuery {
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<String>,
}

/// Watermark from `?lastSeen=` or, failing that, the `Last-Event-ID` header.
fn requested_watermark(query: &StreamQuery, headers: &HeaderMap) -> Option<i64> {
    let raw = query.last_seen.clone().or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    })?;
    LastSeen::Text(raw).as_millis()
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn frame_event(topic: &'static str, frame: &MetricFrame) -> SseEvent {
    SseEvent::default()
        .event(topic)
        .id(frame.ts.to_string())
        .data(serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string()))
}

fn delivery_events(delivery: Delivery) -> Vec<Result<SseEvent, Infallible>> {
    let topic = match &delivery {
        Delivery::Replay(_) => topics::TOPIC_REPLAY,
        Delivery::Live(_) => topics::TOPIC_METRICS,
    };
    frames_from_records(delivery.records())
        .iter()
        .map(|frame| Ok(frame_event(topic, frame)))
        .collect()
}

/// Server-Sent Events stream of rate frames.
#[utoipa::path(
    get,
    path = "/metrics/stream",
    tag = "Metrics",
    operation_id = "metrics_stream_doc",
    description = "Server-Sent Events stream of rate frames. Frames newer than the watermark are replayed before live frames.",
    params(
        ("lastSeen" = Option<i64>, Query, description = "Watermark: timestamp (ms) of the newest frame already held"),
        ("Last-Event-ID" = Option<String>, Header, description = "Watermark used when lastSeen is absent")
    ),
    responses(
        (status = 200, description = "SSE stream of frames", content_type = "text/event-stream")
    )
)]
pub async fn metrics_stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let requested = requested_watermark(&q, &headers);
    let request_id = request_id(&headers);
    let subscription = state.hub().attach(requested);
    debug!(
        subscriber = %subscription.id(),
        request_id = %request_id,
        ?requested,
        backlog = subscription.backlog_len(),
        "metrics stream opened"
    );

    let mode = if subscription.watermark().is_some() {
        "after"
    } else {
        "live"
    };
    let handshake = json!({
        "request_id": request_id,
        "subscriber": subscription.id().to_string(),
        "watermark": subscription.watermark(),
        "replay": {
            "mode": mode,
            "count": subscription.backlog_len(),
        },
        "windows": state.hub().windows(),
    });
    let hello = SseEvent::default()
        .event(topics::TOPIC_SERVICE_CONNECTED)
        .data(handshake.to_string());

    let frames = subscription.flat_map(|delivery| stream::iter(delivery_events(delivery)));
    let events = stream::once(async move { Ok::<_, Infallible>(hello) }).chain(frames);

    let keep_alive = Duration::from_secs(state.config().http.keep_alive_secs.max(1));
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// One-shot attach: returns the backlog for a watermark without subscribing.
#[utoipa::path(
    post,
    path = "/metrics/attach",
    tag = "Metrics",
    operation_id = "metrics_attach_doc",
    description = "Return retained frames newer than the supplied watermark. Invalid watermarks yield an empty backlog.",
    request_body(content = AttachRequest, description = "Client watermark", content_type = "application/json"),
    responses(
        (status = 200, description = "Backlog frames", body = ReplayResponse),
        (status = 400, description = "Malformed body", body = pulse_protocol::ProblemDetails)
    )
)]
pub async fn metrics_attach(State(state): State<AppState>, body: Bytes) -> Response {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        AttachRequest::default()
    } else {
        match serde_json::from_slice::<AttachRequest>(&body) {
            Ok(req) => req,
            Err(err) => return crate::responses::bad_request(&format!("invalid body: {err}")),
        }
    };
    let (watermark, records) = state.hub().backlog(req.watermark_ms());
    crate::responses::json_ok(ReplayResponse {
        watermark,
        frames: frames_from_records(&records),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_watermark_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", HeaderValue::from_static("100"));
        let q = StreamQuery {
            last_seen: Some("250".into()),
        };
        assert_eq!(requested_watermark(&q, &headers), Some(250));
        assert_eq!(
            requested_watermark(&StreamQuery::default(), &headers),
            Some(100)
        );
    }

    #[test]
    fn malformed_watermark_is_absent() {
        let q = StreamQuery {
            last_seen: Some("soon".into()),
        };
        assert_eq!(requested_watermark(&q, &HeaderMap::new()), None);
        assert_eq!(
            requested_watermark(&StreamQuery::default(), &HeaderMap::new()),
            None
        );
    }

    #[test]
    fn request_id_is_echoed_or_generated() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        assert_eq!(request_id(&headers), "abc");
        assert!(Uuid::parse_str(&request_id(&HeaderMap::new())).is_ok());
    }
}
