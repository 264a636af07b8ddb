use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// RFC7807-style error payload used at service edges.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: Option<String>,
    pub instance: Option<String>,
    pub trace_id: Option<String>,
    pub code: Option<String>,
}

/// Rates computed at one instant, keyed by [`payload_key`].
///
/// Within a window, `ts` never repeats, so receivers may index frames by
/// `ts` and keep the last write.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, ToSchema)]
pub struct MetricFrame {
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    pub payload: BTreeMap<String, f64>,
}

impl MetricFrame {
    pub fn new(ts: i64) -> Self {
        Self {
            ts,
            payload: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, window: &str, rate: f64) -> Self {
        self.insert(window, rate);
        self
    }

    pub fn insert(&mut self, window: &str, rate: f64) {
        self.payload.insert(payload_key(window), rate);
    }

    pub fn rate(&self, window: &str) -> Option<f64> {
        self.payload.get(&payload_key(window)).copied()
    }
}

/// Payload key for a window id (`"5s"` -> `"eps5s"`).
pub fn payload_key(window: &str) -> String {
    format!("eps{window}")
}

/// Watermark as sent by clients: a number of milliseconds, or the same
/// number rendered as a string (browsers persisting it in local storage).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, ToSchema)]
#[serde(untagged)]
pub enum LastSeen {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl LastSeen {
    /// Milliseconds value, or `None` when the input is not a finite number.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            LastSeen::Millis(ms) => Some(*ms),
            LastSeen::Fractional(f) if f.is_finite() => Some(f.trunc() as i64),
            LastSeen::Fractional(_) => None,
            LastSeen::Text(raw) => {
                let trimmed = raw.trim();
                trimmed.parse::<i64>().ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
            }
        }
    }
}

/// Client hello carrying an optional watermark.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, ToSchema)]
pub struct AttachRequest {
    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<LastSeen>,
}

impl AttachRequest {
    pub fn watermark_ms(&self) -> Option<i64> {
        self.last_seen.as_ref().and_then(LastSeen::as_millis)
    }
}

/// Catch-up answer for non-streaming attach.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct ReplayResponse {
    /// Watermark actually applied after validation; `None` means live-only.
    pub watermark: Option<i64>,
    pub frames: Vec<MetricFrame>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_serializes_with_prefixed_keys() {
        let frame = MetricFrame::new(1_700_000_000_000)
            .with_rate("1s", 10.0)
            .with_rate("60s", 2.5);
        let value = serde_json::to_value(&frame).expect("frame json");
        assert_eq!(
            value,
            json!({"ts": 1_700_000_000_000i64, "payload": {"eps1s": 10.0, "eps60s": 2.5}})
        );
        assert_eq!(frame.rate("60s"), Some(2.5));
        assert_eq!(frame.rate("5s"), None);
    }

    #[test]
    fn attach_request_accepts_numbers_and_strings() {
        let numeric: AttachRequest =
            serde_json::from_value(json!({"lastSeen": 1234})).expect("numeric");
        assert_eq!(numeric.watermark_ms(), Some(1234));

        let text: AttachRequest =
            serde_json::from_value(json!({"lastSeen": "5678"})).expect("text");
        assert_eq!(text.watermark_ms(), Some(5678));

        let null: AttachRequest =
            serde_json::from_value(json!({"lastSeen": null})).expect("null");
        assert_eq!(null.watermark_ms(), None);

        let missing: AttachRequest = serde_json::from_value(json!({})).expect("missing");
        assert_eq!(missing.watermark_ms(), None);

        let garbage: AttachRequest =
            serde_json::from_value(json!({"lastSeen": "yesterday"})).expect("garbage");
        assert_eq!(garbage.watermark_ms(), None);
    }
}
