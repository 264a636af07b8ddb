use pulse_protocol::MetricFrame;
use serde::{Deserialize, Serialize};

use crate::window::WindowId;

/// One computed rate for one window at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub window: WindowId,
    /// Events per second, never negative.
    pub value: f64,
}

impl MetricRecord {
    pub fn new(timestamp_ms: i64, window: WindowId, value: f64) -> Self {
        Self {
            timestamp_ms,
            window,
            value: value.max(0.0),
        }
    }
}

/// Group records sharing a timestamp into wire frames, ordered by timestamp.
///
/// Input records must already be sorted by timestamp; records of one tick
/// share a timestamp and end up in one frame.
pub fn frames_from_records<'a, I>(records: I) -> Vec<MetricFrame>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let mut frames: Vec<MetricFrame> = Vec::new();
    for record in records {
        match frames.last_mut() {
            Some(frame) if frame.ts == record.timestamp_ms => {
                frame.insert(record.window.as_str(), record.value);
            }
            _ => frames.push(
                MetricFrame::new(record.timestamp_ms).with_rate(record.window.as_str(), record.value),
            ),
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ts: i64, window: &str, value: f64) -> MetricRecord {
        MetricRecord::new(ts, WindowId::new(window), value)
    }

    #[test]
    fn groups_consecutive_records_by_timestamp() {
        let records = vec![
            rec(1_000, "1s", 3.0),
            rec(1_000, "5s", 2.0),
            rec(2_000, "1s", 4.0),
            rec(2_000, "5s", 2.5),
            rec(3_000, "1s", 1.0),
        ];
        let frames = frames_from_records(&records);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].ts, 1_000);
        assert_eq!(frames[0].rate("5s"), Some(2.0));
        assert_eq!(frames[1].rate("1s"), Some(4.0));
        assert_eq!(frames[2].rate("5s"), None);
    }

    #[test]
    fn negative_rates_are_clamped() {
        assert_eq!(rec(1, "1s", -2.0).value, 0.0);
    }
}
