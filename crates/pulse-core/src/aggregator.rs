use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tracing::{trace, warn};

use crate::counter::CountSource;
use crate::hub::Hub;
use crate::record::MetricRecord;
use crate::window::WindowSpec;

/// Turns windowed counts into one record per window per tick.
///
/// `tick` takes `&mut self`, so a single aggregator never runs two ticks at
/// once.
pub struct Aggregator {
    source: Arc<dyn CountSource>,
    windows: Vec<WindowSpec>,
    hub: Hub,
    last_ts: Option<i64>,
}

impl Aggregator {
    pub fn new(source: Arc<dyn CountSource>, windows: Vec<WindowSpec>, hub: Hub) -> Self {
        Self {
            source,
            windows,
            hub,
            last_ts: None,
        }
    }

    pub fn windows(&self) -> &[WindowSpec] {
        &self.windows
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_ts
    }

    pub fn tick(&mut self) -> Vec<MetricRecord> {
        self.tick_at(Instant::now(), chrono::Utc::now().timestamp_millis())
    }

    /// Advance the counter at `now`, stamp `wall_ms` (bumped past the previous
    /// stamp if the wall clock stalled or stepped back) and publish.
    pub fn tick_at(&mut self, now: Instant, wall_ms: i64) -> Vec<MetricRecord> {
        self.source.advance(now);
        let ts = match self.last_ts {
            Some(prev) if wall_ms <= prev => prev + 1,
            _ => wall_ms,
        };
        self.last_ts = Some(ts);

        let mut records = Vec::with_capacity(self.windows.len());
        for window in &self.windows {
            match self.source.sample(window.span()) {
                Ok(sample) => {
                    records.push(MetricRecord::new(
                        ts,
                        window.id().clone(),
                        sample.rate_per_sec(),
                    ));
                }
                Err(err) => {
                    warn!(window = %window.id(), error = %err, "skipping window for this tick");
                    counter!("pulse_window_skipped_total", "window" => window.id().to_string())
                        .increment(1);
                }
            }
        }
        counter!("pulse_ticks_total").increment(1);
        if !records.is_empty() {
            let delivered = self.hub.publish(&records);
            trace!(ts, records = records.len(), delivered, "tick published");
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{EventCounter, SampleError, WindowSample};
    use crate::hub::HubOptions;
    use crate::window::{default_windows, WindowId};
    use std::time::Duration;

    const T0_MS: i64 = 1_700_000_000_000;

    fn setup(origin: Instant) -> (Arc<EventCounter>, Hub, Aggregator) {
        let windows = default_windows();
        let counter = Arc::new(EventCounter::with_origin(Duration::from_secs(60), origin));
        let hub = Hub::new(
            windows.iter().map(|w| w.id().clone()).collect(),
            HubOptions::default(),
        );
        let agg = Aggregator::new(counter.clone(), windows, hub.clone());
        (counter, hub, agg)
    }

    fn rate(records: &[MetricRecord], window: &str) -> f64 {
        records
            .iter()
            .find(|r| r.window.as_str() == window)
            .map(|r| r.value)
            .expect("window present")
    }

    #[test]
    fn ten_events_per_second_across_windows() {
        let t0 = Instant::now();
        let (counter, _hub, mut agg) = setup(t0);
        let mut last = Vec::new();
        for step in 1..=5u64 {
            counter.record_events(10);
            last = agg.tick_at(t0 + Duration::from_secs(step), T0_MS + step as i64 * 1_000);
            assert!((rate(&last, "1s") - 10.0).abs() < 1e-9);
        }
        assert!((rate(&last, "5s") - 10.0).abs() < 1e-9);
        // 60s window has only five seconds of history: partial-span rate.
        assert!((rate(&last, "60s") - 10.0).abs() < 1e-9);
    }

    #[test]
    fn timestamps_strictly_increase_when_clock_stalls() {
        let t0 = Instant::now();
        let (_counter, hub, mut agg) = setup(t0);
        let a = agg.tick_at(t0 + Duration::from_secs(1), T0_MS);
        let b = agg.tick_at(t0 + Duration::from_secs(2), T0_MS);
        let c = agg.tick_at(t0 + Duration::from_secs(3), T0_MS - 500);
        assert_eq!(a[0].timestamp_ms, T0_MS);
        assert_eq!(b[0].timestamp_ms, T0_MS + 1);
        assert_eq!(c[0].timestamp_ms, T0_MS + 2);
        let stored = hub.history(&WindowId::new("1s"), None).expect("history");
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn records_of_one_tick_share_a_timestamp() {
        let t0 = Instant::now();
        let (_counter, _hub, mut agg) = setup(t0);
        let records = agg.tick_at(t0 + Duration::from_secs(1), T0_MS);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.timestamp_ms == T0_MS));
    }

    struct FlakySource {
        inner: EventCounter,
        failing_span: Duration,
    }

    impl CountSource for FlakySource {
        fn advance(&self, now: Instant) {
            self.inner.advance(now);
        }

        fn sample(&self, span: Duration) -> Result<WindowSample, SampleError> {
            if span == self.failing_span {
                return Err(SampleError::Unavailable("simulated".into()));
            }
            self.inner.sample(span)
        }
    }

    #[test]
    fn failed_read_skips_only_that_window() {
        let t0 = Instant::now();
        let windows = default_windows();
        let hub = Hub::new(
            windows.iter().map(|w| w.id().clone()).collect(),
            HubOptions::default(),
        );
        let source = Arc::new(FlakySource {
            inner: EventCounter::with_origin(Duration::from_secs(60), t0),
            failing_span: Duration::from_secs(5),
        });
        let mut agg = Aggregator::new(source, windows, hub.clone());
        let records = agg.tick_at(t0 + Duration::from_secs(1), T0_MS);
        let ids: Vec<&str> = records.iter().map(|r| r.window.as_str()).collect();
        assert_eq!(ids, vec!["1s", "60s"]);
        assert_eq!(hub.history(&WindowId::new("5s"), None).map(|h| h.len()), Some(0));

        // Next tick proceeds normally for the healthy windows.
        let next = agg.tick_at(t0 + Duration::from_secs(2), T0_MS + 1_000);
        assert_eq!(next.len(), 2);
    }
}
