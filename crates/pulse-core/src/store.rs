use std::collections::{HashMap, VecDeque};

use crate::record::MetricRecord;
use crate::window::WindowId;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("unknown window {0}")]
    UnknownWindow(WindowId),
    #[error("record for {window} at {timestamp_ms} is not newer than {latest_ms}")]
    OutOfOrder {
        window: WindowId,
        timestamp_ms: i64,
        latest_ms: i64,
    },
}

/// Bounded, time-ordered history of records per window.
#[derive(Debug)]
pub struct MetricStore {
    capacity: usize,
    histories: HashMap<WindowId, VecDeque<MetricRecord>>,
}

impl MetricStore {
    pub fn new<I>(windows: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = WindowId>,
    {
        let capacity = capacity.max(1);
        let histories = windows
            .into_iter()
            .map(|id| (id, VecDeque::with_capacity(capacity)))
            .collect();
        Self {
            capacity,
            histories,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append at the tail, evicting the oldest entry once over capacity.
    pub fn append(&mut self, record: MetricRecord) -> Result<(), StoreError> {
        let history = self
            .histories
            .get_mut(&record.window)
            .ok_or_else(|| StoreError::UnknownWindow(record.window.clone()))?;
        if let Some(latest) = history.back() {
            if record.timestamp_ms <= latest.timestamp_ms {
                return Err(StoreError::OutOfOrder {
                    window: record.window,
                    timestamp_ms: record.timestamp_ms,
                    latest_ms: latest.timestamp_ms,
                });
            }
        }
        history.push_back(record);
        while history.len() > self.capacity {
            history.pop_front();
        }
        Ok(())
    }

    /// Retained records for `window` newer than `watermark`, oldest first.
    ///
    /// No watermark means no backlog. A watermark older than everything
    /// retained yields the whole history; evicted records are gone.
    pub fn since(&self, window: &WindowId, watermark: Option<i64>) -> Vec<MetricRecord> {
        let Some(watermark) = watermark else {
            return Vec::new();
        };
        let Some(history) = self.histories.get(window) else {
            return Vec::new();
        };
        let start = history.partition_point(|r| r.timestamp_ms <= watermark);
        history.range(start..).cloned().collect()
    }

    pub fn len(&self, window: &WindowId) -> usize {
        self.histories.get(window).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.histories.values().all(VecDeque::is_empty)
    }

    pub fn latest(&self, window: &WindowId) -> Option<&MetricRecord> {
        self.histories.get(window).and_then(VecDeque::back)
    }

    pub fn oldest(&self, window: &WindowId) -> Option<&MetricRecord> {
        self.histories.get(window).and_then(VecDeque::front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_sec() -> WindowId {
        WindowId::new("1s")
    }

    fn store_with(n: i64, capacity: usize) -> MetricStore {
        let mut store = MetricStore::new([one_sec()], capacity);
        for i in 1..=n {
            store
                .append(MetricRecord::new(i * 1_000, one_sec(), i as f64))
                .expect("append");
        }
        store
    }

    #[test]
    fn keeps_most_recent_records_oldest_first() {
        let store = store_with(120, 60);
        assert_eq!(store.len(&one_sec()), 60);
        let all = store.since(&one_sec(), Some(0));
        assert_eq!(all.len(), 60);
        assert_eq!(all.first().map(|r| r.timestamp_ms), Some(61_000));
        assert_eq!(all.last().map(|r| r.timestamp_ms), Some(120_000));
        assert!(all.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        assert_eq!(store.oldest(&one_sec()).map(|r| r.timestamp_ms), Some(61_000));
        assert_eq!(store.latest(&one_sec()).map(|r| r.timestamp_ms), Some(120_000));
        assert_eq!(store.capacity(), 60);
    }

    #[test]
    fn since_is_strictly_after_watermark() {
        let store = store_with(100, 100);
        let backlog = store.since(&one_sec(), Some(50_000));
        assert_eq!(backlog.len(), 50);
        assert_eq!(backlog[0].timestamp_ms, 51_000);
        assert_eq!(backlog[49].timestamp_ms, 100_000);
    }

    #[test]
    fn since_without_watermark_is_empty() {
        let store = store_with(10, 10);
        assert!(store.since(&one_sec(), None).is_empty());
    }

    #[test]
    fn since_between_records_and_past_tail() {
        let store = store_with(10, 10);
        assert_eq!(store.since(&one_sec(), Some(4_500)).len(), 6);
        assert!(store.since(&one_sec(), Some(10_000)).is_empty());
        assert!(store.since(&one_sec(), Some(99_000)).is_empty());
    }

    #[test]
    fn rejects_duplicate_and_stale_timestamps() {
        let mut store = store_with(3, 10);
        let err = store
            .append(MetricRecord::new(3_000, one_sec(), 1.0))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::OutOfOrder { latest_ms: 3_000, .. }));
        assert!(store
            .append(MetricRecord::new(2_000, one_sec(), 1.0))
            .is_err());
        assert_eq!(store.len(&one_sec()), 3);
    }

    #[test]
    fn rejects_unknown_window() {
        let mut store = store_with(0, 10);
        let err = store
            .append(MetricRecord::new(1, WindowId::new("7s"), 1.0))
            .expect_err("unknown");
        assert_eq!(err, StoreError::UnknownWindow(WindowId::new("7s")));
        assert!(store.is_empty());
    }
}
