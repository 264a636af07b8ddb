use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::Aggregator;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace};

use crate::tasks::{spawn_supervised, TaskHandle};

/// Drive the aggregator once per `period`.
///
/// Late ticks are skipped rather than bunched, so a stalled runtime yields
/// one wider sample instead of a burst of near-empty ones.
pub(crate) fn start(aggregator: Arc<Mutex<Aggregator>>, period: Duration) -> TaskHandle {
    info!(period_ms = period.as_millis() as u64, "metrics ticker starting");
    spawn_supervised("metrics.ticker", move || {
        let aggregator = aggregator.clone();
        async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let emitted = aggregator.lock().tick();
                trace!(records = emitted.len(), "metrics tick");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskManager;
    use pulse_core::{default_windows, longest_span, EventCounter, Hub, HubOptions, WindowSpec};

    #[tokio::test]
    async fn ticker_publishes_records_to_hub() {
        let windows = default_windows();
        let counter = Arc::new(EventCounter::new(longest_span(&windows)));
        let hub = Hub::new(
            windows.iter().map(WindowSpec::id).cloned().collect(),
            HubOptions::default(),
        );
        let aggregator = Arc::new(Mutex::new(Aggregator::new(
            counter.clone(),
            windows,
            hub.clone(),
        )));
        counter.record_events(5);

        let mut tasks = TaskManager::new();
        tasks.push(start(aggregator.clone(), Duration::from_millis(20)));

        let mut published = 0;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            published = hub.stats().records_published;
            if published >= 6 {
                break;
            }
        }
        tasks.shutdown_with_grace(Duration::ZERO).await;

        assert!(published >= 6, "expected two ticks of records, got {published}");
        assert!(aggregator.lock().last_timestamp().is_some());
        assert_eq!(counter.pending(), 0);
    }
}
