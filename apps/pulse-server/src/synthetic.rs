use std::sync::Arc;
use std::time::Duration;

use pulse_core::EventCounter;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::tasks::{spawn_supervised, TaskHandle};

const STEPS_PER_SEC: u64 = 10;

/// Events to emit on sub-step `step` so that one second totals `eps`.
fn events_for_step(eps: u64, step: u64) -> u64 {
    let (eps, steps) = (u128::from(eps), u128::from(STEPS_PER_SEC));
    let step = u128::from(step) % steps;
    let due = (step + 1) * eps / steps - step * eps / steps;
    u64::try_from(due).unwrap_or(u64::MAX)
}

/// Feed `eps` events per second into the counter, spread over sub-steps.
pub(crate) fn start(counter: Arc<EventCounter>, eps: u64) -> Option<TaskHandle> {
    if eps == 0 {
        return None;
    }
    info!(events_per_sec = eps, "synthetic event source enabled");
    Some(spawn_supervised("metrics.synthetic", move || {
        let counter = counter.clone();
        async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(1_000 / STEPS_PER_SEC));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut step = 0u64;
            loop {
                interval.tick().await;
                counter.record_events(events_for_step(eps, step));
                step = (step + 1) % STEPS_PER_SEC;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskManager;

    #[test]
    fn steps_sum_to_rate() {
        for eps in [1u64, 7, 10, 33, 1_000] {
            let total: u64 = (0..STEPS_PER_SEC).map(|s| events_for_step(eps, s)).sum();
            assert_eq!(total, eps);
        }
        assert_eq!(events_for_step(25, 0), 2);
        assert_eq!(events_for_step(25, 1), 3);
    }

    #[test]
    fn huge_rates_do_not_overflow() {
        let eps = u64::MAX / 2;
        let total: u128 = (0..STEPS_PER_SEC)
            .map(|s| u128::from(events_for_step(eps, s)))
            .sum();
        assert_eq!(total, u128::from(eps));
        assert_eq!(events_for_step(u64::MAX, 9), u64::MAX / 10 + 1);
    }

    #[test]
    fn zero_rate_spawns_nothing() {
        let counter = Arc::new(EventCounter::new(Duration::from_secs(1)));
        // No runtime is needed when nothing is spawned.
        assert!(start(counter, 0).is_none());
    }

    #[tokio::test]
    async fn source_feeds_counter() {
        let counter = Arc::new(EventCounter::new(Duration::from_secs(1)));
        let mut tasks = TaskManager::new();
        tasks.extend(start(counter.clone(), 100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        tasks.shutdown_with_grace(Duration::ZERO).await;
        assert!(counter.total() >= 10, "got {}", counter.total());
    }
}
