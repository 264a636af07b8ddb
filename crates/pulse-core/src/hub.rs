//! Subscriber registry and broadcaster.
//!
//! The store and the registry sit behind one mutex: a publish appends and
//! fans out under it, and an attach computes its backlog and registers under
//! it. An attach therefore observes a tick either entirely (in its backlog)
//! or not at all (then receives it live). Fan-out never awaits; a subscriber
//! whose bounded queue is full or closed is detached on the spot.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::record::MetricRecord;
use crate::store::MetricStore;
use crate::window::WindowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle of one subscriber. `Detached` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberState {
    Attaching,
    Live,
    Detached,
}

impl SubscriberState {
    pub fn can_become(self, next: SubscriberState) -> bool {
        matches!(
            (self, next),
            (SubscriberState::Attaching, SubscriberState::Live)
                | (SubscriberState::Attaching, SubscriberState::Detached)
                | (SubscriberState::Live, SubscriberState::Detached)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    Requested,
    Dropped,
    Backpressure,
    Closed,
}

impl DetachReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DetachReason::Requested => "requested",
            DetachReason::Dropped => "dropped",
            DetachReason::Backpressure => "backpressure",
            DetachReason::Closed => "closed",
        }
    }
}

/// Item queued to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// One-time catch-up, ordered by timestamp; always the first item.
    Replay(Vec<MetricRecord>),
    /// Records of one publish, shared between subscribers.
    Live(Arc<[MetricRecord]>),
}

impl Delivery {
    pub fn records(&self) -> &[MetricRecord] {
        match self {
            Delivery::Replay(records) => records.as_slice(),
            Delivery::Live(records) => &records[..],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub live: usize,
    pub attached_total: u64,
    pub detached_total: u64,
    pub detached_backpressure: u64,
    pub detached_closed: u64,
    pub records_published: u64,
    pub replayed_records: u64,
    pub last_ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub store_capacity: usize,
    pub queue_capacity: usize,
    /// How far ahead of the local clock a watermark may be before it is
    /// treated as bogus.
    pub watermark_skew_ms: i64,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            store_capacity: 300,
            queue_capacity: 64,
            watermark_skew_ms: 5_000,
        }
    }
}

struct Entry {
    tx: mpsc::Sender<Delivery>,
    state: SubscriberState,
}

struct HubState {
    store: MetricStore,
    subscribers: HashMap<SubscriberId, Entry>,
    stats: HubStats,
}

impl HubState {
    fn transition(&mut self, id: SubscriberId, next: SubscriberState) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(entry) if entry.state.can_become(next) => {
                entry.state = next;
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, id: SubscriberId, reason: DetachReason) -> bool {
        if !self.transition(id, SubscriberState::Detached) {
            return false;
        }
        self.subscribers.remove(&id);
        self.stats.detached_total += 1;
        match reason {
            DetachReason::Backpressure => self.stats.detached_backpressure += 1,
            DetachReason::Closed => self.stats.detached_closed += 1,
            DetachReason::Requested | DetachReason::Dropped => {}
        }
        self.stats.live = self.subscribers.len();
        counter!("pulse_subscribers_detached_total", "reason" => reason.as_str()).increment(1);
        gauge!("pulse_subscribers_live").set(self.stats.live as f64);
        true
    }
}

struct HubInner {
    windows: Vec<WindowId>,
    options: HubOptions,
    next_id: AtomicU64,
    state: Mutex<HubState>,
}

/// Shared handle to the store + registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(windows: Vec<WindowId>, options: HubOptions) -> Self {
        let store = MetricStore::new(windows.iter().cloned(), options.store_capacity);
        Self {
            inner: Arc::new(HubInner {
                windows,
                options,
                next_id: AtomicU64::new(1),
                state: Mutex::new(HubState {
                    store,
                    subscribers: HashMap::new(),
                    stats: HubStats::default(),
                }),
            }),
        }
    }

    pub fn windows(&self) -> &[WindowId] {
        &self.inner.windows
    }

    pub fn options(&self) -> &HubOptions {
        &self.inner.options
    }

    /// Store then fan out a whole tick. Returns how many subscribers the
    /// batch was queued to.
    pub fn publish(&self, records: &[MetricRecord]) -> usize {
        let mut state = self.inner.state.lock();
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            match state.store.append(record.clone()) {
                Ok(()) => accepted.push(record.clone()),
                Err(err) => warn!(window = %record.window, error = %err, "record not stored"),
            }
        }
        if accepted.is_empty() {
            return 0;
        }
        state.stats.records_published += accepted.len() as u64;
        state.stats.last_ts = accepted.iter().map(|r| r.timestamp_ms).max();
        counter!("pulse_records_emitted_total").increment(accepted.len() as u64);

        let batch: Arc<[MetricRecord]> = accepted.into();
        let mut failed = Vec::new();
        for (id, entry) in state.subscribers.iter() {
            if entry.state != SubscriberState::Live {
                continue;
            }
            match entry.tx.try_send(Delivery::Live(batch.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => failed.push((*id, DetachReason::Backpressure)),
                Err(TrySendError::Closed(_)) => failed.push((*id, DetachReason::Closed)),
            }
        }
        let delivered = state
            .subscribers
            .values()
            .filter(|e| e.state == SubscriberState::Live)
            .count()
            - failed.len();
        for (id, reason) in failed {
            if state.remove(id, reason) {
                info!(
                    subscriber = %id,
                    reason = reason.as_str(),
                    "subscriber detached during fan-out"
                );
            }
        }
        delivered
    }

    /// Publish a single record.
    pub fn on_record(&self, record: MetricRecord) -> usize {
        self.publish(std::slice::from_ref(&record))
    }

    /// Attach using the system clock to validate the watermark.
    pub fn attach(&self, watermark: Option<i64>) -> Subscription {
        self.attach_at(watermark, chrono::Utc::now().timestamp_millis())
    }

    /// Register a subscriber and queue its backlog ahead of any live record.
    pub fn attach_at(&self, watermark: Option<i64>, now_ms: i64) -> Subscription {
        let watermark = self.sanitize_watermark(watermark, now_ms);
        let (tx, rx) = mpsc::channel(self.inner.options.queue_capacity.max(1));
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let mut state = self.inner.state.lock();
        let backlog = backlog_from(&state.store, &self.inner.windows, watermark);
        let backlog_len = backlog.len();
        state.subscribers.insert(
            id,
            Entry {
                tx: tx.clone(),
                state: SubscriberState::Attaching,
            },
        );
        if !backlog.is_empty() {
            // Fresh channel with room for at least one item; cannot be full.
            if let Err(err) = tx.try_send(Delivery::Replay(backlog)) {
                warn!(subscriber = %id, error = %err, "failed to queue backlog");
            }
        }
        state.transition(id, SubscriberState::Live);
        state.stats.attached_total += 1;
        state.stats.replayed_records += backlog_len as u64;
        state.stats.live = state.subscribers.len();
        drop(state);

        counter!("pulse_subscribers_attached_total").increment(1);
        gauge!("pulse_subscribers_live").set(self.live_count() as f64);
        debug!(subscriber = %id, ?watermark, backlog = backlog_len, "subscriber attached");

        Subscription {
            id,
            watermark,
            backlog_len,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.detach_with(id, DetachReason::Requested)
    }

    fn detach_with(&self, id: SubscriberId, reason: DetachReason) -> bool {
        let removed = self.inner.state.lock().remove(id, reason);
        if removed {
            debug!(subscriber = %id, reason = reason.as_str(), "subscriber detached");
        }
        removed
    }

    pub fn state_of(&self, id: SubscriberId) -> SubscriberState {
        self.inner
            .state
            .lock()
            .subscribers
            .get(&id)
            .map(|e| e.state)
            .unwrap_or(SubscriberState::Detached)
    }

    /// The backlog an attach with `watermark` would receive right now,
    /// without registering anything.
    pub fn backlog(&self, watermark: Option<i64>) -> (Option<i64>, Vec<MetricRecord>) {
        self.backlog_at(watermark, chrono::Utc::now().timestamp_millis())
    }

    pub fn backlog_at(
        &self,
        watermark: Option<i64>,
        now_ms: i64,
    ) -> (Option<i64>, Vec<MetricRecord>) {
        let watermark = self.sanitize_watermark(watermark, now_ms);
        let state = self.inner.state.lock();
        (
            watermark,
            backlog_from(&state.store, &self.inner.windows, watermark),
        )
    }

    /// Stored history of one window; `None` for an unknown window.
    pub fn history(&self, window: &WindowId, after: Option<i64>) -> Option<Vec<MetricRecord>> {
        if !self.inner.windows.contains(window) {
            return None;
        }
        let state = self.inner.state.lock();
        Some(state.store.since(window, Some(after.unwrap_or(i64::MIN))))
    }

    pub fn live_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    pub fn stats(&self) -> HubStats {
        self.inner.state.lock().stats.clone()
    }

    /// Negative or future-dated watermarks count as absent.
    pub fn sanitize_watermark(&self, watermark: Option<i64>, now_ms: i64) -> Option<i64> {
        let wm = watermark?;
        let horizon = now_ms.saturating_add(self.inner.options.watermark_skew_ms);
        if wm < 0 || wm > horizon {
            debug!(watermark = wm, now_ms, "ignoring implausible watermark");
            return None;
        }
        Some(wm)
    }
}

fn backlog_from(
    store: &MetricStore,
    windows: &[WindowId],
    watermark: Option<i64>,
) -> Vec<MetricRecord> {
    if watermark.is_none() {
        return Vec::new();
    }
    let mut backlog: Vec<MetricRecord> = windows
        .iter()
        .flat_map(|w| store.since(w, watermark))
        .collect();
    // Stable: records sharing a timestamp keep window order.
    backlog.sort_by_key(|r| r.timestamp_ms);
    backlog
}

/// Receiving side of an attach. Dropping it detaches the subscriber.
pub struct Subscription {
    id: SubscriberId,
    watermark: Option<i64>,
    backlog_len: usize,
    rx: mpsc::Receiver<Delivery>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Watermark after validation; `None` means live-only.
    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog_len
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Delivery, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("watermark", &self.watermark)
            .field("backlog_len", &self.backlog_len)
            .finish()
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            Hub { inner }.detach_with(self.id, DetachReason::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn windows() -> Vec<WindowId> {
        vec![WindowId::new("1s"), WindowId::new("5s")]
    }

    fn hub(queue_capacity: usize) -> Hub {
        Hub::new(
            windows(),
            HubOptions {
                store_capacity: 100,
                queue_capacity,
                watermark_skew_ms: 5_000,
            },
        )
    }

    fn tick(hub: &Hub, ts: i64) -> usize {
        hub.publish(&[
            MetricRecord::new(ts, WindowId::new("1s"), 1.0),
            MetricRecord::new(ts, WindowId::new("5s"), 2.0),
        ])
    }

    #[test]
    fn attach_without_watermark_gets_no_backlog() {
        let hub = hub(8);
        for i in 1..=3 {
            tick(&hub, NOW - 10_000 + i);
        }
        let mut sub = hub.attach_at(None, NOW);
        assert_eq!(sub.backlog_len(), 0);
        assert!(sub.try_recv().is_err());
        tick(&hub, NOW);
        match sub.try_recv().expect("live item") {
            Delivery::Live(records) => assert_eq!(records[0].timestamp_ms, NOW),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backlog_precedes_live_and_is_strictly_after_watermark() {
        let hub = hub(8);
        for i in 1..=5 {
            tick(&hub, NOW - 5_000 + i * 1_000);
        }
        let mut sub = hub.attach_at(Some(NOW - 3_000), NOW);
        tick(&hub, NOW + 1_000);
        let first = sub.try_recv().expect("replay");
        let Delivery::Replay(records) = first else {
            panic!("first delivery must be the replay");
        };
        let stamps: Vec<i64> = records.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(
            stamps,
            vec![NOW - 2_000, NOW - 2_000, NOW - 1_000, NOW - 1_000, NOW, NOW]
        );
        assert!(matches!(sub.try_recv(), Ok(Delivery::Live(_))));
    }

    #[test]
    fn future_or_negative_watermark_is_treated_as_absent() {
        let hub = hub(8);
        tick(&hub, NOW - 1_000);
        assert_eq!(hub.attach_at(Some(NOW + 60_000), NOW).backlog_len(), 0);
        assert_eq!(hub.attach_at(Some(-5), NOW).backlog_len(), 0);
        assert_eq!(hub.attach_at(Some(NOW + 60_000), NOW).watermark(), None);
        assert_eq!(hub.attach_at(Some(0), NOW).backlog_len(), 2);
    }

    #[test]
    fn slow_subscriber_is_detached_without_affecting_others() {
        let hub = hub(2);
        let stalled = hub.attach_at(None, NOW);
        let mut healthy = hub.attach_at(None, NOW);
        let stalled_id = stalled.id();

        let mut delivered = Vec::new();
        for i in 0..4 {
            delivered.push(tick(&hub, NOW + i));
            // Keep the healthy queue drained.
            while healthy.try_recv().is_ok() {}
        }
        assert_eq!(delivered, vec![2, 2, 1, 1]);
        assert_eq!(hub.state_of(stalled_id), SubscriberState::Detached);
        assert_eq!(hub.state_of(healthy.id()), SubscriberState::Live);
        let stats = hub.stats();
        assert_eq!(stats.detached_backpressure, 1);
        assert_eq!(stats.live, 1);
    }

    #[test]
    fn closed_receiver_is_detached_on_next_publish() {
        let hub = hub(4);
        let sub = hub.attach_at(None, NOW);
        let id = sub.id();
        // Dropping detaches eagerly; detach again is a no-op.
        drop(sub);
        assert_eq!(hub.state_of(id), SubscriberState::Detached);
        assert!(!hub.detach(id));
        assert_eq!(tick(&hub, NOW), 0);
    }

    #[test]
    fn detach_is_idempotent_and_stops_delivery() {
        let hub = hub(4);
        let mut sub = hub.attach_at(None, NOW);
        assert!(hub.detach(sub.id()));
        assert!(!hub.detach(sub.id()));
        tick(&hub, NOW);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn reattach_with_same_watermark_is_deterministic() {
        let hub = hub(8);
        for i in 1..=10 {
            tick(&hub, NOW - 20_000 + i * 1_000);
        }
        let wm = Some(NOW - 15_000);
        let mut first = hub.attach_at(wm, NOW);
        let a = first.try_recv().expect("first replay");
        drop(first);
        let mut second = hub.attach_at(wm, NOW);
        let b = second.try_recv().expect("second replay");
        assert_eq!(a, b);
        assert_eq!(a.records().len(), 10);
    }

    #[test]
    fn state_transitions_are_one_way() {
        use SubscriberState::*;
        assert!(Attaching.can_become(Live));
        assert!(Live.can_become(Detached));
        assert!(!Detached.can_become(Live));
        assert!(!Live.can_become(Attaching));
    }

    #[test]
    fn history_reports_unknown_windows() {
        let hub = hub(4);
        tick(&hub, NOW);
        assert!(hub.history(&WindowId::new("60s"), None).is_none());
        assert_eq!(hub.history(&WindowId::new("1s"), None).map(|h| h.len()), Some(1));
    }
}
