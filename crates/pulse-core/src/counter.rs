//! Raw event counting with per-span sliding sums.
//!
//! Producers only touch an atomic. Once per tick the aggregator calls
//! [`CountSource::advance`], which moves the pending count into a bounded
//! ring of `(count, elapsed)` slots; every window then reads its own sliding
//! sum from that ring, so a short window never drains a long one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Hard ceiling on retained slots, whatever the tick rate. Configs whose
/// longest span needs more slots than this are rejected up front.
pub const MAX_SLOTS: usize = 4096;

/// Slots needed to cover `span` when advancing every `tick`, including the
/// one straddling the span edge when ticks jitter.
pub fn slots_for_span(span: Duration, tick: Duration) -> usize {
    let tick_nanos = tick.as_nanos().max(1);
    let full = span.as_nanos().div_ceil(tick_nanos);
    usize::try_from(full).map_or(usize::MAX, |n| n.saturating_add(1))
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("counter has not been advanced yet")]
    NotAdvanced,
    #[error("sample covers no elapsed time")]
    EmptySpan,
    #[error("count source unavailable: {0}")]
    Unavailable(String),
}

/// Events observed over the newest `covered` stretch of time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSample {
    pub events: f64,
    /// Never longer than the requested span; shorter right after startup.
    pub covered: Duration,
}

impl WindowSample {
    pub fn rate_per_sec(&self) -> f64 {
        let secs = self.covered.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.events / secs
        }
    }
}

/// Anything the aggregator can pull windowed counts from.
pub trait CountSource: Send + Sync {
    /// Close the current sub-interval at `now`.
    fn advance(&self, now: Instant);

    /// Sliding sum over the newest `span`.
    fn sample(&self, span: Duration) -> Result<WindowSample, SampleError>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    elapsed: Duration,
}

#[derive(Debug)]
struct SlotRing {
    slots: VecDeque<Slot>,
    covered: Duration,
    retain: Duration,
    last_advance: Instant,
    advanced: bool,
}

impl SlotRing {
    fn push(&mut self, slot: Slot) {
        self.covered += slot.elapsed;
        self.slots.push_back(slot);
        while let Some(front) = self.slots.front().copied() {
            let over_cap = self.slots.len() > MAX_SLOTS;
            let redundant =
                self.slots.len() > 1 && self.covered.saturating_sub(front.elapsed) >= self.retain;
            if !(over_cap || redundant) {
                break;
            }
            self.covered = self.covered.saturating_sub(front.elapsed);
            self.slots.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct EventCounter {
    pending: AtomicU64,
    total: AtomicU64,
    ring: Mutex<SlotRing>,
}

impl EventCounter {
    /// Counter retaining enough history for spans up to `retain`, measuring
    /// elapsed time from now.
    pub fn new(retain: Duration) -> Self {
        Self::with_origin(retain, Instant::now())
    }

    /// Like [`EventCounter::new`] with an explicit start instant; the first
    /// slot spans `origin..first advance`.
    pub fn with_origin(retain: Duration, origin: Instant) -> Self {
        Self {
            pending: AtomicU64::new(0),
            total: AtomicU64::new(0),
            ring: Mutex::new(SlotRing {
                slots: VecDeque::new(),
                covered: Duration::ZERO,
                retain,
                last_advance: origin,
                advanced: false,
            }),
        }
    }

    #[inline]
    pub fn record_event(&self) {
        self.record_events(1);
    }

    #[inline]
    pub fn record_events(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.pending.fetch_add(n, Ordering::Relaxed);
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    /// Events recorded since creation (wrapping on overflow).
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Events recorded since the last advance.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn retained_slots(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

impl CountSource for EventCounter {
    fn advance(&self, now: Instant) {
        let mut ring = self.ring.lock();
        let count = self.pending.swap(0, Ordering::AcqRel);
        let elapsed = now.saturating_duration_since(ring.last_advance);
        ring.last_advance = now;
        ring.advanced = true;
        ring.push(Slot { count, elapsed });
    }

    fn sample(&self, span: Duration) -> Result<WindowSample, SampleError> {
        let ring = self.ring.lock();
        if !ring.advanced {
            return Err(SampleError::NotAdvanced);
        }
        let mut events = 0.0f64;
        let mut covered = Duration::ZERO;
        for slot in ring.slots.iter().rev() {
            if covered >= span {
                break;
            }
            let remaining = span - covered;
            if slot.elapsed <= remaining {
                events += slot.count as f64;
                covered += slot.elapsed;
            } else {
                // Oldest slot straddles the span edge: take its share.
                let share = remaining.as_secs_f64() / slot.elapsed.as_secs_f64();
                events += slot.count as f64 * share;
                covered = span;
            }
        }
        if covered.is_zero() {
            return Err(SampleError::EmptySpan);
        }
        Ok(WindowSample { events, covered })
    }
}
