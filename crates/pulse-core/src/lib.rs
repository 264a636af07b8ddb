//! Rolling events-per-second aggregation with push and replay delivery.
//!
//! Raw events go into an [`EventCounter`]. Every tick the [`Aggregator`]
//! turns the counter's sliding sums into one [`MetricRecord`] per window and
//! hands them to the [`Hub`], which retains a bounded history per window and
//! fans records out to attached subscribers. A subscriber attaching with a
//! watermark first receives every retained record newer than it.
//!
//! Receivers may deduplicate by timestamp alone: within a window, no two
//! records ever share a timestamp.

pub mod aggregator;
pub mod config;
pub mod counter;
pub mod hub;
pub mod record;
pub mod store;
pub mod window;

pub use aggregator::Aggregator;
pub use config::{load_config, parse_config, Config, ConfigError};
pub use counter::{
    slots_for_span, CountSource, EventCounter, SampleError, WindowSample, MAX_SLOTS,
};
pub use hub::{
    Delivery, DetachReason, Hub, HubOptions, HubStats, SubscriberId, SubscriberState,
    Subscription,
};
pub use record::{frames_from_records, MetricRecord};
pub use store::{MetricStore, StoreError};
pub use window::{default_windows, longest_span, WindowId, WindowSpec};
