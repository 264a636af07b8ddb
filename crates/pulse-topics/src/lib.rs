//! Canonical event names shared by the server and its clients.
//!
//! Keep this list alphabetized within sections and favor dot.case names for
//! service events.

// Metric delivery
pub const TOPIC_METRICS: &str = "metrics";
pub const TOPIC_REPLAY: &str = "replay";

// Service lifecycle
pub const TOPIC_SERVICE_CONNECTED: &str = "service.connected";

/// Every topic a stream may emit, in emission order for a fresh attach.
pub const STREAM_TOPICS: &[&str] = &[TOPIC_SERVICE_CONNECTED, TOPIC_REPLAY, TOPIC_METRICS];
