//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

pub const EVENTBUS_QUEUE_DEPTH: &str = "streamsync_eventbus_queue_depth";
pub const ACTIVE_SESSIONS: &str = "streamsync_active_sessions";
pub const ACTIVE_EMITTERS: &str = "streamsync_active_emitters";
pub const STREAM_DOWN_TOTAL: &str = "streamsync_stream_down_total";
pub const NODE_RETRY_TOTAL: &str = "streamsync_node_retry_total";

pub(crate) fn set_queue_depth(depth: usize) {
    ::metrics::gauge!(EVENTBUS_QUEUE_DEPTH).set(depth as f64);
}

pub(crate) fn set_active_sessions(count: usize) {
    ::metrics::gauge!(ACTIVE_SESSIONS).set(count as f64);
}

pub(crate) fn set_active_emitters(count: usize) {
    ::metrics::gauge!(ACTIVE_EMITTERS).set(count as f64);
}

pub(crate) fn record_stream_down() {
    ::metrics::counter!(STREAM_DOWN_TOTAL).increment(1);
}

pub(crate) fn record_node_retry() {
    ::metrics::counter!(NODE_RETRY_TOTAL).increment(1);
}
