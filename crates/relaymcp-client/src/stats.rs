//! Client statistics

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Snapshot of a client's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// When the current or most recent connection was established
    pub connect_time: Option<DateTime<Utc>>,
    /// When the last call succeeded
    pub last_activity: Option<DateTime<Utc>>,
    /// Calls issued while connected
    pub request_count: u64,
    /// Calls that returned an error
    pub error_count: u64,
    /// Reconnection attempts scheduled
    pub reconnect_count: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    request_count: AtomicU64,
    error_count: AtomicU64,
    reconnect_count: AtomicU64,
    connect_time: Mutex<Option<DateTime<Utc>>>,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl StatsRecorder {
    pub(crate) fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect(&self) {
        *self.connect_time.lock() = Some(Utc::now());
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            connect_time: *self.connect_time.lock(),
            last_activity: *self.last_activity.lock(),
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_recorder_is_empty() {
        assert_eq!(StatsRecorder::default().snapshot(), ClientStats::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = StatsRecorder::default();
        stats.record_request();
        stats.record_request();
        stats.record_error();
        stats.record_reconnect();
        stats.record_connect();
        stats.touch();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.reconnect_count, 1);
        assert!(snapshot.connect_time.is_some());
        assert!(snapshot.last_activity.is_some());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let value = serde_json::to_value(ClientStats::default()).unwrap();
        assert!(value.get("requestCount").is_some());
        assert!(value.get("connectTime").is_some());
    }
}
