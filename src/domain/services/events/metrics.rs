//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name             | Description                                       | Key Methods           |
// |------------------|---------------------------------------------------|-----------------------|
// | MetricsCollector | Running counters owned by the bus                 | record_*, rate        |
// | MetricsSnapshot  | Immutable point-in-time copy for debug tooling    |                       |
//--------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

/// Point-in-time view of the bus, as returned by `EventBus::get_metrics`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Events drained and dispatched since construction
    pub total_events_processed: u64,
    /// Live subscriptions across all event types
    pub active_handlers: usize,
    /// Fractional ring buffer occupancy, `buffered_events / buffer_capacity`
    pub buffer_usage: f64,
    /// Events evicted by ring buffer overflow
    pub dropped_events: u64,
    /// Dispatch rate over the last completed rate window
    pub events_per_second: f64,
    pub total_events_published: u64,
    pub buffered_events: usize,
    pub buffer_capacity: usize,
    pub pending_aggregates: usize,
    /// Published events folded into an already open aggregate
    pub events_aggregated: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
    /// Buffered or pending events discarded by `flush`
    pub flushed_events: u64,
    /// Envelope shells waiting in the pool (0 when pooling is off)
    pub pool_available: usize,
}

impl MetricsSnapshot {
    pub fn is_buffer_empty(&self) -> bool {
        self.buffered_events == 0
    }
}

/// Counters mutated by the bus during publish, dispatch and flush.
///
/// `events_per_second` uses a tumbling window: dispatches are counted until
/// `rate_window_ms` has elapsed, then the window's rate becomes the reported
/// value and a new window starts.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    total_events_published: u64,
    total_events_processed: u64,
    handler_failures: u64,
    flushed_events: u64,
    rate_window_ms: i64,
    window_start_ms: Option<i64>,
    window_count: u64,
    events_per_second: f64,
}

impl MetricsCollector {
    pub fn new(rate_window_ms: u64) -> Self {
        Self {
            total_events_published: 0,
            total_events_processed: 0,
            handler_failures: 0,
            flushed_events: 0,
            rate_window_ms: i64::try_from(rate_window_ms.max(1)).unwrap_or(i64::MAX),
            window_start_ms: None,
            window_count: 0,
            events_per_second: 0.0,
        }
    }

    pub fn record_published(&mut self) {
        self.total_events_published += 1;
    }

    /// Records one dispatch pass of `count` events finishing at `now_ms`.
    pub fn record_processed(&mut self, count: u64, now_ms: i64) {
        self.total_events_processed += count;

        let start = *self.window_start_ms.get_or_insert(now_ms);
        self.window_count += count;

        let elapsed = now_ms.saturating_sub(start);
        if elapsed >= self.rate_window_ms {
            self.events_per_second = self.window_count as f64 * 1000.0 / elapsed as f64;
            self.window_start_ms = Some(now_ms);
            self.window_count = 0;
        }
    }

    pub fn record_handler_failures(&mut self, count: u64) {
        self.handler_failures += count;
    }

    pub fn record_flushed(&mut self, count: u64) {
        self.flushed_events += count;
    }

    pub fn total_events_published(&self) -> u64 {
        self.total_events_published
    }

    pub fn total_events_processed(&self) -> u64 {
        self.total_events_processed
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures
    }

    pub fn flushed_events(&self) -> u64 {
        self.flushed_events
    }

    pub fn events_per_second(&self) -> f64 {
        self.events_per_second
    }

    pub fn reset(&mut self) {
        *self = Self {
            rate_window_ms: self.rate_window_ms,
            ..Self::new(1)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut metrics = MetricsCollector::new(1000);
        metrics.record_published();
        metrics.record_published();
        metrics.record_processed(2, 0);
        metrics.record_handler_failures(1);
        metrics.record_flushed(3);

        assert_eq!(metrics.total_events_published(), 2);
        assert_eq!(metrics.total_events_processed(), 2);
        assert_eq!(metrics.handler_failures(), 1);
        assert_eq!(metrics.flushed_events(), 3);
    }

    #[test]
    fn test_rate_is_zero_until_window_closes() {
        let mut metrics = MetricsCollector::new(1000);
        metrics.record_processed(10, 0);
        metrics.record_processed(10, 500);
        assert_eq!(metrics.events_per_second(), 0.0);

        metrics.record_processed(20, 1000);
        assert!((metrics.events_per_second() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_uses_latest_completed_window() {
        let mut metrics = MetricsCollector::new(1000);
        metrics.record_processed(0, 0);
        metrics.record_processed(100, 2000);
        assert!((metrics.events_per_second() - 50.0).abs() < 1e-9);

        metrics.record_processed(30, 3000);
        assert!((metrics.events_per_second() - 30.0).abs() < 1e-9);
        assert_eq!(metrics.total_events_processed(), 130);
    }

    #[test]
    fn test_reset_keeps_window_length() {
        let mut metrics = MetricsCollector::new(250);
        metrics.record_published();
        metrics.record_processed(5, 0);
        metrics.reset();

        assert_eq!(metrics.total_events_published(), 0);
        assert_eq!(metrics.total_events_processed(), 0);
        metrics.record_processed(5, 0);
        metrics.record_processed(5, 250);
        assert!((metrics.events_per_second() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = MetricsSnapshot {
            total_events_processed: 10,
            active_handlers: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["totalEventsProcessed"], 10);
        assert_eq!(json["activeHandlers"], 2);
        assert_eq!(json["bufferUsage"], 0.0);
        assert!(snapshot.is_buffer_empty());
    }
}
