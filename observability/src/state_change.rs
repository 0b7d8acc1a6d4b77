use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram of state-change durations, in milliseconds.
pub const STATE_CHANGE_DURATION: &str = "stowage_state_change_duration_milliseconds";

/// Counter of state changes.
pub const STATE_CHANGE_COUNT: &str = "stowage_state_change_total";

/// Suggested histogram buckets for [`STATE_CHANGE_DURATION`].
pub const STATE_CHANGE_BUCKETS_MS: [f64; 8] =
    [10.0, 25.0, 50.0, 100.0, 500.0, 1000.0, 10000.0, 100000.0];

/// Receives one observation per state-changing storage operation.
pub trait OperationObserver: Send + Sync {
    fn observe_state_change(&self, duration: Duration, needs_image: bool);
}

fn needs_image_label(needs_image: bool) -> &'static str {
    if needs_image { "true" } else { "false" }
}

/// Reports through the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl MetricsObserver {
    pub fn new() -> Self {
        Self
    }
}

impl OperationObserver for MetricsObserver {
    fn observe_state_change(&self, duration: Duration, needs_image: bool) {
        let label = needs_image_label(needs_image);
        histogram!(STATE_CHANGE_DURATION, "needs_image" => label)
            .record(duration.as_secs_f64() * 1000.0);
        counter!(STATE_CHANGE_COUNT, "needs_image" => label).increment(1);
    }
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn observe_state_change(&self, _duration: Duration, _needs_image: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedStateChange {
    pub duration: Duration,
    pub needs_image: bool
}

/// Keeps the most recent observations in memory, for tests and admin
/// views. Older entries are dropped once `limit` is reached.
#[derive(Debug, Clone)]
pub struct RecordingObserver {
    records: Arc<Mutex<VecDeque<RecordedStateChange>>>,
    limit: usize
}

pub const DEFAULT_RECORD_LIMIT: usize = 1024;

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::with_limit(DEFAULT_RECORD_LIMIT)
    }
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            limit: limit.max(1)
        }
    }

    pub fn records(&self) -> Vec<RecordedStateChange> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }
}

impl OperationObserver for RecordingObserver {
    fn observe_state_change(&self, duration: Duration, needs_image: bool) {
        let mut records = self.records.lock();
        if records.len() == self.limit {
            records.pop_front();
        }
        records.push_back(RecordedStateChange {
            duration,
            needs_image
        });
    }
}

/// Times one operation and reports it when finished.
pub struct StateChangeTimer {
    start: Instant,
    needs_image: bool
}

impl StateChangeTimer {
    pub fn start(needs_image: bool) -> Self {
        Self {
            start: Instant::now(),
            needs_image
        }
    }

    pub fn finish(self, observer: &dyn OperationObserver) {
        let elapsed = self.start.elapsed();
        tracing::trace!(elapsed_ms = elapsed.as_millis() as u64, "state change observed");
        observer.observe_state_change(elapsed, self.needs_image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_tags() {
        let observer = RecordingObserver::new();
        observer.observe_state_change(Duration::from_millis(12), true);
        observer.observe_state_change(Duration::from_millis(3), false);

        let records = observer.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].needs_image);
        assert_eq!(records[1].duration, Duration::from_millis(3));
    }

    #[test]
    fn test_recording_observer_keeps_only_recent_entries() {
        let observer = RecordingObserver::with_limit(2);
        for ms in [1, 2, 3] {
            observer.observe_state_change(Duration::from_millis(ms), false);
        }

        let records = observer.records();
        assert_eq!(observer.count(), 2);
        assert_eq!(records[0].duration, Duration::from_millis(2));
        assert_eq!(records[1].duration, Duration::from_millis(3));
    }

    #[test]
    fn test_timer_reports_once() {
        let observer = RecordingObserver::new();
        StateChangeTimer::start(false).finish(&observer);
        assert_eq!(observer.count(), 1);
        assert!(!observer.records()[0].needs_image);
    }

    #[test]
    fn test_buckets_are_sorted() {
        assert!(STATE_CHANGE_BUCKETS_MS.windows(2).all(|w| w[0] < w[1]));
    }
}
