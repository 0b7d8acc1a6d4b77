//! # Observability
//!
//! The seam through which the storage registry reports state-changing
//! operations. The registry only knows [`OperationObserver`]; how the
//! numbers end up in a metrics backend is decided by the implementation
//! wired in at startup.

pub mod state_change;

pub use state_change::{
    MetricsObserver, NoopObserver, OperationObserver, RecordedStateChange, RecordingObserver,
    STATE_CHANGE_BUCKETS_MS, STATE_CHANGE_COUNT, STATE_CHANGE_DURATION, StateChangeTimer
};
