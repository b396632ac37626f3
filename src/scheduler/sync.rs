//! Host-side timeline fence.
//!
//! A timeline fence is a monotonically increasing counter. The device side
//! signals values as batches complete; the host waits until the counter
//! reaches the value of the batch it cares about.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Status of a fence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The value has not been reached yet.
    Pending,
    /// The value has been reached (device work complete).
    Reached,
}

/// CPU-GPU timeline synchronization primitive.
///
/// # Example
///
/// ```ignore
/// let fence = Fence::new();
/// backend_executes(batch);
/// fence.signal(1);
///
/// assert!(fence.is_reached(1));
/// assert_eq!(fence.status(2), FenceStatus::Pending);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fence {
    value: Arc<AtomicU64>,
}

impl Fence {
    /// Create a fence at value 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value reached.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Status of `value` on this timeline.
    pub fn status(&self, value: u64) -> FenceStatus {
        if self.value() >= value {
            FenceStatus::Reached
        } else {
            FenceStatus::Pending
        }
    }

    /// Whether `value` has been reached (non-blocking).
    pub fn is_reached(&self, value: u64) -> bool {
        self.status(value) == FenceStatus::Reached
    }

    /// Advance the timeline to `value`.
    ///
    /// The counter never moves backwards; signaling an older value is ignored.
    pub(crate) fn signal(&self, value: u64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }
}
