//! Submission and fence synchronization.
//!
//! The [`SubmissionGate`] is the single synchronization point between host
//! and device. A flush closes the recorded command list, submits it with the
//! next fence value, blocks until the device reaches that value, drains the
//! device diagnostic queue and reopens the list for the next batch.
//!
//! No device work is guaranteed complete, and no staging memory reflects
//! device writes, until a flush has returned.
//!
//! # Module Contents
//!
//! - [`SubmissionGate`] - Fence value bookkeeping and the flush protocol
//! - [`FlushReport`] - Summary of a successful flush
//! - [`Fence`] - Host-side timeline fence

mod sync;

pub use sync::{Fence, FenceStatus};

use crate::backend::{DiagnosticMessage, GpuBackend};
use crate::commands::CommandSequencer;
use crate::error::{ComputeError, Result};

/// Summary of a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Fence value the batch signaled.
    pub fence_value: u64,
    /// Number of commands submitted.
    pub command_count: usize,
    /// Number of barriers among them.
    pub barrier_count: usize,
    /// Non-error diagnostics the device reported for the batch.
    pub diagnostics: Vec<DiagnosticMessage>,
}

/// Submits command batches with monotonically increasing fence values.
#[derive(Debug, Default)]
pub struct SubmissionGate {
    last_fence_value: u64,
}

impl SubmissionGate {
    /// Create a gate whose first flush signals fence value 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fence value of the last submitted batch.
    pub fn last_fence_value(&self) -> u64 {
        self.last_fence_value
    }

    /// Submit the recorded batch and block until the device has executed it.
    ///
    /// An empty list is still submitted so the call is always a full
    /// host/device barrier. The list is reset in every outcome.
    ///
    /// # Errors
    ///
    /// - [`ComputeError::DeviceErrors`] if the device reported error-severity
    ///   diagnostics. The batch has executed.
    /// - The backend's error if submission failed. Nothing executed and the
    ///   recorded state of every transitioned resource is rolled back.
    pub fn flush(
        &mut self,
        backend: &dyn GpuBackend,
        sequencer: &mut CommandSequencer,
    ) -> Result<FlushReport> {
        sequencer.close()?;

        let fence_value = self.last_fence_value + 1;
        let command_count = sequencer.len();
        let barrier_count = sequencer.barrier_count();

        log::debug!(
            "flush: submitting {} commands ({} barriers) at fence value {}",
            command_count,
            barrier_count,
            fence_value
        );

        if let Err(e) = backend.submit(sequencer.commands(), fence_value) {
            log::error!("flush: submission failed: {}", e);
            sequencer.reset();
            return Err(e);
        }
        self.last_fence_value = fence_value;

        let waited = backend.wait_fence(fence_value);

        let (errors, diagnostics): (Vec<_>, Vec<_>) = backend
            .drain_messages()
            .into_iter()
            .inspect(DiagnosticMessage::log)
            .partition(|m| m.severity.is_error());

        sequencer.retire();
        waited?;

        if !errors.is_empty() {
            return Err(ComputeError::DeviceErrors {
                fence_value,
                messages: errors,
            });
        }

        Ok(FlushReport {
            fence_value,
            command_count,
            barrier_count,
            diagnostics,
        })
    }
}
