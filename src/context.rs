//! Compute context facade.
//!
//! [`ComputeContext`] ties the pieces together: it owns the backend, the
//! command sequencer and the submission gate, and exposes the whole
//! create / write / upload / dispatch / readback / flush / read cycle.
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = ComputeContext::new(ContextConfig::default())?;
//! let mut data = ctx.create_buffer::<u32>(16, BufferFlags::HOST_READ_WRITE)?;
//!
//! {
//!     let mut view = ctx.write_view(&mut data)?;
//!     for (i, v) in view.iter_mut().enumerate() {
//!         *v = i as u32;
//!     }
//! }
//!
//! ctx.upload_buffer(&data)?;
//! ctx.set_shader(&pipeline)?;
//! ctx.set_buffer(0, &data)?;
//! ctx.dispatch(1, 1, 1)?;
//! ctx.readback_buffer(&data)?;
//! ctx.flush()?;
//!
//! let results = ctx.read_view(&mut data)?.to_vec();
//! ```

use std::sync::Arc;

use bytemuck::Pod;

use crate::backend::{self, GpuBackend};
use crate::commands::CommandSequencer;
use crate::config::ContextConfig;
use crate::error::Result;
use crate::pipeline::ShaderPipeline;
use crate::resources::{ReadView, TypedBuffer, WriteView};
use crate::scheduler::{FlushReport, SubmissionGate};
use crate::shader::{CompiledProgram, ShaderDefines, ShaderSource};
use crate::types::BufferFlags;

/// Entry point of the compute runtime.
///
/// Recording takes `&mut self` and views borrow `&self`, so host access to
/// staging memory and command recording never overlap.
pub struct ComputeContext {
    config: ContextConfig,
    backend: Arc<dyn GpuBackend>,
    sequencer: CommandSequencer,
    gate: SubmissionGate,
}

impl ComputeContext {
    /// Create a context on the backend the configuration selects.
    ///
    /// # Errors
    ///
    /// Returns an error if no requested backend can be initialized.
    pub fn new(config: ContextConfig) -> Result<Self> {
        let backend = backend::create_backend(&config)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Create a context on an existing backend.
    pub fn with_backend(config: ContextConfig, backend: Arc<dyn GpuBackend>) -> Self {
        log::info!("Creating ComputeContext on {}", backend.name());
        Self {
            config,
            backend,
            sequencer: CommandSequencer::new(),
            gate: SubmissionGate::new(),
        }
    }

    /// The backend executing the work.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The configuration the context was created with.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Commands recorded since the last flush.
    pub fn sequencer(&self) -> &CommandSequencer {
        &self.sequencer
    }

    /// Create a buffer of `len` elements with the regions `flags` ask for.
    pub fn create_buffer<T: Pod>(&self, len: usize, flags: BufferFlags) -> Result<TypedBuffer<T>> {
        TypedBuffer::new(
            self.backend.as_ref(),
            len,
            flags,
            None,
            self.config.max_buffer_size,
        )
    }

    /// Create a labeled buffer.
    pub fn create_buffer_labeled<T: Pod>(
        &self,
        label: impl Into<String>,
        len: usize,
        flags: BufferFlags,
    ) -> Result<TypedBuffer<T>> {
        TypedBuffer::new(
            self.backend.as_ref(),
            len,
            flags,
            Some(label.into()),
            self.config.max_buffer_size,
        )
    }

    /// Compile a shader with the configured compiler.
    pub fn compile_shader(
        &self,
        source: &ShaderSource,
        entry_point: &str,
        profile: &str,
        defines: &ShaderDefines,
    ) -> Result<CompiledProgram> {
        self.config
            .compiler
            .compile(source, entry_point, profile, defines)
    }

    /// Create a pipeline from a compiled program.
    pub fn create_pipeline(&self, program: &CompiledProgram) -> Result<ShaderPipeline> {
        let gpu = self.backend.create_pipeline(program)?;
        Ok(ShaderPipeline::new(gpu, program))
    }

    /// Bind a pipeline for subsequent dispatches.
    pub fn set_shader(&mut self, pipeline: &ShaderPipeline) -> Result<()> {
        self.sequencer.set_pipeline(pipeline)
    }

    /// Bind the device region of `buffer` at `slot`.
    ///
    /// Does not transition the buffer; upload it first.
    pub fn set_buffer<T: Pod>(&mut self, slot: u32, buffer: &TypedBuffer<T>) -> Result<()> {
        self.sequencer.set_buffer(slot, buffer.device())
    }

    /// Record a dispatch over an `x * y * z` grid of thread groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.sequencer.dispatch(x, y, z)
    }

    /// Record an upload of the buffer's staging contents.
    pub fn upload_buffer<T: Pod>(&mut self, buffer: &TypedBuffer<T>) -> Result<()> {
        self.sequencer.upload_buffer(buffer)
    }

    /// Record a readback of the buffer's device contents.
    pub fn readback_buffer<T: Pod>(&mut self, buffer: &TypedBuffer<T>) -> Result<()> {
        self.sequencer.readback_buffer(buffer)
    }

    /// Record a device-to-device copy between two buffers.
    pub fn copy_buffer<S: Pod, D: Pod>(
        &mut self,
        src: &TypedBuffer<S>,
        dst: &TypedBuffer<D>,
    ) -> Result<()> {
        self.sequencer.copy_buffer(src, dst)
    }

    /// Open a write view over the upload region.
    ///
    /// Returns an empty view if the buffer is not host-writable.
    pub fn write_view<'a, T: Pod>(
        &'a self,
        buffer: &'a mut TypedBuffer<T>,
    ) -> Result<WriteView<'a, T>> {
        if buffer.upload().is_none() {
            log::warn!(
                "write_view on buffer {:?} without HOST_WRITABLE; returning an empty view",
                buffer.label()
            );
        }
        WriteView::open(self.backend.as_ref(), buffer.upload())
    }

    /// Open a read view over the readback region.
    ///
    /// Returns an empty view if the buffer is not host-readable.
    pub fn read_view<'a, T: Pod>(&'a self, buffer: &'a mut TypedBuffer<T>) -> Result<ReadView<'a, T>> {
        match buffer.readback() {
            None => log::warn!(
                "read_view on buffer {:?} without HOST_READABLE; returning an empty view",
                buffer.label()
            ),
            Some(readback) if self.sequencer.references(readback) => log::warn!(
                "read_view on buffer {:?} with an unflushed readback; contents are stale",
                buffer.label()
            ),
            Some(_) => {}
        }
        ReadView::open(self.backend.as_ref(), buffer.readback())
    }

    /// Submit every recorded command and block until the device finished.
    ///
    /// See [`SubmissionGate::flush`] for the error contract.
    pub fn flush(&mut self) -> Result<FlushReport> {
        self.gate.flush(self.backend.as_ref(), &mut self.sequencer)
    }

    /// Last fence value the device reached.
    pub fn completed_fence_value(&self) -> u64 {
        self.backend.completed_fence_value()
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("backend", &self.backend.name())
            .field("pending_commands", &self.sequencer.len())
            .field("last_fence_value", &self.gate.last_fence_value())
            .finish()
    }
}

static_assertions::assert_impl_all!(ComputeContext: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::config::BackendKind;
    use crate::error::ComputeError;

    fn software_context() -> ComputeContext {
        ComputeContext::new(ContextConfig::default().with_backend(BackendKind::Software)).unwrap()
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_buffer_reports_out_of_memory() {
        let config = ContextConfig::default()
            .with_backend(BackendKind::Software)
            .with_max_buffer_size(u64::MAX);
        let ctx = ComputeContext::new(config).unwrap();

        let err = ctx
            .create_buffer::<u8>(1 << 60, BufferFlags::empty())
            .unwrap_err();
        assert_eq!(
            err,
            ComputeError::OutOfMemory {
                requested_bytes: 1 << 60
            }
        );
    }

    #[test]
    fn test_round_trip() {
        let mut ctx = software_context();
        let mut buffer = ctx
            .create_buffer::<f32>(8, BufferFlags::HOST_READ_WRITE)
            .unwrap();

        {
            let mut view = ctx.write_view(&mut buffer).unwrap();
            view.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        }

        ctx.upload_buffer(&buffer).unwrap();
        ctx.readback_buffer(&buffer).unwrap();
        let report = ctx.flush().unwrap();
        assert_eq!(report.fence_value, 1);

        let view = ctx.read_view(&mut buffer).unwrap();
        assert_eq!(view.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_empty_write_view_without_role() {
        let ctx = software_context();
        let mut buffer = ctx
            .create_buffer::<u32>(4, BufferFlags::HOST_READABLE)
            .unwrap();
        let view = ctx.write_view(&mut buffer).unwrap();
        assert!(!view.is_valid());
        assert_eq!(view.len(), 0);
    }

    #[test]
    fn test_max_buffer_size() {
        let ctx = ComputeContext::with_backend(
            ContextConfig::default().with_max_buffer_size(64),
            Arc::new(SoftwareBackend::new()),
        );
        assert!(ctx.create_buffer::<u32>(16, BufferFlags::empty()).is_ok());
        assert!(ctx.create_buffer::<u32>(17, BufferFlags::empty()).is_err());
    }

    #[test]
    fn test_completed_fence_value() {
        let mut ctx = software_context();
        assert_eq!(ctx.completed_fence_value(), 0);
        ctx.flush().unwrap();
        ctx.flush().unwrap();
        assert_eq!(ctx.completed_fence_value(), 2);
    }
}
