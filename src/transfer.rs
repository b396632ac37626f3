//! Host/device transfer operations.
//!
//! Transfers only record commands. Nothing moves until the batch is flushed,
//! and every transfer leaves the device region in its steady state so a
//! dispatch can follow directly.

use bytemuck::Pod;

use crate::commands::CommandSequencer;
use crate::error::{ComputeError, Result};
use crate::resources::TypedBuffer;
use crate::state::{self, AccessRole};
use crate::types::BufferFlags;

impl CommandSequencer {
    /// Record a copy of the upload region into the device region.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::MissingRole`] if the buffer is not
    /// host-writable; nothing is recorded and no state changes.
    pub fn upload_buffer<T: Pod>(&mut self, buffer: &TypedBuffer<T>) -> Result<()> {
        let upload = buffer.upload().ok_or(ComputeError::MissingRole {
            operation: "upload_buffer",
            role: BufferFlags::HOST_WRITABLE,
        })?;
        let device = buffer.device();

        self.transition(upload, AccessRole::CopySource)?;
        self.transition(device, AccessRole::CopyDestination)?;
        self.copy(upload, device)?;
        self.transition(device, AccessRole::Shader)?;

        log::debug!("upload {:?} ({} bytes)", buffer.label(), buffer.byte_size());
        Ok(())
    }

    /// Record a copy of the device region into the readback region.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::MissingRole`] if the buffer is not
    /// host-readable; nothing is recorded and no state changes.
    pub fn readback_buffer<T: Pod>(&mut self, buffer: &TypedBuffer<T>) -> Result<()> {
        let readback = buffer.readback().ok_or(ComputeError::MissingRole {
            operation: "readback_buffer",
            role: BufferFlags::HOST_READABLE,
        })?;
        let device = buffer.device();

        self.transition(device, AccessRole::CopySource)?;
        self.transition(readback, AccessRole::CopyDestination)?;
        self.copy(device, readback)?;
        self.transition(device, AccessRole::Shader)?;

        log::debug!("readback {:?} ({} bytes)", buffer.label(), buffer.byte_size());
        Ok(())
    }

    /// Record a copy between the device regions of two buffers.
    ///
    /// Both buffers end in their steady states.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidBufferSize`] if the byte sizes differ or
    /// both arguments are the same buffer.
    pub fn copy_buffer<S: Pod, D: Pod>(
        &mut self,
        src: &TypedBuffer<S>,
        dst: &TypedBuffer<D>,
    ) -> Result<()> {
        let (from, to) = (src.device(), dst.device());
        if from.ptr_eq(to) {
            return Err(ComputeError::InvalidBufferSize(
                "cannot copy a buffer onto itself".into(),
            ));
        }
        if from.size() != to.size() {
            return Err(ComputeError::InvalidBufferSize(format!(
                "copy source is {} bytes but destination is {} bytes",
                from.size(),
                to.size()
            )));
        }

        self.transition(from, AccessRole::CopySource)?;
        self.transition(to, AccessRole::CopyDestination)?;
        self.copy(from, to)?;
        self.transition(from, AccessRole::Shader)?;
        self.transition(to, AccessRole::Shader)?;

        debug_assert_eq!(Some(to.state()), state::steady_state(to.kind()));
        Ok(())
    }
}
