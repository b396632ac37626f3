//! Command recording.
//!
//! The [`CommandSequencer`] accumulates the commands of one batch in append
//! order. It owns a handle clone for every resource a command mentions, so
//! device memory outlives the batch even if the owning buffer is dropped
//! before the flush.
//!
//! State changes are recorded through [`CommandSequencer::ensure_state`] and
//! [`CommandSequencer::transition`], which live next to the transition table
//! in [`crate::state`].

use std::collections::BTreeMap;

use crate::error::{ComputeError, Result};
use crate::pipeline::ShaderPipeline;
use crate::resources::ResourceHandle;
use crate::shader::BindingKind;
use crate::state::{self, ResourceState};
use crate::types::ResourceKind;

/// A recorded device command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Access-state transition of one resource.
    Barrier {
        /// Transitioned resource.
        resource: ResourceHandle,
        /// State before the barrier.
        before: ResourceState,
        /// State after the barrier.
        after: ResourceState,
    },
    /// Whole-resource copy.
    Copy {
        /// Source resource, in `CopySource`.
        src: ResourceHandle,
        /// Destination resource, in `CopyDestination`.
        dst: ResourceHandle,
        /// Bytes copied.
        size: u64,
    },
    /// Make a pipeline the active compute program.
    SetPipeline(ShaderPipeline),
    /// Bind a device resource at a binding slot of the active pipeline.
    SetBuffer {
        /// Binding slot.
        slot: u32,
        /// Bound resource.
        resource: ResourceHandle,
        /// How the resource is bound.
        binding: BindingKind,
    },
    /// Compute dispatch over a grid of thread groups.
    Dispatch {
        /// Groups along X.
        x: u32,
        /// Groups along Y.
        y: u32,
        /// Groups along Z.
        z: u32,
    },
}

impl Command {
    /// Short command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Barrier { .. } => "barrier",
            Self::Copy { .. } => "copy",
            Self::SetPipeline(_) => "set_pipeline",
            Self::SetBuffer { .. } => "set_buffer",
            Self::Dispatch { .. } => "dispatch",
        }
    }

    /// Whether the command mentions the given resource.
    pub fn references(&self, handle: &ResourceHandle) -> bool {
        match self {
            Self::Barrier { resource, .. } | Self::SetBuffer { resource, .. } => {
                resource.ptr_eq(handle)
            }
            Self::Copy { src, dst, .. } => src.ptr_eq(handle) || dst.ptr_eq(handle),
            Self::SetPipeline(_) | Self::Dispatch { .. } => false,
        }
    }
}

/// Binding kind a device resource of the given class is bound with.
///
/// Returns `None` for staging memory, which is never shader-visible.
pub fn binding_kind_for(kind: ResourceKind) -> Option<BindingKind> {
    match kind {
        ResourceKind::DeviceReadWrite => Some(BindingKind::ReadWrite),
        ResourceKind::DeviceConstant => Some(BindingKind::Constant),
        ResourceKind::Upload | ResourceKind::Readback => None,
    }
}

/// Ordered command list for one batch of device work.
///
/// Lifecycle: recording, then closed while the batch is submitted, then
/// recording again. A batch that is reset or dropped without being
/// submitted restores the states it recorded.
#[derive(Debug, Default)]
pub struct CommandSequencer {
    commands: Vec<Command>,
    closed: bool,
    pipeline: Option<ShaderPipeline>,
    slots: BTreeMap<u32, ResourceHandle>,
    /// State of every handle the batch transitioned, as it was before the
    /// first barrier on it.
    touched: Vec<(ResourceHandle, ResourceState)>,
}

impl CommandSequencer {
    /// Create an empty, open command list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands recorded since the last reset.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command has been recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of recorded barriers.
    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Barrier { .. }))
            .count()
    }

    /// Whether the list is closed for submission.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Currently bound pipeline.
    pub fn pipeline(&self) -> Option<&ShaderPipeline> {
        self.pipeline.as_ref()
    }

    /// Whether any recorded command mentions the resource.
    pub fn references(&self, handle: &ResourceHandle) -> bool {
        self.commands.iter().any(|c| c.references(handle))
    }

    fn push(&mut self, command: Command) -> Result<()> {
        if self.closed {
            return Err(ComputeError::CommandListClosed);
        }
        self.commands.push(command);
        Ok(())
    }

    pub(crate) fn record_barrier(
        &mut self,
        handle: &ResourceHandle,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        self.push(Command::Barrier {
            resource: handle.clone(),
            before,
            after,
        })?;
        if !self.touched.iter().any(|(h, _)| h.ptr_eq(handle)) {
            self.touched.push((handle.clone(), before));
        }
        Ok(())
    }

    /// Record a whole-resource copy.
    ///
    /// Both resources must already be in their copy states.
    pub fn copy(&mut self, src: &ResourceHandle, dst: &ResourceHandle) -> Result<()> {
        if src.size() != dst.size() {
            return Err(ComputeError::InvalidBufferSize(format!(
                "copy source is {} bytes but destination is {} bytes",
                src.size(),
                dst.size()
            )));
        }
        for (handle, expected) in [
            (src, ResourceState::CopySource),
            (dst, ResourceState::CopyDestination),
        ] {
            if handle.state() != expected {
                return Err(ComputeError::InvalidTransition {
                    kind: handle.kind(),
                    requested: crate::error::TransitionTarget::State(expected),
                });
            }
        }

        log::trace!("copy {} -> {} ({} bytes)", src.id(), dst.id(), src.size());
        self.push(Command::Copy {
            src: src.clone(),
            dst: dst.clone(),
            size: src.size(),
        })
    }

    /// Bind a pipeline and clear the slot table.
    pub fn set_pipeline(&mut self, pipeline: &ShaderPipeline) -> Result<()> {
        self.push(Command::SetPipeline(pipeline.clone()))?;
        self.pipeline = Some(pipeline.clone());
        self.slots.clear();
        Ok(())
    }

    /// Bind a device resource at a slot of the current pipeline.
    ///
    /// Does not transition the resource.
    pub fn set_buffer(&mut self, slot: u32, handle: &ResourceHandle) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(ComputeError::NoPipelineBound)?;
        let expected = pipeline
            .signature()
            .kind_of(slot)
            .ok_or_else(|| ComputeError::UnknownBindingSlot {
                slot,
                pipeline: pipeline.entry_point().to_owned(),
            })?;

        let actual = binding_kind_for(handle.kind()).ok_or(ComputeError::BindingMismatch {
            slot,
            expected: expected.label(),
            actual: handle.kind().label(),
        })?;
        if !expected.accepts(actual) {
            return Err(ComputeError::BindingMismatch {
                slot,
                expected: expected.label(),
                actual: actual.label(),
            });
        }

        self.push(Command::SetBuffer {
            slot,
            resource: handle.clone(),
            binding: actual,
        })?;
        self.slots.insert(slot, handle.clone());
        Ok(())
    }

    /// Record a dispatch of the current pipeline.
    ///
    /// Every slot the pipeline declares must be bound and every bound
    /// resource must be in its steady state.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if x == 0 || y == 0 || z == 0 {
            return Err(ComputeError::InvalidDispatch { x, y, z });
        }
        let pipeline = self.pipeline.as_ref().ok_or(ComputeError::NoPipelineBound)?;

        for binding in pipeline.signature().slots() {
            let handle = self
                .slots
                .get(&binding.slot)
                .ok_or(ComputeError::UnboundSlot { slot: binding.slot })?;
            let actual = handle.state();
            if let Some(expected) = state::steady_state(handle.kind()) {
                if actual != expected {
                    return Err(ComputeError::StateMismatch {
                        slot: binding.slot,
                        expected,
                        actual,
                    });
                }
            }
        }

        self.push(Command::Dispatch { x, y, z })
    }

    /// Close the list for submission.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ComputeError::CommandListClosed);
        }
        self.closed = true;
        Ok(())
    }

    /// Discard the batch and reopen the list.
    ///
    /// Every handle the batch transitioned returns to the state it had before
    /// the batch, and the resource references held by the commands are
    /// released.
    pub fn reset(&mut self) {
        self.rollback();
        self.retire();
    }

    /// Reopen the list after its commands reached the device.
    ///
    /// Recorded states are kept: they describe the resources as the
    /// submitted work leaves them.
    pub(crate) fn retire(&mut self) {
        self.commands.clear();
        self.closed = false;
        self.pipeline = None;
        self.slots.clear();
        self.touched.clear();
    }

    /// Restore the pre-batch state of every handle the batch transitioned.
    fn rollback(&mut self) {
        for (handle, before) in self.touched.drain(..) {
            log::debug!("rolling back resource {} to {:?}", handle.id(), before);
            state::restore_state(&handle, before);
        }
    }
}

impl Drop for CommandSequencer {
    fn drop(&mut self) {
        if !self.touched.is_empty() {
            log::debug!(
                "dropping unsubmitted batch of {} commands",
                self.commands.len()
            );
        }
        self.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::GpuBackend;
    use crate::shader::{BindingSlot, CompiledProgram, ProgramReflection};
    use crate::state::AccessRole;
    use crate::types::ResourceDescriptor;

    fn make_handle(backend: &SoftwareBackend, kind: ResourceKind, size: u64) -> ResourceHandle {
        let gpu = backend
            .create_resource(&ResourceDescriptor::new(size, kind))
            .unwrap();
        ResourceHandle::new(gpu, kind, size, None)
    }

    fn make_pipeline(backend: &SoftwareBackend, bindings: Vec<BindingSlot>) -> ShaderPipeline {
        let program = CompiledProgram {
            entry_point: "main".into(),
            words: Vec::new(),
            reflection: ProgramReflection {
                workgroup_size: [1, 1, 1],
                bindings,
            },
            disassembly: String::new(),
        };
        let gpu = backend.create_pipeline(&program).unwrap();
        ShaderPipeline::new(gpu, &program)
    }

    #[test]
    fn test_closed_list_rejects_commands() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();

        seq.close().unwrap();
        assert!(seq.is_closed());
        assert_eq!(
            seq.transition(&device, AccessRole::Shader),
            Err(ComputeError::CommandListClosed)
        );
        assert_eq!(device.state(), ResourceState::Common);
        assert_eq!(seq.close(), Err(ComputeError::CommandListClosed));

        seq.reset();
        assert!(!seq.is_closed());
        assert!(seq.transition(&device, AccessRole::Shader).unwrap());
    }

    #[test]
    fn test_copy_requires_matching_sizes() {
        let backend = SoftwareBackend::new();
        let src = make_handle(&backend, ResourceKind::Upload, 16);
        let dst = make_handle(&backend, ResourceKind::DeviceReadWrite, 32);
        let mut seq = CommandSequencer::new();
        seq.transition(&dst, AccessRole::CopyDestination).unwrap();

        let err = seq.copy(&src, &dst).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidBufferSize(_)));
    }

    #[test]
    fn test_copy_requires_copy_states() {
        let backend = SoftwareBackend::new();
        let src = make_handle(&backend, ResourceKind::Upload, 16);
        let dst = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();

        assert!(seq.copy(&src, &dst).is_err());
        seq.transition(&dst, AccessRole::CopyDestination).unwrap();
        seq.copy(&src, &dst).unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_set_buffer_without_pipeline() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();

        assert_eq!(
            seq.set_buffer(0, &device),
            Err(ComputeError::NoPipelineBound)
        );
        assert_eq!(seq.dispatch(1, 1, 1), Err(ComputeError::NoPipelineBound));
    }

    #[test]
    fn test_set_buffer_checks_signature() {
        let backend = SoftwareBackend::new();
        let pipeline = make_pipeline(
            &backend,
            vec![
                BindingSlot::new(0, BindingKind::ReadWrite),
                BindingSlot::new(1, BindingKind::Constant),
                BindingSlot::new(2, BindingKind::ReadOnly),
            ],
        );
        let storage = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let constant = make_handle(&backend, ResourceKind::DeviceConstant, 16);
        let upload = make_handle(&backend, ResourceKind::Upload, 16);
        let mut seq = CommandSequencer::new();
        seq.set_pipeline(&pipeline).unwrap();

        seq.set_buffer(0, &storage).unwrap();
        seq.set_buffer(1, &constant).unwrap();
        seq.set_buffer(2, &storage).unwrap();

        assert!(matches!(
            seq.set_buffer(0, &constant),
            Err(ComputeError::BindingMismatch { slot: 0, .. })
        ));
        assert!(matches!(
            seq.set_buffer(1, &storage),
            Err(ComputeError::BindingMismatch { slot: 1, .. })
        ));
        assert!(matches!(
            seq.set_buffer(0, &upload),
            Err(ComputeError::BindingMismatch { .. })
        ));
        assert!(matches!(
            seq.set_buffer(7, &storage),
            Err(ComputeError::UnknownBindingSlot { slot: 7, .. })
        ));
    }

    #[test]
    fn test_dispatch_validation() {
        let backend = SoftwareBackend::new();
        let pipeline = make_pipeline(&backend, vec![BindingSlot::new(0, BindingKind::ReadWrite)]);
        let storage = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();
        seq.set_pipeline(&pipeline).unwrap();

        assert_eq!(
            seq.dispatch(0, 1, 1),
            Err(ComputeError::InvalidDispatch { x: 0, y: 1, z: 1 })
        );
        assert_eq!(
            seq.dispatch(1, 1, 1),
            Err(ComputeError::UnboundSlot { slot: 0 })
        );

        seq.set_buffer(0, &storage).unwrap();
        assert_eq!(
            seq.dispatch(1, 1, 1),
            Err(ComputeError::StateMismatch {
                slot: 0,
                expected: ResourceState::UnorderedAccess,
                actual: ResourceState::Common,
            })
        );

        seq.transition(&storage, AccessRole::Shader).unwrap();
        seq.dispatch(4, 1, 1).unwrap();
        assert!(matches!(
            seq.commands().last(),
            Some(Command::Dispatch { x: 4, y: 1, z: 1 })
        ));
    }

    #[test]
    fn test_set_pipeline_clears_slots() {
        let backend = SoftwareBackend::new();
        let pipeline = make_pipeline(&backend, vec![BindingSlot::new(0, BindingKind::ReadWrite)]);
        let storage = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();
        seq.transition(&storage, AccessRole::Shader).unwrap();

        seq.set_pipeline(&pipeline).unwrap();
        seq.set_buffer(0, &storage).unwrap();
        seq.set_pipeline(&pipeline).unwrap();
        assert_eq!(
            seq.dispatch(1, 1, 1),
            Err(ComputeError::UnboundSlot { slot: 0 })
        );
    }

    #[test]
    fn test_commands_keep_resources_alive() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();

        seq.transition(&device, AccessRole::Shader).unwrap();
        assert!(seq.references(&device));
        // One reference in the barrier, one in the touched list.
        assert_eq!(device.reference_count(), 3);

        seq.reset();
        assert_eq!(device.reference_count(), 1);
        assert!(!seq.references(&device));
        assert_eq!(device.state(), ResourceState::Common);
    }

    #[test]
    fn test_dropped_sequencer_restores_states() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);

        {
            let mut side = CommandSequencer::new();
            side.transition(&device, AccessRole::Shader).unwrap();
            assert_eq!(device.state(), ResourceState::UnorderedAccess);
        }
        assert_eq!(device.state(), ResourceState::Common);
        assert_eq!(device.reference_count(), 1);

        // A fresh batch records the barrier again.
        let mut seq = CommandSequencer::new();
        assert!(seq.transition(&device, AccessRole::Shader).unwrap());
        assert_eq!(seq.barrier_count(), 1);
    }

    #[test]
    fn test_rollback_restores_first_state() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let mut seq = CommandSequencer::new();

        seq.transition(&device, AccessRole::CopyDestination).unwrap();
        seq.transition(&device, AccessRole::Shader).unwrap();
        seq.rollback();
        assert_eq!(device.state(), ResourceState::Common);
    }
}
