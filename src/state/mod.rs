//! Resource state tracking and barrier generation.
//!
//! Every access-state change of a [`ResourceHandle`] goes through
//! [`CommandSequencer::ensure_state`]. It compares the recorded state with the
//! requested one and appends at most one barrier, so the command stream never
//! carries redundant transitions and a handle never has two pending states in
//! the same batch.
//!
//! Which state a role maps to depends on the memory class of the resource.
//! That mapping is a single table ([`resolve`]) instead of one code path per
//! buffer role:
//!
//! | kind \ role       | CopySource | CopyDestination | Shader          |
//! |-------------------|------------|-----------------|-----------------|
//! | `DeviceReadWrite` | CopySource | CopyDestination | UnorderedAccess |
//! | `DeviceConstant`  | CopySource | CopyDestination | ConstantRead    |
//! | `Upload`          | CopySource | -               | -               |
//! | `Readback`        | -          | CopyDestination | -               |

use parking_lot::Mutex;

use crate::commands::CommandSequencer;
use crate::error::{ComputeError, Result, TransitionTarget};
use crate::resources::ResourceHandle;
use crate::types::ResourceKind;

/// Access state of a resource on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Freshly allocated, not yet used by any command.
    Common,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDestination,
    /// Bound to a shader for read-write access.
    UnorderedAccess,
    /// Bound to a shader as read-only constant data.
    ConstantRead,
}

impl ResourceState {
    /// State a resource of the given class is created in.
    ///
    /// Staging memory keeps the one state its class allows for its whole life.
    pub fn initial(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::DeviceReadWrite | ResourceKind::DeviceConstant => Self::Common,
            ResourceKind::Upload => Self::CopySource,
            ResourceKind::Readback => Self::CopyDestination,
        }
    }

    /// Whether a resource of the given class may ever be in this state.
    pub fn is_allowed_for(self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::DeviceReadWrite => !matches!(self, Self::ConstantRead),
            ResourceKind::DeviceConstant => !matches!(self, Self::UnorderedAccess),
            ResourceKind::Upload => self == Self::CopySource,
            ResourceKind::Readback => self == Self::CopyDestination,
        }
    }
}

/// Role a command needs a resource to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRole {
    /// Read by a copy.
    CopySource,
    /// Written by a copy.
    CopyDestination,
    /// Bound to a shader; read-write or constant depending on the memory class.
    Shader,
}

/// Resolve the state a resource of `kind` must be in to play `role`.
///
/// Returns `None` when the class cannot play the role at all.
pub fn resolve(kind: ResourceKind, role: AccessRole) -> Option<ResourceState> {
    use AccessRole as R;
    use ResourceKind as K;
    use ResourceState as S;

    match (kind, role) {
        (K::DeviceReadWrite | K::DeviceConstant, R::CopySource) => Some(S::CopySource),
        (K::DeviceReadWrite | K::DeviceConstant, R::CopyDestination) => {
            Some(S::CopyDestination)
        }
        (K::DeviceReadWrite, R::Shader) => Some(S::UnorderedAccess),
        (K::DeviceConstant, R::Shader) => Some(S::ConstantRead),
        (K::Upload, R::CopySource) => Some(S::CopySource),
        (K::Readback, R::CopyDestination) => Some(S::CopyDestination),
        (K::Upload | K::Readback, _) => None,
    }
}

/// State a device resource rests in between transfers.
pub fn steady_state(kind: ResourceKind) -> Option<ResourceState> {
    resolve(kind, AccessRole::Shader)
}

/// Recorded state of one handle.
///
/// Readable anywhere in the crate, writable only from this module.
#[derive(Debug)]
pub struct StateCell(Mutex<ResourceState>);

impl StateCell {
    pub(crate) fn new(state: ResourceState) -> Self {
        Self(Mutex::new(state))
    }

    /// Current recorded state.
    pub fn get(&self) -> ResourceState {
        *self.0.lock()
    }

    fn set(&self, state: ResourceState) {
        *self.0.lock() = state;
    }
}

/// Put a handle back into the state it had before a batch that never reached
/// the device.
pub(crate) fn restore_state(handle: &ResourceHandle, state: ResourceState) {
    handle.state_cell().set(state);
}

impl CommandSequencer {
    /// Make sure `handle` is in `target` at this point of the command stream.
    ///
    /// Appends exactly one barrier when the recorded state differs and nothing
    /// otherwise. Returns whether a barrier was recorded.
    ///
    /// # Errors
    ///
    /// - [`ComputeError::InvalidTransition`] if the memory class of the handle
    ///   cannot enter `target`; the recorded state is left unchanged.
    /// - [`ComputeError::CommandListClosed`] while the list is being submitted.
    pub fn ensure_state(&mut self, handle: &ResourceHandle, target: ResourceState) -> Result<bool> {
        let before = handle.state();
        if before == target {
            return Ok(false);
        }

        if !target.is_allowed_for(handle.kind()) {
            return Err(ComputeError::InvalidTransition {
                kind: handle.kind(),
                requested: TransitionTarget::State(target),
            });
        }

        self.record_barrier(handle, before, target)?;
        handle.state_cell().set(target);

        log::debug!(
            "resource {} ({:?}): {:?} -> {:?}",
            handle.id(),
            handle.label(),
            before,
            target
        );

        Ok(true)
    }

    /// Move `handle` into whatever state its memory class uses for `role`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidTransition`] if the class cannot play
    /// the role, plus anything [`ensure_state`](Self::ensure_state) returns.
    pub fn transition(&mut self, handle: &ResourceHandle, role: AccessRole) -> Result<bool> {
        let target = resolve(handle.kind(), role).ok_or(ComputeError::InvalidTransition {
            kind: handle.kind(),
            requested: TransitionTarget::Role(role),
        })?;
        self.ensure_state(handle, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::GpuBackend;
    use crate::commands::Command;
    use crate::types::ResourceDescriptor;

    fn make_handle(kind: ResourceKind) -> ResourceHandle {
        let backend = SoftwareBackend::new();
        let gpu = backend
            .create_resource(&ResourceDescriptor::new(16, kind))
            .unwrap();
        ResourceHandle::new(gpu, kind, 16, None)
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            resolve(ResourceKind::DeviceReadWrite, AccessRole::Shader),
            Some(ResourceState::UnorderedAccess)
        );
        assert_eq!(
            resolve(ResourceKind::DeviceConstant, AccessRole::Shader),
            Some(ResourceState::ConstantRead)
        );
        assert_eq!(
            resolve(ResourceKind::Upload, AccessRole::CopySource),
            Some(ResourceState::CopySource)
        );
        assert_eq!(resolve(ResourceKind::Upload, AccessRole::Shader), None);
        assert_eq!(
            resolve(ResourceKind::Readback, AccessRole::CopySource),
            None
        );
    }

    #[test]
    fn test_table_targets_are_allowed() {
        let kinds = [
            ResourceKind::DeviceReadWrite,
            ResourceKind::DeviceConstant,
            ResourceKind::Upload,
            ResourceKind::Readback,
        ];
        let roles = [
            AccessRole::CopySource,
            AccessRole::CopyDestination,
            AccessRole::Shader,
        ];
        for kind in kinds {
            assert!(ResourceState::initial(kind).is_allowed_for(kind));
            for role in roles {
                if let Some(state) = resolve(kind, role) {
                    assert!(state.is_allowed_for(kind), "{kind:?} {role:?}");
                }
            }
        }
    }

    #[test]
    fn test_ensure_state_is_idempotent() {
        let mut seq = CommandSequencer::new();
        let handle = make_handle(ResourceKind::DeviceReadWrite);

        assert!(seq
            .ensure_state(&handle, ResourceState::CopyDestination)
            .unwrap());
        assert!(!seq
            .ensure_state(&handle, ResourceState::CopyDestination)
            .unwrap());

        assert_eq!(seq.barrier_count(), 1);
        assert_eq!(handle.state(), ResourceState::CopyDestination);
        match &seq.commands()[0] {
            Command::Barrier {
                resource,
                before,
                after,
            } => {
                assert!(resource.ptr_eq(&handle));
                assert_eq!(*before, ResourceState::Common);
                assert_eq!(*after, ResourceState::CopyDestination);
            }
            other => panic!("expected barrier, got {other:?}"),
        }
    }

    #[test]
    fn test_barrier_chain_records_before_states() {
        let mut seq = CommandSequencer::new();
        let handle = make_handle(ResourceKind::DeviceReadWrite);

        seq.transition(&handle, AccessRole::CopyDestination).unwrap();
        seq.transition(&handle, AccessRole::Shader).unwrap();
        seq.transition(&handle, AccessRole::CopySource).unwrap();

        let pairs: Vec<_> = seq
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Barrier { before, after, .. } => Some((*before, *after)),
                _ => None,
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                (ResourceState::Common, ResourceState::CopyDestination),
                (ResourceState::CopyDestination, ResourceState::UnorderedAccess),
                (ResourceState::UnorderedAccess, ResourceState::CopySource),
            ]
        );
    }

    #[test]
    fn test_invalid_state_leaves_handle_untouched() {
        let mut seq = CommandSequencer::new();
        let handle = make_handle(ResourceKind::DeviceConstant);

        let err = seq
            .ensure_state(&handle, ResourceState::UnorderedAccess)
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidTransition { .. }));
        assert_eq!(handle.state(), ResourceState::Common);
        assert!(seq.is_empty());
    }

    #[test]
    fn test_staging_cannot_bind_to_shader() {
        let mut seq = CommandSequencer::new();
        let upload = make_handle(ResourceKind::Upload);

        let err = seq.transition(&upload, AccessRole::Shader).unwrap_err();
        assert_eq!(
            err,
            ComputeError::InvalidTransition {
                kind: ResourceKind::Upload,
                requested: TransitionTarget::Role(AccessRole::Shader),
            }
        );
        // Already in its only legal state: no barrier.
        assert!(!seq.transition(&upload, AccessRole::CopySource).unwrap());
        assert!(seq.is_empty());
    }

    #[test]
    fn test_restore_state() {
        let mut seq = CommandSequencer::new();
        let handle = make_handle(ResourceKind::DeviceReadWrite);
        seq.transition(&handle, AccessRole::Shader).unwrap();

        restore_state(&handle, ResourceState::Common);
        assert_eq!(handle.state(), ResourceState::Common);
    }
}
