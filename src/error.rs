//! Compute runtime error types.

use crate::backend::DiagnosticMessage;
use crate::state::{AccessRole, ResourceState};
use crate::types::{BufferFlags, ResourceKind};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ComputeError>;

/// Errors that can occur in the compute runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputeError {
    /// Failed to initialize a backend.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// The requested backend is not compiled in or not present on this machine.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An operation required a buffer role the buffer was not created with.
    #[error("{operation} requires a buffer created with {role:?}")]
    MissingRole {
        /// Operation that was rejected.
        operation: &'static str,
        /// Missing role flag.
        role: BufferFlags,
    },

    /// A buffer was created with an invalid length or element type.
    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(String),

    /// Out of device memory.
    #[error("out of GPU memory while allocating {requested_bytes} bytes")]
    OutOfMemory {
        /// Size of the failed allocation.
        requested_bytes: u64,
    },

    /// The device rejected an allocation for a reason other than memory exhaustion.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// Device-local memory cannot be mapped by the host.
    #[error("{kind:?} memory is not host visible")]
    NotHostVisible {
        /// Memory class of the resource.
        kind: ResourceKind,
    },

    /// A resource was asked to enter a state its memory class does not support.
    #[error("{kind:?} resource cannot enter {requested}")]
    InvalidTransition {
        /// Memory class of the resource.
        kind: ResourceKind,
        /// Requested state or role.
        requested: TransitionTarget,
    },

    /// A command needed a bound pipeline.
    #[error("no shader pipeline bound")]
    NoPipelineBound,

    /// The bound pipeline has no binding at this slot.
    #[error("binding slot {slot} does not exist in pipeline '{pipeline}'")]
    UnknownBindingSlot {
        /// Requested slot.
        slot: u32,
        /// Entry point of the bound pipeline.
        pipeline: String,
    },

    /// A buffer was bound to a slot with a different binding kind.
    #[error("binding slot {slot} expects {expected} but the buffer binds as {actual}")]
    BindingMismatch {
        /// Slot that was bound.
        slot: u32,
        /// Binding kind declared by the shader.
        expected: &'static str,
        /// Binding kind of the buffer.
        actual: &'static str,
    },

    /// A dispatch was recorded while a declared binding slot had no buffer.
    #[error("binding slot {slot} is not bound")]
    UnboundSlot {
        /// Slot without a buffer.
        slot: u32,
    },

    /// A bound buffer is not in the state the dispatch needs.
    #[error("buffer at slot {slot} is in {actual:?}, dispatch needs {expected:?}")]
    StateMismatch {
        /// Slot of the offending buffer.
        slot: u32,
        /// State required by the binding.
        expected: ResourceState,
        /// Recorded state of the buffer.
        actual: ResourceState,
    },

    /// Thread-group counts must all be at least one.
    #[error("invalid dispatch size ({x}, {y}, {z})")]
    InvalidDispatch {
        /// Groups along X.
        x: u32,
        /// Groups along Y.
        y: u32,
        /// Groups along Z.
        z: u32,
    },

    /// The command list is closed for submission.
    #[error("command list is closed")]
    CommandListClosed,

    /// Shader compilation failed; diagnostics are returned verbatim.
    #[error("failed to compile shader '{name}':\n{diagnostics}")]
    Compilation {
        /// Source name.
        name: String,
        /// Compiler output.
        diagnostics: String,
    },

    /// Pipeline creation failed.
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),

    /// The submitted work executed but the device reported errors.
    #[error("device reported {} error(s) at fence value {fence_value}", messages.len())]
    DeviceErrors {
        /// Fence value of the failed flush.
        fence_value: u64,
        /// Error-severity diagnostics.
        messages: Vec<DiagnosticMessage>,
    },

    /// The device rejected a submission; nothing executed.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
}

/// Target of a rejected transition, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTarget {
    /// An explicit state.
    State(ResourceState),
    /// A role resolved through the transition table.
    Role(AccessRole),
}

impl std::fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State(state) => write!(f, "state {state:?}"),
            Self::Role(role) => write!(f, "role {role:?}"),
        }
    }
}
