//! Resource handles.
//!
//! A [`ResourceHandle`] references one backend allocation together with the
//! access state the command stream last left it in. The state is written
//! only by the transition engine in [`crate::state`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::GpuResource;
use crate::state::{ResourceState, StateCell};
use crate::types::ResourceKind;

/// Process-unique identifier of a resource, used in logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ResourceInner {
    id: ResourceId,
    gpu: GpuResource,
    kind: ResourceKind,
    size: u64,
    label: Option<String>,
    state: StateCell,
}

/// Reference to one device allocation and its recorded access state.
///
/// Handles are cheap to clone. The owning [`TypedBuffer`](super::TypedBuffer)
/// holds one reference and the command sequencer holds another for as long as
/// unflushed commands mention the resource, so device memory is never
/// released under a pending command.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<ResourceInner>,
}

impl ResourceHandle {
    /// Wrap a freshly created backend allocation.
    pub(crate) fn new(
        gpu: GpuResource,
        kind: ResourceKind,
        size: u64,
        label: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                id: ResourceId::next(),
                gpu,
                kind,
                size,
                label,
                state: StateCell::new(ResourceState::initial(kind)),
            }),
        }
    }

    /// Unique identifier.
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Memory class of the allocation.
    pub fn kind(&self) -> ResourceKind {
        self.inner.kind
    }

    /// Capacity in bytes.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Debug label, if set.
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Access state recorded at the end of the command stream built so far.
    pub fn state(&self) -> ResourceState {
        self.inner.state.get()
    }

    /// Backend allocation.
    pub fn gpu(&self) -> &GpuResource {
        &self.inner.gpu
    }

    /// Whether two handles reference the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live references, including pending commands.
    #[cfg(test)]
    pub(crate) fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Recorded state cell; writable only from the transition engine.
    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.inner.state
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("size", &self.inner.size)
            .field("state", &self.state())
            .field("label", &self.inner.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(ResourceHandle: Send, Sync);
