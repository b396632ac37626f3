//! Shader pipeline objects.

use std::sync::Arc;

use crate::backend::GpuPipeline;
use crate::shader::{BindingKind, BindingSlot, CompiledProgram};

/// Binding layout a pipeline expects, derived from program reflection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSignature {
    slots: Vec<BindingSlot>,
}

impl BindingSignature {
    /// Build a signature from reflected bindings.
    pub fn new(mut slots: Vec<BindingSlot>) -> Self {
        slots.sort_by_key(|b| b.slot);
        slots.dedup_by_key(|b| b.slot);
        Self { slots }
    }

    /// Declared slots, sorted by index.
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Declared access of a slot.
    pub fn kind_of(&self, slot: u32) -> Option<BindingKind> {
        self.slots
            .binary_search_by_key(&slot, |b| b.slot)
            .ok()
            .map(|i| self.slots[i].kind)
    }

    /// Number of declared slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pipeline binds nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

struct PipelineInner {
    gpu: GpuPipeline,
    entry_point: String,
    signature: BindingSignature,
    workgroup_size: [u32; 3],
}

/// Executable compute pipeline created once per compiled program.
///
/// Cloning is cheap; recorded commands keep the backend object alive until
/// the batch is flushed.
#[derive(Clone)]
pub struct ShaderPipeline {
    inner: Arc<PipelineInner>,
}

impl ShaderPipeline {
    pub(crate) fn new(gpu: GpuPipeline, program: &CompiledProgram) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                gpu,
                entry_point: program.entry_point.clone(),
                signature: BindingSignature::new(program.reflection.bindings.clone()),
                workgroup_size: program.reflection.workgroup_size,
            }),
        }
    }

    /// Entry point the pipeline runs.
    pub fn entry_point(&self) -> &str {
        &self.inner.entry_point
    }

    /// Binding layout.
    pub fn signature(&self) -> &BindingSignature {
        &self.inner.signature
    }

    /// Threads per group.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.inner.workgroup_size
    }

    /// Backend pipeline object.
    pub fn gpu(&self) -> &GpuPipeline {
        &self.inner.gpu
    }

    /// Whether two values refer to the same pipeline.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ShaderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderPipeline")
            .field("entry_point", &self.inner.entry_point)
            .field("workgroup_size", &self.inner.workgroup_size)
            .field("signature", &self.inner.signature)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(ShaderPipeline: Send, Sync);
