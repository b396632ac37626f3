//! Software backend for testing and development.
//!
//! This backend keeps every resource in host memory and executes submitted
//! command lists immediately, in order, on the calling thread. It doubles as a
//! validation layer: it tracks the true state of every resource independently
//! of the recorded state and reports misuse through the diagnostic queue, the
//! same way a device debug layer would.
//!
//! Dispatches run a host kernel registered for the pipeline's entry point.
//! Without a kernel a dispatch leaves memory untouched, which behaves like an
//! identity program.

use std::cell::UnsafeCell;
use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{Mutex, RwLock};

use crate::commands::Command;
use crate::error::{ComputeError, Result};
use crate::resources::ResourceHandle;
use crate::scheduler::Fence;
use crate::shader::{BindingKind, BindingSlot, CompiledProgram};
use crate::state::ResourceState;
use crate::types::{ResourceDescriptor, ResourceKind};

use super::{DiagnosticMessage, GpuBackend, GpuPipeline, GpuResource, MappedRegion, Severity};

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Chunk([u8; 64]);

/// Host-memory resource of the software backend.
pub struct SoftwareBuffer {
    id: u64,
    kind: ResourceKind,
    size: u64,
    memory: UnsafeCell<Box<[Chunk]>>,
    mapped: AtomicBool,
    /// True state on the simulated device timeline.
    state: Mutex<ResourceState>,
}

// SAFETY: the memory is only touched through a host mapping, which the view
// types hold exclusively, or by `submit`, which runs under the backend queue
// lock and refuses to touch mapped resources.
unsafe impl Sync for SoftwareBuffer {}
unsafe impl Send for SoftwareBuffer {}

impl SoftwareBuffer {
    fn new(id: u64, descriptor: &ResourceDescriptor) -> Result<Self> {
        let out_of_memory = || ComputeError::OutOfMemory {
            requested_bytes: descriptor.size,
        };
        let chunks = usize::try_from(descriptor.size.div_ceil(64)).map_err(|_| out_of_memory())?;

        let mut memory = Vec::new();
        memory
            .try_reserve_exact(chunks)
            .map_err(|_| out_of_memory())?;
        memory.resize(chunks, Chunk([0; 64]));

        Ok(Self {
            id,
            kind: descriptor.kind,
            size: descriptor.size,
            memory: UnsafeCell::new(memory.into_boxed_slice()),
            mapped: AtomicBool::new(false),
            state: Mutex::new(ResourceState::initial(descriptor.kind)),
        })
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Memory class.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// State the simulated device last left the resource in.
    pub fn device_state(&self) -> ResourceState {
        *self.state.lock()
    }

    /// Whether the host currently maps the resource.
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    fn base_ptr(&self) -> *mut u8 {
        // SAFETY: only the pointer is produced here; see the Sync impl.
        unsafe { (*self.memory.get()).as_mut_ptr().cast::<u8>() }
    }

    /// # Safety
    ///
    /// No mutable slice of this buffer may be alive.
    unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.base_ptr(), self.size as usize)
    }

    /// # Safety
    ///
    /// No other slice of this buffer may be alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn bytes_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base_ptr(), self.size as usize)
    }
}

impl std::fmt::Debug for SoftwareBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBuffer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("mapped", &self.is_mapped())
            .finish_non_exhaustive()
    }
}

/// Pipeline of the software backend.
#[derive(Debug)]
pub struct SoftwarePipeline {
    entry_point: String,
    workgroup_size: [u32; 3],
    bindings: Vec<BindingSlot>,
}

impl SoftwarePipeline {
    /// Entry point the pipeline runs.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// Arguments of one host kernel invocation.
///
/// A kernel runs once per dispatch and covers the whole grid itself.
pub struct KernelContext<'a> {
    groups: [u32; 3],
    workgroup_size: [u32; 3],
    bindings: &'a BTreeMap<u32, Arc<SoftwareBuffer>>,
}

impl KernelContext<'_> {
    /// Thread groups along each axis.
    pub fn groups(&self) -> [u32; 3] {
        self.groups
    }

    /// Threads per group along each axis.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    /// Total number of invocations the dispatch covers.
    pub fn invocation_count(&self) -> u64 {
        (0..3)
            .map(|i| u64::from(self.groups[i]) * u64::from(self.workgroup_size[i]))
            .product()
    }

    /// First element of the buffer bound at `slot`.
    pub fn constant<T: Pod>(&self, slot: u32) -> Option<T> {
        let bytes = self.storage::<u8>(slot)?;
        bytes
            .get(..std::mem::size_of::<T>())
            .and_then(|b| bytemuck::try_pod_read_unaligned(b).ok())
    }

    /// Contents of the buffer bound at `slot`.
    pub fn storage<T: Pod>(&self, slot: u32) -> Option<&[T]> {
        let buffer = self.bindings.get(&slot)?;
        // SAFETY: mutable access requires `&mut self`, so no mutable slice is alive.
        let bytes = unsafe { buffer.bytes() };
        let whole = bytes.len() / std::mem::size_of::<T>().max(1) * std::mem::size_of::<T>();
        bytemuck::try_cast_slice(&bytes[..whole]).ok()
    }

    /// Mutable contents of the buffer bound at `slot`.
    pub fn storage_mut<T: Pod>(&mut self, slot: u32) -> Option<&mut [T]> {
        let buffer = self.bindings.get(&slot)?;
        // SAFETY: `&mut self` guarantees this is the only slice handed out.
        let bytes = unsafe { buffer.bytes_mut() };
        let whole = bytes.len() / std::mem::size_of::<T>().max(1) * std::mem::size_of::<T>();
        bytemuck::try_cast_slice_mut(&mut bytes[..whole]).ok()
    }
}

type HostKernel = dyn Fn(&mut KernelContext<'_>) + Send + Sync;

/// Software GPU backend.
pub struct SoftwareBackend {
    next_id: AtomicU64,
    kernels: RwLock<HashMap<String, Arc<HostKernel>>>,
    messages: Mutex<Vec<DiagnosticMessage>>,
    fence: Fence,
    queue: Mutex<()>,
    rejected_submission: Mutex<Option<String>>,
}

impl SoftwareBackend {
    /// Create a new software backend.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            kernels: RwLock::new(HashMap::new()),
            messages: Mutex::new(Vec::new()),
            fence: Fence::new(),
            queue: Mutex::new(()),
            rejected_submission: Mutex::new(None),
        }
    }

    /// Run `kernel` for every dispatch of a pipeline with this entry point.
    pub fn register_kernel<F>(&self, entry_point: impl Into<String>, kernel: F)
    where
        F: Fn(&mut KernelContext<'_>) + Send + Sync + 'static,
    {
        let entry_point = entry_point.into();
        log::debug!("SoftwareBackend: registered kernel '{}'", entry_point);
        self.kernels.write().insert(entry_point, Arc::new(kernel));
    }

    /// Push a synthetic message into the diagnostic queue.
    pub fn inject_message(&self, severity: Severity, message: impl Into<String>) {
        self.report(severity, message.into());
    }

    /// Make the next [`submit`](GpuBackend::submit) fail before executing anything.
    pub fn reject_next_submission(&self, reason: impl Into<String>) {
        *self.rejected_submission.lock() = Some(reason.into());
    }

    fn report(&self, severity: Severity, message: String) {
        self.messages
            .lock()
            .push(DiagnosticMessage::new(severity, message));
    }

    fn buffer<'a>(&self, handle: &'a ResourceHandle) -> Option<&'a Arc<SoftwareBuffer>> {
        match handle.gpu() {
            GpuResource::Software(buffer) => Some(buffer),
            #[allow(unreachable_patterns)]
            _ => {
                self.report(
                    Severity::Error,
                    format!("resource {} does not belong to this backend", handle.id()),
                );
                None
            }
        }
    }

    fn check_unmapped(&self, buffer: &SoftwareBuffer, what: &str) -> bool {
        if buffer.is_mapped() {
            self.report(
                Severity::Error,
                format!("{what} on resource {} while it is mapped by the host", buffer.id),
            );
            return false;
        }
        true
    }

    fn check_state(&self, buffer: &SoftwareBuffer, expected: ResourceState, what: &str) -> bool {
        let actual = buffer.device_state();
        if actual != expected {
            self.report(
                Severity::Error,
                format!(
                    "{what} needs resource {} in {:?} but it is in {:?}",
                    buffer.id, expected, actual
                ),
            );
            return false;
        }
        true
    }

    fn execute_barrier(&self, handle: &ResourceHandle, before: ResourceState, after: ResourceState) {
        let Some(buffer) = self.buffer(handle) else {
            return;
        };
        self.check_unmapped(buffer, "barrier");

        let mut state = buffer.state.lock();
        if *state != before {
            self.report(
                Severity::Error,
                format!(
                    "barrier on resource {} expects {:?} but the resource is in {:?}",
                    buffer.id, before, *state
                ),
            );
        }
        if !after.is_allowed_for(buffer.kind) {
            self.report(
                Severity::Error,
                format!(
                    "{:?} resource {} cannot enter {:?}",
                    buffer.kind, buffer.id, after
                ),
            );
        }
        *state = after;
    }

    fn execute_copy(&self, src: &ResourceHandle, dst: &ResourceHandle, size: u64) {
        let (Some(src), Some(dst)) = (self.buffer(src), self.buffer(dst)) else {
            return;
        };

        let mut valid = self.check_unmapped(src, "copy") & self.check_unmapped(dst, "copy");
        valid &= self.check_state(src, ResourceState::CopySource, "copy source");
        valid &= self.check_state(dst, ResourceState::CopyDestination, "copy destination");
        if Arc::ptr_eq(src, dst) {
            self.report(
                Severity::Error,
                format!("copy from resource {} onto itself", src.id),
            );
            valid = false;
        }
        if size > src.size || size > dst.size {
            self.report(
                Severity::Error,
                format!(
                    "copy of {} bytes exceeds source ({}) or destination ({})",
                    size, src.size, dst.size
                ),
            );
            valid = false;
        }
        if !valid {
            return;
        }

        // SAFETY: distinct, unmapped buffers; the queue lock serializes execution.
        unsafe {
            std::ptr::copy_nonoverlapping(src.base_ptr(), dst.base_ptr(), size as usize);
        }
    }

    fn execute_dispatch(
        &self,
        pipeline: Option<&Arc<SoftwarePipeline>>,
        slots: &BTreeMap<u32, Arc<SoftwareBuffer>>,
        groups: [u32; 3],
    ) {
        let Some(pipeline) = pipeline else {
            self.report(Severity::Error, "dispatch without a bound pipeline".into());
            return;
        };

        let mut valid = true;
        let mut bindings = BTreeMap::new();
        for binding in &pipeline.bindings {
            let Some(buffer) = slots.get(&binding.slot) else {
                self.report(
                    Severity::Error,
                    format!(
                        "dispatch of '{}' with binding slot {} unbound",
                        pipeline.entry_point, binding.slot
                    ),
                );
                valid = false;
                continue;
            };
            let expected = match binding.kind {
                BindingKind::Constant => ResourceState::ConstantRead,
                BindingKind::ReadWrite | BindingKind::ReadOnly => ResourceState::UnorderedAccess,
            };
            valid &= self.check_unmapped(buffer, "dispatch");
            valid &= self.check_state(buffer, expected, "dispatch");
            bindings.insert(binding.slot, buffer.clone());
        }
        if !valid {
            return;
        }

        let kernel = self.kernels.read().get(&pipeline.entry_point).cloned();
        match kernel {
            Some(kernel) => {
                let mut context = KernelContext {
                    groups,
                    workgroup_size: pipeline.workgroup_size,
                    bindings: &bindings,
                };
                kernel(&mut context);
            }
            None => log::trace!(
                "SoftwareBackend: no kernel for '{}', dispatch is a no-op",
                pipeline.entry_point
            ),
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("fence", &self.fence.value())
            .field("kernels", &self.kernels.read().len())
            .finish_non_exhaustive()
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software Backend"
    }

    fn create_resource(&self, descriptor: &ResourceDescriptor) -> Result<GpuResource> {
        log::trace!(
            "SoftwareBackend: creating {} resource {:?} (size: {})",
            descriptor.kind.label(),
            descriptor.label,
            descriptor.size
        );
        if usize::try_from(descriptor.size).is_err() {
            return Err(ComputeError::OutOfMemory {
                requested_bytes: descriptor.size,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let buffer = SoftwareBuffer::new(id, descriptor)?;
        Ok(GpuResource::Software(Arc::new(buffer)))
    }

    fn map(&self, resource: &GpuResource) -> Result<MappedRegion> {
        let GpuResource::Software(buffer) = resource else {
            return Err(ComputeError::BackendUnavailable(
                "resource does not belong to the software backend".into(),
            ));
        };
        if !buffer.kind.is_host_visible() {
            return Err(ComputeError::NotHostVisible { kind: buffer.kind });
        }
        if buffer.mapped.swap(true, Ordering::AcqRel) {
            self.report(
                Severity::Warning,
                format!("resource {} mapped twice", buffer.id),
            );
        }

        log::trace!("SoftwareBackend: map resource {}", buffer.id);
        let ptr = NonNull::new(buffer.base_ptr()).unwrap_or(NonNull::dangling());
        // SAFETY: the pointer covers `size` bytes of the buffer, which outlives
        // the mapping because the caller holds the resource.
        Ok(unsafe { MappedRegion::new(ptr, buffer.size as usize) })
    }

    fn unmap(&self, resource: &GpuResource) {
        if let GpuResource::Software(buffer) = resource {
            log::trace!("SoftwareBackend: unmap resource {}", buffer.id);
            buffer.mapped.store(false, Ordering::Release);
        }
    }

    fn create_pipeline(&self, program: &CompiledProgram) -> Result<GpuPipeline> {
        log::trace!(
            "SoftwareBackend: creating pipeline '{}' ({} bindings)",
            program.entry_point,
            program.reflection.bindings.len()
        );
        Ok(GpuPipeline::Software(Arc::new(SoftwarePipeline {
            entry_point: program.entry_point.clone(),
            workgroup_size: program.reflection.workgroup_size,
            bindings: program.reflection.bindings.clone(),
        })))
    }

    fn submit(&self, commands: &[Command], fence_value: u64) -> Result<()> {
        if let Some(reason) = self.rejected_submission.lock().take() {
            return Err(ComputeError::SubmissionFailed(reason));
        }
        if fence_value <= self.fence.value() {
            return Err(ComputeError::SubmissionFailed(format!(
                "fence value {} does not advance past {}",
                fence_value,
                self.fence.value()
            )));
        }

        let _queue = self.queue.lock();
        log::trace!(
            "SoftwareBackend: executing {} commands (fence {})",
            commands.len(),
            fence_value
        );

        let mut pipeline: Option<Arc<SoftwarePipeline>> = None;
        let mut slots: BTreeMap<u32, Arc<SoftwareBuffer>> = BTreeMap::new();

        for (index, command) in commands.iter().enumerate() {
            log::trace!("SoftwareBackend: [{}] {}", index, command.name());
            match command {
                Command::Barrier {
                    resource,
                    before,
                    after,
                } => self.execute_barrier(resource, *before, *after),
                Command::Copy { src, dst, size } => self.execute_copy(src, dst, *size),
                Command::SetPipeline(p) => {
                    slots.clear();
                    pipeline = match p.gpu() {
                        GpuPipeline::Software(p) => Some(p.clone()),
                        #[allow(unreachable_patterns)]
                        _ => {
                            self.report(
                                Severity::Error,
                                format!(
                                    "pipeline '{}' does not belong to this backend",
                                    p.entry_point()
                                ),
                            );
                            None
                        }
                    };
                }
                Command::SetBuffer { slot, resource, .. } => {
                    if let Some(buffer) = self.buffer(resource) {
                        slots.insert(*slot, buffer.clone());
                    }
                }
                Command::Dispatch { x, y, z } => {
                    self.execute_dispatch(pipeline.as_ref(), &slots, [*x, *y, *z])
                }
            }
        }

        self.fence.signal(fence_value);
        Ok(())
    }

    fn wait_fence(&self, value: u64) -> Result<()> {
        // Submissions execute synchronously, so an unreached value was never submitted.
        if !self.fence.is_reached(value) {
            return Err(ComputeError::SubmissionFailed(format!(
                "fence value {} was never submitted (last reached {})",
                value,
                self.fence.value()
            )));
        }
        Ok(())
    }

    fn completed_fence_value(&self) -> u64 {
        self.fence.value()
    }

    fn drain_messages(&self) -> Vec<DiagnosticMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

static_assertions::assert_impl_all!(SoftwareBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandSequencer;
    use crate::pipeline::ShaderPipeline;
    use crate::shader::ProgramReflection;
    use crate::state::AccessRole;

    fn make_handle(backend: &SoftwareBackend, kind: ResourceKind, size: u64) -> ResourceHandle {
        let gpu = backend
            .create_resource(&ResourceDescriptor::new(size, kind))
            .unwrap();
        ResourceHandle::new(gpu, kind, size, None)
    }

    fn write_bytes(backend: &SoftwareBackend, handle: &ResourceHandle, data: &[u8]) {
        let region = backend.map(handle.gpu()).unwrap();
        unsafe { region.bytes_mut()[..data.len()].copy_from_slice(data) };
        backend.unmap(handle.gpu());
    }

    fn read_bytes(backend: &SoftwareBackend, handle: &ResourceHandle) -> Vec<u8> {
        let region = backend.map(handle.gpu()).unwrap();
        let bytes = unsafe { region.bytes_mut() }.to_vec();
        backend.unmap(handle.gpu());
        bytes
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(SoftwareBackend::new().name(), "Software Backend");
    }

    #[test]
    fn test_unsatisfiable_allocation_is_an_error() {
        let backend = SoftwareBackend::new();
        let size = 1 << 60;
        let result =
            backend.create_resource(&ResourceDescriptor::new(size, ResourceKind::DeviceReadWrite));
        assert!(matches!(
            result,
            Err(ComputeError::OutOfMemory { requested_bytes }) if requested_bytes == size
        ));
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_fails() {
        let backend = SoftwareBackend::new();
        backend.submit(&[], 1).unwrap();
        backend.wait_fence(1).unwrap();
        assert!(matches!(
            backend.wait_fence(2),
            Err(ComputeError::SubmissionFailed(_))
        ));
    }

    #[test]
    fn test_device_memory_cannot_be_mapped() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        assert_eq!(
            backend.map(device.gpu()).unwrap_err(),
            ComputeError::NotHostVisible {
                kind: ResourceKind::DeviceReadWrite
            }
        );
    }

    #[test]
    fn test_mapped_memory_is_aligned() {
        let backend = SoftwareBackend::new();
        let upload = make_handle(&backend, ResourceKind::Upload, 100);
        let region = backend.map(upload.gpu()).unwrap();
        assert_eq!(region.len(), 100);
        assert_eq!(unsafe { region.bytes_mut() }.as_ptr() as usize % 64, 0);
        backend.unmap(upload.gpu());
    }

    #[test]
    fn test_copy_through_device() {
        let backend = SoftwareBackend::new();
        let upload = make_handle(&backend, ResourceKind::Upload, 8);
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 8);
        let readback = make_handle(&backend, ResourceKind::Readback, 8);
        write_bytes(&backend, &upload, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut seq = CommandSequencer::new();
        seq.transition(&device, AccessRole::CopyDestination).unwrap();
        seq.copy(&upload, &device).unwrap();
        seq.transition(&device, AccessRole::CopySource).unwrap();
        seq.copy(&device, &readback).unwrap();

        backend.submit(seq.commands(), 1).unwrap();
        backend.wait_fence(1).unwrap();

        assert!(backend.drain_messages().is_empty());
        assert_eq!(read_bytes(&backend, &readback), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(backend.completed_fence_value(), 1);
    }

    #[test]
    fn test_validator_reports_wrong_before_state() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 8);

        let commands = vec![Command::Barrier {
            resource: device.clone(),
            before: ResourceState::CopySource,
            after: ResourceState::UnorderedAccess,
        }];
        backend.submit(&commands, 1).unwrap();

        let messages = backend.drain_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].severity.is_error());
        assert!(messages[0].message.contains("expects CopySource"));
        assert!(messages[0].message.contains("Common"));
    }

    #[test]
    fn test_validator_reports_copy_in_wrong_state() {
        let backend = SoftwareBackend::new();
        let upload = make_handle(&backend, ResourceKind::Upload, 8);
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 8);

        let commands = vec![Command::Copy {
            src: upload.clone(),
            dst: device.clone(),
            size: 8,
        }];
        backend.submit(&commands, 1).unwrap();

        let messages = backend.drain_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].message.contains("copy destination"));
    }

    #[test]
    fn test_validator_reports_mapped_copy() {
        let backend = SoftwareBackend::new();
        let upload = make_handle(&backend, ResourceKind::Upload, 8);
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 8);

        let mut seq = CommandSequencer::new();
        seq.transition(&device, AccessRole::CopyDestination).unwrap();
        seq.copy(&upload, &device).unwrap();

        let _region = backend.map(upload.gpu()).unwrap();
        backend.submit(seq.commands(), 1).unwrap();
        backend.unmap(upload.gpu());

        let messages = backend.drain_messages();
        assert!(messages
            .iter()
            .any(|m| m.severity.is_error() && m.message.contains("mapped")));
    }

    #[test]
    fn test_kernel_runs_on_dispatch() {
        let backend = SoftwareBackend::new();
        backend.register_kernel("double", |ctx: &mut KernelContext<'_>| {
            for value in ctx.storage_mut::<u32>(0).unwrap() {
                *value *= 2;
            }
        });

        let upload = make_handle(&backend, ResourceKind::Upload, 16);
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 16);
        let readback = make_handle(&backend, ResourceKind::Readback, 16);
        write_bytes(&backend, &upload, bytemuck::cast_slice(&[1u32, 2, 3, 4]));

        let program = CompiledProgram {
            entry_point: "double".into(),
            words: Vec::new(),
            reflection: ProgramReflection {
                workgroup_size: [4, 1, 1],
                bindings: vec![BindingSlot::new(0, BindingKind::ReadWrite)],
            },
            disassembly: String::new(),
        };
        let pipeline = ShaderPipeline::new(backend.create_pipeline(&program).unwrap(), &program);

        let mut seq = CommandSequencer::new();
        seq.transition(&device, AccessRole::CopyDestination).unwrap();
        seq.copy(&upload, &device).unwrap();
        seq.transition(&device, AccessRole::Shader).unwrap();
        seq.set_pipeline(&pipeline).unwrap();
        seq.set_buffer(0, &device).unwrap();
        seq.dispatch(1, 1, 1).unwrap();
        seq.transition(&device, AccessRole::CopySource).unwrap();
        seq.copy(&device, &readback).unwrap();

        backend.submit(seq.commands(), 1).unwrap();
        assert!(backend.drain_messages().is_empty());

        let bytes = read_bytes(&backend, &readback);
        let values: &[u32] = bytemuck::cast_slice(&bytes);
        assert_eq!(values, &[2, 4, 6, 8]);
    }

    #[test]
    fn test_inject_message() {
        let backend = SoftwareBackend::new();
        backend.inject_message(Severity::Error, "synthetic");
        let messages = backend.drain_messages();
        assert_eq!(messages, vec![DiagnosticMessage::new(Severity::Error, "synthetic")]);
        assert!(backend.drain_messages().is_empty());
    }

    #[test]
    fn test_rejected_submission_executes_nothing() {
        let backend = SoftwareBackend::new();
        let device = make_handle(&backend, ResourceKind::DeviceReadWrite, 8);
        let commands = vec![Command::Barrier {
            resource: device.clone(),
            before: ResourceState::Common,
            after: ResourceState::UnorderedAccess,
        }];

        backend.reject_next_submission("queue full");
        assert_eq!(
            backend.submit(&commands, 1),
            Err(ComputeError::SubmissionFailed("queue full".into()))
        );
        assert_eq!(backend.completed_fence_value(), 0);

        let GpuResource::Software(buffer) = device.gpu() else {
            unreachable!()
        };
        assert_eq!(buffer.device_state(), ResourceState::Common);

        backend.submit(&commands, 1).unwrap();
        assert_eq!(buffer.device_state(), ResourceState::UnorderedAccess);
    }

    #[test]
    fn test_fence_must_advance() {
        let backend = SoftwareBackend::new();
        backend.submit(&[], 1).unwrap();
        assert!(matches!(
            backend.submit(&[], 1),
            Err(ComputeError::SubmissionFailed(_))
        ));
        backend.submit(&[], 2).unwrap();
        assert_eq!(backend.completed_fence_value(), 2);
    }
}
