//! Vulkan backend implementation using ash.
//!
//! This backend provides native Vulkan compute with:
//! - Validation layers when [`ContextConfig::validation`] is set, with their
//!   output routed into the diagnostic queue
//! - gpu-allocator for memory management
//! - A timeline semaphore as the submission fence
//! - Whole-buffer memory barriers derived from the recorded state transitions

mod allocator;
mod barriers;
mod command;
mod debug;
mod device;
mod instance;
mod pipeline;

pub use pipeline::VulkanPipeline;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::commands::Command;
use crate::config::ContextConfig;
use crate::error::{ComputeError, Result};
use crate::shader::CompiledProgram;
use crate::types::{ResourceDescriptor, ResourceKind};

use super::{DiagnosticMessage, GpuBackend, GpuPipeline, GpuResource, MappedRegion, Severity};
use self::command::Recording;
use self::debug::MessageQueue;

/// Fence waits log a warning each time this much time passes.
const FENCE_WAIT_WARNING: Duration = Duration::from_secs(10);

/// Instance, device and allocator shared by the backend and every object it created.
///
/// Buffers and pipelines hold an `Arc` to it, so the device is destroyed only
/// after the last of them.
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    allocator: Mutex<Option<Allocator>>,
    messages: Arc<MessageQueue>,
}

impl VulkanDevice {
    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn report(&self, severity: Severity, message: impl Into<String>) {
        self.messages.push(DiagnosticMessage::new(severity, message));
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Drop the allocator before destroying the device
            drop(self.allocator.lock().take());

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Buffer allocated by the Vulkan backend.
pub struct VulkanBuffer {
    device: Arc<VulkanDevice>,
    id: u64,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    kind: ResourceKind,
    size: u64,
    mapped: AtomicBool,
}

impl VulkanBuffer {
    /// Raw buffer handle.
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Memory class.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("id", &self.id)
            .field("buffer", &self.buffer)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Some(allocator) = self.device.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    log::warn!("Failed to free buffer {} memory: {}", self.id, e);
                }
            }
        }
    }
}

struct InFlight {
    fence_value: u64,
    recording: Recording,
}

#[derive(Default)]
struct SubmissionState {
    last_submitted: u64,
    in_flight: Vec<InFlight>,
}

/// Vulkan-based compute backend.
pub struct VulkanBackend {
    device: Arc<VulkanDevice>,
    queue: vk::Queue,
    queue_family: u32,
    command_pool: vk::CommandPool,
    timeline: vk::Semaphore,
    /// Guards the queue and the command pool, which need external synchronization.
    submission: Mutex<SubmissionState>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("queue_family", &self.queue_family)
            .field("validation", &self.device.debug_messenger.is_some())
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create a new Vulkan backend.
    ///
    /// This initializes the Vulkan instance, selects the physical device with
    /// the most device-local memory, creates a logical device with a compute
    /// queue, and sets up the memory allocator and the timeline semaphore.
    pub fn new(config: &ContextConfig) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            ComputeError::BackendUnavailable(format!("Failed to load Vulkan: {}", e))
        })?;

        let messages = Arc::new(MessageQueue::default());

        // SAFETY: the queue is owned by the device, which destroys the messenger first
        let bundle = unsafe {
            instance::create_instance(
                &entry,
                &config.application_name,
                config.validation,
                &messages,
            )?
        };

        let destroy_instance = |bundle: &instance::InstanceBundle| unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&bundle.debug_utils, bundle.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            bundle.instance.destroy_instance(None);
        };

        let selected = match device::select_physical_device(&bundle.instance) {
            Ok(selected) => selected,
            Err(e) => {
                destroy_instance(&bundle);
                return Err(e);
            }
        };

        let logical = match device::create_logical_device(&bundle.instance, &selected) {
            Ok(device) => device,
            Err(e) => {
                destroy_instance(&bundle);
                return Err(e);
            }
        };

        let allocator = allocator::create_allocator(
            &bundle.instance,
            selected.physical_device,
            logical.clone(),
        );

        // From here on the device owns the instance and tears it down on drop.
        let device = Arc::new(VulkanDevice {
            _entry: entry,
            instance: bundle.instance,
            debug_utils: bundle.debug_utils,
            debug_messenger: bundle.debug_messenger,
            physical_device: selected.physical_device,
            device: logical,
            allocator: Mutex::new(None),
            messages,
        });
        *device.allocator.lock() = Some(allocator?);

        let queue = unsafe { device.device.get_device_queue(selected.queue_family, 0) };
        let command_pool = command::create_command_pool(&device.device, selected.queue_family)?;

        let mut timeline_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_info);
        let timeline = match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(ComputeError::InitializationFailed(format!(
                    "Failed to create timeline semaphore: {:?}",
                    e
                )));
            }
        };

        log::info!(
            "Vulkan backend initialized (validation: {}, queue family: {})",
            device.debug_messenger.is_some(),
            selected.queue_family
        );

        Ok(Self {
            device,
            queue,
            queue_family: selected.queue_family,
            command_pool,
            timeline,
            submission: Mutex::new(SubmissionState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Shared device objects.
    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    /// Free the recordings of every submission at or below `value`.
    fn retire(&self, state: &mut SubmissionState, value: u64) {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.in_flight)
            .into_iter()
            .partition(|f| f.fence_value <= value);
        state.in_flight = pending;
        for in_flight in done {
            // SAFETY: the timeline reached the submission's fence value
            unsafe {
                in_flight
                    .recording
                    .destroy(&self.device.device, self.command_pool)
            };
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            let state = self.submission.get_mut();
            for in_flight in state.in_flight.drain(..) {
                in_flight
                    .recording
                    .destroy(&self.device.device, self.command_pool);
            }
            self.device.device.destroy_semaphore(self.timeline, None);
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_resource(&self, descriptor: &ResourceDescriptor) -> Result<GpuResource> {
        let vk_device = &self.device.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(allocator::buffer_usage(descriptor.kind))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { vk_device.create_buffer(&buffer_info, None) }.map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                ComputeError::OutOfMemory {
                    requested_bytes: descriptor.size,
                }
            }
            other => ComputeError::AllocationFailed(format!("Failed to create buffer: {:?}", other)),
        })?;

        let requirements = unsafe { vk_device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut guard = self.device.allocator.lock();
            let allocated = match guard.as_mut() {
                Some(allocator) => allocator
                    .allocate(&AllocationCreateDesc {
                        name: descriptor.label.as_deref().unwrap_or("buffer"),
                        requirements,
                        location: allocator::memory_location(descriptor.kind),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| allocator::convert_allocation_error(e, descriptor.size)),
                None => Err(ComputeError::AllocationFailed(
                    "Allocator not available".into(),
                )),
            };
            match allocated {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { vk_device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            }
        };

        // Wrap before binding so a bind failure releases both through Drop.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let vk_buffer = VulkanBuffer {
            device: Arc::clone(&self.device),
            id,
            buffer,
            allocation: Some(allocation),
            kind: descriptor.kind,
            size: descriptor.size,
            mapped: AtomicBool::new(false),
        };

        if let Some(allocation) = &vk_buffer.allocation {
            unsafe { vk_device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
                .map_err(|e| {
                    ComputeError::AllocationFailed(format!("Failed to bind buffer memory: {:?}", e))
                })?;
        }

        log::trace!(
            "VulkanBackend: created {} buffer {} {:?} (size: {})",
            descriptor.kind.label(),
            id,
            descriptor.label,
            descriptor.size
        );

        Ok(GpuResource::Vulkan(vk_buffer))
    }

    fn map(&self, resource: &GpuResource) -> Result<MappedRegion> {
        let GpuResource::Vulkan(buffer) = resource else {
            return Err(ComputeError::BackendUnavailable(
                "resource does not belong to the Vulkan backend".into(),
            ));
        };
        if !buffer.kind.is_host_visible() {
            return Err(ComputeError::NotHostVisible { kind: buffer.kind });
        }

        let ptr = buffer
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                ComputeError::AllocationFailed(format!(
                    "buffer {} has no persistent host mapping",
                    buffer.id
                ))
            })?;

        if buffer.mapped.swap(true, Ordering::AcqRel) {
            self.device
                .report(Severity::Warning, format!("resource {} mapped twice", buffer.id));
        }

        // SAFETY: gpu-allocator keeps host-visible memory persistently mapped
        // for the lifetime of the allocation, which the caller's handle keeps alive
        Ok(unsafe { MappedRegion::new(NonNull::cast(ptr), buffer.size as usize) })
    }

    fn unmap(&self, resource: &GpuResource) {
        if let GpuResource::Vulkan(buffer) = resource {
            buffer.mapped.store(false, Ordering::Release);
        }
    }

    fn create_pipeline(&self, program: &CompiledProgram) -> Result<GpuPipeline> {
        let pipeline = pipeline::create_compute_pipeline(&self.device, program)?;
        Ok(GpuPipeline::Vulkan(pipeline))
    }

    fn submit(&self, commands: &[Command], fence_value: u64) -> Result<()> {
        let mut state = self.submission.lock();
        if fence_value <= state.last_submitted {
            return Err(ComputeError::SubmissionFailed(format!(
                "fence value {} does not advance past {}",
                fence_value, state.last_submitted
            )));
        }

        let recording = command::record(&self.device.device, self.command_pool, commands)?;

        let command_buffers = [recording.command_buffer];
        let signal_semaphores = [self.timeline];
        let signal_values = [fence_value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        if let Err(e) = unsafe {
            self.device
                .device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
        } {
            // SAFETY: the submission was rejected, so nothing references the recording
            unsafe { recording.destroy(&self.device.device, self.command_pool) };
            return Err(match e {
                vk::Result::ERROR_DEVICE_LOST => ComputeError::DeviceLost,
                other => ComputeError::SubmissionFailed(format!(
                    "Failed to submit command buffer: {:?}",
                    other
                )),
            });
        }

        log::trace!(
            "VulkanBackend: submitted {} commands, fence value {}",
            commands.len(),
            fence_value
        );

        state.last_submitted = fence_value;
        state.in_flight.push(InFlight {
            fence_value,
            recording,
        });
        Ok(())
    }

    fn wait_fence(&self, value: u64) -> Result<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        loop {
            let timeout = FENCE_WAIT_WARNING.as_nanos() as u64;
            match unsafe { self.device.device.wait_semaphores(&wait_info, timeout) } {
                Ok(()) => break,
                Err(vk::Result::TIMEOUT) => {
                    log::warn!(
                        "Fence value {} not reached after {:?}; GPU may be hung",
                        value,
                        FENCE_WAIT_WARNING
                    );
                }
                Err(vk::Result::ERROR_DEVICE_LOST) => {
                    self.device
                        .report(Severity::Corruption, "device lost while waiting for the fence");
                    return Err(ComputeError::DeviceLost);
                }
                Err(e) => {
                    return Err(ComputeError::SubmissionFailed(format!(
                        "Fence wait failed: {:?}",
                        e
                    )));
                }
            }
        }

        let mut state = self.submission.lock();
        self.retire(&mut state, value);
        Ok(())
    }

    fn completed_fence_value(&self) -> u64 {
        unsafe { self.device.device.get_semaphore_counter_value(self.timeline) }.unwrap_or_else(
            |e| {
                log::error!("Failed to query timeline semaphore: {:?}", e);
                0
            },
        )
    }

    fn drain_messages(&self) -> Vec<DiagnosticMessage> {
        self.device.messages.drain()
    }
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);
static_assertions::assert_impl_all!(VulkanBuffer: Send, Sync);
