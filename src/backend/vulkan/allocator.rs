//! GPU memory allocator integration using gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;

use crate::error::{ComputeError, Result};
use crate::types::ResourceKind;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        ComputeError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Memory location for a resource kind.
pub fn memory_location(kind: ResourceKind) -> MemoryLocation {
    match kind {
        ResourceKind::DeviceReadWrite | ResourceKind::DeviceConstant => MemoryLocation::GpuOnly,
        ResourceKind::Upload => MemoryLocation::CpuToGpu,
        ResourceKind::Readback => MemoryLocation::GpuToCpu,
    }
}

/// Buffer usage flags for a resource kind.
pub fn buffer_usage(kind: ResourceKind) -> vk::BufferUsageFlags {
    match kind {
        ResourceKind::DeviceReadWrite => {
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
        }
        ResourceKind::DeviceConstant => {
            vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
        }
        ResourceKind::Upload => vk::BufferUsageFlags::TRANSFER_SRC,
        ResourceKind::Readback => vk::BufferUsageFlags::TRANSFER_DST,
    }
}

/// Map an allocator error to a compute error.
pub fn convert_allocation_error(error: gpu_allocator::AllocationError, size: u64) -> ComputeError {
    match error {
        gpu_allocator::AllocationError::OutOfMemory => ComputeError::OutOfMemory {
            requested_bytes: size,
        },
        other => ComputeError::AllocationFailed(other.to_string()),
    }
}
