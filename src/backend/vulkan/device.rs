//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::error::{ComputeError, Result};

/// Physical device chosen for compute work.
#[derive(Debug, Clone, Copy)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub device_local_bytes: u64,
}

/// Select the physical device with the most device-local memory among those
/// with a compute-capable queue.
pub fn select_physical_device(instance: &ash::Instance) -> Result<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        ComputeError::BackendUnavailable(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    if devices.is_empty() {
        return Err(ComputeError::BackendUnavailable(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<SelectedDevice> = None;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        if properties.api_version < vk::API_VERSION_1_2 {
            log::info!("Skipping GPU {:?}: Vulkan 1.2 not supported", device_name);
            continue;
        }

        let Some(queue_family) = find_compute_queue_family(instance, device) else {
            log::info!("Skipping GPU {:?}: no compute queue", device_name);
            continue;
        };

        let device_local_bytes = device_local_memory(instance, device);
        log::info!(
            "Found GPU: {:?} (type: {:?}, device-local memory: {} MiB)",
            device_name,
            properties.device_type,
            device_local_bytes >> 20
        );

        if best.map_or(true, |b| device_local_bytes > b.device_local_bytes) {
            best = Some(SelectedDevice {
                physical_device: device,
                queue_family,
                device_local_bytes,
            });
        }
    }

    best.ok_or_else(|| ComputeError::BackendUnavailable("No suitable GPU found".to_string()))
}

/// Find a queue family that supports compute, preferring a dedicated one.
pub fn find_compute_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let compute = |flags: vk::QueueFlags| flags.contains(vk::QueueFlags::COMPUTE);

    queue_families
        .iter()
        .position(|f| compute(f.queue_flags) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .or_else(|| queue_families.iter().position(|f| compute(f.queue_flags)))
        .map(|index| index as u32)
}

/// Total size of the device-local memory heaps.
fn device_local_memory(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> u64 {
    let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    memory
        .memory_heaps_as_slice()
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Create a logical device with timeline semaphores enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> Result<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&queue_priorities);

    let queue_create_infos = [queue_create_info];

    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut vulkan_12_features);

    unsafe { instance.create_device(selected.physical_device, &create_info, None) }.map_err(|e| {
        ComputeError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
