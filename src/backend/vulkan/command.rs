//! Vulkan command pool management and command list encoding.

use std::collections::{BTreeMap, BTreeSet};

use ash::vk;

use crate::backend::{GpuPipeline, GpuResource};
use crate::commands::Command;
use crate::error::{ComputeError, Result};
use crate::resources::{ResourceHandle, ResourceId};
use crate::state::ResourceState;

use super::barriers;
use super::pipeline::{descriptor_type, VulkanPipeline};
use super::VulkanBuffer;

/// Create a command pool for compute operations.
pub fn create_command_pool(device: &ash::Device, queue_family_index: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        ComputeError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

/// Objects owned by one submission until its fence value is reached.
#[derive(Debug)]
pub struct Recording {
    pub command_buffer: vk::CommandBuffer,
    pub descriptor_pool: vk::DescriptorPool,
}

impl Recording {
    /// Free the command buffer and descriptor pool.
    ///
    /// # Safety
    ///
    /// The device must have finished executing the recording.
    pub unsafe fn destroy(self, device: &ash::Device, command_pool: vk::CommandPool) {
        unsafe {
            device.free_command_buffers(command_pool, &[self.command_buffer]);
            if self.descriptor_pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
        }
    }
}

/// Descriptors needed by every dispatch of a command list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorDemand {
    pub sets: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
}

/// Count the descriptors the dispatches of `commands` need.
pub fn descriptor_demand(commands: &[Command]) -> DescriptorDemand {
    let mut demand = DescriptorDemand::default();
    let mut current = (0, 0);
    for command in commands {
        match command {
            Command::SetPipeline(pipeline) => {
                if let GpuPipeline::Vulkan(pipeline) = pipeline.gpu() {
                    current = pipeline.descriptor_counts();
                }
            }
            Command::Dispatch { .. } => {
                demand.sets += 1;
                demand.uniform_buffers += current.0;
                demand.storage_buffers += current.1;
            }
            _ => {}
        }
    }
    demand
}

fn create_descriptor_pool(device: &ash::Device, demand: DescriptorDemand) -> Result<vk::DescriptorPool> {
    if demand.sets == 0 || demand.uniform_buffers + demand.storage_buffers == 0 {
        return Ok(vk::DescriptorPool::null());
    }

    let pool_sizes: Vec<vk::DescriptorPoolSize> = [
        (vk::DescriptorType::UNIFORM_BUFFER, demand.uniform_buffers),
        (vk::DescriptorType::STORAGE_BUFFER, demand.storage_buffers),
    ]
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
        ty,
        descriptor_count,
    })
    .collect();

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(demand.sets)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
        ComputeError::SubmissionFailed(format!("Failed to create descriptor pool: {:?}", e))
    })
}

/// Record `commands` into a fresh primary command buffer.
pub fn record(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    commands: &[Command],
) -> Result<Recording> {
    let descriptor_pool = create_descriptor_pool(device, descriptor_demand(commands))?;

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
        Ok(buffers) => buffers[0],
        Err(e) => {
            if descriptor_pool != vk::DescriptorPool::null() {
                unsafe { device.destroy_descriptor_pool(descriptor_pool, None) };
            }
            return Err(ComputeError::SubmissionFailed(format!(
                "Failed to allocate command buffer: {:?}",
                e
            )));
        }
    };

    let recording = Recording {
        command_buffer,
        descriptor_pool,
    };

    match encode(device, &recording, commands) {
        Ok(()) => Ok(recording),
        Err(e) => {
            // SAFETY: the recording was never submitted
            unsafe { recording.destroy(device, command_pool) };
            Err(e)
        }
    }
}

fn vulkan_buffer(handle: &ResourceHandle) -> Result<&VulkanBuffer> {
    match handle.gpu() {
        GpuResource::Vulkan(buffer) => Ok(buffer),
        _ => Err(ComputeError::SubmissionFailed(format!(
            "resource {} does not belong to the Vulkan backend",
            handle.id()
        ))),
    }
}

/// Copy destinations written since their last transition barrier.
///
/// Back-to-back copies into one buffer leave it in `CopyDestination`, so no
/// transition orders the second write after the first.
#[derive(Debug, Default)]
struct PendingCopyWrites(BTreeSet<ResourceId>);

impl PendingCopyWrites {
    /// Note a copy into `dst`. Returns whether an earlier copy in the batch
    /// still writes it.
    fn copy_into(&mut self, dst: ResourceId) -> bool {
        !self.0.insert(dst)
    }

    fn barrier(&mut self, resource: ResourceId) {
        self.0.remove(&resource);
    }
}

fn encode(device: &ash::Device, recording: &Recording, commands: &[Command]) -> Result<()> {
    let cmd = recording.command_buffer;
    let internal = |what: &str, e: vk::Result| {
        ComputeError::SubmissionFailed(format!("Failed to {what}: {:?}", e))
    };

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(|e| internal("begin command buffer", e))?;

    let mut pipeline: Option<&VulkanPipeline> = None;
    let mut slots: BTreeMap<u32, &VulkanBuffer> = BTreeMap::new();
    let mut dispatched = false;
    let mut copy_writes = PendingCopyWrites::default();

    for command in commands {
        match command {
            Command::Barrier {
                resource,
                before,
                after,
            } => {
                let buffer = vulkan_buffer(resource)?;
                barriers::buffer_barrier(device, cmd, buffer.buffer, *before, *after);
                copy_writes.barrier(resource.id());
            }
            Command::Copy { src, dst, size } => {
                let write_after_write = copy_writes.copy_into(dst.id());
                let (src, dst) = (vulkan_buffer(src)?, vulkan_buffer(dst)?);
                if write_after_write {
                    barriers::buffer_barrier(
                        device,
                        cmd,
                        dst.buffer,
                        ResourceState::CopyDestination,
                        ResourceState::CopyDestination,
                    );
                }
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: *size,
                };
                unsafe { device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };
            }
            Command::SetPipeline(shader) => {
                let GpuPipeline::Vulkan(vk_pipeline) = shader.gpu() else {
                    return Err(ComputeError::SubmissionFailed(format!(
                        "pipeline '{}' does not belong to the Vulkan backend",
                        shader.entry_point()
                    )));
                };
                unsafe {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, vk_pipeline.pipeline)
                };
                pipeline = Some(vk_pipeline);
                slots.clear();
            }
            Command::SetBuffer { slot, resource, .. } => {
                slots.insert(*slot, vulkan_buffer(resource)?);
            }
            Command::Dispatch { x, y, z } => {
                let pipeline = pipeline.ok_or(ComputeError::NoPipelineBound)?;
                if dispatched {
                    barriers::dispatch_barrier(device, cmd);
                }
                bind_descriptors(device, recording, pipeline, &slots)?;
                unsafe { device.cmd_dispatch(cmd, *x, *y, *z) };
                dispatched = true;
            }
        }
    }

    barriers::host_read_barrier(device, cmd);

    unsafe { device.end_command_buffer(cmd) }.map_err(|e| internal("end command buffer", e))
}

fn bind_descriptors(
    device: &ash::Device,
    recording: &Recording,
    pipeline: &VulkanPipeline,
    slots: &BTreeMap<u32, &VulkanBuffer>,
) -> Result<()> {
    let infos = pipeline
        .bindings
        .iter()
        .map(|binding| {
            let buffer = slots
                .get(&binding.slot)
                .ok_or(ComputeError::UnboundSlot { slot: binding.slot })?;
            Ok((
                binding.slot,
                descriptor_type(binding.kind),
                vk::DescriptorBufferInfo {
                    buffer: buffer.buffer,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    if infos.is_empty() {
        return Ok(());
    }

    let set_layouts = [pipeline.set_layout()];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(recording.descriptor_pool)
        .set_layouts(&set_layouts);
    let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| {
        ComputeError::SubmissionFailed(format!("Failed to allocate descriptor set: {:?}", e))
    })?[0];

    let writes: Vec<vk::WriteDescriptorSet> = infos
        .iter()
        .map(|(slot, ty, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(*slot)
                .descriptor_type(*ty)
                .buffer_info(std::slice::from_ref(info))
        })
        .collect();

    unsafe {
        device.update_descriptor_sets(&writes, &[]);
        device.cmd_bind_descriptor_sets(
            recording.command_buffer,
            vk::PipelineBindPoint::COMPUTE,
            pipeline.layout,
            0,
            &[set],
            &[],
        );
    }
    Ok(())
}
