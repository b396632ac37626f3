//! Buffer barrier generation for Vulkan.
//!
//! Each [`ResourceState`] maps to the access mask and pipeline stage of the
//! work that uses a buffer in that state.

use ash::vk;

use crate::state::ResourceState;

/// Access mask and pipeline stage of a resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateAccess {
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

/// Vulkan access scope of a resource state.
pub fn state_access(state: ResourceState) -> StateAccess {
    match state {
        ResourceState::Common => StateAccess {
            access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            stage: vk::PipelineStageFlags::ALL_COMMANDS,
        },
        ResourceState::CopySource => StateAccess {
            access: vk::AccessFlags::TRANSFER_READ,
            stage: vk::PipelineStageFlags::TRANSFER,
        },
        ResourceState::CopyDestination => StateAccess {
            access: vk::AccessFlags::TRANSFER_WRITE,
            stage: vk::PipelineStageFlags::TRANSFER,
        },
        ResourceState::UnorderedAccess => StateAccess {
            access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        ResourceState::ConstantRead => StateAccess {
            access: vk::AccessFlags::UNIFORM_READ,
            stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
    }
}

/// Record a whole-buffer transition barrier.
pub fn buffer_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    before: ResourceState,
    after: ResourceState,
) {
    let src = state_access(before);
    let dst = state_access(after);

    let barrier = vk::BufferMemoryBarrier::default()
        .src_access_mask(src.access)
        .dst_access_mask(dst.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src.stage,
            dst.stage,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

/// Order shader writes of one dispatch before the next dispatch.
pub fn dispatch_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}

/// Make every device write visible to host reads after the fence.
pub fn host_read_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_states_use_transfer_stage() {
        assert_eq!(
            state_access(ResourceState::CopySource).stage,
            vk::PipelineStageFlags::TRANSFER
        );
        assert_eq!(
            state_access(ResourceState::CopyDestination).access,
            vk::AccessFlags::TRANSFER_WRITE
        );
    }

    #[test]
    fn test_shader_states_use_compute_stage() {
        let uav = state_access(ResourceState::UnorderedAccess);
        assert_eq!(uav.stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(uav.access.contains(vk::AccessFlags::SHADER_WRITE));

        let constant = state_access(ResourceState::ConstantRead);
        assert_eq!(constant.access, vk::AccessFlags::UNIFORM_READ);
    }
}
