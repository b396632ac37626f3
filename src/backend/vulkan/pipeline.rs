//! Vulkan compute pipeline creation from compiled SPIR-V.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::error::{ComputeError, Result};
use crate::shader::{BindingKind, BindingSlot, CompiledProgram};

use super::VulkanDevice;

/// Compute pipeline with its layout objects.
pub struct VulkanPipeline {
    device: Arc<VulkanDevice>,
    pub(super) pipeline: vk::Pipeline,
    pub(super) layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    pub(super) bindings: Vec<BindingSlot>,
}

impl VulkanPipeline {
    /// Number of bindings of each descriptor type one dispatch needs.
    pub(super) fn descriptor_counts(&self) -> (u32, u32) {
        let uniform = self
            .bindings
            .iter()
            .filter(|b| b.kind == BindingKind::Constant)
            .count() as u32;
        (uniform, self.bindings.len() as u32 - uniform)
    }

    pub(super) fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }
}

impl std::fmt::Debug for VulkanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanPipeline")
            .field("pipeline", &self.pipeline)
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        let device = self.device.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Descriptor type of a binding kind.
pub fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::Constant => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::ReadWrite | BindingKind::ReadOnly => vk::DescriptorType::STORAGE_BUFFER,
    }
}

/// Create a compute pipeline for `program`.
pub fn create_compute_pipeline(
    device: &Arc<VulkanDevice>,
    program: &CompiledProgram,
) -> Result<VulkanPipeline> {
    let vk_device = device.device();
    let failed = |what: &str, e: vk::Result| {
        ComputeError::PipelineCreationFailed(format!(
            "Failed to create {what} for '{}': {:?}",
            program.entry_point, e
        ))
    };

    let entry_point = CString::new(program.entry_point.as_str()).map_err(|_| {
        ComputeError::PipelineCreationFailed(format!(
            "entry point {:?} contains a NUL byte",
            program.entry_point
        ))
    })?;

    let bindings: Vec<vk::DescriptorSetLayoutBinding> = program
        .reflection
        .bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding.slot)
                .descriptor_type(descriptor_type(binding.kind))
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        })
        .collect();

    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let set_layout = unsafe { vk_device.create_descriptor_set_layout(&set_layout_info, None) }
        .map_err(|e| failed("descriptor set layout", e))?;

    let set_layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    let layout = match unsafe { vk_device.create_pipeline_layout(&layout_info, None) } {
        Ok(layout) => layout,
        Err(e) => {
            unsafe { vk_device.destroy_descriptor_set_layout(set_layout, None) };
            return Err(failed("pipeline layout", e));
        }
    };

    let module_info = vk::ShaderModuleCreateInfo::default().code(&program.words);
    let module = match unsafe { vk_device.create_shader_module(&module_info, None) } {
        Ok(module) => module,
        Err(e) => {
            unsafe {
                vk_device.destroy_pipeline_layout(layout, None);
                vk_device.destroy_descriptor_set_layout(set_layout, None);
            }
            return Err(failed("shader module", e));
        }
    };

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(&entry_point);

    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let result = unsafe {
        vk_device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    };

    // Shader module is baked into the pipeline; destroy it now.
    unsafe { vk_device.destroy_shader_module(module, None) };

    let pipeline = match result {
        Ok(pipelines) => pipelines[0],
        Err((_, e)) => {
            unsafe {
                vk_device.destroy_pipeline_layout(layout, None);
                vk_device.destroy_descriptor_set_layout(set_layout, None);
            }
            return Err(failed("compute pipeline", e));
        }
    };

    log::debug!(
        "Created Vulkan compute pipeline '{}' ({} bindings)",
        program.entry_point,
        bindings.len()
    );

    Ok(VulkanPipeline {
        device: Arc::clone(device),
        pipeline,
        layout,
        set_layout,
        bindings: program.reflection.bindings.clone(),
    })
}
