//! naga-based shader compiler.

use crate::error::{ComputeError, Result};

use super::{
    parse_profile, BindingKind, BindingSlot, CompiledProgram, ProgramReflection, ShaderCompiler,
    ShaderDefines, ShaderLanguage, ShaderSource,
};

/// Compiles WGSL and GLSL compute shaders to SPIR-V with naga.
///
/// WGSL has no preprocessor, so defines are prepended to the source as
/// `const NAME = VALUE;` declarations (an empty value becomes `true`). GLSL
/// defines go through naga's preprocessor. All bindings must live in group 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct NagaCompiler;

impl NagaCompiler {
    /// Create a new compiler.
    pub fn new() -> Self {
        Self
    }

    fn parse(&self, source: &ShaderSource, defines: &ShaderDefines) -> Result<(naga::Module, String)> {
        match source.language {
            ShaderLanguage::Wgsl => {
                let mut code = String::new();
                for (name, value) in defines.iter() {
                    let value = if value.is_empty() { "true" } else { value };
                    code.push_str(&format!("const {name} = {value};\n"));
                }
                code.push_str(&source.code);

                let module = naga::front::wgsl::parse_str(&code).map_err(|e| {
                    ComputeError::Compilation {
                        name: source.name.clone(),
                        diagnostics: e.emit_to_string(&code),
                    }
                })?;
                Ok((module, code))
            }
            ShaderLanguage::Glsl => {
                let mut naga_defines = naga::FastHashMap::default();
                for (name, value) in defines.iter() {
                    naga_defines.insert(name.to_string(), value.to_string());
                }

                let options = naga::front::glsl::Options {
                    stage: naga::ShaderStage::Compute,
                    defines: naga_defines,
                };

                let mut frontend = naga::front::glsl::Frontend::default();
                let module = frontend.parse(&options, &source.code).map_err(|errors| {
                    ComputeError::Compilation {
                        name: source.name.clone(),
                        diagnostics: errors.to_string(),
                    }
                })?;
                Ok((module, source.code.clone()))
            }
        }
    }
}

impl ShaderCompiler for NagaCompiler {
    fn compile(
        &self,
        source: &ShaderSource,
        entry_point: &str,
        profile: &str,
        defines: &ShaderDefines,
    ) -> Result<CompiledProgram> {
        let fail = |diagnostics: String| ComputeError::Compilation {
            name: source.name.clone(),
            diagnostics,
        };

        let lang_version =
            parse_profile(profile).ok_or_else(|| fail(format!("unknown profile '{profile}'")))?;

        let (module, code) = self.parse(source, defines)?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| fail(e.emit_to_string(&code)))?;

        let (index, entry) = module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| fail(format!("compute entry point '{entry_point}' not found")))?;

        let reflection = reflect(&module, &info, index, entry.workgroup_size).map_err(fail)?;

        let options = naga::back::spv::Options {
            lang_version,
            ..Default::default()
        };
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: naga::ShaderStage::Compute,
            entry_point: entry_point.to_string(),
        };
        let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
            .map_err(|e| fail(format!("SPIR-V generation error: {e}")))?;

        let disassembly =
            naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
                .map_err(|e| fail(format!("disassembly error: {e}")))?;

        log::debug!(
            "compiled '{}' ({}): {} SPIR-V words, {} bindings, workgroup {:?}",
            source.name,
            entry_point,
            words.len(),
            reflection.bindings.len(),
            reflection.workgroup_size
        );

        Ok(CompiledProgram {
            entry_point: entry_point.to_string(),
            words,
            reflection,
            disassembly,
        })
    }
}

/// Collect the bindings the entry point actually uses.
fn reflect(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    entry_index: usize,
    workgroup_size: [u32; 3],
) -> std::result::Result<ProgramReflection, String> {
    let function_info = info.get_entry_point(entry_index);
    let mut bindings = Vec::new();

    for (handle, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        if function_info[handle].is_empty() {
            continue;
        }

        let kind = match global.space {
            naga::AddressSpace::Uniform => BindingKind::Constant,
            naga::AddressSpace::Storage { access } => {
                if access.contains(naga::StorageAccess::STORE) {
                    BindingKind::ReadWrite
                } else {
                    BindingKind::ReadOnly
                }
            }
            other => {
                return Err(format!(
                    "binding {} uses unsupported address space {other:?}",
                    binding.binding
                ))
            }
        };

        if binding.group != 0 {
            return Err(format!(
                "binding {} is in group {}; only group 0 is supported",
                binding.binding, binding.group
            ));
        }

        bindings.push(BindingSlot::new(binding.binding, kind));
    }

    bindings.sort_by_key(|b| b.slot);
    Ok(ProgramReflection {
        workgroup_size,
        bindings,
    })
}
