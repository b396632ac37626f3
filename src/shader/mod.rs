//! Shader compilation service.
//!
//! Programs are compiled through the [`ShaderCompiler`] trait. The runtime
//! only consumes the resulting [`CompiledProgram`]: the SPIR-V words for
//! pipeline creation and the reflected binding layout for bind-time checks.
//!
//! The default implementation is [`NagaCompiler`], which accepts WGSL and GLSL
//! compute shaders.
//!
//! # Example
//!
//! ```ignore
//! let mut defines = ShaderDefines::new();
//! defines.add_define("THREAD_GROUP_SIZE_X", 8);
//!
//! let source = ShaderSource::from_file("shaders/divide.wgsl")?;
//! let program = NagaCompiler::new().compile(&source, "main", "spv1.3", &defines)?;
//! ```

mod compiler;

use std::path::Path;

use crate::error::{ComputeError, Result};

pub use compiler::NagaCompiler;

/// Source language of a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    /// WebGPU Shading Language.
    Wgsl,
    /// GLSL compute shader (`#version 450` style).
    Glsl,
}

impl ShaderLanguage {
    /// Infer the language from a file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "wgsl" => Some(Self::Wgsl),
            "comp" | "glsl" => Some(Self::Glsl),
            _ => None,
        }
    }
}

/// Shader source text with a name for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    /// Name reported in diagnostics, usually the file name.
    pub name: String,
    /// Source text.
    pub code: String,
    /// Source language.
    pub language: ShaderLanguage,
}

impl ShaderSource {
    /// WGSL source.
    pub fn wgsl(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            language: ShaderLanguage::Wgsl,
        }
    }

    /// GLSL compute source.
    pub fn glsl(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            language: ShaderLanguage::Glsl,
        }
    }

    /// Load a shader from disk, inferring the language from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let language = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ShaderLanguage::from_extension)
            .ok_or_else(|| ComputeError::Compilation {
                name: name.clone(),
                diagnostics: "unrecognized shader file extension (expected .wgsl, .comp or .glsl)"
                    .into(),
            })?;

        let code = std::fs::read_to_string(path).map_err(|e| ComputeError::Compilation {
            name: name.clone(),
            diagnostics: e.to_string(),
        })?;

        Ok(Self {
            name,
            code,
            language,
        })
    }
}

/// Ordered preprocessor defines passed to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDefines {
    defines: Vec<(String, String)>,
}

impl ShaderDefines {
    /// Create an empty define set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name` as the string form of `value`.
    ///
    /// Redefining a name replaces its value in place.
    pub fn add_define(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.add_define_str(name, value.to_string())
    }

    /// Define `name` as a raw string value.
    pub fn add_define_str(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.defines.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.defines.push((name, value)),
        }
        self
    }

    /// Value of a define.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.defines
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Defines in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of defines.
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    /// Whether no define is set.
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }
}

/// How a shader accesses a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Uniform constant data.
    Constant,
    /// Read-write storage.
    ReadWrite,
    /// Read-only storage.
    ReadOnly,
}

impl BindingKind {
    /// Short name used in errors.
    pub fn label(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::ReadWrite => "read-write storage",
            Self::ReadOnly => "read-only storage",
        }
    }

    /// Whether a buffer bound as `actual` satisfies a slot declared as `self`.
    ///
    /// Read-only storage slots accept read-write buffers.
    pub fn accepts(self, actual: BindingKind) -> bool {
        match self {
            Self::Constant => actual == Self::Constant,
            Self::ReadWrite => actual == Self::ReadWrite,
            Self::ReadOnly => matches!(actual, Self::ReadWrite | Self::ReadOnly),
        }
    }
}

/// One binding slot declared by a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    /// Slot index (`@binding` / `layout(binding = ..)`).
    pub slot: u32,
    /// Declared access.
    pub kind: BindingKind,
}

impl BindingSlot {
    /// Create a binding slot.
    pub fn new(slot: u32, kind: BindingKind) -> Self {
        Self { slot, kind }
    }
}

/// Reflection data of a compiled entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReflection {
    /// Threads per group.
    pub workgroup_size: [u32; 3],
    /// Binding slots used by the entry point, sorted by slot.
    pub bindings: Vec<BindingSlot>,
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    /// Entry point the program was compiled for.
    pub entry_point: String,
    /// SPIR-V words.
    pub words: Vec<u32>,
    /// Reflected layout.
    pub reflection: ProgramReflection,
    /// Human-readable form of the validated module.
    pub disassembly: String,
}

/// Compiles shader source into a [`CompiledProgram`].
pub trait ShaderCompiler: Send + Sync {
    /// Compile `entry_point` of `source` for the target `profile`.
    ///
    /// Profiles name a SPIR-V version, `"spv1.0"` through `"spv1.6"`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Compilation`] with the compiler output verbatim.
    fn compile(
        &self,
        source: &ShaderSource,
        entry_point: &str,
        profile: &str,
        defines: &ShaderDefines,
    ) -> Result<CompiledProgram>;
}

/// Parse a `"spvX.Y"` profile string into a SPIR-V version.
pub fn parse_profile(profile: &str) -> Option<(u8, u8)> {
    let version = profile.strip_prefix("spv")?;
    let (major, minor) = version.split_once('.')?;
    let major: u8 = major.parse().ok()?;
    let minor: u8 = minor.parse().ok()?;
    (major == 1 && minor <= 6).then_some((major, minor))
}
