//! Context configuration.

use std::sync::Arc;

use crate::shader::{NagaCompiler, ShaderCompiler};

/// Largest buffer accepted by default (1 GiB).
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 1 << 30;

/// Which backend a context should run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Vulkan if available, otherwise the software backend.
    #[default]
    Auto,
    /// Vulkan only; creation fails without a usable device.
    Vulkan,
    /// Host-memory software backend.
    Software,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "vulkan" => Ok(Self::Vulkan),
            "software" => Ok(Self::Software),
            other => Err(format!("unknown backend '{other}' (expected auto, vulkan or software)")),
        }
    }
}

/// Configuration of a [`ComputeContext`](crate::ComputeContext).
///
/// # Example
///
/// ```ignore
/// let config = ContextConfig::default()
///     .with_backend(BackendKind::Software)
///     .with_max_buffer_size(64 << 20);
/// let mut ctx = ComputeContext::new(config)?;
/// ```
#[derive(Clone)]
pub struct ContextConfig {
    /// Backend selection.
    pub backend: BackendKind,
    /// Enable the device validation layer and debug messenger.
    pub validation: bool,
    /// Application name reported to the driver.
    pub application_name: String,
    /// Largest byte size of a single buffer region.
    pub max_buffer_size: u64,
    /// Shader compiler used by [`ComputeContext::compile_shader`](crate::ComputeContext::compile_shader).
    pub compiler: Arc<dyn ShaderCompiler>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            validation: cfg!(debug_assertions),
            application_name: "RedLilium Compute".into(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            compiler: Arc::new(NagaCompiler::new()),
        }
    }
}

impl ContextConfig {
    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable device validation.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the largest accepted buffer size in bytes.
    pub fn with_max_buffer_size(mut self, bytes: u64) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Replace the shader compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn ShaderCompiler>) -> Self {
        self.compiler = compiler;
        self
    }
}

impl std::fmt::Debug for ContextConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextConfig")
            .field("backend", &self.backend)
            .field("validation", &self.validation)
            .field("application_name", &self.application_name)
            .field("max_buffer_size", &self.max_buffer_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.backend, BackendKind::Auto);
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert_eq!(config.max_buffer_size, 1 << 30);
    }

    #[test]
    fn test_builder() {
        let config = ContextConfig::default()
            .with_backend(BackendKind::Software)
            .with_validation(false)
            .with_application_name("sort")
            .with_max_buffer_size(1024);
        assert_eq!(config.backend, BackendKind::Software);
        assert!(!config.validation);
        assert_eq!(config.application_name, "sort");
        assert_eq!(config.max_buffer_size, 1024);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Vulkan".parse::<BackendKind>(), Ok(BackendKind::Vulkan));
        assert_eq!("software".parse::<BackendKind>(), Ok(BackendKind::Software));
        assert!("dx12".parse::<BackendKind>().is_err());
    }
}
