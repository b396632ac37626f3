//! Device/queue provider abstraction.
//!
//! Each backend implements the [`GpuBackend`] trait, which provides:
//! - Resource creation and host mapping of staging memory
//! - Compute pipeline creation from compiled programs
//! - In-order execution of a recorded command list
//! - A timeline fence and a diagnostic message queue
//!
//! # Available Backends
//!
//! - [`software::SoftwareBackend`]: host-memory backend that executes copies
//!   and registered host kernels and validates every state transition
//! - `vulkan::VulkanBackend` (feature `vulkan-backend`): native Vulkan via ash

pub mod software;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::ptr::NonNull;
use std::sync::Arc;

use crate::commands::Command;
use crate::config::{BackendKind, ContextConfig};
use crate::error::Result;
use crate::shader::CompiledProgram;
use crate::types::ResourceDescriptor;

/// Handle to one backend allocation.
#[allow(clippy::large_enum_variant)]
pub enum GpuResource {
    /// Software backend memory.
    Software(Arc<software::SoftwareBuffer>),
    /// Vulkan backend buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanBuffer),
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(buffer) => f.debug_tuple("GpuResource::Software").field(buffer).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(buffer) => f.debug_tuple("GpuResource::Vulkan").field(buffer).finish(),
        }
    }
}

/// Handle to one backend compute pipeline.
pub enum GpuPipeline {
    /// Software backend pipeline.
    Software(Arc<software::SoftwarePipeline>),
    /// Vulkan backend pipeline.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanPipeline),
}

impl std::fmt::Debug for GpuPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(pipeline) => f
                .debug_tuple("GpuPipeline::Software")
                .field(pipeline)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(pipeline) => f.debug_tuple("GpuPipeline::Vulkan").field(pipeline).finish(),
        }
    }
}

/// Host address range of a mapped staging resource.
///
/// Valid until the matching [`GpuBackend::unmap`] call.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// resource is unmapped, and nothing else may access that range meanwhile.
    pub(crate) unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the mapped bytes.
    ///
    /// # Safety
    ///
    /// The caller picks the lifetime and must not let the slice outlive the
    /// mapping or alias another live slice of the same range.
    pub(crate) unsafe fn bytes_mut<'a>(&self) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

/// Severity of a device diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational message.
    Info,
    /// Suspicious but valid usage.
    Warning,
    /// Invalid usage; results are unreliable.
    Error,
    /// The device state may be corrupted.
    Corruption,
}

impl Severity {
    /// Whether a message of this severity fails a flush.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::Corruption)
    }
}

/// One message from the device diagnostic queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

impl DiagnosticMessage {
    /// Create a diagnostic message.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// Emit the message through the `log` facade at its severity.
    pub fn log(&self) {
        match self.severity {
            Severity::Info => log::info!("[device] {}", self.message),
            Severity::Warning => log::warn!("[device] {}", self.message),
            Severity::Error | Severity::Corruption => log::error!("[device] {}", self.message),
        }
    }
}

impl std::fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.severity, self.message)
    }
}

/// GPU backend trait for abstracting device APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Allocate one resource.
    fn create_resource(&self, descriptor: &ResourceDescriptor) -> Result<GpuResource>;

    /// Map a host-visible resource.
    fn map(&self, resource: &GpuResource) -> Result<MappedRegion>;

    /// Unmap a resource mapped with [`map`](Self::map).
    fn unmap(&self, resource: &GpuResource);

    /// Create a compute pipeline from a compiled program.
    fn create_pipeline(&self, program: &CompiledProgram) -> Result<GpuPipeline>;

    /// Execute `commands` in order and signal `fence_value` when done.
    ///
    /// An error means nothing was submitted.
    fn submit(&self, commands: &[Command], fence_value: u64) -> Result<()>;

    /// Block until the fence reaches `value`.
    fn wait_fence(&self, value: u64) -> Result<()>;

    /// Last fence value the device reached.
    fn completed_fence_value(&self) -> u64;

    /// Take every queued diagnostic message.
    fn drain_messages(&self) -> Vec<DiagnosticMessage>;
}

/// Select and create a backend according to the configuration.
pub fn create_backend(config: &ContextConfig) -> Result<Arc<dyn GpuBackend>> {
    match config.backend {
        BackendKind::Software => {
            log::info!("Using software backend");
            Ok(Arc::new(software::SoftwareBackend::new()))
        }
        BackendKind::Vulkan => create_vulkan(config),
        BackendKind::Auto => match create_vulkan(config) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
                log::info!("Using software backend");
                Ok(Arc::new(software::SoftwareBackend::new()))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan(config: &ContextConfig) -> Result<Arc<dyn GpuBackend>> {
    let backend = vulkan::VulkanBackend::new(config)?;
    log::info!("Using Vulkan backend (ash)");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan(_config: &ContextConfig) -> Result<Arc<dyn GpuBackend>> {
    Err(crate::error::ComputeError::BackendUnavailable(
        "compiled without the vulkan-backend feature".into(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_is_error() {
        assert!(!Severity::Info.is_error());
        assert!(!Severity::Warning.is_error());
        assert!(Severity::Error.is_error());
        assert!(Severity::Corruption.is_error());
    }

    #[test]
    fn test_create_software_backend() {
        let config = ContextConfig::default().with_backend(BackendKind::Software);
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.name(), "Software Backend");
        assert_eq!(backend.completed_fence_value(), 0);
    }

    #[test]
    fn test_diagnostic_display() {
        let msg = DiagnosticMessage::new(Severity::Error, "bad barrier");
        assert_eq!(msg.to_string(), "Error: bad barrier");
    }
}
