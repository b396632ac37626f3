//! RedLilium Compute - Host-side GPU compute runtime
//!
//! The runtime lets a host program allocate typed buffers, fill them through
//! staging memory, compile and bind compute shaders, dispatch work and read
//! results back. Every access-state change of every device allocation is
//! recorded as an explicit barrier.
//!
//! Two backends are available:
//! - **Vulkan**: native Vulkan via ash and gpu-allocator (feature `vulkan-backend`)
//! - **Software**: host-memory execution with full state validation, used for
//!   tests and machines without a GPU
//!
//! # Features
//! - Typed buffers with optional upload and readback staging regions
//! - Scoped host views that unmap on drop
//! - Transition table driven barrier recording
//! - WGSL and GLSL compilation to SPIR-V with binding reflection (naga)
//! - Fence-synchronized flush with device diagnostics surfaced as errors
//!
//! # Example
//!
//! ```ignore
//! use redlilium_compute::{BufferFlags, ComputeContext, ContextConfig};
//!
//! let mut ctx = ComputeContext::new(ContextConfig::default())?;
//! let mut data = ctx.create_buffer::<u32>(16, BufferFlags::HOST_READ_WRITE)?;
//! ctx.write_view(&mut data)?.copy_from_slice(&[0; 16]);
//! ctx.upload_buffer(&data)?;
//! ctx.readback_buffer(&data)?;
//! ctx.flush()?;
//! ```

pub mod backend;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scheduler;
pub mod shader;
pub mod state;
pub mod transfer;
pub mod types;

pub use backend::software::{KernelContext, SoftwareBackend};
pub use backend::{DiagnosticMessage, GpuBackend, Severity};
pub use commands::{Command, CommandSequencer};
pub use config::{BackendKind, ContextConfig};
pub use context::ComputeContext;
pub use error::{ComputeError, Result};
pub use pipeline::{BindingSignature, ShaderPipeline};
pub use resources::{ReadView, ResourceHandle, ResourceId, TypedBuffer, WriteView};
pub use scheduler::{Fence, FenceStatus, FlushReport};
pub use shader::{
    BindingKind, CompiledProgram, NagaCompiler, ShaderCompiler, ShaderDefines, ShaderLanguage,
    ShaderSource,
};
pub use state::{AccessRole, ResourceState};
pub use types::{BufferFlags, ResourceKind};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
