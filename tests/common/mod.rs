//! Common utilities for compute integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::sync::Arc;

use redlilium_compute::{
    BackendKind, ComputeContext, ContextConfig, KernelContext, ShaderDefines, ShaderPipeline,
    ShaderSource, SoftwareBackend,
};

// ============================================================================
// Shaders
// ============================================================================

/// Threads per group used by every test shader.
pub const GROUP_SIZE: u32 = 8;

/// Rewrites every element with itself.
pub const IDENTITY_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(THREAD_GROUP_SIZE_X, 1, 1)
fn identity(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x];
    }
}
"#;

/// Divides every element by a constant.
pub const DIVIDE_WGSL: &str = r#"
struct Params {
    div_value: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(THREAD_GROUP_SIZE_X, 1, 1)
fn divide(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] / params.div_value;
    }
}
"#;

/// Host version of `divide` for the software backend.
fn divide_kernel(ctx: &mut KernelContext<'_>) {
    let Some(divisor) = ctx.constant::<f32>(0) else {
        return;
    };
    let count = ctx.invocation_count() as usize;
    if let Some(data) = ctx.storage_mut::<f32>(1) {
        for value in data.iter_mut().take(count) {
            *value /= divisor;
        }
    }
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Software backend (host memory, always available).
    Software,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Software => true,
            Backend::Vulkan => redlilium_compute::backend::has_gpu_backend(),
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context wrapping a [`ComputeContext`] on one backend.
pub struct TestContext {
    /// The backend being tested.
    #[allow(dead_code)]
    pub backend: Backend,
    /// Compute context.
    pub ctx: ComputeContext,
    /// Software backend handle, for message injection.
    #[allow(dead_code)]
    pub software: Option<Arc<SoftwareBackend>>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        if !backend.is_available() {
            return None;
        }

        match backend {
            Backend::Software => {
                let software = Arc::new(SoftwareBackend::new());
                software.register_kernel("divide", divide_kernel);
                let config = ContextConfig::default()
                    .with_backend(BackendKind::Software)
                    .with_validation(true);
                let ctx = ComputeContext::with_backend(config, software.clone());
                Some(Self {
                    backend,
                    ctx,
                    software: Some(software),
                })
            }
            Backend::Vulkan => {
                let config = ContextConfig::default()
                    .with_backend(BackendKind::Vulkan)
                    .with_validation(true);
                let ctx = ComputeContext::new(config).ok()?;
                Some(Self {
                    backend,
                    ctx,
                    software: None,
                })
            }
        }
    }

    /// Compile a WGSL shader and create its pipeline.
    pub fn pipeline(&self, name: &str, source: &str, entry_point: &str) -> ShaderPipeline {
        let mut defines = ShaderDefines::new();
        defines.add_define("THREAD_GROUP_SIZE_X", GROUP_SIZE);
        let program = self
            .ctx
            .compile_shader(&ShaderSource::wgsl(name, source), entry_point, "spv1.3", &defines)
            .expect("shader should compile");
        self.ctx
            .create_pipeline(&program)
            .expect("pipeline should be created")
    }
}

/// Thread groups needed to cover `len` elements.
pub fn group_count(len: usize) -> u32 {
    (len as u32).div_ceil(GROUP_SIZE)
}
