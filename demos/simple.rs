//! Two-phase divide demo.
//!
//! Uploads a vector and a divisor, divides on the device, reads the result
//! back, then divides again with a new divisor while the data stays on the
//! device.
//!
//! ```bash
//! cargo run --example simple -- --backend software --len 64
//! ```

use std::sync::Arc;

use clap::Parser;

use redlilium_compute::{
    BackendKind, BufferFlags, ComputeContext, ContextConfig, KernelContext, ShaderDefines,
    ShaderSource, SoftwareBackend,
};

const GROUP_SIZE: u32 = 64;

/// Backend selection for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Vulkan if a device is available, otherwise software.
    #[default]
    Auto,
    /// Native Vulkan via ash.
    Vulkan,
    /// Host-memory backend with host kernels.
    Software,
}

#[derive(Parser, Debug)]
#[command(name = "simple", about = "Divide a vector on the device in two phases", version)]
struct Args {
    /// Backend to run on.
    #[arg(long, default_value = "auto", value_enum)]
    backend: CliBackend,

    /// Number of elements.
    #[arg(long, default_value = "32")]
    len: usize,

    /// Divisor of the first phase.
    #[arg(long, default_value = "5.0")]
    first: f32,

    /// Divisor of the second phase.
    #[arg(long, default_value = "5.0")]
    second: f32,

    /// Enable device validation.
    #[arg(long)]
    validation: bool,
}

/// Host version of the `divide` entry point.
fn divide_kernel(ctx: &mut KernelContext<'_>) {
    let Some(divisor) = ctx.constant::<f32>(0) else {
        return;
    };
    if let Some(data) = ctx.storage_mut::<f32>(1) {
        data.iter_mut().for_each(|v| *v /= divisor);
    }
}

fn software_context(config: ContextConfig) -> ComputeContext {
    let backend = Arc::new(SoftwareBackend::new());
    backend.register_kernel("divide", divide_kernel);
    ComputeContext::with_backend(config.with_backend(BackendKind::Software), backend)
}

fn create_context(args: &Args) -> Result<ComputeContext, Box<dyn std::error::Error>> {
    let config = ContextConfig::default()
        .with_application_name("simple")
        .with_validation(args.validation);

    Ok(match args.backend {
        CliBackend::Software => software_context(config),
        CliBackend::Vulkan => ComputeContext::new(config.with_backend(BackendKind::Vulkan))?,
        CliBackend::Auto => match ComputeContext::new(
            config.clone().with_backend(BackendKind::Vulkan),
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("Vulkan unavailable ({e}), falling back to software");
                software_context(config)
            }
        },
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut ctx = create_context(&args)?;
    log::info!("Backend: {}", ctx.backend().name());

    let shader_path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/shaders/divide.wgsl");
    let mut defines = ShaderDefines::new();
    defines.add_define("THREAD_GROUP_SIZE_X", GROUP_SIZE);
    let source = ShaderSource::from_file(shader_path)?;
    let program = ctx.compile_shader(&source, "divide", "spv1.3", &defines)?;
    let pipeline = ctx.create_pipeline(&program)?;

    let mut params = ctx.create_buffer_labeled::<f32>(
        "params",
        1,
        BufferFlags::DEVICE_CONSTANT | BufferFlags::HOST_WRITABLE,
    )?;
    let mut data =
        ctx.create_buffer_labeled::<f32>("data", args.len, BufferFlags::HOST_READ_WRITE)?;

    {
        let mut view = ctx.write_view(&mut data)?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = i as f32 * args.first * args.second;
        }
    }

    let groups = (args.len as u32).div_ceil(GROUP_SIZE).max(1);

    for (phase, divisor) in [args.first, args.second].into_iter().enumerate() {
        ctx.write_view(&mut params)?[0] = divisor;

        if phase == 0 {
            ctx.upload_buffer(&data)?;
        }
        ctx.upload_buffer(&params)?;
        ctx.set_shader(&pipeline)?;
        ctx.set_buffer(0, &params)?;
        ctx.set_buffer(1, &data)?;
        ctx.dispatch(groups, 1, 1)?;
        ctx.readback_buffer(&data)?;

        let report = ctx.flush()?;
        log::info!(
            "Phase {} done: fence {}, {} commands, {} barriers",
            phase + 1,
            report.fence_value,
            report.command_count,
            report.barrier_count
        );

        let view = ctx.read_view(&mut data)?;
        let preview: Vec<f32> = view.iter().take(8).copied().collect();
        println!("phase {} (/ {divisor}): {preview:?}", phase + 1);
    }

    Ok(())
}
