//! Host/device round trip through a chain of device buffers.
//!
//! ```bash
//! cargo run --example roundtrip -- --hops 4 --len 1024
//! ```

use clap::Parser;

use redlilium_compute::{BackendKind, BufferFlags, ComputeContext, ContextConfig};

const PATTERN: u32 = 2_654_435_761;

#[derive(Parser, Debug)]
#[command(name = "roundtrip", about = "Upload, copy through device buffers, read back", version)]
struct Args {
    /// Backend to run on (auto, vulkan or software).
    #[arg(long, default_value = "auto")]
    backend: BackendKind,

    /// Number of u32 elements.
    #[arg(long, default_value = "1024")]
    len: usize,

    /// Device-to-device copies between upload and readback.
    #[arg(long, default_value = "3")]
    hops: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut ctx = ComputeContext::new(ContextConfig::default().with_backend(args.backend))?;
    log::info!("Backend: {}", ctx.backend().name());

    let mut source =
        ctx.create_buffer_labeled::<u32>("source", args.len, BufferFlags::HOST_WRITABLE)?;
    let chain = (0..args.hops)
        .map(|i| {
            ctx.create_buffer_labeled::<u32>(format!("hop_{i}"), args.len, BufferFlags::empty())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut sink =
        ctx.create_buffer_labeled::<u32>("sink", args.len, BufferFlags::HOST_READABLE)?;

    {
        let mut view = ctx.write_view(&mut source)?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = (i as u32).wrapping_mul(PATTERN);
        }
    }

    ctx.upload_buffer(&source)?;
    let mut previous = &source;
    for hop in &chain {
        ctx.copy_buffer(previous, hop)?;
        previous = hop;
    }
    ctx.copy_buffer(previous, &sink)?;
    ctx.readback_buffer(&sink)?;

    let report = ctx.flush()?;
    log::info!(
        "Flushed fence {}: {} commands, {} barriers",
        report.fence_value,
        report.command_count,
        report.barrier_count
    );

    let view = ctx.read_view(&mut sink)?;
    let mismatches = view
        .iter()
        .enumerate()
        .filter(|(i, v)| **v != (*i as u32).wrapping_mul(PATTERN))
        .count();
    println!("{} elements, {} hops, {} mismatches", view.len(), args.hops, mismatches);

    if mismatches > 0 {
        return Err(format!("{mismatches} elements differ after the round trip").into());
    }
    Ok(())
}
