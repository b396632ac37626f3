use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use redlilium_compute::{
    BackendKind, BufferFlags, CommandSequencer, ComputeContext, ContextConfig, ResourceState,
    SoftwareBackend, TypedBuffer,
};

fn software_context() -> ComputeContext {
    let config = ContextConfig::default().with_backend(BackendKind::Software);
    ComputeContext::with_backend(config, Arc::new(SoftwareBackend::new()))
}

fn buffers(ctx: &ComputeContext, count: usize, len: usize) -> Vec<TypedBuffer<u32>> {
    (0..count)
        .map(|i| {
            ctx.create_buffer_labeled::<u32>(format!("bench_{i}"), len, BufferFlags::HOST_READ_WRITE)
                .unwrap()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

fn bench_record_transitions(c: &mut Criterion) {
    let ctx = software_context();
    let buffers = buffers(&ctx, 32, 16);

    c.bench_function("sequencer_ensure_state_32_buffers", |b| {
        b.iter(|| {
            let mut sequencer = CommandSequencer::new();
            for buffer in &buffers {
                sequencer
                    .ensure_state(buffer.device(), ResourceState::CopyDestination)
                    .unwrap();
            }
            assert_eq!(sequencer.barrier_count(), buffers.len());
            // Dropping the batch returns every buffer to Common.
            black_box(sequencer)
        });
    });
}

fn bench_record_copies(c: &mut Criterion) {
    let ctx = software_context();
    let buffers = buffers(&ctx, 2, 256);
    let mut setup = CommandSequencer::new();
    setup
        .ensure_state(buffers[0].device(), ResourceState::CopySource)
        .unwrap();
    setup
        .ensure_state(buffers[1].device(), ResourceState::CopyDestination)
        .unwrap();

    c.bench_function("sequencer_copy_64_commands", |b| {
        b.iter(|| {
            let mut sequencer = CommandSequencer::new();
            for _ in 0..64 {
                sequencer
                    .copy(buffers[0].device(), buffers[1].device())
                    .unwrap();
            }
            black_box(sequencer.len());
            sequencer.reset();
        });
    });
}

// ---------------------------------------------------------------------------
// Flush
// ---------------------------------------------------------------------------

fn bench_flush_roundtrip(c: &mut Criterion) {
    let mut ctx = software_context();
    let mut buffer = ctx
        .create_buffer::<f32>(4096, BufferFlags::HOST_READ_WRITE)
        .unwrap();
    ctx.write_view(&mut buffer).unwrap().fill(1.5);

    c.bench_function("software_flush_upload_readback_16k", |b| {
        b.iter(|| {
            ctx.upload_buffer(&buffer).unwrap();
            ctx.readback_buffer(&buffer).unwrap();
            black_box(ctx.flush().unwrap());
        });
    });
}

fn bench_flush_empty(c: &mut Criterion) {
    let mut ctx = software_context();

    c.bench_function("software_flush_empty", |b| {
        b.iter(|| black_box(ctx.flush().unwrap()));
    });
}

criterion_group!(
    recording,
    bench_record_transitions,
    bench_record_copies,
);

criterion_group!(flush, bench_flush_roundtrip, bench_flush_empty);

criterion_main!(recording, flush);
