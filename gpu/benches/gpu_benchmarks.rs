use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use redlilium_gpu::backend::{DummyConfig, DummyDriver};
use redlilium_gpu::{
    AllocatorStrategy, BackendKind, CommandPoolPolicy, CommandPoolRegistry, Device, DeviceConfig,
    MemoryPropertyFlags, QueueKind, SubmitStaging,
};

fn make_device(strategy: AllocatorStrategy) -> Arc<Device> {
    let driver = Arc::new(DummyDriver::with_config(DummyConfig::new()));
    Device::new(
        driver,
        DeviceConfig::new()
            .with_backend(BackendKind::Dummy)
            .with_allocator(strategy),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Memory allocation
// ---------------------------------------------------------------------------

fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_allocate_free");
    for (name, strategy) in [
        ("direct", AllocatorStrategy::Direct),
        ("pooled", AllocatorStrategy::pooled()),
    ] {
        let device = make_device(strategy);
        let allocator = device.create_memory_allocator();
        group.bench_function(BenchmarkId::new(name, "64KiB"), |b| {
            b.iter(|| {
                let memory = allocator
                    .allocate(64 * 1024, MemoryPropertyFlags::DEVICE_LOCAL)
                    .unwrap();
                black_box(&memory);
            });
        });
    }
    group.finish();
}

fn bench_allocate_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_allocate_256_small");
    for (name, strategy) in [
        ("direct", AllocatorStrategy::Direct),
        ("pooled", AllocatorStrategy::pooled()),
    ] {
        let device = make_device(strategy);
        let allocator = device.create_memory_allocator();
        group.bench_function(name, |b| {
            b.iter(|| {
                let allocations: Vec<_> = (0..256)
                    .map(|_| {
                        allocator
                            .allocate(
                                4096,
                                MemoryPropertyFlags::HOST_VISIBLE
                                    | MemoryPropertyFlags::HOST_COHERENT,
                            )
                            .unwrap()
                    })
                    .collect();
                black_box(allocations);
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Command pool registry
// ---------------------------------------------------------------------------

fn bench_registry_main_thread(c: &mut Criterion) {
    let device = make_device(AllocatorStrategy::Direct);
    let registry = device.create_command_pool_registry();
    registry
        .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 1)
        .unwrap();

    c.bench_function("registry_allocate_main_thread", |b| {
        b.iter(|| {
            let batch = registry
                .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 4)
                .unwrap();
            black_box(&batch);
        });
    });
}

fn bench_registry_worker_thread(c: &mut Criterion) {
    let device = make_device(AllocatorStrategy::Direct);
    // Designate another thread as main so this one takes the locked path.
    let other = thread::spawn(|| thread::current().id()).join().unwrap();
    let registry = CommandPoolRegistry::with_main_thread(&device, other);

    c.bench_function("registry_allocate_worker_thread", |b| {
        b.iter(|| {
            let batch = registry
                .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 4)
                .unwrap();
            black_box(&batch);
        });
    });
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn bench_stage_and_submit(c: &mut Criterion) {
    let device = make_device(AllocatorStrategy::Direct);
    let registry = device.create_command_pool_registry();
    let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();
    let mut fence = device.create_fence(false).unwrap();

    c.bench_function("queue_submit_8_batches", |b| {
        b.iter(|| {
            for _ in 0..8 {
                let mut batch = registry
                    .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 1)
                    .unwrap();
                batch.begin_all().unwrap();
                batch.end_all().unwrap();
                let mut staging = SubmitStaging::new();
                staging.add_command_batch(batch);
                queue.stage_submission(staging);
            }
            queue.submit_all_staged(Some(&fence)).unwrap();
            fence.wait().unwrap();
            unsafe { queue.clear_all_staged() };
            fence.reset().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_free,
    bench_allocate_many,
    bench_registry_main_thread,
    bench_registry_worker_thread,
    bench_stage_and_submit,
);
criterion_main!(benches);
