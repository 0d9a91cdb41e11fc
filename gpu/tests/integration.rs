//! Integration tests for the GPU submission core.
//!
//! Memory tests are parameterized with `rstest` over both allocator
//! strategies; the rest exercise the registry, queues, fences and swapchains
//! end to end on the dummy driver.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;

use common::{Strategy, TEST_BLOCK_SIZE, TestContext, generate_test_pattern};
use redlilium_gpu::backend::{DummyCommand, DummyConfig, DummyDriver, TransferHalf};
use redlilium_gpu::types::DeviceLimits;
use redlilium_gpu::{
    AccessFlags, AcquireStatus, BufferDescriptor, BufferUsage, CommandPoolPolicy, DriverResult,
    Extent2D, FenceStatus, GpuError, MemoryPropertyFlags, MemoryRequest, MemoryUsage,
    OwnershipTransfer, PipelineStageFlags, PresentStatus, QueueKind, SubmitStaging, Swapchain,
    SwapchainConfig,
};

// ============================================================================
// Command pool registry
// ============================================================================

#[test]
fn test_batch_buffers_are_distinct_and_recycled() {
    let ctx = TestContext::new(Strategy::Direct);
    let registry = ctx.device.create_command_pool_registry();

    let batch = registry
        .allocate(QueueKind::Graphics, CommandPoolPolicy::Default, 8)
        .unwrap();
    let first: HashSet<_> = batch.iter().collect();
    assert_eq!(first.len(), 8);
    let pool = batch.pool().clone();
    assert_eq!(ctx.driver.outstanding_command_buffers(pool.raw()), 8);

    drop(batch);
    assert_eq!(ctx.driver.outstanding_command_buffers(pool.raw()), 0);

    let batch = registry
        .allocate(QueueKind::Graphics, CommandPoolPolicy::Default, 8)
        .unwrap();
    let second: HashSet<_> = batch.iter().collect();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(batch.pool(), &pool));
}

#[test]
fn test_threads_get_distinct_pools() {
    let ctx = TestContext::new(Strategy::Direct);
    let registry = ctx.device.create_command_pool_registry();

    let pools: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    let batch = registry
                        .allocate(QueueKind::Compute, CommandPoolPolicy::Transient, 1)
                        .unwrap();
                    let pool = batch.pool().raw();
                    // Same thread, same key: the pool is reused.
                    let again = registry
                        .allocate(QueueKind::Compute, CommandPoolPolicy::Transient, 1)
                        .unwrap();
                    assert_eq!(again.pool().raw(), pool);
                    pool
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_ne!(pools[0], pools[1]);
    assert_eq!(registry.pool_count(), 2);
}

#[test]
fn test_pools_follow_queue_family_selection() {
    let ctx = TestContext::new(Strategy::Direct);
    let registry = ctx.device.create_command_pool_registry();

    for kind in [QueueKind::Graphics, QueueKind::Compute, QueueKind::Transfer] {
        let pool = registry.pool(kind, CommandPoolPolicy::Default).unwrap();
        let (family, policy) = ctx.driver.command_pool_info(pool.raw()).unwrap();
        assert_eq!(family, ctx.device.queue_family(kind));
        assert_eq!(policy, CommandPoolPolicy::Default);
    }
    assert_eq!(ctx.device.queue_family(QueueKind::Transfer).index(), 2);
}

#[test]
fn test_recorded_batches_reuse_the_context_pool() {
    let ctx = TestContext::new(Strategy::Direct);
    let first = ctx.recorded_batch(QueueKind::Graphics);
    let second = ctx.recorded_batch(QueueKind::Graphics);
    assert!(Arc::ptr_eq(first.pool(), second.pool()));
    assert_eq!(ctx.registry.pool_count(), 1);
    assert_eq!(ctx.driver.live_command_pools(), 1);
}

#[test]
#[should_panic(expected = "at least one buffer")]
fn test_zero_sized_batch_panics() {
    let ctx = TestContext::new(Strategy::Direct);
    let _ = ctx
        .registry
        .allocate(QueueKind::Graphics, CommandPoolPolicy::Default, 0);
}

// ============================================================================
// Submission and deferred cleanup
// ============================================================================

#[test]
fn test_cleanup_runs_once_after_fence() {
    let ctx = TestContext::manual(Strategy::Direct);
    let mut queue = ctx.device.queue(QueueKind::Graphics, 0).unwrap();
    let fence = ctx.device.create_fence(false).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut staging = SubmitStaging::new();
    staging.add_command_batch(ctx.recorded_batch(QueueKind::Graphics));
    let counter = calls.clone();
    staging.add_cleanup_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    queue.submit(staging, Some(&fence)).unwrap();

    assert_eq!(fence.status().unwrap(), FenceStatus::NotReady);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    ctx.driver.complete_all();
    fence.wait().unwrap();
    unsafe { queue.clear_all_staged() };
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    unsafe { queue.clear_all_staged() };
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.staged_count(), 0);
}

#[test]
fn test_submit_order_follows_staging_order() {
    let ctx = TestContext::new(Strategy::Direct);
    let mut queue = ctx.device.queue(QueueKind::Graphics, 0).unwrap();

    let batches: Vec<_> = (0..3)
        .map(|_| ctx.recorded_batch(QueueKind::Graphics))
        .collect();
    let expected: Vec<_> = batches.iter().map(|b| b.raw(0)).collect();
    for batch in batches {
        let mut staging = SubmitStaging::new();
        staging.add_command_batch(batch);
        queue.stage_submission(staging);
    }
    assert!(ctx.driver.submissions().is_empty());

    let fence = ctx.device.create_fence(false).unwrap();
    queue.submit_all_staged(Some(&fence)).unwrap();
    fence.wait().unwrap();

    let submissions = ctx.driver.submissions();
    assert_eq!(submissions.len(), 1);
    let submitted: Vec<_> = submissions[0]
        .batches
        .iter()
        .map(|b| b.command_buffers[0])
        .collect();
    assert_eq!(submitted, expected);
    unsafe { queue.clear_all_staged() };
}

#[test]
fn test_transient_pool_round_trip() {
    let ctx = TestContext::new(Strategy::Direct);
    let registry = ctx.device.create_command_pool_registry();
    let mut queue = ctx.device.queue(QueueKind::Graphics, 0).unwrap();

    let mut batch = registry
        .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 1)
        .unwrap();
    batch.begin_all().unwrap();
    batch.end_all().unwrap();
    let pool = batch.pool().raw();

    let mut staging = SubmitStaging::new();
    staging.add_command_batch(batch);
    let fence = ctx.device.create_fence(false).unwrap();
    queue.submit(staging, Some(&fence)).unwrap();
    fence.wait().unwrap();
    assert_eq!(fence.status().unwrap(), FenceStatus::Ready);

    unsafe { queue.clear_all_staged() };
    let pools_before = ctx.driver.live_command_pools();
    drop(registry);
    assert_eq!(ctx.driver.live_command_pools(), pools_before - 1);
    assert_eq!(ctx.driver.command_pool_info(pool), None);
}

#[test]
fn test_semaphore_chain_across_queues() {
    let ctx = TestContext::new(Strategy::Direct);
    let mut transfer = ctx.device.queue(QueueKind::Transfer, 0).unwrap();
    let mut graphics = ctx.device.queue(QueueKind::Graphics, 0).unwrap();
    let uploaded = ctx.device.create_semaphore().unwrap();

    let mut upload = SubmitStaging::new();
    upload.add_command_batch(ctx.recorded_batch(QueueKind::Transfer));
    upload.add_signaling_semaphore(&uploaded, PipelineStageFlags::TRANSFER);
    transfer.submit(upload, None).unwrap();

    let mut draw = SubmitStaging::new();
    draw.add_command_batch(ctx.recorded_batch(QueueKind::Graphics));
    draw.add_waiting_semaphore(&uploaded, PipelineStageFlags::VERTEX_INPUT);
    let fence = ctx.device.create_fence(false).unwrap();
    graphics.submit(draw, Some(&fence)).unwrap();
    fence.wait().unwrap();

    let submissions = ctx.driver.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].queue, transfer.raw());
    assert_eq!(submissions[1].batches[0].wait_semaphores[0].semaphore, uploaded.raw());

    transfer.wait_idle().unwrap();
    unsafe {
        transfer.clear_all_staged();
        graphics.clear_all_staged();
    }
}

#[test]
fn test_ownership_transfer_records_matched_pair() {
    let ctx = TestContext::new(Strategy::Direct);
    let registry = ctx.device.create_command_pool_registry();
    let selection = ctx.device.queue_family_selection();
    assert!(selection.requires_ownership_transfer(QueueKind::Transfer, QueueKind::Graphics));

    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::new(4096, BufferUsage::VERTEX | BufferUsage::TRANSFER_DST))
        .unwrap();
    let transfer = OwnershipTransfer::buffer(
        &buffer,
        ctx.device.queue_family(QueueKind::Transfer),
        ctx.device.queue_family(QueueKind::Graphics),
    )
    .with_src(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE)
    .with_dst(PipelineStageFlags::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ);

    let mut upload = registry
        .allocate(QueueKind::Transfer, CommandPoolPolicy::Transient, 1)
        .unwrap();
    let mut draw = registry
        .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 1)
        .unwrap();
    upload.begin(0).unwrap();
    upload.record_release(0, &transfer);
    upload.end(0).unwrap();
    draw.begin(0).unwrap();
    draw.record_acquire(0, &transfer);
    draw.end(0).unwrap();

    assert_eq!(
        ctx.driver.recorded_commands(upload.raw(0)),
        vec![DummyCommand::OwnershipBarrier {
            transfer: transfer.clone(),
            half: TransferHalf::Release,
        }]
    );
    assert_eq!(
        ctx.driver.recorded_commands(draw.raw(0)),
        vec![DummyCommand::OwnershipBarrier {
            transfer,
            half: TransferHalf::Acquire,
        }]
    );
}

// ============================================================================
// Fences
// ============================================================================

#[test]
fn test_wait_any_returns_signaled_fence() {
    let ctx = TestContext::manual(Strategy::Direct);
    let a = ctx.device.create_fence(false).unwrap();
    let b = ctx.device.create_fence(true).unwrap();

    let start = Instant::now();
    let index = redlilium_gpu::Fence::wait_any_for(&[&a, &b], Duration::from_secs(5)).unwrap();
    assert_eq!(index, Some(1));
    assert!(start.elapsed() < Duration::from_secs(1));

    assert_eq!(
        redlilium_gpu::Fence::wait_all_for(&[&a, &b], Duration::ZERO).unwrap(),
        FenceStatus::NotReady
    );
}

#[test]
fn test_wait_all_blocks_until_every_fence_signals() {
    let ctx = TestContext::manual(Strategy::Direct);
    let a = ctx.device.create_fence(false).unwrap();
    let b = ctx.device.create_fence(true).unwrap();

    let driver = ctx.driver.clone();
    let raw_a = a.raw();
    let signaler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        driver.signal_fence(raw_a);
    });

    let start = Instant::now();
    let status = redlilium_gpu::Fence::wait_all_for(&[&a, &b], Duration::from_secs(10)).unwrap();
    assert_eq!(status, FenceStatus::Ready);
    assert!(start.elapsed() >= Duration::from_millis(40));
    signaler.join().unwrap();
}

#[test]
fn test_wait_for_timeout_has_no_side_effects() {
    let ctx = TestContext::manual(Strategy::Direct);
    let fence = ctx.device.create_fence(false).unwrap();
    assert_eq!(
        fence.wait_for(Duration::from_millis(10)).unwrap(),
        FenceStatus::NotReady
    );
    assert_eq!(fence.status().unwrap(), FenceStatus::NotReady);
}

// ============================================================================
// Device memory
// ============================================================================

#[rstest]
#[case::direct(Strategy::Direct)]
#[case::pooled(Strategy::Pooled)]
fn test_host_round_trip(
    #[case] strategy: Strategy,
    #[values(
        MemoryRequest::Usage(MemoryUsage::CpuToGpu),
        MemoryRequest::Properties(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED)
    )]
    request: MemoryRequest,
) {
    let ctx = TestContext::new(strategy);
    let allocator = ctx.device.create_memory_allocator();
    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::new(1000, BufferUsage::STORAGE))
        .unwrap();
    let mut memory = allocator.allocate_for_buffer(&buffer, request).unwrap();
    memory.bind_buffer(&buffer).unwrap();

    let data = generate_test_pattern(1000);
    {
        let mut region = memory.map().unwrap();
        region.as_mut_slice()[..data.len()].copy_from_slice(&data);
        region.flush().unwrap();
    }
    let seen_by_gpu = ctx
        .driver
        .read_device_memory(memory.raw(), memory.offset(), data.len());
    assert_eq!(seen_by_gpu, data);

    // The GPU writes a result back.
    let result: Vec<u8> = data.iter().map(|b| b.wrapping_mul(3)).collect();
    ctx.driver
        .write_device_memory(memory.raw(), memory.offset(), &result);
    {
        let region = memory.map().unwrap();
        region.invalidate().unwrap();
        assert_eq!(&region.as_slice()[..result.len()], &result[..]);
    }
}

#[rstest]
#[case::direct(Strategy::Direct)]
#[case::pooled(Strategy::Pooled)]
fn test_pod_helpers(#[case] strategy: Strategy) {
    let ctx = TestContext::new(strategy);
    let allocator = ctx.device.create_memory_allocator();
    let mut memory = allocator
        .allocate(
            256,
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED,
        )
        .unwrap();
    let values = [1.5f32, -2.0, 3.25, 4.0];
    {
        let mut region = memory.map().unwrap();
        region.write_pod(16, &values);
        region.flush().unwrap();
    }
    let region = memory.map().unwrap();
    region.invalidate().unwrap();
    assert_eq!(region.read_pod::<f32>(16, 4), values.to_vec());
}

#[rstest]
#[case::direct(Strategy::Direct)]
#[case::pooled(Strategy::Pooled)]
fn test_no_matching_memory_type_allocates_nothing(#[case] strategy: Strategy) {
    let ctx = TestContext::new(strategy);
    ctx.driver.set_resource_memory_type_bits(Some(0b0100));
    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::new(4096, BufferUsage::STORAGE))
        .unwrap();

    let allocator = ctx.device.create_memory_allocator();
    let err = allocator
        .allocate_for_buffer(
            &buffer,
            MemoryRequest::Properties(MemoryPropertyFlags::DEVICE_LOCAL),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        GpuError::NoMatchingMemoryType {
            type_bits: 0b0100,
            ..
        }
    ));
    assert_eq!(ctx.driver.live_allocation_count(), 0);
    assert_eq!(allocator.stats().live_allocations, 0);
}

#[rstest]
#[case::direct(Strategy::Direct)]
#[case::pooled(Strategy::Pooled)]
fn test_memory_is_returned_on_drop(#[case] strategy: Strategy) {
    let ctx = TestContext::new(strategy);
    let allocator = ctx.device.create_memory_allocator();
    let allocations: Vec<_> = (0..4)
        .map(|_| {
            allocator
                .allocate(64 * 1024, MemoryPropertyFlags::DEVICE_LOCAL)
                .unwrap()
        })
        .collect();
    assert_eq!(allocator.stats().live_allocations, 4);

    drop(allocations);
    assert_eq!(allocator.stats().live_allocations, 0);
    assert_eq!(allocator.stats().used_bytes, 0);
    allocator.trim();
    assert_eq!(ctx.driver.live_allocation_count(), 0);
}

#[test]
fn test_pooled_strategy_stays_under_allocation_limit() {
    let limits = DeviceLimits {
        max_memory_allocation_count: 8,
        ..DeviceLimits::default()
    };

    let direct = TestContext::with_config(
        Strategy::Direct,
        DummyConfig::new().with_limits(limits),
    );
    let allocator = direct.device.create_memory_allocator();
    let mut kept = Vec::new();
    let err = loop {
        match allocator.allocate(4096, MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => kept.push(memory),
            Err(err) => break err,
        }
    };
    assert_eq!(kept.len(), 8);
    assert_eq!(err.result(), Some(DriverResult::TooManyObjects));

    let pooled = TestContext::with_config(
        Strategy::Pooled,
        DummyConfig::new().with_limits(limits),
    );
    let allocator = pooled.device.create_memory_allocator();
    let kept: Vec<_> = (0..64)
        .map(|_| {
            allocator
                .allocate(4096, MemoryPropertyFlags::DEVICE_LOCAL)
                .unwrap()
        })
        .collect();
    assert_eq!(kept.len(), 64);
    assert_eq!(pooled.driver.live_allocation_count(), 1);
    assert_eq!(allocator.stats().reserved_bytes, TEST_BLOCK_SIZE);
}

#[test]
fn test_image_memory_binding() {
    let ctx = TestContext::new(Strategy::Pooled);
    let allocator = ctx.device.create_memory_allocator();
    let image = ctx
        .device
        .create_image(&redlilium_gpu::ImageDescriptor::new(
            Extent2D::new(64, 64),
            redlilium_gpu::ImageFormat::Rgba8Unorm,
            redlilium_gpu::ImageUsage::SAMPLED | redlilium_gpu::ImageUsage::TRANSFER_DST,
        ))
        .unwrap();
    let mut memory = allocator
        .allocate_for_image(&image, MemoryRequest::Usage(MemoryUsage::GpuOnly))
        .unwrap();
    assert_eq!(memory.offset() % image.memory_requirements().alignment, 0);
    memory.bind_image(&image).unwrap();
    assert!(image.is_bound());
    assert!(memory.is_bound());
}

// ============================================================================
// Swapchain
// ============================================================================

fn make_swapchain(ctx: &TestContext) -> Swapchain {
    let surface = ctx
        .driver
        .create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(
            640, 480,
        )));
    Swapchain::new(&ctx.device, surface, &SwapchainConfig::new(640, 480)).unwrap()
}

#[test]
fn test_acquire_never_repeats_an_unpresented_image() {
    let ctx = TestContext::new(Strategy::Direct);
    let mut swapchain = make_swapchain(&ctx);
    let mut queue = ctx.device.queue(QueueKind::Graphics, 0).unwrap();

    let mut held = Vec::new();
    let mut seen = HashSet::new();
    for _ in 0..swapchain.image_count() {
        let image = swapchain
            .acquire_next_image(None, None, Some(Duration::ZERO))
            .unwrap();
        assert!(image.is_valid());
        assert!(seen.insert(image.index()));
        held.push(image);
    }

    let exhausted = swapchain
        .acquire_next_image(None, None, Some(Duration::ZERO))
        .unwrap();
    assert_eq!(exhausted.status(), AcquireStatus::NotReady);
    assert!(!exhausted.is_valid());

    for image in held {
        assert_eq!(
            swapchain.present(&mut queue, None, image).unwrap(),
            PresentStatus::Presented
        );
    }
    assert_eq!(swapchain.acquired_count(), 0);
}

#[test]
fn test_out_of_date_is_a_status_and_recreate_recovers() {
    let ctx = TestContext::new(Strategy::Direct);
    let mut swapchain = make_swapchain(&ctx);
    let mut queue = ctx.device.queue(QueueKind::Graphics, 0).unwrap();

    ctx.driver
        .resize_surface(swapchain.surface(), Extent2D::new(800, 600));
    let image = swapchain.acquire_next_image(None, None, None).unwrap();
    assert_eq!(image.status(), AcquireStatus::OutOfDate);
    assert!(swapchain.needs_recreation());
    drop(image);

    let old = swapchain.raw();
    swapchain
        .recreate(&SwapchainConfig::new(800, 600))
        .unwrap();
    assert_ne!(swapchain.raw(), old);
    assert!(!swapchain.needs_recreation());
    assert_eq!(swapchain.extent(), Extent2D::new(800, 600));

    let image = swapchain.acquire_next_image(None, None, None).unwrap();
    assert_eq!(image.status(), AcquireStatus::Ready);
    swapchain.present(&mut queue, None, image).unwrap();
}
