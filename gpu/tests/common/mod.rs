//! Common utilities for GPU integration tests.
//!
//! Every test runs against the dummy driver, which simulates a discrete GPU
//! with separate graphics, compute and transfer families and both coherent
//! and non-coherent host-visible memory.

use std::sync::Arc;

use redlilium_gpu::backend::{DummyConfig, DummyDriver};
use redlilium_gpu::{
    AllocatorStrategy, BackendKind, CommandBufferBatch, CommandPoolPolicy, CommandPoolRegistry,
    Device, DeviceConfig, QueueKind,
};

/// Small blocks so pooled tests exercise block management quickly.
pub const TEST_BLOCK_SIZE: u64 = 1024 * 1024;

/// Allocator strategies every memory test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Pooled,
}

impl Strategy {
    pub fn to_allocator_strategy(self) -> AllocatorStrategy {
        match self {
            Strategy::Direct => AllocatorStrategy::Direct,
            Strategy::Pooled => AllocatorStrategy::Pooled {
                block_size: TEST_BLOCK_SIZE,
            },
        }
    }
}

/// A device on the dummy driver, the driver itself for inspection, and one
/// registry shared by the whole test.
pub struct TestContext {
    pub device: Arc<Device>,
    pub driver: Arc<DummyDriver>,
    pub registry: CommandPoolRegistry,
}

impl TestContext {
    pub fn new(strategy: Strategy) -> Self {
        Self::with_config(strategy, DummyConfig::new())
    }

    /// Work stays pending until the driver is told to complete it.
    pub fn manual(strategy: Strategy) -> Self {
        Self::with_config(strategy, DummyConfig::new().with_auto_complete(false))
    }

    pub fn with_config(strategy: Strategy, config: DummyConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let driver = Arc::new(DummyDriver::with_config(config));
        let device = Device::new(
            driver.clone(),
            DeviceConfig::new()
                .with_backend(BackendKind::Dummy)
                .with_allocator(strategy.to_allocator_strategy())
                .with_application_name("redlilium-gpu-tests"),
        )
        .expect("dummy device creation should not fail");
        let registry = device.create_command_pool_registry();
        Self {
            device,
            driver,
            registry,
        }
    }

    /// One recorded, empty command buffer ready for submission.
    pub fn recorded_batch(&self, kind: QueueKind) -> CommandBufferBatch {
        let mut batch = self
            .registry
            .allocate(kind, CommandPoolPolicy::Transient, 1)
            .expect("command buffer allocation");
        batch.begin_all().expect("begin");
        batch.end_all().expect("end");
        batch
    }
}

/// Deterministic byte pattern of the given length.
pub fn generate_test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
