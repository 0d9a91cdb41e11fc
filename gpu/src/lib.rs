//! # RedLilium GPU
//!
//! Low-level GPU submission core for RedLilium: the layer between a renderer
//! and the native driver that owns command pools, queues, synchronization and
//! device memory.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Device`] - Shared device context with queue-family selection
//! - [`CommandPoolRegistry`] - Lazily created per-thread command pools
//! - [`SubmitStaging`] / [`Queue`] - Batched submission with deferred cleanup
//! - [`MemoryAllocator`] - Direct or pooled device memory allocation
//! - [`Swapchain`] - Acquire/present cycle for window surfaces
//! - [`Fence`] / [`Semaphore`] - Host and GPU synchronization
//! - Multiple driver support: Vulkan and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_gpu::*;
//!
//! let device = Device::create(DeviceConfig::new())?;
//! let registry = device.create_command_pool_registry();
//! let mut queue = device.queue(QueueKind::Graphics, 0)?;
//!
//! let mut batch = registry.allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 1)?;
//! batch.begin_all()?;
//! batch.end_all()?;
//!
//! let mut staging = SubmitStaging::new();
//! staging.add_command_batch(batch);
//! let fence = device.create_fence(false)?;
//! queue.submit(staging, Some(&fence))?;
//! fence.wait()?;
//! unsafe { queue.clear_all_staged() };
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod memory;
pub mod profiling;
pub mod queue;
pub mod queue_family;
pub mod registry;
pub mod resource;
pub mod submission;
pub mod swapchain;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{Driver, DummyDriver, create_driver};
pub use command::{CommandBufferBatch, CommandPool, OwnershipTransfer, TransferResource};
pub use config::{AllocatorStrategy, BackendKind, DeviceConfig};
pub use device::Device;
pub use error::{DriverResult, GpuError, GpuResult};
pub use frame::{DEFAULT_FRAMES_IN_FLIGHT, FrameSync, FramesInFlight};
pub use memory::{AllocatorStats, DeviceMemory, MappedRegion, MemoryAllocator, MemoryRequest};
pub use queue::Queue;
pub use queue_family::QueueFamilySelection;
pub use registry::CommandPoolRegistry;
pub use resource::{Buffer, Image};
pub use submission::SubmitStaging;
pub use swapchain::{AcquireStatus, AcquiredImage, PresentStatus, Swapchain, SwapchainConfig};
pub use sync::{Fence, FenceStatus, Semaphore};
pub use types::{
    AccessFlags, BufferDescriptor, BufferUsage, CommandPoolPolicy, Extent2D, ImageDescriptor,
    ImageFormat, ImageLayout, ImageUsage, MemoryPropertyFlags, MemoryUsage, PipelineStageFlags,
    PresentMode, QueueFamilyId, QueueFamilyProperties, QueueFlags, QueueKind,
};

/// GPU library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the GPU subsystem.
///
/// This should be called before using any GPU functionality.
pub fn init() {
    log::info!("RedLilium GPU v{} initialized", VERSION);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_submit_through_reexports() {
        let (device, driver) = test_support::dummy_device();
        let registry = device.create_command_pool_registry();
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();

        let mut batch = registry
            .allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 1)
            .unwrap();
        batch.begin_all().unwrap();
        batch.end_all().unwrap();

        let mut staging = SubmitStaging::new();
        staging.add_command_batch(batch);
        let fence = device.create_fence(false).unwrap();
        queue.submit(staging, Some(&fence)).unwrap();
        fence.wait().unwrap();
        unsafe { queue.clear_all_staged() };

        assert_eq!(fence.status().unwrap(), FenceStatus::Ready);
        assert_eq!(driver.submissions().len(), 1);
    }
}
