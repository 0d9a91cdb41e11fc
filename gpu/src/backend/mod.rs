//! Driver abstraction.
//!
//! [`Driver`] is the narrow capability surface the rest of the crate talks to:
//! queue families and memory types, command pools and buffers, device memory,
//! resources, fences and semaphores, queue submission and presentation.
//!
//! Two implementations exist:
//! - [`DummyDriver`] simulates a GPU in-process and is used for testing.
//! - [`VulkanDriver`] (feature `vulkan-backend`) drives a real device through `ash`.
//!
//! Every handle is a plain 64-bit value. Methods that destroy objects, touch
//! host pointers, or hand work to the GPU are `unsafe`: the caller guarantees
//! the object is no longer in use by pending GPU work.

pub mod dummy;
#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use crate::command::OwnershipTransfer;
use crate::config::{BackendKind, DeviceConfig};
use crate::error::GpuResult;
use crate::types::{
    BufferDescriptor, CommandPoolPolicy, DeviceLimits, Extent2D, ImageDescriptor, ImageFormat,
    ImageUsage, MemoryProperties, MemoryRequirements, PipelineStageFlags, PresentMode,
    QueueFamilyId, QueueFamilyProperties, SurfaceCapabilities,
};

pub use dummy::{DummyCommand, DummyConfig, DummyDriver};
#[cfg(feature = "vulkan-backend")]
pub use vulkan::VulkanDriver;

macro_rules! raw_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl $name {
                pub const NULL: Self = Self(0);

                pub fn is_null(self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

raw_handle! {
    /// Native queue handle.
    RawQueue;
    /// Native command pool handle.
    RawCommandPool;
    /// Native command buffer handle.
    RawCommandBuffer;
    /// Native device memory handle.
    RawMemory;
    /// Native buffer handle.
    RawBuffer;
    /// Native image handle.
    RawImage;
    /// Native fence handle.
    RawFence;
    /// Native semaphore handle.
    RawSemaphore;
    /// Native surface handle.
    RawSurface;
    /// Native swapchain handle.
    RawSwapchain;
}

/// A semaphore with the pipeline stage at which it is waited on or signaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSubmit {
    pub semaphore: RawSemaphore,
    pub stage: PipelineStageFlags,
}

/// One batch inside a native submit call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub wait_semaphores: &'a [SemaphoreSubmit],
    pub command_buffers: &'a [RawCommandBuffer],
    pub signal_semaphores: &'a [SemaphoreSubmit],
}

/// A range of mapped memory to flush or invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedMemoryRange {
    pub memory: RawMemory,
    pub offset: u64,
    pub size: u64,
}

/// Which half of a queue family ownership transfer is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferHalf {
    /// Recorded on the source family's queue.
    Release,
    /// Recorded on the destination family's queue.
    Acquire,
}

/// Parameters for creating a swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub surface: RawSurface,
    pub image_count: u32,
    pub format: ImageFormat,
    pub extent: Extent2D,
    pub usage: ImageUsage,
    pub present_mode: PresentMode,
    /// Swapchain being replaced, if any.
    pub old_swapchain: Option<RawSwapchain>,
}

/// Result of asking the driver for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    /// No image was available and the timeout was zero.
    NotReady,
    /// No image became available before the timeout.
    Timeout,
    /// The surface changed; the swapchain must be recreated.
    OutOfDate,
}

/// Result of a present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// GPU driver trait for abstracting the native API.
pub trait Driver: Send + Sync + 'static {
    /// Get the driver name.
    fn name(&self) -> &'static str;

    // ------------------------------------------------------------------
    // Device properties
    // ------------------------------------------------------------------

    fn queue_families(&self) -> Vec<QueueFamilyProperties>;

    fn memory_properties(&self) -> MemoryProperties;

    fn limits(&self) -> DeviceLimits;

    /// Retrieve a hardware queue. `index` must be below the family's queue count.
    fn get_queue(&self, family: QueueFamilyId, index: u32) -> RawQueue;

    // ------------------------------------------------------------------
    // Command pools and buffers
    // ------------------------------------------------------------------

    fn create_command_pool(
        &self,
        family: QueueFamilyId,
        policy: CommandPoolPolicy,
    ) -> GpuResult<RawCommandPool>;

    /// # Safety
    /// No command buffer of the pool may be pending execution.
    unsafe fn destroy_command_pool(&self, pool: RawCommandPool);

    /// # Safety
    /// No command buffer of the pool may be pending execution.
    unsafe fn reset_command_pool(&self, pool: RawCommandPool) -> GpuResult<()>;

    fn allocate_command_buffers(
        &self,
        pool: RawCommandPool,
        count: u32,
    ) -> GpuResult<Vec<RawCommandBuffer>>;

    /// # Safety
    /// The buffers must come from `pool` and must not be pending execution.
    unsafe fn free_command_buffers(&self, pool: RawCommandPool, buffers: &[RawCommandBuffer]);

    /// # Safety
    /// The buffer must not be pending execution and its pool must be
    /// externally synchronized.
    unsafe fn begin_command_buffer(
        &self,
        buffer: RawCommandBuffer,
        one_time_submit: bool,
    ) -> GpuResult<()>;

    /// # Safety
    /// The buffer must be in the recording state.
    unsafe fn end_command_buffer(&self, buffer: RawCommandBuffer) -> GpuResult<()>;

    /// # Safety
    /// The buffer must not be pending execution and must come from a
    /// resettable pool.
    unsafe fn reset_command_buffer(&self, buffer: RawCommandBuffer) -> GpuResult<()>;

    /// Record one half of a queue family ownership transfer.
    ///
    /// # Safety
    /// The buffer must be in the recording state.
    unsafe fn cmd_ownership_barrier(
        &self,
        buffer: RawCommandBuffer,
        transfer: &OwnershipTransfer,
        half: TransferHalf,
    );

    // ------------------------------------------------------------------
    // Device memory
    // ------------------------------------------------------------------

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> GpuResult<RawMemory>;

    /// # Safety
    /// Nothing bound to the memory may be in use and the memory must be unmapped.
    unsafe fn free_memory(&self, memory: RawMemory);

    /// Map `size` bytes starting at `offset` and return the host pointer to `offset`.
    ///
    /// # Safety
    /// The memory must be host visible and not currently mapped.
    unsafe fn map_memory(&self, memory: RawMemory, offset: u64, size: u64)
    -> GpuResult<NonNull<u8>>;

    /// # Safety
    /// The memory must be mapped and no pointer into the mapping may be used afterwards.
    unsafe fn unmap_memory(&self, memory: RawMemory);

    /// # Safety
    /// The ranges must lie inside mapped memory and be atom aligned.
    unsafe fn flush_memory(&self, ranges: &[MappedMemoryRange]) -> GpuResult<()>;

    /// # Safety
    /// The ranges must lie inside mapped memory and be atom aligned.
    unsafe fn invalidate_memory(&self, ranges: &[MappedMemoryRange]) -> GpuResult<()>;

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GpuResult<RawBuffer>;

    /// # Safety
    /// The buffer must not be in use by pending GPU work.
    unsafe fn destroy_buffer(&self, buffer: RawBuffer);

    fn buffer_memory_requirements(&self, buffer: RawBuffer) -> MemoryRequirements;

    /// # Safety
    /// The buffer must not already be bound; `offset` must satisfy its alignment.
    unsafe fn bind_buffer_memory(
        &self,
        buffer: RawBuffer,
        memory: RawMemory,
        offset: u64,
    ) -> GpuResult<()>;

    fn create_image(&self, descriptor: &ImageDescriptor) -> GpuResult<RawImage>;

    /// # Safety
    /// The image must not be in use by pending GPU work.
    unsafe fn destroy_image(&self, image: RawImage);

    fn image_memory_requirements(&self, image: RawImage) -> MemoryRequirements;

    /// # Safety
    /// The image must not already be bound; `offset` must satisfy its alignment.
    unsafe fn bind_image_memory(&self, image: RawImage, memory: RawMemory, offset: u64)
    -> GpuResult<()>;

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn create_fence(&self, signaled: bool) -> GpuResult<RawFence>;

    /// # Safety
    /// The fence must not be associated with pending work.
    unsafe fn destroy_fence(&self, fence: RawFence);

    /// Whether the fence is signaled.
    fn fence_status(&self, fence: RawFence) -> GpuResult<bool>;

    fn reset_fences(&self, fences: &[RawFence]) -> GpuResult<()>;

    /// Wait until all (or any) of the fences are signaled.
    ///
    /// Returns `false` when the timeout elapsed first. `None` waits forever.
    fn wait_for_fences(
        &self,
        fences: &[RawFence],
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> GpuResult<bool>;

    fn create_semaphore(&self) -> GpuResult<RawSemaphore>;

    /// # Safety
    /// The semaphore must not be referenced by pending work.
    unsafe fn destroy_semaphore(&self, semaphore: RawSemaphore);

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    /// Submit all batches in one call, signaling `fence` when every batch completed.
    ///
    /// # Safety
    /// Every referenced object must stay alive until the work completes; the
    /// queue must be externally synchronized.
    unsafe fn queue_submit(
        &self,
        queue: RawQueue,
        submits: &[SubmitInfo<'_>],
        fence: Option<RawFence>,
    ) -> GpuResult<()>;

    fn queue_wait_idle(&self, queue: RawQueue) -> GpuResult<()>;

    fn device_wait_idle(&self) -> GpuResult<()>;

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    fn surface_capabilities(&self, surface: RawSurface) -> GpuResult<SurfaceCapabilities>;

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> GpuResult<RawSwapchain>;

    /// # Safety
    /// No image of the swapchain may be in use by pending work.
    unsafe fn destroy_swapchain(&self, swapchain: RawSwapchain);

    fn swapchain_images(&self, swapchain: RawSwapchain) -> GpuResult<Vec<RawImage>>;

    /// # Safety
    /// The semaphore must have no pending signal and the fence must be unsignaled.
    unsafe fn acquire_next_image(
        &self,
        swapchain: RawSwapchain,
        timeout: Option<Duration>,
        semaphore: Option<RawSemaphore>,
        fence: Option<RawFence>,
    ) -> GpuResult<AcquireOutcome>;

    /// # Safety
    /// `index` must be an acquired image of the swapchain; the queue must be
    /// externally synchronized.
    unsafe fn queue_present(
        &self,
        queue: RawQueue,
        swapchain: RawSwapchain,
        index: u32,
        wait_semaphore: Option<RawSemaphore>,
    ) -> GpuResult<PresentOutcome>;
}

/// Selects and creates the driver requested by the configuration.
///
/// [`BackendKind::Auto`] picks the real driver compiled in and reports its
/// failure to the caller. The dummy driver is only used when asked for
/// explicitly with [`BackendKind::Dummy`].
pub fn create_driver(config: &DeviceConfig) -> GpuResult<Arc<dyn Driver>> {
    match config.backend {
        BackendKind::Dummy => {
            log::info!("Using dummy driver");
            Ok(Arc::new(DummyDriver::new()))
        }
        BackendKind::Vulkan | BackendKind::Auto => create_vulkan_driver(config),
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan_driver(config: &DeviceConfig) -> GpuResult<Arc<dyn Driver>> {
    let driver = VulkanDriver::new(config).inspect_err(|e| {
        log::error!("Failed to create Vulkan driver: {}", e);
    })?;
    log::info!("Using Vulkan driver (ash)");
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan_driver(_config: &DeviceConfig) -> GpuResult<Arc<dyn Driver>> {
    Err(crate::error::GpuError::InitializationFailed(
        "Vulkan support was not compiled in".to_string(),
    ))
}

/// Check if a real GPU driver is compiled in.
pub fn has_gpu_driver() -> bool {
    cfg!(feature = "vulkan-backend")
}
