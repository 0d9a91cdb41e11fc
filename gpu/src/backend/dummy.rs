//! Dummy GPU driver for testing and development.
//!
//! This driver doesn't talk to hardware. It keeps enough bookkeeping to behave
//! like a device: command buffers move through their recording states, fences
//! and semaphores are tracked, non-coherent memory keeps separate host and
//! device copies, and swapchains hand out images from a ring.
//!
//! It also plays the role of a validation layer. Misuse that a real driver
//! would report through its validation layer (waiting on a semaphore nobody
//! signals, submitting a signaled fence, unaligned flush ranges, binding a
//! resource twice) panics with a descriptive message.
//!
//! Submitted work completes immediately by default. With
//! [`DummyConfig::with_auto_complete`] disabled, work stays pending until
//! [`DummyDriver::complete_all`] or a queue/device idle wait, which lets tests
//! observe the in-flight window.

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::command::OwnershipTransfer;
use crate::error::{DriverResult, GpuError, GpuResult};
use crate::types::{
    BufferDescriptor, CommandPoolPolicy, DeviceLimits, Extent2D, ImageDescriptor, ImageFormat,
    ImageUsage, MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryRequirements, MemoryType,
    PresentMode, QueueFamilyId, QueueFamilyProperties, QueueFlags, SurfaceCapabilities,
    SurfaceFormat,
};

use super::{
    AcquireOutcome, Driver, MappedMemoryRange, PresentOutcome, RawBuffer, RawCommandBuffer,
    RawCommandPool, RawFence, RawImage, RawMemory, RawQueue, RawSemaphore, RawSurface,
    RawSwapchain, SemaphoreSubmit, SubmitInfo, SwapchainCreateInfo, TransferHalf,
};

const BUFFER_ALIGNMENT: u64 = 256;
const IMAGE_ALIGNMENT: u64 = 4096;

/// Configuration of the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyConfig {
    pub queue_families: Vec<QueueFamilyProperties>,
    pub memory_properties: MemoryProperties,
    pub limits: DeviceLimits,
    /// Complete submitted work immediately.
    pub auto_complete: bool,
}

impl Default for DummyConfig {
    /// A discrete-GPU-like device.
    ///
    /// Queue families: 0 = graphics+compute+transfer (1 queue),
    /// 1 = compute+transfer (2 queues), 2 = transfer (1 queue).
    ///
    /// Memory types: 0 = device local, 1 = host visible+coherent,
    /// 2 = host visible+cached (non-coherent), 3 = device local+host visible+coherent.
    fn default() -> Self {
        const HEAP_SIZE: u64 = 256 * 1024 * 1024;
        Self {
            queue_families: vec![
                QueueFamilyProperties::new(
                    QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    1,
                ),
                QueueFamilyProperties::new(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 2),
                QueueFamilyProperties::new(QueueFlags::TRANSFER, 1),
            ],
            memory_properties: MemoryProperties {
                types: vec![
                    MemoryType {
                        property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
                        heap_index: 0,
                    },
                    MemoryType {
                        property_flags: MemoryPropertyFlags::HOST_VISIBLE
                            | MemoryPropertyFlags::HOST_COHERENT,
                        heap_index: 1,
                    },
                    MemoryType {
                        property_flags: MemoryPropertyFlags::HOST_VISIBLE
                            | MemoryPropertyFlags::HOST_CACHED,
                        heap_index: 1,
                    },
                    MemoryType {
                        property_flags: MemoryPropertyFlags::DEVICE_LOCAL
                            | MemoryPropertyFlags::HOST_VISIBLE
                            | MemoryPropertyFlags::HOST_COHERENT,
                        heap_index: 0,
                    },
                ],
                heaps: vec![
                    MemoryHeap {
                        size: HEAP_SIZE,
                        device_local: true,
                    },
                    MemoryHeap {
                        size: HEAP_SIZE,
                        device_local: false,
                    },
                ],
            },
            limits: DeviceLimits::default(),
            auto_complete: true,
        }
    }
}

impl DummyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_families(mut self, families: Vec<QueueFamilyProperties>) -> Self {
        self.queue_families = families;
        self
    }

    pub fn with_memory_properties(mut self, properties: MemoryProperties) -> Self {
        self.memory_properties = properties;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }
}

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyCommand {
    OwnershipBarrier {
        transfer: OwnershipTransfer,
        half: TransferHalf,
    },
}

/// One batch of a recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyBatch {
    pub wait_semaphores: Vec<SemaphoreSubmit>,
    pub command_buffers: Vec<RawCommandBuffer>,
    pub signal_semaphores: Vec<SemaphoreSubmit>,
}

/// A native submit call as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummySubmission {
    pub queue: RawQueue,
    pub batches: Vec<DummyBatch>,
    pub fence: Option<RawFence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Executable,
}

struct PoolState {
    family: QueueFamilyId,
    policy: CommandPoolPolicy,
    allocated: HashSet<u64>,
    free: Vec<u64>,
}

struct CommandBufferState {
    pool: u64,
    state: RecordingState,
    begun_since_reset: bool,
    commands: Vec<DummyCommand>,
}

struct MemoryState {
    memory_type_index: u32,
    heap_index: u32,
    size: u64,
    host_visible: bool,
    coherent: bool,
    mapped: bool,
    /// Host-visible bytes; also the device copy for coherent memory.
    storage: Option<Box<[u8]>>,
    /// Device copy of non-coherent memory.
    device_copy: Option<Box<[u8]>>,
}

impl MemoryState {
    fn storage(&mut self) -> &mut [u8] {
        let size = self.size as usize;
        self.storage
            .get_or_insert_with(|| vec![0u8; size].into_boxed_slice())
    }

    fn device_view(&mut self) -> &mut [u8] {
        if self.coherent || !self.host_visible {
            return self.storage();
        }
        let size = self.size as usize;
        self.device_copy
            .get_or_insert_with(|| vec![0u8; size].into_boxed_slice())
    }

    fn check_range(&self, range: &MappedMemoryRange, atom: u64, operation: &str) {
        assert!(self.mapped, "{operation} on memory that is not mapped");
        assert!(
            range.offset + range.size <= self.size,
            "{operation} range {}..{} exceeds allocation size {}",
            range.offset,
            range.offset + range.size,
            self.size
        );
        assert!(
            range.offset % atom == 0
                && (range.size % atom == 0 || range.offset + range.size == self.size),
            "{operation} range {}..{} is not aligned to nonCoherentAtomSize {atom}",
            range.offset,
            range.offset + range.size
        );
    }
}

struct ResourceState {
    requirements: MemoryRequirements,
    bound: Option<(u64, u64)>,
}

struct SurfaceState {
    capabilities: SurfaceCapabilities,
    out_of_date: bool,
    suboptimal: bool,
}

struct SwapchainState {
    surface: u64,
    images: Vec<u64>,
    acquired: Vec<bool>,
    next: usize,
    retired: bool,
    presents: u64,
}

struct PendingWork {
    queue: RawQueue,
    fence: Option<u64>,
}

struct DummyState {
    next_handle: u64,
    pools: HashMap<u64, PoolState>,
    command_buffers: HashMap<u64, CommandBufferState>,
    memory: HashMap<u64, MemoryState>,
    heap_usage: Vec<u64>,
    allocation_calls: u64,
    buffers: HashMap<u64, ResourceState>,
    images: HashMap<u64, ResourceState>,
    resource_type_bits: Option<u32>,
    /// Result returned by the next buffer or image bind instead of binding.
    bind_failure: Option<DriverResult>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, u32>,
    surfaces: HashMap<u64, SurfaceState>,
    swapchains: HashMap<u64, SwapchainState>,
    pending: Vec<PendingWork>,
    submissions: Vec<DummySubmission>,
}

impl DummyState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn fence_signaled(&self, fence: RawFence) -> bool {
        match self.fences.get(&fence.0) {
            Some(signaled) => *signaled,
            None => panic!("unknown fence {fence:?}"),
        }
    }

    fn signal_semaphore(&mut self, semaphore: RawSemaphore) {
        let pending = self
            .semaphores
            .get_mut(&semaphore.0)
            .unwrap_or_else(|| panic!("unknown semaphore {semaphore:?}"));
        assert!(
            *pending == 0,
            "binary semaphore {semaphore:?} signaled while a signal is already pending"
        );
        *pending += 1;
    }

    fn wait_semaphore(&mut self, semaphore: RawSemaphore) {
        let pending = self
            .semaphores
            .get_mut(&semaphore.0)
            .unwrap_or_else(|| panic!("unknown semaphore {semaphore:?}"));
        assert!(
            *pending > 0,
            "semaphore {semaphore:?} waited on without a pending signal"
        );
        *pending -= 1;
    }

    fn memory_type_mask(&self, type_count: usize) -> u32 {
        self.resource_type_bits
            .unwrap_or_else(|| ((1u64 << type_count) - 1) as u32)
    }
}

/// Dummy GPU driver.
pub struct DummyDriver {
    config: DummyConfig,
    state: Mutex<DummyState>,
    fence_signal: Condvar,
}

impl DummyDriver {
    /// Create a dummy driver with the default device layout.
    pub fn new() -> Self {
        Self::with_config(DummyConfig::default())
    }

    pub fn with_config(config: DummyConfig) -> Self {
        let heap_count = config.memory_properties.heaps.len();
        Self {
            config,
            state: Mutex::new(DummyState {
                next_handle: 0,
                pools: HashMap::new(),
                command_buffers: HashMap::new(),
                memory: HashMap::new(),
                heap_usage: vec![0; heap_count],
                allocation_calls: 0,
                buffers: HashMap::new(),
                images: HashMap::new(),
                resource_type_bits: None,
                bind_failure: None,
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                surfaces: HashMap::new(),
                swapchains: HashMap::new(),
                pending: Vec::new(),
                submissions: Vec::new(),
            }),
            fence_signal: Condvar::new(),
        }
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock()
    }

    fn decode_queue(queue: RawQueue) -> (u32, u32) {
        (((queue.0 >> 32) - 1) as u32, queue.0 as u32)
    }

    fn complete_where(&self, mut predicate: impl FnMut(&PendingWork) -> bool) {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        let mut completed = 0usize;
        for work in pending {
            if predicate(&work) {
                if let Some(fence) = work.fence {
                    state.fences.insert(fence, true);
                }
                completed += 1;
            } else {
                state.pending.push(work);
            }
        }
        drop(state);
        if completed > 0 {
            log::trace!("DummyDriver: completed {} pending submissions", completed);
            self.fence_signal.notify_all();
        }
    }

    // ------------------------------------------------------------------
    // Test hooks
    // ------------------------------------------------------------------

    /// Complete all pending work, signaling its fences.
    pub fn complete_all(&self) {
        self.complete_where(|_| true);
    }

    /// Number of submit calls whose work has not completed yet.
    pub fn pending_submissions(&self) -> usize {
        self.lock().pending.len()
    }

    /// Signal a fence from the "GPU" side.
    pub fn signal_fence(&self, fence: RawFence) {
        let mut state = self.lock();
        assert!(state.fences.contains_key(&fence.0), "unknown fence {fence:?}");
        state.fences.insert(fence.0, true);
        drop(state);
        self.fence_signal.notify_all();
    }

    /// Every submit call made so far, in order.
    pub fn submissions(&self) -> Vec<DummySubmission> {
        self.lock().submissions.clone()
    }

    /// Commands recorded into a command buffer since its last reset.
    pub fn recorded_commands(&self, buffer: RawCommandBuffer) -> Vec<DummyCommand> {
        self.lock()
            .command_buffers
            .get(&buffer.0)
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    pub fn live_command_pools(&self) -> usize {
        self.lock().pools.len()
    }

    /// Family and policy a pool was created with.
    pub fn command_pool_info(
        &self,
        pool: RawCommandPool,
    ) -> Option<(QueueFamilyId, CommandPoolPolicy)> {
        self.lock().pools.get(&pool.0).map(|p| (p.family, p.policy))
    }

    /// Command buffers allocated from a pool and not freed yet.
    pub fn outstanding_command_buffers(&self, pool: RawCommandPool) -> usize {
        self.lock()
            .pools
            .get(&pool.0)
            .map_or(0, |p| p.allocated.len())
    }

    /// Native memory allocations currently alive.
    pub fn live_allocation_count(&self) -> usize {
        self.lock().memory.len()
    }

    /// Successful native allocation calls since creation.
    pub fn allocation_calls(&self) -> u64 {
        self.lock().allocation_calls
    }

    pub fn live_fences(&self) -> usize {
        self.lock().fences.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.lock().semaphores.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.lock().images.len()
    }

    /// Restrict the memory types reported for new buffers and images.
    pub fn set_resource_memory_type_bits(&self, type_bits: Option<u32>) {
        self.lock().resource_type_bits = type_bits;
    }

    /// Make the next buffer or image bind fail with `result`.
    pub fn fail_next_bind(&self, result: DriverResult) {
        self.lock().bind_failure = Some(result);
    }

    /// Write bytes as the GPU would (into the device copy of the memory).
    pub fn write_device_memory(&self, memory: RawMemory, offset: u64, data: &[u8]) {
        let mut state = self.lock();
        let mem = state
            .memory
            .get_mut(&memory.0)
            .unwrap_or_else(|| panic!("unknown memory {memory:?}"));
        let start = offset as usize;
        mem.device_view()[start..start + data.len()].copy_from_slice(data);
    }

    /// Read bytes as the GPU sees them.
    pub fn read_device_memory(&self, memory: RawMemory, offset: u64, len: usize) -> Vec<u8> {
        let mut state = self.lock();
        let mem = state
            .memory
            .get_mut(&memory.0)
            .unwrap_or_else(|| panic!("unknown memory {memory:?}"));
        let start = offset as usize;
        mem.device_view()[start..start + len].to_vec()
    }

    /// Capabilities of a typical window surface of the given size.
    pub fn default_surface_capabilities(extent: Extent2D) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 4,
            current_extent: Some(extent),
            min_extent: Extent2D::new(1, 1),
            max_extent: Extent2D::new(16384, 16384),
            supported_usage: ImageUsage::COLOR_ATTACHMENT
                | ImageUsage::TRANSFER_DST
                | ImageUsage::TRANSFER_SRC,
            formats: vec![
                SurfaceFormat::new(ImageFormat::Bgra8Srgb),
                SurfaceFormat::new(ImageFormat::Bgra8Unorm),
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
        }
    }

    /// Create a simulated window surface.
    pub fn create_surface(&self, capabilities: SurfaceCapabilities) -> RawSurface {
        let mut state = self.lock();
        let handle = state.handle();
        state.surfaces.insert(
            handle,
            SurfaceState {
                capabilities,
                out_of_date: false,
                suboptimal: false,
            },
        );
        RawSurface(handle)
    }

    /// Make the surface report out-of-date until a new swapchain is created for it.
    pub fn invalidate_surface(&self, surface: RawSurface) {
        if let Some(s) = self.lock().surfaces.get_mut(&surface.0) {
            s.out_of_date = true;
        }
    }

    pub fn set_surface_suboptimal(&self, surface: RawSurface, suboptimal: bool) {
        if let Some(s) = self.lock().surfaces.get_mut(&surface.0) {
            s.suboptimal = suboptimal;
        }
    }

    /// Resize the surface and mark existing swapchains out of date.
    pub fn resize_surface(&self, surface: RawSurface, extent: Extent2D) {
        if let Some(s) = self.lock().surfaces.get_mut(&surface.0) {
            s.capabilities.current_extent = Some(extent);
            s.out_of_date = true;
        }
    }

    /// Images of the swapchain currently acquired by the application.
    pub fn acquired_image_count(&self, swapchain: RawSwapchain) -> usize {
        self.lock()
            .swapchains
            .get(&swapchain.0)
            .map_or(0, |s| s.acquired.iter().filter(|a| **a).count())
    }

    /// Number of presents performed on the swapchain.
    pub fn present_count(&self, swapchain: RawSwapchain) -> u64 {
        self.lock()
            .swapchains
            .get(&swapchain.0)
            .map_or(0, |s| s.presents)
    }
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for DummyDriver {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn queue_families(&self) -> Vec<QueueFamilyProperties> {
        self.config.queue_families.clone()
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.config.memory_properties.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.config.limits
    }

    fn get_queue(&self, family: QueueFamilyId, index: u32) -> RawQueue {
        let properties = self
            .config
            .queue_families
            .get(family.index() as usize)
            .unwrap_or_else(|| panic!("unknown queue family {family:?}"));
        assert!(
            index < properties.queue_count,
            "queue index {index} out of range for family {family:?} with {} queues",
            properties.queue_count
        );
        RawQueue(((family.index() as u64 + 1) << 32) | index as u64)
    }

    fn create_command_pool(
        &self,
        family: QueueFamilyId,
        policy: CommandPoolPolicy,
    ) -> GpuResult<RawCommandPool> {
        assert!(
            (family.index() as usize) < self.config.queue_families.len(),
            "unknown queue family {family:?}"
        );
        let mut state = self.lock();
        let handle = state.handle();
        state.pools.insert(
            handle,
            PoolState {
                family,
                policy,
                allocated: HashSet::new(),
                free: Vec::new(),
            },
        );
        log::trace!(
            "DummyDriver: created command pool {} (family {}, {:?})",
            handle,
            family.index(),
            policy
        );
        Ok(RawCommandPool(handle))
    }

    unsafe fn destroy_command_pool(&self, pool: RawCommandPool) {
        let mut state = self.lock();
        let removed = state
            .pools
            .remove(&pool.0)
            .unwrap_or_else(|| panic!("destroying unknown command pool {pool:?}"));
        for cb in removed.allocated.iter().chain(removed.free.iter()) {
            state.command_buffers.remove(cb);
        }
        log::trace!("DummyDriver: destroyed command pool {}", pool.0);
    }

    unsafe fn reset_command_pool(&self, pool: RawCommandPool) -> GpuResult<()> {
        let mut state = self.lock();
        let buffers: Vec<u64> = match state.pools.get(&pool.0) {
            Some(p) => p.allocated.iter().copied().collect(),
            None => panic!("resetting unknown command pool {pool:?}"),
        };
        for cb in buffers {
            if let Some(cb) = state.command_buffers.get_mut(&cb) {
                cb.state = RecordingState::Initial;
                cb.begun_since_reset = false;
                cb.commands.clear();
            }
        }
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        pool: RawCommandPool,
        count: u32,
    ) -> GpuResult<Vec<RawCommandBuffer>> {
        let mut state = self.lock();
        let mut handles = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let reused = match state.pools.get_mut(&pool.0) {
                Some(p) => p.free.pop(),
                None => panic!("allocating from unknown command pool {pool:?}"),
            };
            let handle = match reused {
                Some(handle) => handle,
                None => state.handle(),
            };
            if let Some(p) = state.pools.get_mut(&pool.0) {
                p.allocated.insert(handle);
            }
            state.command_buffers.insert(
                handle,
                CommandBufferState {
                    pool: pool.0,
                    state: RecordingState::Initial,
                    begun_since_reset: false,
                    commands: Vec::new(),
                },
            );
            handles.push(RawCommandBuffer(handle));
        }
        Ok(handles)
    }

    unsafe fn free_command_buffers(&self, pool: RawCommandPool, buffers: &[RawCommandBuffer]) {
        let mut state = self.lock();
        for buffer in buffers {
            let owned = state
                .pools
                .get_mut(&pool.0)
                .is_some_and(|p| p.allocated.remove(&buffer.0));
            assert!(
                owned,
                "command buffer {buffer:?} freed to a pool it was not allocated from"
            );
            if let Some(p) = state.pools.get_mut(&pool.0) {
                p.free.push(buffer.0);
            }
            state.command_buffers.remove(&buffer.0);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        buffer: RawCommandBuffer,
        _one_time_submit: bool,
    ) -> GpuResult<()> {
        let mut state = self.lock();
        let pool = match state.command_buffers.get(&buffer.0) {
            Some(cb) => cb.pool,
            None => panic!("beginning unknown command buffer {buffer:?}"),
        };
        let policy = state.pools.get(&pool).map(|p| p.policy);
        let Some(cb) = state.command_buffers.get_mut(&buffer.0) else {
            unreachable!()
        };
        assert!(
            cb.state != RecordingState::Recording,
            "command buffer {buffer:?} is already recording"
        );
        if cb.begun_since_reset {
            assert!(
                policy != Some(CommandPoolPolicy::NonResettable),
                "command buffer {buffer:?} from a non-resettable pool implicitly reset"
            );
        }
        cb.state = RecordingState::Recording;
        cb.begun_since_reset = true;
        cb.commands.clear();
        Ok(())
    }

    unsafe fn end_command_buffer(&self, buffer: RawCommandBuffer) -> GpuResult<()> {
        let mut state = self.lock();
        let cb = state
            .command_buffers
            .get_mut(&buffer.0)
            .unwrap_or_else(|| panic!("ending unknown command buffer {buffer:?}"));
        assert!(
            cb.state == RecordingState::Recording,
            "command buffer {buffer:?} ended while not recording"
        );
        cb.state = RecordingState::Executable;
        Ok(())
    }

    unsafe fn reset_command_buffer(&self, buffer: RawCommandBuffer) -> GpuResult<()> {
        let mut state = self.lock();
        let pool = match state.command_buffers.get(&buffer.0) {
            Some(cb) => cb.pool,
            None => panic!("resetting unknown command buffer {buffer:?}"),
        };
        assert!(
            state.pools.get(&pool).map(|p| p.policy) != Some(CommandPoolPolicy::NonResettable),
            "command buffer {buffer:?} reset individually but its pool is non-resettable"
        );
        if let Some(cb) = state.command_buffers.get_mut(&buffer.0) {
            cb.state = RecordingState::Initial;
            cb.begun_since_reset = false;
            cb.commands.clear();
        }
        Ok(())
    }

    unsafe fn cmd_ownership_barrier(
        &self,
        buffer: RawCommandBuffer,
        transfer: &OwnershipTransfer,
        half: TransferHalf,
    ) {
        let mut state = self.lock();
        let cb = state
            .command_buffers
            .get_mut(&buffer.0)
            .unwrap_or_else(|| panic!("recording into unknown command buffer {buffer:?}"));
        assert!(
            cb.state == RecordingState::Recording,
            "command buffer {buffer:?} is not recording"
        );
        cb.commands.push(DummyCommand::OwnershipBarrier {
            transfer: transfer.clone(),
            half,
        });
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> GpuResult<RawMemory> {
        assert!(size > 0, "zero-sized memory allocation");
        let memory_type = *self
            .config
            .memory_properties
            .memory_type(memory_type_index)
            .unwrap_or_else(|| panic!("unknown memory type {memory_type_index}"));
        let heap_index = memory_type.heap_index as usize;
        let mut state = self.lock();

        if state.memory.len() as u32 >= self.config.limits.max_memory_allocation_count {
            return Err(GpuError::driver(
                "vkAllocateMemory",
                DriverResult::TooManyObjects,
            ));
        }
        let heap = self.config.memory_properties.heaps[heap_index];
        if state.heap_usage[heap_index].saturating_add(size) > heap.size {
            let result = if heap.device_local {
                DriverResult::OutOfDeviceMemory
            } else {
                DriverResult::OutOfHostMemory
            };
            return Err(GpuError::driver("vkAllocateMemory", result));
        }

        state.heap_usage[heap_index] += size;
        state.allocation_calls += 1;
        let handle = state.handle();
        let flags = memory_type.property_flags;
        state.memory.insert(
            handle,
            MemoryState {
                memory_type_index,
                heap_index: memory_type.heap_index,
                size,
                host_visible: flags.contains(MemoryPropertyFlags::HOST_VISIBLE),
                coherent: flags.contains(MemoryPropertyFlags::HOST_COHERENT),
                mapped: false,
                storage: None,
                device_copy: None,
            },
        );
        log::trace!(
            "DummyDriver: allocated memory {} ({} bytes, type {})",
            handle,
            size,
            memory_type_index
        );
        Ok(RawMemory(handle))
    }

    unsafe fn free_memory(&self, memory: RawMemory) {
        let mut state = self.lock();
        let removed = state
            .memory
            .remove(&memory.0)
            .unwrap_or_else(|| panic!("freeing unknown memory {memory:?}"));
        assert!(!removed.mapped, "memory {memory:?} freed while mapped");
        state.heap_usage[removed.heap_index as usize] -= removed.size;
        log::trace!("DummyDriver: freed memory {}", memory.0);
    }

    unsafe fn map_memory(
        &self,
        memory: RawMemory,
        offset: u64,
        size: u64,
    ) -> GpuResult<NonNull<u8>> {
        let mut state = self.lock();
        let mem = state
            .memory
            .get_mut(&memory.0)
            .unwrap_or_else(|| panic!("mapping unknown memory {memory:?}"));
        assert!(
            mem.host_visible,
            "mapping memory of type {} which is not host visible",
            mem.memory_type_index
        );
        assert!(!mem.mapped, "memory {memory:?} is already mapped");
        assert!(
            offset + size <= mem.size,
            "map range {}..{} exceeds allocation size {}",
            offset,
            offset + size,
            mem.size
        );
        mem.mapped = true;
        let base = mem.storage().as_mut_ptr();
        // SAFETY: offset is within the storage, which lives until the memory is freed.
        let ptr = unsafe { base.add(offset as usize) };
        NonNull::new(ptr).ok_or(GpuError::driver(
            "vkMapMemory",
            DriverResult::MemoryMapFailed,
        ))
    }

    unsafe fn unmap_memory(&self, memory: RawMemory) {
        let mut state = self.lock();
        let mem = state
            .memory
            .get_mut(&memory.0)
            .unwrap_or_else(|| panic!("unmapping unknown memory {memory:?}"));
        assert!(mem.mapped, "memory {memory:?} unmapped while not mapped");
        mem.mapped = false;
    }

    unsafe fn flush_memory(&self, ranges: &[MappedMemoryRange]) -> GpuResult<()> {
        let atom = self.config.limits.non_coherent_atom_size;
        let mut state = self.lock();
        for range in ranges {
            let mem = state
                .memory
                .get_mut(&range.memory.0)
                .unwrap_or_else(|| panic!("flushing unknown memory {:?}", range.memory));
            mem.check_range(range, atom, "flush");
            if mem.coherent {
                continue;
            }
            let (start, end) = (range.offset as usize, (range.offset + range.size) as usize);
            let host = mem.storage()[start..end].to_vec();
            mem.device_view()[start..end].copy_from_slice(&host);
        }
        Ok(())
    }

    unsafe fn invalidate_memory(&self, ranges: &[MappedMemoryRange]) -> GpuResult<()> {
        let atom = self.config.limits.non_coherent_atom_size;
        let mut state = self.lock();
        for range in ranges {
            let mem = state
                .memory
                .get_mut(&range.memory.0)
                .unwrap_or_else(|| panic!("invalidating unknown memory {:?}", range.memory));
            mem.check_range(range, atom, "invalidate");
            if mem.coherent {
                continue;
            }
            let (start, end) = (range.offset as usize, (range.offset + range.size) as usize);
            let device = mem.device_view()[start..end].to_vec();
            mem.storage()[start..end].copy_from_slice(&device);
        }
        Ok(())
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GpuResult<RawBuffer> {
        log::trace!(
            "DummyDriver: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let mut state = self.lock();
        let type_bits = state.memory_type_mask(self.config.memory_properties.types.len());
        let handle = state.handle();
        state.buffers.insert(
            handle,
            ResourceState {
                requirements: MemoryRequirements {
                    size: descriptor.size.max(1).next_multiple_of(16),
                    alignment: BUFFER_ALIGNMENT,
                    type_bits,
                },
                bound: None,
            },
        );
        Ok(RawBuffer(handle))
    }

    unsafe fn destroy_buffer(&self, buffer: RawBuffer) {
        let removed = self.lock().buffers.remove(&buffer.0);
        assert!(removed.is_some(), "destroying unknown buffer {buffer:?}");
    }

    fn buffer_memory_requirements(&self, buffer: RawBuffer) -> MemoryRequirements {
        match self.lock().buffers.get(&buffer.0) {
            Some(b) => b.requirements,
            None => panic!("unknown buffer {buffer:?}"),
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: RawBuffer,
        memory: RawMemory,
        offset: u64,
    ) -> GpuResult<()> {
        let mut state = self.lock();
        if let Some(result) = state.bind_failure.take() {
            return Err(GpuError::driver("vkBindBufferMemory", result));
        }
        let (mem_size, mem_type) = match state.memory.get(&memory.0) {
            Some(m) => (m.size, m.memory_type_index),
            None => panic!("binding unknown memory {memory:?}"),
        };
        let resource = state
            .buffers
            .get_mut(&buffer.0)
            .unwrap_or_else(|| panic!("binding unknown buffer {buffer:?}"));
        bind_resource(resource, memory, mem_size, mem_type, offset, "buffer");
        Ok(())
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> GpuResult<RawImage> {
        log::trace!(
            "DummyDriver: creating image {:?} ({}x{})",
            descriptor.label,
            descriptor.extent.width,
            descriptor.extent.height
        );
        let mut size = 0u64;
        for level in 0..descriptor.mip_levels.max(1) {
            let width = (descriptor.extent.width >> level).max(1) as u64;
            let height = (descriptor.extent.height >> level).max(1) as u64;
            size += width * height * descriptor.format.bytes_per_pixel().max(1) as u64;
        }
        let mut state = self.lock();
        let type_bits = state.memory_type_mask(self.config.memory_properties.types.len());
        let handle = state.handle();
        state.images.insert(
            handle,
            ResourceState {
                requirements: MemoryRequirements {
                    size: size.max(1).next_multiple_of(IMAGE_ALIGNMENT),
                    alignment: IMAGE_ALIGNMENT,
                    type_bits,
                },
                bound: None,
            },
        );
        Ok(RawImage(handle))
    }

    unsafe fn destroy_image(&self, image: RawImage) {
        let removed = self.lock().images.remove(&image.0);
        assert!(removed.is_some(), "destroying unknown image {image:?}");
    }

    fn image_memory_requirements(&self, image: RawImage) -> MemoryRequirements {
        match self.lock().images.get(&image.0) {
            Some(i) => i.requirements,
            None => panic!("unknown image {image:?}"),
        }
    }

    unsafe fn bind_image_memory(
        &self,
        image: RawImage,
        memory: RawMemory,
        offset: u64,
    ) -> GpuResult<()> {
        let mut state = self.lock();
        if let Some(result) = state.bind_failure.take() {
            return Err(GpuError::driver("vkBindImageMemory", result));
        }
        let (mem_size, mem_type) = match state.memory.get(&memory.0) {
            Some(m) => (m.size, m.memory_type_index),
            None => panic!("binding unknown memory {memory:?}"),
        };
        let resource = state
            .images
            .get_mut(&image.0)
            .unwrap_or_else(|| panic!("binding unknown image {image:?}"));
        bind_resource(resource, memory, mem_size, mem_type, offset, "image");
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<RawFence> {
        let mut state = self.lock();
        let handle = state.handle();
        state.fences.insert(handle, signaled);
        Ok(RawFence(handle))
    }

    unsafe fn destroy_fence(&self, fence: RawFence) {
        let mut state = self.lock();
        let in_flight = state.pending.iter().any(|w| w.fence == Some(fence.0));
        assert!(!in_flight, "fence {fence:?} destroyed while its work is pending");
        state.fences.remove(&fence.0);
    }

    fn fence_status(&self, fence: RawFence) -> GpuResult<bool> {
        Ok(self.lock().fence_signaled(fence))
    }

    fn reset_fences(&self, fences: &[RawFence]) -> GpuResult<()> {
        let mut state = self.lock();
        for fence in fences {
            let in_flight = state.pending.iter().any(|w| w.fence == Some(fence.0));
            assert!(!in_flight, "fence {fence:?} reset while its work is pending");
            match state.fences.get_mut(&fence.0) {
                Some(signaled) => *signaled = false,
                None => panic!("resetting unknown fence {fence:?}"),
            }
        }
        Ok(())
    }

    fn wait_for_fences(
        &self,
        fences: &[RawFence],
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> GpuResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            let satisfied = if wait_all {
                fences.iter().all(|f| state.fence_signaled(*f))
            } else {
                fences.iter().any(|f| state.fence_signaled(*f))
            };
            if satisfied {
                return Ok(true);
            }
            match deadline {
                None => self.fence_signal.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    let _ = self.fence_signal.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn create_semaphore(&self) -> GpuResult<RawSemaphore> {
        let mut state = self.lock();
        let handle = state.handle();
        state.semaphores.insert(handle, 0);
        Ok(RawSemaphore(handle))
    }

    unsafe fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        let removed = self.lock().semaphores.remove(&semaphore.0);
        assert!(removed.is_some(), "destroying unknown semaphore {semaphore:?}");
    }

    unsafe fn queue_submit(
        &self,
        queue: RawQueue,
        submits: &[SubmitInfo<'_>],
        fence: Option<RawFence>,
    ) -> GpuResult<()> {
        let mut state = self.lock();
        if let Some(fence) = fence {
            assert!(
                !state.fence_signaled(fence),
                "fence {fence:?} submitted while still signaled"
            );
        }

        let mut batches = Vec::with_capacity(submits.len());
        for submit in submits {
            for wait in submit.wait_semaphores {
                state.wait_semaphore(wait.semaphore);
            }
            for cb in submit.command_buffers {
                let executable = state
                    .command_buffers
                    .get(&cb.0)
                    .is_some_and(|c| c.state == RecordingState::Executable);
                assert!(
                    executable,
                    "command buffer {cb:?} submitted without finished recording"
                );
            }
            for signal in submit.signal_semaphores {
                state.signal_semaphore(signal.semaphore);
            }
            batches.push(DummyBatch {
                wait_semaphores: submit.wait_semaphores.to_vec(),
                command_buffers: submit.command_buffers.to_vec(),
                signal_semaphores: submit.signal_semaphores.to_vec(),
            });
        }

        log::trace!(
            "DummyDriver: submit of {} batches to queue {:#x}",
            batches.len(),
            queue.0
        );
        state.submissions.push(DummySubmission {
            queue,
            batches,
            fence,
        });

        if self.config.auto_complete {
            if let Some(fence) = fence {
                state.fences.insert(fence.0, true);
                drop(state);
                self.fence_signal.notify_all();
            }
        } else {
            state.pending.push(PendingWork {
                queue,
                fence: fence.map(|f| f.0),
            });
        }
        Ok(())
    }

    fn queue_wait_idle(&self, queue: RawQueue) -> GpuResult<()> {
        self.complete_where(|work| work.queue == queue);
        Ok(())
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        self.complete_all();
        Ok(())
    }

    fn surface_capabilities(&self, surface: RawSurface) -> GpuResult<SurfaceCapabilities> {
        match self.lock().surfaces.get(&surface.0) {
            Some(s) => Ok(s.capabilities.clone()),
            None => Err(GpuError::driver(
                "vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
                DriverResult::SurfaceLost,
            )),
        }
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> GpuResult<RawSwapchain> {
        let mut state = self.lock();
        let Some(surface) = state.surfaces.get_mut(&info.surface.0) else {
            return Err(GpuError::driver(
                "vkCreateSwapchainKHR",
                DriverResult::SurfaceLost,
            ));
        };
        let caps = &surface.capabilities;
        assert!(
            info.image_count >= caps.min_image_count
                && (caps.max_image_count == 0 || info.image_count <= caps.max_image_count),
            "swapchain image count {} outside surface limits",
            info.image_count
        );
        assert!(
            caps.formats.iter().any(|f| f.format == info.format),
            "swapchain format {:?} not supported by the surface",
            info.format
        );
        surface.out_of_date = false;

        if let Some(old) = info.old_swapchain {
            if let Some(old) = state.swapchains.get_mut(&old.0) {
                old.retired = true;
            }
        }

        let mut images = Vec::with_capacity(info.image_count as usize);
        for _ in 0..info.image_count {
            let image = state.handle();
            state.images.insert(
                image,
                ResourceState {
                    requirements: MemoryRequirements {
                        size: 0,
                        alignment: 1,
                        type_bits: 0,
                    },
                    bound: Some((0, 0)),
                },
            );
            images.push(image);
        }
        let handle = state.handle();
        state.swapchains.insert(
            handle,
            SwapchainState {
                surface: info.surface.0,
                acquired: vec![false; images.len()],
                images,
                next: 0,
                retired: false,
                presents: 0,
            },
        );
        log::trace!(
            "DummyDriver: created swapchain {} ({} images, {}x{})",
            handle,
            info.image_count,
            info.extent.width,
            info.extent.height
        );
        Ok(RawSwapchain(handle))
    }

    unsafe fn destroy_swapchain(&self, swapchain: RawSwapchain) {
        let mut state = self.lock();
        let removed = state
            .swapchains
            .remove(&swapchain.0)
            .unwrap_or_else(|| panic!("destroying unknown swapchain {swapchain:?}"));
        for image in removed.images {
            state.images.remove(&image);
        }
    }

    fn swapchain_images(&self, swapchain: RawSwapchain) -> GpuResult<Vec<RawImage>> {
        match self.lock().swapchains.get(&swapchain.0) {
            Some(s) => Ok(s.images.iter().map(|i| RawImage(*i)).collect()),
            None => panic!("unknown swapchain {swapchain:?}"),
        }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: RawSwapchain,
        timeout: Option<Duration>,
        semaphore: Option<RawSemaphore>,
        fence: Option<RawFence>,
    ) -> GpuResult<AcquireOutcome> {
        let mut state = self.lock();
        let (surface, retired) = match state.swapchains.get(&swapchain.0) {
            Some(s) => (s.surface, s.retired),
            None => panic!("acquiring from unknown swapchain {swapchain:?}"),
        };
        let (out_of_date, suboptimal) = match state.surfaces.get(&surface) {
            Some(s) => (s.out_of_date, s.suboptimal),
            None => {
                return Err(GpuError::driver(
                    "vkAcquireNextImageKHR",
                    DriverResult::SurfaceLost,
                ));
            }
        };
        if out_of_date || retired {
            return Ok(AcquireOutcome::OutOfDate);
        }

        let Some(chain) = state.swapchains.get_mut(&swapchain.0) else {
            unreachable!()
        };
        let count = chain.images.len();
        let free = (0..count)
            .map(|k| (chain.next + k) % count)
            .find(|i| !chain.acquired[*i]);
        let Some(index) = free else {
            return Ok(if timeout == Some(Duration::ZERO) {
                AcquireOutcome::NotReady
            } else {
                AcquireOutcome::Timeout
            });
        };
        chain.acquired[index] = true;
        chain.next = (index + 1) % count;

        if let Some(semaphore) = semaphore {
            state.signal_semaphore(semaphore);
        }
        if let Some(fence) = fence {
            assert!(
                !state.fence_signaled(fence),
                "acquire fence {fence:?} is still signaled"
            );
            state.fences.insert(fence.0, true);
            drop(state);
            self.fence_signal.notify_all();
        }

        Ok(AcquireOutcome::Acquired {
            index: index as u32,
            suboptimal,
        })
    }

    unsafe fn queue_present(
        &self,
        queue: RawQueue,
        swapchain: RawSwapchain,
        index: u32,
        wait_semaphore: Option<RawSemaphore>,
    ) -> GpuResult<PresentOutcome> {
        let (family, _) = Self::decode_queue(queue);
        let can_present = self
            .config
            .queue_families
            .get(family as usize)
            .is_some_and(|f| f.supports_present);
        assert!(can_present, "queue family {family} cannot present");

        let mut state = self.lock();
        if let Some(semaphore) = wait_semaphore {
            state.wait_semaphore(semaphore);
        }
        let chain = state
            .swapchains
            .get_mut(&swapchain.0)
            .unwrap_or_else(|| panic!("presenting to unknown swapchain {swapchain:?}"));
        let slot = chain
            .acquired
            .get_mut(index as usize)
            .unwrap_or_else(|| panic!("presenting out-of-range image {index}"));
        assert!(*slot, "presenting image {index} that was not acquired");
        *slot = false;
        chain.presents += 1;
        let surface = chain.surface;

        Ok(match state.surfaces.get(&surface) {
            Some(s) if s.out_of_date => PresentOutcome::OutOfDate,
            Some(s) if s.suboptimal => PresentOutcome::Suboptimal,
            Some(_) => PresentOutcome::Presented,
            None => {
                return Err(GpuError::driver(
                    "vkQueuePresentKHR",
                    DriverResult::SurfaceLost,
                ));
            }
        })
    }
}

fn bind_resource(
    resource: &mut ResourceState,
    memory: RawMemory,
    memory_size: u64,
    memory_type_index: u32,
    offset: u64,
    kind: &str,
) {
    let requirements = resource.requirements;
    assert!(resource.bound.is_none(), "{kind} is already bound to memory");
    assert!(
        requirements.type_bits & (1 << memory_type_index) != 0,
        "{kind} cannot be bound to memory type {memory_type_index}"
    );
    assert!(
        offset % requirements.alignment == 0,
        "{kind} bound at offset {offset} not aligned to {}",
        requirements.alignment
    );
    assert!(
        offset + requirements.size <= memory_size,
        "{kind} of {} bytes does not fit at offset {offset} in {memory_size} bytes",
        requirements.size
    );
    resource.bound = Some((memory.0, offset));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffers_are_recycled() {
        let driver = DummyDriver::new();
        let pool = driver
            .create_command_pool(QueueFamilyId(0), CommandPoolPolicy::Default)
            .unwrap();
        let first = driver.allocate_command_buffers(pool, 3).unwrap();
        assert_eq!(driver.outstanding_command_buffers(pool), 3);

        unsafe { driver.free_command_buffers(pool, &first) };
        assert_eq!(driver.outstanding_command_buffers(pool), 0);

        let mut second = driver.allocate_command_buffers(pool, 3).unwrap();
        let mut first = first;
        first.sort();
        second.sort();
        assert_eq!(first, second);

        unsafe { driver.destroy_command_pool(pool) };
        assert_eq!(driver.live_command_pools(), 0);
    }

    #[test]
    fn test_fence_wait_timeout() {
        let driver = DummyDriver::new();
        let fence = driver.create_fence(false).unwrap();
        let done = driver
            .wait_for_fences(&[fence], true, Some(Duration::from_millis(5)))
            .unwrap();
        assert!(!done);

        driver.signal_fence(fence);
        assert!(driver.wait_for_fences(&[fence], true, None).unwrap());
    }

    #[test]
    fn test_manual_completion() {
        let driver = DummyDriver::with_config(DummyConfig::new().with_auto_complete(false));
        let queue = driver.get_queue(QueueFamilyId(0), 0);
        let fence = driver.create_fence(false).unwrap();
        unsafe { driver.queue_submit(queue, &[], Some(fence)).unwrap() };
        assert!(!driver.fence_status(fence).unwrap());
        assert_eq!(driver.pending_submissions(), 1);

        driver.queue_wait_idle(queue).unwrap();
        assert!(driver.fence_status(fence).unwrap());
        assert_eq!(driver.pending_submissions(), 0);
    }

    #[test]
    fn test_non_coherent_memory_keeps_separate_copies() {
        let driver = DummyDriver::new();
        let memory = driver.allocate_memory(256, 2).unwrap();
        unsafe {
            let ptr = driver.map_memory(memory, 0, 256).unwrap();
            std::ptr::write_bytes(ptr.as_ptr(), 0xAB, 256);
        }
        assert_eq!(driver.read_device_memory(memory, 0, 4), vec![0; 4]);

        let range = MappedMemoryRange {
            memory,
            offset: 0,
            size: 64,
        };
        unsafe { driver.flush_memory(&[range]).unwrap() };
        assert_eq!(driver.read_device_memory(memory, 0, 4), vec![0xAB; 4]);
        assert_eq!(driver.read_device_memory(memory, 64, 4), vec![0; 4]);

        unsafe {
            driver.unmap_memory(memory);
            driver.free_memory(memory);
        }
        assert_eq!(driver.live_allocation_count(), 0);
    }

    #[test]
    #[should_panic(expected = "not aligned to nonCoherentAtomSize")]
    fn test_unaligned_flush_panics() {
        let driver = DummyDriver::new();
        let memory = driver.allocate_memory(256, 2).unwrap();
        unsafe {
            driver.map_memory(memory, 0, 256).unwrap();
            let range = MappedMemoryRange {
                memory,
                offset: 4,
                size: 8,
            };
            let _ = driver.flush_memory(&[range]);
        }
    }

    #[test]
    fn test_allocation_count_limit() {
        let limits = DeviceLimits {
            max_memory_allocation_count: 2,
            ..DeviceLimits::default()
        };
        let driver = DummyDriver::with_config(DummyConfig::new().with_limits(limits));
        driver.allocate_memory(64, 0).unwrap();
        driver.allocate_memory(64, 0).unwrap();
        let err = driver.allocate_memory(64, 0).unwrap_err();
        assert_eq!(err.result(), Some(DriverResult::TooManyObjects));
    }

    #[test]
    #[should_panic(expected = "waited on without a pending signal")]
    fn test_wait_without_signal_panics() {
        let driver = DummyDriver::new();
        let queue = driver.get_queue(QueueFamilyId(0), 0);
        let semaphore = driver.create_semaphore().unwrap();
        let waits = [SemaphoreSubmit {
            semaphore,
            stage: crate::types::PipelineStageFlags::ALL_COMMANDS,
        }];
        let submit = SubmitInfo {
            wait_semaphores: &waits,
            ..Default::default()
        };
        unsafe {
            let _ = driver.queue_submit(queue, &[submit], None);
        }
    }
}
