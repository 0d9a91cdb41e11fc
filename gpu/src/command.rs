//! Command pools, command buffer batches and queue family ownership transfers.
//!
//! A [`CommandPool`] is bound to one queue family and one reset policy.
//! Command buffers are handed out in [`CommandBufferBatch`]es that keep their
//! pool alive and free every buffer back to it when dropped.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{RawBuffer, RawCommandBuffer, RawCommandPool, RawImage, TransferHalf};
use crate::device::Device;
use crate::error::GpuResult;
use crate::resource::{Buffer, Image};
use crate::types::{
    AccessFlags, CommandPoolPolicy, ImageLayout, PipelineStageFlags, QueueFamilyId, QueueKind,
};

/// A native command pool.
///
/// Command pools are externally synchronized: allocation, freeing and reset
/// go through an internal lock, while recording into a buffer requires
/// exclusive access to its batch.
pub struct CommandPool {
    device: Arc<Device>,
    raw: RawCommandPool,
    family: QueueFamilyId,
    kind: QueueKind,
    policy: CommandPoolPolicy,
    lock: Mutex<()>,
}

impl CommandPool {
    /// Create a pool on the family the device selected for `kind`.
    pub fn new(
        device: &Arc<Device>,
        kind: QueueKind,
        policy: CommandPoolPolicy,
    ) -> GpuResult<Arc<Self>> {
        let family = device.queue_family(kind);
        let raw = device.driver().create_command_pool(family, policy)?;
        log::debug!(
            "Created {:?} command pool on family {} ({:?})",
            kind,
            family.index(),
            policy
        );
        Ok(Arc::new(Self {
            device: Arc::clone(device),
            raw,
            family,
            kind,
            policy,
            lock: Mutex::new(()),
        }))
    }

    pub fn raw(&self) -> RawCommandPool {
        self.raw
    }

    pub fn family(&self) -> QueueFamilyId {
        self.family
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn policy(&self) -> CommandPoolPolicy {
        self.policy
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Allocate `count` primary command buffers from this pool.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn allocate(self: &Arc<Self>, count: u32) -> GpuResult<CommandBufferBatch> {
        assert!(count > 0, "command buffer batch must contain at least one buffer");
        let buffers = {
            let _guard = self.lock.lock();
            self.device
                .driver()
                .allocate_command_buffers(self.raw, count)?
        };
        log::trace!(
            "Allocated {} command buffers from {:?} pool {}",
            count,
            self.kind,
            self.raw.0
        );
        Ok(CommandBufferBatch {
            pool: Arc::clone(self),
            buffers,
        })
    }

    /// Reset every command buffer allocated from the pool.
    ///
    /// # Safety
    ///
    /// None of the pool's command buffers may be pending execution.
    pub unsafe fn reset(&self) -> GpuResult<()> {
        let _guard = self.lock.lock();
        // SAFETY: forwarded to the caller.
        unsafe { self.device.driver().reset_command_pool(self.raw) }
    }
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("raw", &self.raw.0)
            .field("family", &self.family)
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // SAFETY: every batch holds an Arc to its pool, so no buffer of this
        // pool is alive any more.
        unsafe { self.device.driver().destroy_command_pool(self.raw) };
        log::trace!("Destroyed command pool {}", self.raw.0);
    }
}

/// A group of command buffers allocated together from one pool.
///
/// The batch is move-only. Dropping it frees all of its buffers back to the
/// pool in a single call, so it must outlive any GPU work that executes them;
/// hand it to [`SubmitStaging::add_command_batch`](crate::SubmitStaging::add_command_batch)
/// to tie its lifetime to the submission.
pub struct CommandBufferBatch {
    pool: Arc<CommandPool>,
    buffers: Vec<RawCommandBuffer>,
}

impl CommandBufferBatch {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn raw(&self, index: usize) -> RawCommandBuffer {
        self.buffers[index]
    }

    pub fn as_slice(&self) -> &[RawCommandBuffer] {
        &self.buffers
    }

    pub fn iter(&self) -> impl Iterator<Item = RawCommandBuffer> + '_ {
        self.buffers.iter().copied()
    }

    pub fn pool(&self) -> &Arc<CommandPool> {
        &self.pool
    }

    pub fn family(&self) -> QueueFamilyId {
        self.pool.family
    }

    pub fn kind(&self) -> QueueKind {
        self.pool.kind
    }

    pub fn policy(&self) -> CommandPoolPolicy {
        self.pool.policy
    }

    /// Begin recording into buffer `index`.
    ///
    /// Buffers from transient pools are recorded for one-time submission.
    pub fn begin(&mut self, index: usize) -> GpuResult<()> {
        let one_time = self.pool.policy == CommandPoolPolicy::Transient;
        // SAFETY: `&mut self` gives exclusive access to the buffer; a buffer
        // still pending execution must not be re-recorded by the caller.
        unsafe {
            self.pool
                .device
                .driver()
                .begin_command_buffer(self.buffers[index], one_time)
        }
    }

    /// Finish recording buffer `index`.
    pub fn end(&mut self, index: usize) -> GpuResult<()> {
        // SAFETY: the driver validates the recording state.
        unsafe {
            self.pool
                .device
                .driver()
                .end_command_buffer(self.buffers[index])
        }
    }

    /// Begin recording every buffer of the batch.
    pub fn begin_all(&mut self) -> GpuResult<()> {
        (0..self.buffers.len()).try_for_each(|i| self.begin(i))
    }

    /// Finish recording every buffer of the batch.
    pub fn end_all(&mut self) -> GpuResult<()> {
        (0..self.buffers.len()).try_for_each(|i| self.end(i))
    }

    /// Return buffer `index` to the initial state.
    ///
    /// # Panics
    ///
    /// Panics if the pool is [`CommandPoolPolicy::NonResettable`].
    pub fn reset(&mut self, index: usize) -> GpuResult<()> {
        assert!(
            self.pool.policy != CommandPoolPolicy::NonResettable,
            "command buffers of a non-resettable pool cannot be reset individually"
        );
        // SAFETY: exclusive access; the caller must not reset pending work.
        unsafe {
            self.pool
                .device
                .driver()
                .reset_command_buffer(self.buffers[index])
        }
    }

    /// Record the release half of an ownership transfer into buffer `index`.
    ///
    /// The buffer must belong to the source family and be submitted before the
    /// matching [`record_acquire`](Self::record_acquire) executes.
    pub fn record_release(&mut self, index: usize, transfer: &OwnershipTransfer) {
        debug_assert_eq!(
            self.pool.family, transfer.src_family,
            "release recorded on a queue of the wrong family"
        );
        // SAFETY: exclusive access to a buffer in the recording state.
        unsafe {
            self.pool.device.driver().cmd_ownership_barrier(
                self.buffers[index],
                transfer,
                TransferHalf::Release,
            )
        }
    }

    /// Record the acquire half of an ownership transfer into buffer `index`.
    pub fn record_acquire(&mut self, index: usize, transfer: &OwnershipTransfer) {
        debug_assert_eq!(
            self.pool.family, transfer.dst_family,
            "acquire recorded on a queue of the wrong family"
        );
        // SAFETY: exclusive access to a buffer in the recording state.
        unsafe {
            self.pool.device.driver().cmd_ownership_barrier(
                self.buffers[index],
                transfer,
                TransferHalf::Acquire,
            )
        }
    }
}

impl std::fmt::Debug for CommandBufferBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferBatch")
            .field("pool", &self.pool.raw.0)
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

impl Drop for CommandBufferBatch {
    fn drop(&mut self) {
        let _guard = self.pool.lock.lock();
        // SAFETY: the batch owns the buffers; work executing them must have
        // completed before the batch is dropped.
        unsafe {
            self.pool
                .device
                .driver()
                .free_command_buffers(self.pool.raw, &self.buffers)
        };
        log::trace!(
            "Freed {} command buffers to pool {}",
            self.buffers.len(),
            self.pool.raw.0
        );
    }
}

/// The resource whose queue family ownership moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResource {
    Buffer {
        buffer: RawBuffer,
        offset: u64,
        size: u64,
    },
    Image {
        image: RawImage,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        depth: bool,
    },
}

/// A queue family ownership transfer of a buffer or image.
///
/// Ownership moves through a matched pair of barriers: a release recorded on
/// a queue of `src_family` and an acquire recorded on a queue of
/// `dst_family`, ordered by a semaphore between the two submissions. The
/// release only uses the source stage and access, the acquire only the
/// destination ones.
///
/// # Example
///
/// ```ignore
/// let transfer = OwnershipTransfer::buffer(&staging, transfer_family, graphics_family)
///     .with_src(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE)
///     .with_dst(PipelineStageFlags::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ);
/// upload.record_release(0, &transfer);
/// draw.record_acquire(0, &transfer);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTransfer {
    pub resource: TransferResource,
    pub src_family: QueueFamilyId,
    pub dst_family: QueueFamilyId,
    pub src_stage: PipelineStageFlags,
    pub src_access: AccessFlags,
    pub dst_stage: PipelineStageFlags,
    pub dst_access: AccessFlags,
}

impl OwnershipTransfer {
    fn new(resource: TransferResource, src_family: QueueFamilyId, dst_family: QueueFamilyId) -> Self {
        Self {
            resource,
            src_family,
            dst_family,
            src_stage: PipelineStageFlags::ALL_COMMANDS,
            src_access: AccessFlags::MEMORY_WRITE,
            dst_stage: PipelineStageFlags::ALL_COMMANDS,
            dst_access: AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
        }
    }

    /// Transfer the whole buffer.
    pub fn buffer(buffer: &Buffer, src_family: QueueFamilyId, dst_family: QueueFamilyId) -> Self {
        Self::new(
            TransferResource::Buffer {
                buffer: buffer.raw(),
                offset: 0,
                size: buffer.size(),
            },
            src_family,
            dst_family,
        )
    }

    /// Transfer the image, keeping its layout unless [`with_layouts`](Self::with_layouts) is used.
    pub fn image(
        image: &Image,
        layout: ImageLayout,
        src_family: QueueFamilyId,
        dst_family: QueueFamilyId,
    ) -> Self {
        Self::new(
            TransferResource::Image {
                image: image.raw(),
                old_layout: layout,
                new_layout: layout,
                depth: image.descriptor().format.is_depth(),
            },
            src_family,
            dst_family,
        )
    }

    pub fn with_src(mut self, stage: PipelineStageFlags, access: AccessFlags) -> Self {
        self.src_stage = stage;
        self.src_access = access;
        self
    }

    pub fn with_dst(mut self, stage: PipelineStageFlags, access: AccessFlags) -> Self {
        self.dst_stage = stage;
        self.dst_access = access;
        self
    }

    /// Transition the image layout as part of the transfer.
    pub fn with_layouts(mut self, old: ImageLayout, new: ImageLayout) -> Self {
        if let TransferResource::Image {
            old_layout,
            new_layout,
            ..
        } = &mut self.resource
        {
            *old_layout = old;
            *new_layout = new;
        }
        self
    }

    /// Whether the transfer actually crosses families.
    pub fn is_cross_family(&self) -> bool {
        self.src_family != self.dst_family
    }
}
