//! Hardware queues and deferred cleanup.
//!
//! A [`Queue`] accumulates [`SubmitStaging`] batches, submits every staged
//! batch that has not been submitted yet in one native call, and keeps the
//! batches around until the caller knows the GPU is done with them. At that
//! point [`Queue::clear_all_staged`] runs their cleanup callbacks.
//!
//! ```text
//! stage_submission ──► submit_all_staged(fence) ──► fence.wait() ──► clear_all_staged
//!   (staged)              (submitted, pending)                        (cleanups run)
//! ```

use std::sync::Arc;

use crate::backend::{RawQueue, SubmitInfo};
use crate::device::Device;
use crate::error::GpuResult;
use crate::submission::SubmitStaging;
use crate::sync::Fence;
use crate::types::{QueueFamilyId, QueueKind};

/// An exclusively claimed hardware queue.
///
/// Obtained from [`Device::queue`]. All operations take `&mut self`, so a
/// queue is never used from two threads at once.
///
/// # Example
///
/// ```ignore
/// let mut queue = device.queue(QueueKind::Graphics, 0)?;
/// let mut staging = SubmitStaging::new();
/// staging.add_command_batch(batch);
/// queue.stage_submission(staging);
///
/// let fence = device.create_fence(false)?;
/// queue.submit_all_staged(Some(&fence))?;
/// fence.wait()?;
/// // SAFETY: the fence covers every submitted batch.
/// unsafe { queue.clear_all_staged() };
/// ```
pub struct Queue {
    device: Arc<Device>,
    raw: RawQueue,
    family: QueueFamilyId,
    kind: QueueKind,
    index: u32,
    /// Staged batches in staging order.
    staged: Vec<SubmitStaging>,
    /// Leading entries of `staged` that were already handed to the driver.
    submitted: usize,
}

impl Queue {
    pub(crate) fn new(
        device: Arc<Device>,
        raw: RawQueue,
        kind: QueueKind,
        family: QueueFamilyId,
        index: u32,
    ) -> Self {
        Self {
            device,
            raw,
            family,
            kind,
            index,
            staged: Vec::new(),
            submitted: 0,
        }
    }

    pub fn raw(&self) -> RawQueue {
        self.raw
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn family(&self) -> QueueFamilyId {
        self.family
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Batches held by the queue, submitted or not.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Staged batches not yet handed to the driver.
    pub fn pending_submit_count(&self) -> usize {
        self.staged.len() - self.submitted
    }

    /// Append a batch to the staged list. Nothing is submitted yet.
    ///
    /// The batch reaches the driver with the next
    /// [`submit_all_staged`](Self::submit_all_staged). Use
    /// [`submit`](Self::submit) to stage and submit in one call.
    pub fn stage_submission(&mut self, staging: SubmitStaging) {
        self.staged.push(staging);
    }

    /// Submit every staged batch that has not been submitted yet, in staging
    /// order, with a single native call.
    ///
    /// The fence, if any, is signaled when all of those batches completed.
    /// With nothing pending and a fence given, an empty submit is made so the
    /// fence still signals once earlier work on the queue is done.
    pub fn submit_all_staged(&mut self, fence: Option<&Fence>) -> GpuResult<()> {
        crate::profile_scope!("queue_submit");
        if let Some(fence) = fence {
            assert!(
                Arc::ptr_eq(fence.device(), &self.device),
                "fence belongs to a different device than the queue"
            );
        }

        let pending = &self.staged[self.submitted..];
        if pending.is_empty() && fence.is_none() {
            return Ok(());
        }

        let infos: Vec<SubmitInfo<'_>> = pending
            .iter()
            .map(|staging| SubmitInfo {
                wait_semaphores: staging.wait_semaphores(),
                command_buffers: staging.command_buffers(),
                signal_semaphores: staging.signal_semaphores(),
            })
            .collect();
        let count = infos.len();

        // SAFETY: every handle referenced by the staged batches is kept alive
        // by the caller until the batches are cleared.
        unsafe {
            self.device
                .driver()
                .queue_submit(self.raw, &infos, fence.map(Fence::raw))?
        };

        log::trace!(
            "Submitted {} batches to {:?} queue {} (family {})",
            count,
            self.kind,
            self.index,
            self.family.index()
        );
        self.submitted = self.staged.len();
        Ok(())
    }

    /// Stage a batch and submit everything pending, including batches staged
    /// earlier with [`stage_submission`](Self::stage_submission).
    ///
    /// This is the immediate path: the batch is handed to the driver before
    /// the call returns. Cleanups still wait for
    /// [`clear_all_staged`](Self::clear_all_staged).
    pub fn submit(&mut self, staging: SubmitStaging, fence: Option<&Fence>) -> GpuResult<()> {
        self.stage_submission(staging);
        self.submit_all_staged(fence)
    }

    /// Run the cleanup callbacks of every staged batch in staging order and
    /// forget the batches. Calling it again without new work does nothing.
    ///
    /// # Safety
    ///
    /// The GPU must have finished every submitted batch, e.g. after waiting on
    /// the fence passed to the last [`submit_all_staged`](Self::submit_all_staged)
    /// or after [`wait_idle`](Self::wait_idle). Cleanups usually free memory
    /// and command buffers the GPU would otherwise still read.
    pub unsafe fn clear_all_staged(&mut self) {
        crate::profile_scope!("queue_clear_staged");
        let unsubmitted = self.pending_submit_count();
        if unsubmitted > 0 {
            log::warn!(
                "Clearing {} staged batches that were never submitted",
                unsubmitted
            );
        }
        for mut staging in self.staged.drain(..) {
            staging.run_cleanups();
        }
        self.submitted = 0;
    }

    /// Block until all work submitted to this queue has completed.
    pub fn wait_idle(&self) -> GpuResult<()> {
        crate::profile_scope!("queue_wait_idle");
        self.device.driver().queue_wait_idle(self.raw)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("kind", &self.kind)
            .field("family", &self.family)
            .field("index", &self.index)
            .field("staged", &self.staged.len())
            .field("submitted", &self.submitted)
            .finish()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            if let Err(e) = self.wait_idle() {
                log::error!("Failed to wait for queue idle on drop: {}", e);
            }
            // SAFETY: the queue is idle, so no staged batch is in flight.
            unsafe { self.clear_all_staged() };
        }
        self.device.release_queue(self.family, self.index);
    }
}
