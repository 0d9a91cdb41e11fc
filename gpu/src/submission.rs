//! Submission staging.
//!
//! A [`SubmitStaging`] collects everything one native submit batch needs:
//! command buffers, semaphore waits and signals, and the cleanup work that
//! must run once the GPU has finished with the batch. It is handed to a
//! [`Queue`](crate::Queue), which submits it and later runs the cleanups.

use crate::backend::{RawCommandBuffer, SemaphoreSubmit};
use crate::command::CommandBufferBatch;
use crate::sync::Semaphore;
use crate::types::PipelineStageFlags;

/// Deferred work run after the GPU finished a batch.
pub type CleanupCallback = Box<dyn FnOnce() + Send>;

/// One submission batch under construction.
///
/// Order is preserved for everything added: command buffers execute in the
/// order they were added and cleanups run in the order they were added.
///
/// The staging refers to semaphores and command buffers by handle. The caller
/// keeps them alive until the batch completes, usually by handing ownership
/// to [`adopt_resources`](Self::adopt_resources).
///
/// # Example
///
/// ```ignore
/// let mut staging = SubmitStaging::new();
/// staging.add_waiting_semaphore(&image_available, PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
/// staging.add_command_batch(batch);
/// staging.add_signaling_semaphore(&render_finished, PipelineStageFlags::ALL_COMMANDS);
/// staging.adopt_resources(staging_buffer);
/// queue.stage_submission(staging);
/// ```
#[derive(Default)]
pub struct SubmitStaging {
    command_buffers: Vec<RawCommandBuffer>,
    wait_semaphores: Vec<SemaphoreSubmit>,
    signal_semaphores: Vec<SemaphoreSubmit>,
    cleanups: Vec<CleanupCallback>,
}

impl SubmitStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single command buffer handle.
    pub fn add_command_buffer(&mut self, buffer: RawCommandBuffer) -> &mut Self {
        self.command_buffers.push(buffer);
        self
    }

    /// Append every buffer of a batch. The batch stays with the caller.
    pub fn add_command_buffers(&mut self, batch: &CommandBufferBatch) -> &mut Self {
        self.command_buffers.extend(batch.iter());
        self
    }

    /// Append every buffer of a batch and free the batch once the GPU is done.
    pub fn add_command_batch(&mut self, batch: CommandBufferBatch) -> &mut Self {
        self.add_command_buffers(&batch);
        self.adopt_resources(batch)
    }

    /// Make the batch wait for `semaphore` before `stage`.
    pub fn add_waiting_semaphore(
        &mut self,
        semaphore: &Semaphore,
        stage: PipelineStageFlags,
    ) -> &mut Self {
        self.wait_semaphores.push(SemaphoreSubmit {
            semaphore: semaphore.raw(),
            stage,
        });
        self
    }

    /// Signal `semaphore` once the batch reaches `stage`.
    pub fn add_signaling_semaphore(
        &mut self,
        semaphore: &Semaphore,
        stage: PipelineStageFlags,
    ) -> &mut Self {
        self.signal_semaphores.push(SemaphoreSubmit {
            semaphore: semaphore.raw(),
            stage,
        });
        self
    }

    /// Run `callback` after the batch completed on the GPU.
    pub fn add_cleanup_callback(&mut self, callback: impl FnOnce() + Send + 'static) -> &mut Self {
        self.cleanups.push(Box::new(callback));
        self
    }

    /// Keep `resources` alive until the batch completed, then drop them.
    pub fn adopt_resources<T: Send + 'static>(&mut self, resources: T) -> &mut Self {
        self.add_cleanup_callback(move || drop(resources))
    }

    /// True when nothing at all was added.
    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
            && self.wait_semaphores.is_empty()
            && self.signal_semaphores.is_empty()
            && self.cleanups.is_empty()
    }

    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn wait_semaphore_count(&self) -> usize {
        self.wait_semaphores.len()
    }

    pub fn signal_semaphore_count(&self) -> usize {
        self.signal_semaphores.len()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.len()
    }

    pub fn command_buffers(&self) -> &[RawCommandBuffer] {
        &self.command_buffers
    }

    pub fn wait_semaphores(&self) -> &[SemaphoreSubmit] {
        &self.wait_semaphores
    }

    pub fn signal_semaphores(&self) -> &[SemaphoreSubmit] {
        &self.signal_semaphores
    }

    /// Run every cleanup in insertion order.
    pub(crate) fn run_cleanups(&mut self) {
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
    }
}

impl std::fmt::Debug for SubmitStaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitStaging")
            .field("command_buffers", &self.command_buffers)
            .field("wait_semaphores", &self.wait_semaphores)
            .field("signal_semaphores", &self.signal_semaphores)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}
