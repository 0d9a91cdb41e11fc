//! Frames-in-flight synchronization.
//!
//! Rendering a frame needs three sync objects: a semaphore signaled when the
//! swapchain image is available, a semaphore signaled when rendering has
//! finished (waited on by present), and a fence telling the host when the
//! frame's work is done so its resources can be reused. [`FramesInFlight`]
//! keeps one such set per frame and rotates through them.

use std::sync::Arc;

use crate::device::Device;
use crate::error::GpuResult;
use crate::sync::{Fence, Semaphore};

/// Default number of frames that may be in flight simultaneously.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Synchronization objects of one frame slot.
#[derive(Debug)]
pub struct FrameSync {
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    fn new(device: &Arc<Device>) -> GpuResult<Self> {
        Ok(Self {
            image_available: device.create_semaphore()?,
            render_finished: device.create_semaphore()?,
            // Signaled so the first wait on this slot returns immediately.
            in_flight: device.create_fence(true)?,
        })
    }

    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    /// Reset the slot's fence and return it for the frame's final submit.
    ///
    /// Call this only once the frame will really be submitted; a reset fence
    /// that is never submitted blocks the next wait on this slot forever.
    pub fn submit_fence(&mut self) -> GpuResult<&Fence> {
        self.in_flight.reset()?;
        Ok(&self.in_flight)
    }
}

/// A ring of [`FrameSync`] slots.
///
/// # Example
///
/// ```ignore
/// let mut frames = FramesInFlight::new(&device, DEFAULT_FRAMES_IN_FLIGHT)?;
/// loop {
///     let frame = frames.begin_frame()?;
///     let image = swapchain.acquire_next_image(None, Some(&frame.image_available), None)?;
///     // ...
///     let mut staging = SubmitStaging::new();
///     staging.add_waiting_semaphore(&frame.image_available, PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
///     staging.add_signaling_semaphore(&frame.render_finished, PipelineStageFlags::ALL_COMMANDS);
///     queue.submit(staging, Some(frame.submit_fence()?))?;
///     swapchain.present(&mut queue, Some(&frame.render_finished), image)?;
///     frames.advance();
/// }
/// ```
#[derive(Debug)]
pub struct FramesInFlight {
    frames: Vec<FrameSync>,
    current: usize,
    frame_number: u64,
}

impl FramesInFlight {
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn new(device: &Arc<Device>, count: usize) -> GpuResult<Self> {
        assert!(count > 0, "at least one frame must be in flight");
        let frames = (0..count)
            .map(|_| FrameSync::new(device))
            .collect::<GpuResult<Vec<_>>>()?;
        Ok(Self {
            frames,
            current: 0,
            frame_number: 0,
        })
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    /// Slot used by the current frame.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Frames advanced past since creation.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current]
    }

    /// Wait until the GPU finished the work last submitted from the current
    /// slot, then hand the slot out.
    pub fn begin_frame(&mut self) -> GpuResult<&mut FrameSync> {
        crate::profile_scope!("frame_wait");
        let frame = &mut self.frames[self.current];
        frame.in_flight.wait()?;
        Ok(frame)
    }

    /// Move on to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames.len();
        self.frame_number += 1;
    }

    /// Wait for every slot's last submission.
    pub fn wait_all(&self) -> GpuResult<()> {
        crate::profile_function!();
        let fences: Vec<&Fence> = self.frames.iter().map(|f| &f.in_flight).collect();
        Fence::wait_all(&fences)
    }
}
