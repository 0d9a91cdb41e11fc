//! GPU synchronization primitives.
//!
//! [`Fence`] lets the host wait for submitted work. [`Semaphore`] orders work
//! between submissions and presentation on the GPU and has no host-visible
//! state.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{RawFence, RawSemaphore};
use crate::device::Device;
use crate::error::GpuResult;

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The work guarded by the fence has not completed yet.
    NotReady,
    /// The fence has been signaled.
    Ready,
}

impl FenceStatus {
    fn from_signaled(signaled: bool) -> Self {
        if signaled { Self::Ready } else { Self::NotReady }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Host-GPU synchronization primitive.
///
/// A fence is attached to a submission and becomes [`FenceStatus::Ready`]
/// once all of that submission's work completed. It stays ready until
/// [`reset`](Self::reset).
///
/// # Example
///
/// ```ignore
/// let mut fence = device.create_fence(false)?;
/// queue.submit_all_staged(Some(&fence))?;
/// fence.wait()?;
/// unsafe { queue.clear_all_staged() };
/// fence.reset()?;
/// ```
pub struct Fence {
    device: Arc<Device>,
    raw: RawFence,
}

impl Fence {
    pub(crate) fn new(device: &Arc<Device>, signaled: bool) -> GpuResult<Self> {
        let raw = device.driver().create_fence(signaled)?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> RawFence {
        self.raw
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Query the fence without blocking.
    pub fn status(&self) -> GpuResult<FenceStatus> {
        self.device
            .driver()
            .fence_status(self.raw)
            .map(FenceStatus::from_signaled)
    }

    /// Block until the fence is signaled.
    pub fn wait(&self) -> GpuResult<()> {
        crate::profile_scope!("fence_wait");
        self.device
            .driver()
            .wait_for_fences(&[self.raw], true, None)
            .map(|_| ())
    }

    /// Block until the fence is signaled or the timeout elapses.
    ///
    /// A timeout is not an error: it returns [`FenceStatus::NotReady`].
    pub fn wait_for(&self, timeout: Duration) -> GpuResult<FenceStatus> {
        self.device
            .driver()
            .wait_for_fences(&[self.raw], true, Some(timeout))
            .map(FenceStatus::from_signaled)
    }

    /// Return the fence to the unsignaled state.
    ///
    /// The fence must not be attached to work that is still pending.
    pub fn reset(&mut self) -> GpuResult<()> {
        self.device.driver().reset_fences(&[self.raw])
    }

    /// Block until every fence is signaled.
    ///
    /// # Panics
    ///
    /// Panics if `fences` is empty or the fences belong to different devices.
    pub fn wait_all(fences: &[&Fence]) -> GpuResult<()> {
        let (device, raw) = Self::joint(fences);
        device.driver().wait_for_fences(&raw, true, None).map(|_| ())
    }

    /// Block until every fence is signaled or the timeout elapses.
    pub fn wait_all_for(fences: &[&Fence], timeout: Duration) -> GpuResult<FenceStatus> {
        let (device, raw) = Self::joint(fences);
        device
            .driver()
            .wait_for_fences(&raw, true, Some(timeout))
            .map(FenceStatus::from_signaled)
    }

    /// Block until any fence is signaled and return the index of a signaled one.
    pub fn wait_any(fences: &[&Fence]) -> GpuResult<usize> {
        let (device, raw) = Self::joint(fences);
        device.driver().wait_for_fences(&raw, false, None)?;
        Ok(Self::first_signaled(device, fences)?.unwrap_or(0))
    }

    /// Block until any fence is signaled or the timeout elapses.
    ///
    /// Returns the index of a signaled fence, or `None` on timeout.
    pub fn wait_any_for(fences: &[&Fence], timeout: Duration) -> GpuResult<Option<usize>> {
        let (device, raw) = Self::joint(fences);
        if !device.driver().wait_for_fences(&raw, false, Some(timeout))? {
            return Ok(None);
        }
        Self::first_signaled(device, fences)
    }

    fn joint<'a>(fences: &[&'a Fence]) -> (&'a Arc<Device>, Vec<RawFence>) {
        assert!(!fences.is_empty(), "waiting on an empty set of fences");
        let first: &'a Fence = fences[0];
        let device = &first.device;
        assert!(
            fences.iter().all(|f| Arc::ptr_eq(&f.device, device)),
            "fences in a joint wait must belong to the same device"
        );
        (device, fences.iter().map(|f| f.raw).collect())
    }

    fn first_signaled(device: &Arc<Device>, fences: &[&Fence]) -> GpuResult<Option<usize>> {
        for (i, fence) in fences.iter().enumerate() {
            if device.driver().fence_status(fence.raw)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence").field(&self.raw.0).finish()
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        // SAFETY: the fence is exclusively owned; callers wait on it before
        // letting it go out of scope while work is pending.
        unsafe { self.device.driver().destroy_fence(self.raw) };
    }
}

/// GPU semaphore ordering work between submissions.
///
/// Semaphores are used for GPU-GPU synchronization:
/// - One submission (or an image acquisition) signals the semaphore
/// - Another submission (or a present) waits on it before starting
///
/// Unlike fences, semaphores cannot be waited on from the host.
pub struct Semaphore {
    device: Arc<Device>,
    raw: RawSemaphore,
}

impl Semaphore {
    pub(crate) fn new(device: &Arc<Device>) -> GpuResult<Self> {
        let raw = device.driver().create_semaphore()?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> RawSemaphore {
        self.raw
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Semaphore").field(&self.raw.0).finish()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: exclusively owned; no pending work may reference it.
        unsafe { self.device.driver().destroy_semaphore(self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dummy_device, manual_device};

    #[test]
    fn test_fence_unsignaled() {
        let (device, _) = dummy_device();
        let fence = device.create_fence(false).unwrap();
        assert_eq!(fence.status().unwrap(), FenceStatus::NotReady);
    }

    #[test]
    fn test_fence_signaled() {
        let (device, _) = dummy_device();
        let fence = device.create_fence(true).unwrap();
        assert!(fence.status().unwrap().is_ready());
        fence.wait().unwrap();
    }

    #[test]
    fn test_fence_signal_and_wait() {
        let (device, driver) = dummy_device();
        let fence = device.create_fence(false).unwrap();

        // Simulate GPU signaling from another thread
        let raw = fence.raw();
        let signaler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            driver.signal_fence(raw);
        });

        fence.wait().unwrap();
        assert_eq!(fence.status().unwrap(), FenceStatus::Ready);
        signaler.join().unwrap();
    }

    #[test]
    fn test_fence_wait_timeout() {
        let (device, _) = dummy_device();
        let fence = device.create_fence(false).unwrap();

        // Should time out since nothing signals it
        let status = fence.wait_for(Duration::from_millis(10)).unwrap();
        assert_eq!(status, FenceStatus::NotReady);
        assert_eq!(fence.status().unwrap(), FenceStatus::NotReady);
    }

    #[test]
    fn test_fence_reset() {
        let (device, _) = dummy_device();
        let mut fence = device.create_fence(true).unwrap();
        fence.reset().unwrap();
        assert_eq!(fence.status().unwrap(), FenceStatus::NotReady);
    }

    #[test]
    fn test_wait_any_returns_signaled_index() {
        let (device, _) = dummy_device();
        let a = device.create_fence(false).unwrap();
        let b = device.create_fence(true).unwrap();

        let index = Fence::wait_any_for(&[&a, &b], Duration::from_secs(5)).unwrap();
        assert_eq!(index, Some(1));
        assert_eq!(Fence::wait_any(&[&a, &b]).unwrap(), 1);
    }

    #[test]
    fn test_wait_all_blocks_until_every_fence_signaled() {
        let (device, driver) = dummy_device();
        let a = device.create_fence(false).unwrap();
        let b = device.create_fence(true).unwrap();

        let status = Fence::wait_all_for(&[&a, &b], Duration::from_millis(10)).unwrap();
        assert_eq!(status, FenceStatus::NotReady);

        let raw = a.raw();
        let signaler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            driver.signal_fence(raw);
        });
        Fence::wait_all(&[&a, &b]).unwrap();
        assert!(a.status().unwrap().is_ready());
        signaler.join().unwrap();
    }

    #[test]
    fn test_wait_any_times_out() {
        let (device, _) = dummy_device();
        let a = device.create_fence(false).unwrap();
        let b = device.create_fence(false).unwrap();
        let index = Fence::wait_any_for(&[&a, &b], Duration::from_millis(5)).unwrap();
        assert_eq!(index, None);
    }

    #[test]
    #[should_panic(expected = "same device")]
    fn test_joint_wait_rejects_mixed_devices() {
        let (first, _) = dummy_device();
        let (second, _) = dummy_device();
        let a = first.create_fence(true).unwrap();
        let b = second.create_fence(true).unwrap();
        let _ = Fence::wait_all(&[&a, &b]);
    }

    #[test]
    #[should_panic(expected = "empty set of fences")]
    fn test_joint_wait_rejects_empty_set() {
        let _ = Fence::wait_any(&[]);
    }

    #[test]
    fn test_objects_are_destroyed_on_drop() {
        let (device, driver) = manual_device();
        let fence = device.create_fence(false).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(driver.live_fences(), 1);
        assert_eq!(driver.live_semaphores(), 1);
        drop(fence);
        drop(semaphore);
        assert_eq!(driver.live_fences(), 0);
        assert_eq!(driver.live_semaphores(), 0);
    }
}
