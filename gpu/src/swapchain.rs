//! Swapchain acquire/present cycle.
//!
//! Every swapchain image is either presentable (owned by the presentation
//! engine) or acquired (owned by the application):
//!
//! ```text
//! Presentable ──acquire_next_image──► Acquired ──present──► Presentable
//! ```
//!
//! Acquisition that cannot produce an image (not ready, timeout, out of date)
//! is reported through [`AcquireStatus`] on an invalid [`AcquiredImage`], not
//! as an error. An out-of-date swapchain stays flagged until the caller
//! [`recreate`](Swapchain::recreate)s it; nothing is recreated automatically.
//!
//! An acquired image dropped without a present abandons its slot. The slot
//! stays unavailable until the swapchain is recreated, which is allowed with
//! abandoned slots but not with images still held.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{AcquireOutcome, PresentOutcome, RawImage, RawSurface, RawSwapchain, SwapchainCreateInfo};
use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::queue::Queue;
use crate::sync::{Fence, Semaphore};
use crate::types::{Extent2D, ImageFormat, ImageUsage, PresentMode, SurfaceCapabilities};

/// Requested swapchain parameters.
///
/// Unsupported requests fall back to something the surface supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub width: u32,
    pub height: u32,
    /// Preferred format; the surface's first format when `None` or unsupported.
    pub format: Option<ImageFormat>,
    pub present_mode: PresentMode,
    /// Preferred image count; one more than the surface minimum when `None`.
    pub image_count: Option<u32>,
    pub usage: ImageUsage,
}

impl SwapchainConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: None,
            present_mode: PresentMode::Fifo,
            image_count: None,
            usage: ImageUsage::COLOR_ATTACHMENT,
        }
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = Some(image_count);
        self
    }

    pub fn with_usage(mut self, usage: ImageUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Outcome of an acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AcquireStatus {
    /// Not produced by an acquisition.
    #[default]
    Unacquired,
    /// An image was acquired.
    Ready,
    /// An image was acquired, but the swapchain no longer matches the surface
    /// exactly. Presenting still works.
    Suboptimal,
    /// No image was available and the timeout was zero.
    NotReady,
    /// No image became available within the timeout.
    Timeout,
    /// The swapchain no longer matches the surface and must be recreated.
    OutOfDate,
}

/// Outcome of a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentStatus {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Ownership of one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Presentable,
    Acquired,
    /// Acquired, then dropped without a present.
    Abandoned,
}

type SlotTable = Arc<Mutex<Vec<SlotState>>>;

/// A swapchain image handed out by [`Swapchain::acquire_next_image`].
///
/// Valid only when [`status`](Self::status) is `Ready` or `Suboptimal`; a
/// valid image should be given back through exactly one
/// [`Swapchain::present`]. Dropping it instead abandons its slot until the
/// next [`Swapchain::recreate`].
#[derive(Debug, Default)]
pub struct AcquiredImage {
    index: u32,
    image: RawImage,
    swapchain: RawSwapchain,
    status: AcquireStatus,
    slots: Option<SlotTable>,
}

impl AcquiredImage {
    fn invalid(swapchain: RawSwapchain, status: AcquireStatus) -> Self {
        Self {
            index: 0,
            image: RawImage::NULL,
            swapchain,
            status,
            slots: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.status, AcquireStatus::Ready | AcquireStatus::Suboptimal)
    }

    pub fn status(&self) -> AcquireStatus {
        self.status
    }

    /// Index of the image in the swapchain ring.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn image(&self) -> RawImage {
        self.image
    }

    pub fn swapchain(&self) -> RawSwapchain {
        self.swapchain
    }
}

impl Drop for AcquiredImage {
    fn drop(&mut self) {
        let Some(slots) = self.slots.take() else {
            return;
        };
        log::warn!(
            "Swapchain image {} dropped without being presented; its slot is abandoned until recreate",
            self.index
        );
        if let Some(slot) = slots.lock().get_mut(self.index as usize) {
            *slot = SlotState::Abandoned;
        }
    }
}

/// A presentable image ring bound to a surface.
///
/// # Example
///
/// ```ignore
/// let mut swapchain = Swapchain::new(&device, surface, &SwapchainConfig::new(1280, 720))?;
/// let image = swapchain.acquire_next_image(None, Some(&image_available), None)?;
/// if !image.is_valid() {
///     if swapchain.needs_recreation() {
///         swapchain.recreate(&SwapchainConfig::new(width, height))?;
///     }
///     return Ok(());
/// }
/// // record and submit work that signals `render_finished` ...
/// swapchain.present(&mut queue, Some(&render_finished), image)?;
/// ```
pub struct Swapchain {
    device: Arc<Device>,
    surface: RawSurface,
    raw: RawSwapchain,
    images: Vec<RawImage>,
    format: ImageFormat,
    extent: Extent2D,
    present_mode: PresentMode,
    /// Ring slot ownership, shared with the images handed out.
    slots: SlotTable,
    needs_recreation: bool,
}

impl Swapchain {
    pub fn new(device: &Arc<Device>, surface: RawSurface, config: &SwapchainConfig) -> GpuResult<Self> {
        let capabilities = device.driver().surface_capabilities(surface)?;
        let info = choose_create_info(&capabilities, surface, config, None)?;
        let raw = device.driver().create_swapchain(&info)?;
        let images = device.driver().swapchain_images(raw)?;

        log::info!(
            "Created swapchain: {}x{}, {:?}, {:?}, {} images",
            info.extent.width,
            info.extent.height,
            info.format,
            info.present_mode,
            images.len()
        );

        Ok(Self {
            device: Arc::clone(device),
            surface,
            raw,
            slots: slot_table(images.len()),
            images,
            format: info.format,
            extent: info.extent,
            present_mode: info.present_mode,
            needs_recreation: false,
        })
    }

    pub fn raw(&self) -> RawSwapchain {
        self.raw
    }

    pub fn surface(&self) -> RawSurface {
        self.surface
    }

    pub fn images(&self) -> &[RawImage] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Whether an acquisition or present reported the swapchain out of date.
    pub fn needs_recreation(&self) -> bool {
        self.needs_recreation
    }

    /// Images acquired and still held by the application.
    pub fn acquired_count(&self) -> usize {
        self.count_slots(SlotState::Acquired)
    }

    /// Images dropped without a present since the last (re)creation.
    pub fn abandoned_count(&self) -> usize {
        self.count_slots(SlotState::Abandoned)
    }

    fn count_slots(&self, state: SlotState) -> usize {
        self.slots.lock().iter().filter(|s| **s == state).count()
    }

    /// Acquire the next presentable image.
    ///
    /// `semaphore` and `fence` are signaled when the presentation engine is
    /// done reading the image. `timeout` of `None` waits indefinitely.
    pub fn acquire_next_image(
        &mut self,
        fence: Option<&Fence>,
        semaphore: Option<&Semaphore>,
        timeout: Option<Duration>,
    ) -> GpuResult<AcquiredImage> {
        crate::profile_scope!("swapchain_acquire");
        // SAFETY: the swapchain is alive and the sync objects are unsignaled
        // by the caller's contract.
        let outcome = unsafe {
            self.device.driver().acquire_next_image(
                self.raw,
                timeout,
                semaphore.map(Semaphore::raw),
                fence.map(Fence::raw),
            )?
        };

        let status = match outcome {
            AcquireOutcome::Acquired { index, suboptimal } => {
                {
                    let mut slots = self.slots.lock();
                    let slot = &mut slots[index as usize];
                    assert!(
                        *slot == SlotState::Presentable,
                        "swapchain image {index} acquired again before being presented"
                    );
                    *slot = SlotState::Acquired;
                }
                return Ok(AcquiredImage {
                    index,
                    image: self.images[index as usize],
                    swapchain: self.raw,
                    status: if suboptimal {
                        AcquireStatus::Suboptimal
                    } else {
                        AcquireStatus::Ready
                    },
                    slots: Some(Arc::clone(&self.slots)),
                });
            }
            AcquireOutcome::NotReady => AcquireStatus::NotReady,
            AcquireOutcome::Timeout => AcquireStatus::Timeout,
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.needs_recreation = true;
                AcquireStatus::OutOfDate
            }
        };
        Ok(AcquiredImage::invalid(self.raw, status))
    }

    /// Queue an acquired image for presentation, consuming it.
    ///
    /// # Panics
    ///
    /// Panics if the image is invalid or belongs to another swapchain.
    pub fn present(
        &mut self,
        queue: &mut Queue,
        wait: Option<&Semaphore>,
        mut image: AcquiredImage,
    ) -> GpuResult<PresentStatus> {
        crate::profile_scope!("swapchain_present");
        assert!(
            image.is_valid(),
            "presenting an image that was not acquired ({:?})",
            image.status
        );
        assert!(
            image.swapchain == self.raw,
            "presenting an image acquired from another swapchain"
        );
        image.status = AcquireStatus::Unacquired;
        image.slots = None;
        self.slots.lock()[image.index as usize] = SlotState::Presentable;

        // SAFETY: the image was acquired from this swapchain and is presented once.
        let outcome = unsafe {
            self.device.driver().queue_present(
                queue.raw(),
                self.raw,
                image.index,
                wait.map(Semaphore::raw),
            )?
        };
        Ok(match outcome {
            PresentOutcome::Presented => PresentStatus::Presented,
            PresentOutcome::Suboptimal => PresentStatus::Suboptimal,
            PresentOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on present");
                self.needs_recreation = true;
                PresentStatus::OutOfDate
            }
        })
    }

    /// Replace the swapchain, for example after a resize.
    ///
    /// Waits for the device to go idle first. Abandoned slots are reclaimed
    /// along with the old swapchain.
    ///
    /// # Panics
    ///
    /// Panics if any image is still held by the application.
    pub fn recreate(&mut self, config: &SwapchainConfig) -> GpuResult<()> {
        crate::profile_function!();
        let outstanding = self.acquired_count();
        assert!(
            outstanding == 0,
            "cannot recreate a swapchain with {outstanding} images still acquired"
        );
        self.device.wait_idle()?;

        let capabilities = self.device.driver().surface_capabilities(self.surface)?;
        let info = choose_create_info(&capabilities, self.surface, config, Some(self.raw))?;
        let raw = self.device.driver().create_swapchain(&info)?;
        let images = self.device.driver().swapchain_images(raw)?;

        // SAFETY: the device is idle and no image of the old swapchain is
        // held; abandoned ones are never presented.
        unsafe { self.device.driver().destroy_swapchain(self.raw) };

        let abandoned = self.abandoned_count();
        log::info!(
            "Recreated swapchain: {}x{}, {} images ({} abandoned slots reclaimed)",
            info.extent.width,
            info.extent.height,
            images.len(),
            abandoned
        );
        self.raw = raw;
        self.slots = slot_table(images.len());
        self.images = images;
        self.format = info.format;
        self.extent = info.extent;
        self.present_mode = info.present_mode;
        self.needs_recreation = false;
        Ok(())
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("raw", &self.raw.0)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("images", &self.images.len())
            .field("needs_recreation", &self.needs_recreation)
            .finish()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle before destroying swapchain: {}", e);
        }
        // SAFETY: the device is idle.
        unsafe { self.device.driver().destroy_swapchain(self.raw) };
    }
}

fn slot_table(len: usize) -> SlotTable {
    Arc::new(Mutex::new(vec![SlotState::Presentable; len]))
}

fn choose_create_info(
    capabilities: &SurfaceCapabilities,
    surface: RawSurface,
    config: &SwapchainConfig,
    old_swapchain: Option<RawSwapchain>,
) -> GpuResult<SwapchainCreateInfo> {
    // Choose format
    let format = config
        .format
        .filter(|wanted| capabilities.formats.iter().any(|f| f.format == *wanted))
        .or_else(|| capabilities.formats.first().map(|f| f.format))
        .ok_or_else(|| GpuError::InitializationFailed("surface reports no formats".into()))?;

    // Choose present mode, FIFO is always available
    let present_mode = if capabilities.present_modes.contains(&config.present_mode) {
        config.present_mode
    } else {
        PresentMode::Fifo
    };

    // Choose extent
    let extent = capabilities.current_extent.unwrap_or_else(|| {
        Extent2D::new(config.width, config.height)
            .clamp(capabilities.min_extent, capabilities.max_extent)
    });

    // Choose image count (prefer triple buffering)
    let max_images = if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    };
    let image_count = config
        .image_count
        .unwrap_or(capabilities.min_image_count + 1)
        .clamp(capabilities.min_image_count, max_images);

    Ok(SwapchainCreateInfo {
        surface,
        image_count,
        format,
        extent,
        usage: config.usage,
        present_mode,
        old_swapchain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDriver;
    use crate::test_support::dummy_device;
    use crate::types::QueueKind;

    #[test]
    fn test_choose_create_info_defaults() {
        let caps = DummyDriver::default_surface_capabilities(Extent2D::new(800, 600));
        let info =
            choose_create_info(&caps, RawSurface(1), &SwapchainConfig::new(1, 1), None).unwrap();
        assert_eq!(info.format, ImageFormat::Bgra8Srgb);
        assert_eq!(info.present_mode, PresentMode::Fifo);
        assert_eq!(info.extent, Extent2D::new(800, 600));
        assert_eq!(info.image_count, 3);
    }

    #[test]
    fn test_choose_create_info_falls_back() {
        let mut caps = DummyDriver::default_surface_capabilities(Extent2D::new(800, 600));
        caps.current_extent = None;
        let config = SwapchainConfig::new(40_000, 0)
            .with_format(ImageFormat::Rgba16Float)
            .with_present_mode(PresentMode::Immediate)
            .with_image_count(9);
        let info = choose_create_info(&caps, RawSurface(1), &config, None).unwrap();
        assert_eq!(info.format, ImageFormat::Bgra8Srgb);
        assert_eq!(info.present_mode, PresentMode::Fifo);
        assert_eq!(info.extent, Extent2D::new(16384, 1));
        assert_eq!(info.image_count, 4);
    }

    #[test]
    fn test_choose_create_info_without_formats() {
        let mut caps = DummyDriver::default_surface_capabilities(Extent2D::new(8, 8));
        caps.formats.clear();
        let err = choose_create_info(&caps, RawSurface(1), &SwapchainConfig::new(8, 8), None)
            .unwrap_err();
        assert!(matches!(err, GpuError::InitializationFailed(_)));
    }

    #[test]
    fn test_acquire_present_cycle() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();
        let mut swapchain = Swapchain::new(
            &device,
            surface,
            &SwapchainConfig::new(64, 64).with_present_mode(PresentMode::Mailbox),
        )
        .unwrap();
        assert_eq!(swapchain.present_mode(), PresentMode::Mailbox);

        let image = swapchain.acquire_next_image(None, None, None).unwrap();
        assert_eq!(image.status(), AcquireStatus::Ready);
        assert_eq!(image.image(), swapchain.images()[image.index() as usize]);
        assert_eq!(swapchain.acquired_count(), 1);

        let status = swapchain.present(&mut queue, None, image).unwrap();
        assert_eq!(status, PresentStatus::Presented);
        assert_eq!(swapchain.acquired_count(), 0);
        assert_eq!(driver.present_count(swapchain.raw()), 1);
    }

    #[test]
    fn test_exhausted_ring_reports_not_ready() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();

        let held: Vec<_> = (0..swapchain.image_count())
            .map(|_| swapchain.acquire_next_image(None, None, None).unwrap())
            .collect();
        let none = swapchain
            .acquire_next_image(None, None, Some(Duration::ZERO))
            .unwrap();
        assert!(!none.is_valid());
        assert_eq!(none.status(), AcquireStatus::NotReady);
        let timed_out = swapchain
            .acquire_next_image(None, None, Some(Duration::from_millis(1)))
            .unwrap();
        assert_eq!(timed_out.status(), AcquireStatus::Timeout);

        for image in held {
            swapchain.present(&mut queue, None, image).unwrap();
        }
    }

    #[test]
    fn test_out_of_date_latches_until_recreate() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();

        driver.resize_surface(surface, Extent2D::new(128, 96));
        let image = swapchain.acquire_next_image(None, None, None).unwrap();
        assert_eq!(image.status(), AcquireStatus::OutOfDate);
        assert!(swapchain.needs_recreation());

        let old = swapchain.raw();
        swapchain.recreate(&SwapchainConfig::new(128, 96)).unwrap();
        assert_ne!(swapchain.raw(), old);
        assert!(!swapchain.needs_recreation());
        assert_eq!(swapchain.extent(), Extent2D::new(128, 96));

        let image = swapchain.acquire_next_image(None, None, None).unwrap();
        assert!(image.is_valid());
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();
        swapchain.present(&mut queue, None, image).unwrap();
    }

    #[test]
    fn test_present_reports_suboptimal() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();

        driver.set_surface_suboptimal(surface, true);
        let image = swapchain.acquire_next_image(None, None, None).unwrap();
        assert_eq!(image.status(), AcquireStatus::Suboptimal);
        let status = swapchain.present(&mut queue, None, image).unwrap();
        assert_eq!(status, PresentStatus::Suboptimal);
        assert!(!swapchain.needs_recreation());
    }

    #[test]
    #[should_panic(expected = "not acquired")]
    fn test_present_default_image_panics() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();
        let _ = swapchain.present(&mut queue, None, AcquiredImage::default());
    }

    #[test]
    #[should_panic(expected = "another swapchain")]
    fn test_present_foreign_image_panics() {
        let (device, driver) = dummy_device();
        let caps = DummyDriver::default_surface_capabilities(Extent2D::new(64, 64));
        let first = driver.create_surface(caps.clone());
        let second = driver.create_surface(caps);
        let mut a = Swapchain::new(&device, first, &SwapchainConfig::new(64, 64)).unwrap();
        let mut b = Swapchain::new(&device, second, &SwapchainConfig::new(64, 64)).unwrap();
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();
        let image = a.acquire_next_image(None, None, None).unwrap();
        let _ = b.present(&mut queue, None, image);
    }

    #[test]
    fn test_dropped_image_is_reclaimed_by_recreate() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();

        let image = swapchain.acquire_next_image(None, None, None).unwrap();
        assert!(image.is_valid());
        drop(image);
        assert_eq!(swapchain.acquired_count(), 0);
        assert_eq!(swapchain.abandoned_count(), 1);

        driver.resize_surface(surface, Extent2D::new(96, 96));
        let stale = swapchain.acquire_next_image(None, None, None).unwrap();
        assert_eq!(stale.status(), AcquireStatus::OutOfDate);

        swapchain.recreate(&SwapchainConfig::new(96, 96)).unwrap();
        assert_eq!(swapchain.abandoned_count(), 0);
        assert_eq!(swapchain.extent(), Extent2D::new(96, 96));

        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();
        let held: Vec<_> = (0..swapchain.image_count())
            .map(|_| swapchain.acquire_next_image(None, None, None).unwrap())
            .collect();
        assert!(held.iter().all(AcquiredImage::is_valid));
        for image in held {
            swapchain.present(&mut queue, None, image).unwrap();
        }
    }

    #[test]
    fn test_invalid_image_drop_leaves_slots_alone() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();
        let mut queue = device.queue(QueueKind::Graphics, 0).unwrap();

        let image = swapchain.acquire_next_image(None, None, None).unwrap();
        swapchain.present(&mut queue, None, image).unwrap();
        drop(AcquiredImage::default());
        assert_eq!(swapchain.abandoned_count(), 0);
        assert_eq!(swapchain.acquired_count(), 0);
    }

    #[test]
    #[should_panic(expected = "still acquired")]
    fn test_recreate_with_outstanding_image_panics() {
        let (device, driver) = dummy_device();
        let surface =
            driver.create_surface(DummyDriver::default_surface_capabilities(Extent2D::new(64, 64)));
        let mut swapchain =
            Swapchain::new(&device, surface, &SwapchainConfig::new(64, 64)).unwrap();
        let _image = swapchain.acquire_next_image(None, None, None).unwrap();
        let _ = swapchain.recreate(&SwapchainConfig::new(64, 64));
    }
}
