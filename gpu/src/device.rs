//! GPU device context.
//!
//! The [`Device`] owns the driver and everything queried from it once at
//! startup: queue families and the family chosen for each kind of work,
//! memory types and device limits. It is shared as `Arc<Device>` by every
//! object that creates or destroys native handles.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{self, Driver};
use crate::config::DeviceConfig;
use crate::error::GpuResult;
use crate::memory::MemoryAllocator;
use crate::queue::Queue;
use crate::queue_family::QueueFamilySelection;
use crate::registry::CommandPoolRegistry;
use crate::resource::{Buffer, Image};
use crate::sync::{Fence, Semaphore};
use crate::types::{
    BufferDescriptor, DeviceLimits, ImageDescriptor, MemoryProperties, QueueFamilyId,
    QueueFamilyProperties, QueueKind,
};

/// A GPU device shared across threads.
///
/// # Thread Safety
///
/// `Device` is `Send + Sync`. Queues are claimed exclusively: each hardware
/// queue is handed out to at most one [`Queue`] object at a time.
///
/// # Example
///
/// ```ignore
/// let device = Device::create(DeviceConfig::new())?;
/// let mut queue = device.queue(QueueKind::Graphics, 0)?;
/// let registry = device.create_command_pool_registry();
/// let allocator = device.create_memory_allocator();
/// ```
pub struct Device {
    driver: Arc<dyn Driver>,
    config: DeviceConfig,
    families: Vec<QueueFamilyProperties>,
    selection: QueueFamilySelection,
    memory_properties: MemoryProperties,
    limits: DeviceLimits,
    /// Serializes command pool creation across threads.
    allocation_lock: Mutex<()>,
    claimed_queues: Mutex<HashSet<(QueueFamilyId, u32)>>,
}

impl Device {
    /// Create a device on top of an existing driver.
    pub fn new(driver: Arc<dyn Driver>, config: DeviceConfig) -> GpuResult<Arc<Self>> {
        let families = driver.queue_families();
        let selection = QueueFamilySelection::select(&families)?;
        let memory_properties = driver.memory_properties();
        let limits = driver.limits();

        log::info!(
            "Created {} device: {} queue families, {} memory types, {:?} allocator",
            driver.name(),
            families.len(),
            memory_properties.types.len(),
            config.allocator
        );

        Ok(Arc::new(Self {
            driver,
            config,
            families,
            selection,
            memory_properties,
            limits,
            allocation_lock: Mutex::new(()),
            claimed_queues: Mutex::new(HashSet::new()),
        }))
    }

    /// Create the driver requested by the configuration and a device on it.
    pub fn create(config: DeviceConfig) -> GpuResult<Arc<Self>> {
        let driver = backend::create_driver(&config)?;
        Self::new(driver, config)
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn queue_families(&self) -> &[QueueFamilyProperties] {
        &self.families
    }

    pub fn queue_family_selection(&self) -> &QueueFamilySelection {
        &self.selection
    }

    /// The family chosen for a kind of work.
    pub fn queue_family(&self, kind: QueueKind) -> QueueFamilyId {
        self.selection.family(kind)
    }

    pub fn memory_properties(&self) -> &MemoryProperties {
        &self.memory_properties
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub(crate) fn allocation_lock(&self) -> &Mutex<()> {
        &self.allocation_lock
    }

    /// Claim hardware queue `index` of the family chosen for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of range or the queue is already claimed.
    pub fn queue(self: &Arc<Self>, kind: QueueKind, index: u32) -> GpuResult<Queue> {
        let family = self.selection.family(kind);
        let count = self.families[family.index() as usize].queue_count;
        assert!(
            index < count,
            "queue index {index} out of range: family {} has {count} queues",
            family.index()
        );
        let newly_claimed = self.claimed_queues.lock().insert((family, index));
        assert!(
            newly_claimed,
            "queue {index} of family {} is already in use",
            family.index()
        );

        let raw = self.driver.get_queue(family, index);
        log::debug!(
            "Claimed {:?} queue {} on family {}",
            kind,
            index,
            family.index()
        );
        Ok(Queue::new(Arc::clone(self), raw, kind, family, index))
    }

    pub(crate) fn release_queue(&self, family: QueueFamilyId, index: u32) {
        self.claimed_queues.lock().remove(&(family, index));
    }

    /// Create a fence, optionally already signaled.
    pub fn create_fence(self: &Arc<Self>, signaled: bool) -> GpuResult<Fence> {
        Fence::new(self, signaled)
    }

    pub fn create_semaphore(self: &Arc<Self>) -> GpuResult<Semaphore> {
        Semaphore::new(self)
    }

    /// Create an allocator using the configured strategy.
    ///
    /// Every call returns an independent allocator with its own blocks, so
    /// an application normally creates one and shares it.
    pub fn create_memory_allocator(self: &Arc<Self>) -> MemoryAllocator {
        MemoryAllocator::new(self, self.config.allocator)
    }

    /// Create a command pool registry whose main thread is the calling thread.
    ///
    /// Pools are cached per registry; a second registry creates its own.
    pub fn create_command_pool_registry(self: &Arc<Self>) -> CommandPoolRegistry {
        CommandPoolRegistry::new(self)
    }

    pub fn create_buffer(self: &Arc<Self>, descriptor: &BufferDescriptor) -> GpuResult<Buffer> {
        Buffer::new(self, descriptor)
    }

    pub fn create_image(self: &Arc<Self>, descriptor: &ImageDescriptor) -> GpuResult<Image> {
        Image::new(self, descriptor)
    }

    /// Block until every queue of the device is idle.
    pub fn wait_idle(&self) -> GpuResult<()> {
        crate::profile_scope!("device_wait_idle");
        self.driver.device_wait_idle()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("driver", &self.driver.name())
            .field("selection", &self.selection)
            .field("limits", &self.limits)
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.driver.device_wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {}", e);
        }
        log::debug!("{} device destroyed", self.driver.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDriver;
    use crate::config::BackendKind;

    fn dummy_device() -> Arc<Device> {
        Device::new(
            Arc::new(DummyDriver::new()),
            DeviceConfig::new().with_backend(BackendKind::Dummy),
        )
        .unwrap()
    }

    #[test]
    fn test_device_selects_families() {
        let device = dummy_device();
        assert_eq!(device.queue_family(QueueKind::Graphics), QueueFamilyId(0));
        assert_eq!(device.queue_family(QueueKind::Compute), QueueFamilyId(1));
        assert_eq!(device.queue_family(QueueKind::Transfer), QueueFamilyId(2));
        assert_eq!(device.memory_properties().types.len(), 4);
    }

    #[test]
    fn test_queue_claim_is_released_on_drop() {
        let device = dummy_device();
        let queue = device.queue(QueueKind::Compute, 1).unwrap();
        assert_eq!(queue.index(), 1);
        drop(queue);
        let again = device.queue(QueueKind::Compute, 1).unwrap();
        assert_eq!(again.family(), QueueFamilyId(1));
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn test_queue_cannot_be_claimed_twice() {
        let device = dummy_device();
        let _first = device.queue(QueueKind::Graphics, 0).unwrap();
        let _second = device.queue(QueueKind::Graphics, 0).unwrap();
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_queue_index_out_of_range() {
        let device = dummy_device();
        let _queue = device.queue(QueueKind::Transfer, 1).unwrap();
    }
}
