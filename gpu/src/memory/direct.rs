//! One native allocation per request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{AllocationRequest, AllocatorStats, Backing, DeviceMemory};
use crate::device::Device;
use crate::error::GpuResult;

/// Counters shared between the allocator and the memory it handed out.
#[derive(Default)]
pub(crate) struct DirectShared {
    live: AtomicUsize,
    bytes: AtomicU64,
}

impl DirectShared {
    pub(crate) fn release(&self, size: u64) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(size, Ordering::Relaxed);
    }
}

/// Allocator that forwards every request to the driver.
///
/// Simple and fragmentation free, but every allocation counts against the
/// device's `max_memory_allocation_count`.
pub struct DirectAllocator {
    device: Arc<Device>,
    shared: Arc<DirectShared>,
}

impl DirectAllocator {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            shared: Arc::new(DirectShared::default()),
        }
    }

    pub(crate) fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub(crate) fn allocate(&self, request: &AllocationRequest) -> GpuResult<DeviceMemory> {
        let raw = self
            .device
            .driver()
            .allocate_memory(request.size, request.memory_type_index)?;
        self.shared.live.fetch_add(1, Ordering::Relaxed);
        self.shared.bytes.fetch_add(request.size, Ordering::Relaxed);

        log::trace!(
            "Allocated {} bytes of memory type {} directly",
            request.size,
            request.memory_type_index
        );

        let flags = self.device.memory_properties().types[request.memory_type_index as usize]
            .property_flags;
        Ok(DeviceMemory {
            device: Arc::clone(&self.device),
            raw,
            offset: 0,
            size: request.size,
            native_size: request.size,
            memory_type_index: request.memory_type_index,
            flags,
            bound: false,
            backing: Backing::Dedicated(Arc::clone(&self.shared)),
        })
    }

    pub fn stats(&self) -> AllocatorStats {
        let live = self.shared.live.load(Ordering::Relaxed);
        let bytes = self.shared.bytes.load(Ordering::Relaxed);
        AllocatorStats {
            native_allocations: live,
            live_allocations: live,
            reserved_bytes: bytes,
            used_bytes: bytes,
        }
    }
}
