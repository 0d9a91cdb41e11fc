//! Device memory properties and requirements.

use bitflags::bitflags;

bitflags! {
    /// Property flags of a memory type.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        /// Memory is local to the device and fastest for GPU access.
        const DEVICE_LOCAL = 1 << 0;
        /// Memory can be mapped for host access.
        const HOST_VISIBLE = 1 << 1;
        /// Host writes become visible without explicit flushes.
        const HOST_COHERENT = 1 << 2;
        /// Host reads are cached.
        const HOST_CACHED = 1 << 3;
        /// Memory may be committed lazily by the implementation.
        const LAZILY_ALLOCATED = 1 << 4;
    }
}

/// One memory type exposed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

/// One memory heap exposed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHeap {
    /// Heap size in bytes.
    pub size: u64,
    pub device_local: bool,
}

/// The device's memory types and heaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProperties {
    pub types: Vec<MemoryType>,
    pub heaps: Vec<MemoryHeap>,
}

impl MemoryProperties {
    pub fn memory_type(&self, index: u32) -> Option<&MemoryType> {
        self.types.get(index as usize)
    }

    pub(crate) fn heap_size(&self, memory_type: &MemoryType) -> u64 {
        self.heaps
            .get(memory_type.heap_index as usize)
            .map_or(0, |heap| heap.size)
    }
}

/// Size, alignment and compatible memory types of a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    /// Bit `i` is set when memory type `i` can back the resource.
    pub type_bits: u32,
}

/// Intended access pattern of an allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Only the GPU touches the memory.
    #[default]
    GpuOnly,
    /// Written by the host, read by the GPU (uploads, uniforms).
    CpuToGpu,
    /// Written by the GPU, read back by the host.
    GpuToCpu,
}

impl MemoryUsage {
    /// Flags a memory type must have.
    pub fn required_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::GpuOnly => MemoryPropertyFlags::DEVICE_LOCAL,
            Self::CpuToGpu | Self::GpuToCpu => MemoryPropertyFlags::HOST_VISIBLE,
        }
    }

    /// Flags that make a memory type a better match when present.
    pub fn preferred_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::GpuOnly => MemoryPropertyFlags::empty(),
            Self::CpuToGpu => MemoryPropertyFlags::HOST_COHERENT | MemoryPropertyFlags::DEVICE_LOCAL,
            Self::GpuToCpu => MemoryPropertyFlags::HOST_CACHED,
        }
    }

    /// Flags that make a memory type a worse match when present.
    pub fn avoided_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::GpuOnly => MemoryPropertyFlags::HOST_VISIBLE,
            Self::CpuToGpu => MemoryPropertyFlags::HOST_CACHED,
            Self::GpuToCpu => MemoryPropertyFlags::empty(),
        }
    }
}

/// Device limits relevant to memory management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLimits {
    /// Granularity of flush and invalidate ranges on non-coherent memory.
    pub non_coherent_atom_size: u64,
    /// Maximum number of simultaneously live native allocations.
    pub max_memory_allocation_count: u32,
    pub buffer_image_granularity: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            non_coherent_atom_size: 64,
            max_memory_allocation_count: 4096,
            buffer_image_granularity: 1024,
        }
    }
}
