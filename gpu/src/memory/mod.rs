//! Device memory allocation.
//!
//! [`MemoryAllocator`] hands out [`DeviceMemory`] using one of two strategies
//! chosen at construction:
//!
//! - **Direct**: every request becomes its own native allocation.
//! - **Pooled**: requests are carved out of large per-memory-type blocks, so
//!   the number of native allocations stays far below the device limit.
//!
//! Both strategies expose the same interface, so switching between them does
//! not touch call sites.
//!
//! # Example
//!
//! ```ignore
//! let allocator = device.create_memory_allocator();
//! let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::UNIFORM))?;
//! let mut memory = allocator.allocate_for_buffer(&buffer, MemoryUsage::CpuToGpu.into())?;
//! memory.bind_buffer(&buffer)?;
//!
//! let mut mapped = memory.map()?;
//! mapped.write_pod(0, &[1.0f32, 2.0, 3.0, 4.0]);
//! mapped.flush()?;
//! ```

mod direct;
mod pooled;
mod select;

use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

pub use direct::DirectAllocator;
pub use pooled::PooledAllocator;
pub use select::{MemoryRequest, find_memory_type};

use crate::backend::{MappedMemoryRange, RawMemory};
use crate::config::AllocatorStrategy;
use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::resource::{Buffer, Image};
use crate::types::{MemoryPropertyFlags, MemoryRequirements};

/// A request resolved to a concrete memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocationRequest {
    pub size: u64,
    pub alignment: u64,
    pub memory_type_index: u32,
    /// Buffers are linear; images are not and must respect buffer-image granularity.
    pub linear: bool,
}

/// Allocation counters of an allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Native allocations currently held from the driver.
    pub native_allocations: usize,
    /// [`DeviceMemory`] handles currently alive.
    pub live_allocations: usize,
    /// Bytes held from the driver.
    pub reserved_bytes: u64,
    /// Bytes handed out to live handles.
    pub used_bytes: u64,
}

/// Device memory allocator with a runtime-selected strategy.
pub enum MemoryAllocator {
    Direct(DirectAllocator),
    Pooled(PooledAllocator),
}

impl MemoryAllocator {
    pub fn new(device: &Arc<Device>, strategy: AllocatorStrategy) -> Self {
        match strategy {
            AllocatorStrategy::Direct => Self::Direct(DirectAllocator::new(device)),
            AllocatorStrategy::Pooled { block_size } => {
                Self::Pooled(PooledAllocator::new(device, block_size))
            }
        }
    }

    pub fn strategy(&self) -> AllocatorStrategy {
        match self {
            Self::Direct(_) => AllocatorStrategy::Direct,
            Self::Pooled(pooled) => AllocatorStrategy::Pooled {
                block_size: pooled.block_size(),
            },
        }
    }

    fn device(&self) -> &Arc<Device> {
        match self {
            Self::Direct(direct) => direct.device(),
            Self::Pooled(pooled) => pooled.device(),
        }
    }

    /// Allocate `size` bytes from a memory type that has all `required` flags.
    pub fn allocate(&self, size: u64, required: MemoryPropertyFlags) -> GpuResult<DeviceMemory> {
        let requirements = MemoryRequirements {
            size,
            alignment: 1,
            type_bits: u32::MAX,
        };
        self.allocate_with_requirements(&requirements, MemoryRequest::Properties(required), true)
    }

    /// Allocate memory compatible with a buffer. The memory is not bound yet.
    pub fn allocate_for_buffer(
        &self,
        buffer: &Buffer,
        request: MemoryRequest,
    ) -> GpuResult<DeviceMemory> {
        self.allocate_with_requirements(&buffer.memory_requirements(), request, true)
    }

    /// Allocate memory compatible with an image. The memory is not bound yet.
    pub fn allocate_for_image(&self, image: &Image, request: MemoryRequest) -> GpuResult<DeviceMemory> {
        self.allocate_with_requirements(&image.memory_requirements(), request, false)
    }

    /// Allocate memory satisfying explicit requirements.
    pub fn allocate_with_requirements(
        &self,
        requirements: &MemoryRequirements,
        request: MemoryRequest,
        linear: bool,
    ) -> GpuResult<DeviceMemory> {
        crate::profile_scope!("memory_allocate");
        let memory_type_index = find_memory_type(
            self.device().memory_properties(),
            requirements.type_bits,
            request,
        )
        .ok_or(GpuError::NoMatchingMemoryType {
            type_bits: requirements.type_bits,
            required: request.required_flags(),
        })?;

        let request = AllocationRequest {
            size: requirements.size.max(1),
            alignment: requirements.alignment.max(1),
            memory_type_index,
            linear,
        };
        match self {
            Self::Direct(direct) => direct.allocate(&request),
            Self::Pooled(pooled) => pooled.allocate(&request),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        match self {
            Self::Direct(direct) => direct.stats(),
            Self::Pooled(pooled) => pooled.stats(),
        }
    }

    /// Return empty blocks to the driver. Returns the number of native
    /// allocations released; always zero for the direct strategy.
    pub fn trim(&self) -> usize {
        match self {
            Self::Direct(_) => 0,
            Self::Pooled(pooled) => pooled.trim(),
        }
    }
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("strategy", &self.strategy())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Where a [`DeviceMemory`] came from, and how it goes back.
pub(crate) enum Backing {
    Dedicated(Arc<direct::DirectShared>),
    Pooled {
        pool: Arc<pooled::PoolShared>,
        block: usize,
        reserved: u64,
    },
}

/// An exclusively owned range of device memory.
///
/// Returned to its allocator exactly once when dropped. Anything bound to it
/// must not be used by the GPU after that point.
pub struct DeviceMemory {
    device: Arc<Device>,
    raw: RawMemory,
    offset: u64,
    size: u64,
    /// Size of the underlying native allocation.
    native_size: u64,
    memory_type_index: u32,
    flags: MemoryPropertyFlags,
    bound: bool,
    backing: Backing,
}

impl DeviceMemory {
    pub fn raw(&self) -> RawMemory {
        self.raw
    }

    /// Offset of this range inside the native allocation.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn property_flags(&self) -> MemoryPropertyFlags {
        self.flags
    }

    pub fn is_host_visible(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn is_coherent(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_COHERENT)
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Bind a buffer to this memory.
    ///
    /// Neither side is marked bound if the driver call fails.
    ///
    /// # Panics
    ///
    /// Panics if the memory or the buffer is already bound.
    pub fn bind_buffer(&mut self, buffer: &Buffer) -> GpuResult<()> {
        assert!(!self.bound, "device memory is already bound to a resource");
        assert!(
            !buffer.is_bound(),
            "buffer {:?} is already bound to memory",
            buffer.label()
        );
        // SAFETY: the allocation satisfied the buffer's requirements and
        // neither side has been bound before.
        unsafe {
            self.device
                .driver()
                .bind_buffer_memory(buffer.raw(), self.raw, self.offset)?
        };
        buffer.mark_bound();
        self.bound = true;
        Ok(())
    }

    /// Bind an image to this memory.
    ///
    /// # Panics
    ///
    /// Panics if the memory or the image is already bound.
    pub fn bind_image(&mut self, image: &Image) -> GpuResult<()> {
        assert!(!self.bound, "device memory is already bound to a resource");
        assert!(
            !image.is_bound(),
            "image {:?} is already bound to memory",
            image.descriptor().label
        );
        // SAFETY: see `bind_buffer`.
        unsafe {
            self.device
                .driver()
                .bind_image_memory(image.raw(), self.raw, self.offset)?
        };
        image.mark_bound();
        self.bound = true;
        Ok(())
    }

    /// Map the whole range for host access.
    pub fn map(&mut self) -> GpuResult<MappedRegion<'_>> {
        self.map_range(0..self.size)
    }

    /// Map part of the range for host access.
    ///
    /// # Panics
    ///
    /// Panics if the memory is not host visible or the range is out of bounds.
    pub fn map_range(&mut self, range: Range<u64>) -> GpuResult<MappedRegion<'_>> {
        assert!(
            self.is_host_visible(),
            "cannot map memory of type {} which is not host visible",
            self.memory_type_index
        );
        assert!(
            range.start <= range.end && range.end <= self.size,
            "map range {:?} out of bounds for {} bytes",
            range,
            self.size
        );

        let base = match &self.backing {
            // SAFETY: dedicated memory is only mapped through this handle,
            // which is borrowed mutably for the lifetime of the region.
            Backing::Dedicated(_) => unsafe {
                self.device
                    .driver()
                    .map_memory(self.raw, 0, self.native_size)?
            },
            Backing::Pooled { pool, block, .. } => pool.map_block(*block)?,
        };
        // SAFETY: offset + range.end lies inside the mapped native allocation.
        let ptr = unsafe { base.add((self.offset + range.start) as usize) };
        Ok(MappedRegion {
            memory: self,
            ptr,
            range,
        })
    }

    /// Copy bytes into the memory and make them visible to the device.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut mapped = self.map_range(offset..offset + data.len() as u64)?;
        mapped.as_mut_slice().copy_from_slice(data);
        mapped.flush()
    }

    /// Read bytes written by the device.
    pub fn read_bytes(&mut self, offset: u64, len: usize) -> GpuResult<Vec<u8>> {
        let mapped = self.map_range(offset..offset + len as u64)?;
        mapped.invalidate()?;
        Ok(mapped.as_slice().to_vec())
    }

    fn unmap(&self) {
        match &self.backing {
            // SAFETY: called once per successful map when the region drops.
            Backing::Dedicated(_) => unsafe { self.device.driver().unmap_memory(self.raw) },
            Backing::Pooled { pool, block, .. } => pool.unmap_block(*block),
        }
    }

    /// Expand a range relative to this handle to a flushable native range.
    fn atom_range(&self, range: Range<u64>) -> MappedMemoryRange {
        let atom = self.device.limits().non_coherent_atom_size.max(1);
        let start = (self.offset + range.start) / atom * atom;
        let end = (self.offset + range.end)
            .next_multiple_of(atom)
            .min(self.native_size);
        MappedMemoryRange {
            memory: self.raw,
            offset: start,
            size: end - start,
        }
    }
}

impl std::fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("raw", &self.raw.0)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("memory_type_index", &self.memory_type_index)
            .finish()
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        match &self.backing {
            Backing::Dedicated(shared) => {
                // SAFETY: the handle owns the native allocation.
                unsafe { self.device.driver().free_memory(self.raw) };
                shared.release(self.size);
            }
            Backing::Pooled {
                pool,
                block,
                reserved,
            } => pool.free(*block, self.offset, *reserved),
        }
    }
}

/// A host mapping of (part of) a [`DeviceMemory`].
///
/// The mapping ends when the region is dropped. On memory without
/// `HOST_COHERENT`, host writes must be [`flush`](Self::flush)ed before the
/// device reads them, and device writes must be
/// [`invalidate`](Self::invalidate)d before the host reads them. Both are
/// no-ops on coherent memory.
pub struct MappedRegion<'a> {
    memory: &'a DeviceMemory,
    ptr: NonNull<u8>,
    /// Mapped range, relative to the start of `memory`.
    range: Range<u64>,
}

impl MappedRegion<'_> {
    pub fn len(&self) -> usize {
        (self.range.end - self.range.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping covers `len` bytes and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes the access exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// Copy plain-old-data values into the region at a byte offset.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: usize, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read `count` plain-old-data values starting at a byte offset.
    pub fn read_pod<T: bytemuck::Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        let size = std::mem::size_of::<T>();
        self.as_slice()[offset..offset + size * count]
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    /// Make host writes to the whole region visible to the device.
    pub fn flush(&self) -> GpuResult<()> {
        self.flush_range(0..self.len() as u64)
    }

    /// Make host writes to part of the region visible to the device.
    ///
    /// The range is relative to the region and is widened to the device's
    /// non-coherent atom size.
    pub fn flush_range(&self, range: Range<u64>) -> GpuResult<()> {
        if self.memory.is_coherent() {
            return Ok(());
        }
        let native = self.native_range(range);
        // SAFETY: the range lies in mapped memory and is atom aligned.
        unsafe { self.memory.device.driver().flush_memory(&[native]) }
    }

    /// Make device writes to the whole region visible to the host.
    pub fn invalidate(&self) -> GpuResult<()> {
        self.invalidate_range(0..self.len() as u64)
    }

    /// Make device writes to part of the region visible to the host.
    pub fn invalidate_range(&self, range: Range<u64>) -> GpuResult<()> {
        if self.memory.is_coherent() {
            return Ok(());
        }
        let native = self.native_range(range);
        // SAFETY: the range lies in mapped memory and is atom aligned.
        unsafe { self.memory.device.driver().invalidate_memory(&[native]) }
    }

    fn native_range(&self, range: Range<u64>) -> MappedMemoryRange {
        assert!(
            range.start <= range.end && range.end <= self.len() as u64,
            "range {:?} outside mapped region of {} bytes",
            range,
            self.len()
        );
        self.memory
            .atom_range(self.range.start + range.start..self.range.start + range.end)
    }
}

impl Drop for MappedRegion<'_> {
    fn drop(&mut self) {
        self.memory.unmap();
    }
}
