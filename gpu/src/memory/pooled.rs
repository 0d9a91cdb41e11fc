//! Block sub-allocation.
//!
//! Requests are served from large native allocations ("blocks"), one list of
//! blocks per memory type. Buffers and images never share a block, so the
//! buffer-image granularity never has to be honored between neighbors.
//! Free space inside a block is a sorted list of ranges, allocated first-fit
//! and coalesced on release. Empty blocks are kept for reuse until
//! [`PooledAllocator::trim`].

use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AllocationRequest, AllocatorStats, Backing, DeviceMemory};
use crate::backend::RawMemory;
use crate::device::Device;
use crate::error::GpuResult;
use crate::types::MemoryPropertyFlags;

/// Host address of a mapped block.
#[derive(Clone, Copy)]
struct MappedPtr(NonNull<u8>);

// SAFETY: the pointer is only dereferenced through `MappedRegion`, which
// borrows the owning `DeviceMemory`; moving the address between threads is fine.
unsafe impl Send for MappedPtr {}

struct Block {
    raw: RawMemory,
    memory_type_index: u32,
    linear: bool,
    size: u64,
    /// Free ranges sorted by start, never adjacent.
    free: Vec<Range<u64>>,
    live: usize,
    map_count: usize,
    mapped: Option<MappedPtr>,
}

impl Block {
    fn is_unused(&self) -> bool {
        self.live == 0 && self.map_count == 0
    }

    /// First-fit search. Alignment padding stays in the free list.
    fn take(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let (index, start, end) = self.free.iter().enumerate().find_map(|(index, range)| {
            let start = range.start.checked_next_multiple_of(alignment)?;
            let end = start.checked_add(size)?;
            (end <= range.end).then_some((index, start, end))
        })?;

        let range = self.free[index].clone();
        let head = range.start..start;
        let tail = end..range.end;
        match (head.is_empty(), tail.is_empty()) {
            (false, false) => {
                self.free[index] = head;
                self.free.insert(index + 1, tail);
            }
            (false, true) => self.free[index] = head,
            (true, false) => self.free[index] = tail,
            (true, true) => {
                self.free.remove(index);
            }
        }
        Some(start)
    }

    fn release(&mut self, range: Range<u64>) {
        let index = self.free.partition_point(|r| r.start < range.start);
        self.free.insert(index, range);
        if index + 1 < self.free.len() && self.free[index].end == self.free[index + 1].start {
            self.free[index].end = self.free[index + 1].end;
            self.free.remove(index + 1);
        }
        if index > 0 && self.free[index - 1].end == self.free[index].start {
            self.free[index - 1].end = self.free[index].end;
            self.free.remove(index);
        }
    }
}

#[derive(Default)]
struct PoolState {
    /// Freed blocks leave a `None` so block indices stay stable.
    blocks: Vec<Option<Block>>,
    live: usize,
    used: u64,
}

/// Pool state shared between the allocator and the memory it handed out.
pub(crate) struct PoolShared {
    device: Arc<Device>,
    block_size: u64,
    state: Mutex<PoolState>,
}

impl PoolShared {
    pub(crate) fn free(&self, block: usize, offset: u64, reserved: u64) {
        let mut state = self.state.lock();
        state.live -= 1;
        state.used -= reserved;
        if let Some(block) = state.blocks[block].as_mut() {
            block.live -= 1;
            block.release(offset..offset + reserved);
        }
    }

    /// Map a whole block, or bump the count of an existing mapping.
    pub(crate) fn map_block(&self, index: usize) -> GpuResult<NonNull<u8>> {
        let mut state = self.state.lock();
        let Some(block) = state.blocks[index].as_mut() else {
            unreachable!("mapping a released block");
        };
        let ptr = match block.mapped {
            Some(MappedPtr(ptr)) => ptr,
            None => {
                // SAFETY: the block is host visible and not mapped.
                let ptr = unsafe { self.device.driver().map_memory(block.raw, 0, block.size)? };
                block.mapped = Some(MappedPtr(ptr));
                ptr
            }
        };
        block.map_count += 1;
        Ok(ptr)
    }

    pub(crate) fn unmap_block(&self, index: usize) {
        let mut state = self.state.lock();
        let Some(block) = state.blocks[index].as_mut() else {
            return;
        };
        block.map_count -= 1;
        if block.map_count == 0 {
            block.mapped = None;
            // SAFETY: the last region into this block has been dropped.
            unsafe { self.device.driver().unmap_memory(block.raw) };
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for block in state.blocks.drain(..).flatten() {
            // SAFETY: every `DeviceMemory` keeps the pool alive, so none remain.
            unsafe { self.device.driver().free_memory(block.raw) };
        }
    }
}

/// Allocator that sub-allocates from per-memory-type blocks.
pub struct PooledAllocator {
    shared: Arc<PoolShared>,
}

impl PooledAllocator {
    pub fn new(device: &Arc<Device>, block_size: u64) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                device: Arc::clone(device),
                block_size: block_size.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.shared.block_size
    }

    pub(crate) fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    pub(crate) fn allocate(&self, request: &AllocationRequest) -> GpuResult<DeviceMemory> {
        let device = &self.shared.device;
        let flags = device.memory_properties().types[request.memory_type_index as usize]
            .property_flags;

        let (mut size, mut alignment) = (request.size, request.alignment);
        if flags.contains(MemoryPropertyFlags::HOST_VISIBLE)
            && !flags.contains(MemoryPropertyFlags::HOST_COHERENT)
        {
            // Flushes are widened to whole atoms, so neighbors must not share one.
            let atom = device.limits().non_coherent_atom_size.max(1);
            alignment = alignment.max(atom);
            // An unrepresentable size is left for the driver to reject.
            size = size.checked_next_multiple_of(atom).unwrap_or(u64::MAX);
        }

        let mut state = self.shared.state.lock();
        // Requests larger than a block always get a dedicated one.
        let searchable = size <= self.shared.block_size;
        let found = state.blocks.iter_mut().enumerate().find_map(|(index, block)| {
            let block = block.as_mut().filter(|_| searchable)?;
            if block.memory_type_index != request.memory_type_index || block.linear != request.linear
            {
                return None;
            }
            block.take(size, alignment).map(|offset| (index, offset))
        });

        let (index, offset) = match found {
            Some(found) => found,
            None => {
                let block_size = self.shared.block_size.max(size);
                let raw = device
                    .driver()
                    .allocate_memory(block_size, request.memory_type_index)?;
                log::debug!(
                    "Allocated {} byte block of memory type {}",
                    block_size,
                    request.memory_type_index
                );
                let mut block = Block {
                    raw,
                    memory_type_index: request.memory_type_index,
                    linear: request.linear,
                    size: block_size,
                    free: vec![0..block_size],
                    live: 0,
                    map_count: 0,
                    mapped: None,
                };
                let offset = block.take(size, alignment).unwrap_or(0);
                let index = match state.blocks.iter().position(Option::is_none) {
                    Some(slot) => {
                        state.blocks[slot] = Some(block);
                        slot
                    }
                    None => {
                        state.blocks.push(Some(block));
                        state.blocks.len() - 1
                    }
                };
                (index, offset)
            }
        };

        let Some(block) = state.blocks[index].as_mut() else {
            unreachable!("allocated from a released block");
        };
        block.live += 1;
        let (raw, native_size) = (block.raw, block.size);
        state.live += 1;
        state.used += size;

        Ok(DeviceMemory {
            device: Arc::clone(device),
            raw,
            offset,
            size: request.size,
            native_size,
            memory_type_index: request.memory_type_index,
            flags,
            bound: false,
            backing: Backing::Pooled {
                pool: Arc::clone(&self.shared),
                block: index,
                reserved: size,
            },
        })
    }

    pub fn stats(&self) -> AllocatorStats {
        let state = self.shared.state.lock();
        let blocks = state.blocks.iter().flatten();
        AllocatorStats {
            native_allocations: blocks.clone().count(),
            live_allocations: state.live,
            reserved_bytes: blocks.map(|b| b.size).sum(),
            used_bytes: state.used,
        }
    }

    /// Free every block with no live allocation in it.
    pub fn trim(&self) -> usize {
        let mut state = self.shared.state.lock();
        let mut released = 0;
        for slot in state.blocks.iter_mut() {
            if slot.as_ref().is_some_and(Block::is_unused) {
                if let Some(block) = slot.take() {
                    // SAFETY: no live allocation or mapping references the block.
                    unsafe { self.shared.device.driver().free_memory(block.raw) };
                    released += 1;
                }
            }
        }
        if released > 0 {
            log::debug!("Trimmed {} empty memory blocks", released);
        }
        released
    }
}
