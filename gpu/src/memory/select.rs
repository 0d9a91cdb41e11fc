//! Memory type selection.
//!
//! Device memory layouts differ a lot between GPUs: integrated parts expose
//! one heap where everything is device local and host visible, discrete parts
//! split VRAM from system memory and may add a small host-visible window into
//! VRAM. Selection filters types by the resource's type mask and the required
//! flags, then scores the rest by preferred flags present, avoided flags
//! absent and heap size.

use crate::types::{MemoryProperties, MemoryPropertyFlags, MemoryUsage};

/// What an allocation needs from its memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRequest {
    /// Pick a type suited to an access pattern.
    Usage(MemoryUsage),
    /// Require exactly these property flags.
    Properties(MemoryPropertyFlags),
}

impl MemoryRequest {
    pub fn required_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::Usage(usage) => usage.required_flags(),
            Self::Properties(flags) => flags,
        }
    }

    fn preferred_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::Usage(usage) => usage.preferred_flags(),
            Self::Properties(_) => MemoryPropertyFlags::empty(),
        }
    }

    fn avoided_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::Usage(usage) => usage.avoided_flags(),
            Self::Properties(_) => MemoryPropertyFlags::empty(),
        }
    }
}

impl From<MemoryUsage> for MemoryRequest {
    fn from(usage: MemoryUsage) -> Self {
        Self::Usage(usage)
    }
}

impl From<MemoryPropertyFlags> for MemoryRequest {
    fn from(flags: MemoryPropertyFlags) -> Self {
        Self::Properties(flags)
    }
}

/// Find the best memory type index for a request, if any type qualifies.
///
/// Ties are broken towards the lowest index.
pub fn find_memory_type(
    properties: &MemoryProperties,
    type_bits: u32,
    request: MemoryRequest,
) -> Option<u32> {
    let required = request.required_flags();
    let preferred = request.preferred_flags();
    let avoided = request.avoided_flags();

    properties
        .types
        .iter()
        .enumerate()
        .take(32)
        .rev()
        .filter(|(i, mt)| type_bits & (1 << i) != 0 && mt.property_flags.contains(required))
        .max_by_key(|(_, mt)| {
            let preferred_present = (mt.property_flags & preferred).bits().count_ones();
            let avoided_absent = (avoided - mt.property_flags).bits().count_ones();
            (preferred_present, avoided_absent, properties.heap_size(mt))
        })
        .map(|(i, _)| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryHeap, MemoryType};

    fn mem_type(flags: MemoryPropertyFlags, heap_index: u32) -> MemoryType {
        MemoryType {
            property_flags: flags,
            heap_index,
        }
    }

    fn heap(size: u64, device_local: bool) -> MemoryHeap {
        MemoryHeap { size, device_local }
    }

    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    /// NVIDIA-style discrete GPU with a 256MB BAR window.
    fn discrete() -> MemoryProperties {
        MemoryProperties {
            types: vec![
                mem_type(MemoryPropertyFlags::DEVICE_LOCAL, 0),
                mem_type(
                    MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                    1,
                ),
                mem_type(
                    MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
                mem_type(
                    MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    2,
                ),
            ],
            heaps: vec![heap(8 * GB, true), heap(16 * GB, false), heap(256 * MB, true)],
        }
    }

    /// Integrated GPU: one heap, everything host visible.
    fn integrated() -> MemoryProperties {
        let all = MemoryPropertyFlags::DEVICE_LOCAL
            | MemoryPropertyFlags::HOST_VISIBLE
            | MemoryPropertyFlags::HOST_COHERENT;
        MemoryProperties {
            types: vec![
                mem_type(all, 0),
                mem_type(all | MemoryPropertyFlags::HOST_CACHED, 0),
            ],
            heaps: vec![heap(16 * GB, true)],
        }
    }

    #[test]
    fn test_discrete_usages() {
        let props = discrete();
        let pick = |usage| find_memory_type(&props, u32::MAX, MemoryRequest::Usage(usage));
        assert_eq!(pick(MemoryUsage::GpuOnly), Some(0));
        assert_eq!(pick(MemoryUsage::CpuToGpu), Some(3));
        assert_eq!(pick(MemoryUsage::GpuToCpu), Some(2));
    }

    #[test]
    fn test_integrated_usages() {
        let props = integrated();
        let pick = |usage| find_memory_type(&props, u32::MAX, MemoryRequest::Usage(usage));
        assert_eq!(pick(MemoryUsage::GpuOnly), Some(0));
        assert_eq!(pick(MemoryUsage::CpuToGpu), Some(0));
        assert_eq!(pick(MemoryUsage::GpuToCpu), Some(1));
    }

    #[test]
    fn test_type_bits_restrict_choice() {
        let props = discrete();
        let request = MemoryRequest::Usage(MemoryUsage::GpuOnly);
        assert_eq!(find_memory_type(&props, 0b1000, request), Some(3));
        assert_eq!(find_memory_type(&props, 0b0110, request), None);
    }

    #[test]
    fn test_exact_properties() {
        let props = discrete();
        let request = MemoryRequest::Properties(
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED,
        );
        assert_eq!(find_memory_type(&props, u32::MAX, request), Some(2));
        let request = MemoryRequest::Properties(MemoryPropertyFlags::LAZILY_ALLOCATED);
        assert_eq!(find_memory_type(&props, u32::MAX, request), None);
    }
}
