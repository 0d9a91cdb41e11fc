//! Type conversions between RedLilium GPU types and Vulkan types.
//!
//! Most flag types share their bit layout with Vulkan, so the conversions are
//! plain reinterpretations of the raw bits.

use ash::vk;
use ash::vk::Handle;

use crate::backend::MappedMemoryRange;
use crate::error::{DriverResult, GpuError};
use crate::types::{
    AccessFlags, BufferUsage, CommandPoolPolicy, Extent2D, ImageFormat, ImageLayout, ImageUsage,
    MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryRequirements, MemoryType,
    PipelineStageFlags, PresentMode, QueueFamilyProperties, QueueFlags, SurfaceCapabilities,
    SurfaceFormat,
};

/// Build a `map_err` adapter that tags a Vulkan error with the failing call.
pub fn vk_error(operation: &'static str) -> impl Fn(vk::Result) -> GpuError {
    move |result| GpuError::driver(operation, DriverResult::from_code(result.as_raw()))
}

/// Convert a raw handle value back into a typed Vulkan handle.
pub fn handle<T: Handle>(raw: u64) -> T {
    T::from_raw(raw)
}

pub fn convert_queue_family(family: &vk::QueueFamilyProperties) -> QueueFamilyProperties {
    QueueFamilyProperties::new(
        QueueFlags::from_bits_truncate(family.queue_flags.as_raw()),
        family.queue_count,
    )
}

pub fn convert_memory_properties(props: &vk::PhysicalDeviceMemoryProperties) -> MemoryProperties {
    let types = props.memory_types[..props.memory_type_count as usize]
        .iter()
        .map(|t| MemoryType {
            property_flags: MemoryPropertyFlags::from_bits_truncate(t.property_flags.as_raw()),
            heap_index: t.heap_index,
        })
        .collect();
    let heaps = props.memory_heaps[..props.memory_heap_count as usize]
        .iter()
        .map(|h| MemoryHeap {
            size: h.size,
            device_local: h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
        })
        .collect();
    MemoryProperties { types, heaps }
}

pub fn convert_memory_requirements(requirements: vk::MemoryRequirements) -> MemoryRequirements {
    MemoryRequirements {
        size: requirements.size,
        alignment: requirements.alignment,
        type_bits: requirements.memory_type_bits,
    }
}

pub fn convert_pool_flags(policy: CommandPoolPolicy) -> vk::CommandPoolCreateFlags {
    match policy {
        CommandPoolPolicy::Default => vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        CommandPoolPolicy::Transient => {
            vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
        }
        CommandPoolPolicy::NonResettable => vk::CommandPoolCreateFlags::empty(),
    }
}

pub fn convert_stage(stage: PipelineStageFlags) -> vk::PipelineStageFlags2 {
    vk::PipelineStageFlags2::from_raw(stage.bits())
}

pub fn convert_access(access: AccessFlags) -> vk::AccessFlags2 {
    vk::AccessFlags2::from_raw(access.bits())
}

pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::from_raw(usage.bits())
}

pub fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::from_raw(usage.bits())
}

pub fn convert_image_usage_from_vk(usage: vk::ImageUsageFlags) -> ImageUsage {
    ImageUsage::from_bits_truncate(usage.as_raw())
}

pub fn convert_format(format: ImageFormat) -> vk::Format {
    vk::Format::from_raw(format.as_raw())
}

pub fn convert_layout(layout: ImageLayout) -> vk::ImageLayout {
    vk::ImageLayout::from_raw(layout.as_raw())
}

pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    vk::PresentModeKHR::from_raw(mode as i32)
}

pub fn convert_extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

fn convert_extent_from_vk(extent: vk::Extent2D) -> Extent2D {
    Extent2D::new(extent.width, extent.height)
}

pub fn convert_mapped_range(range: &MappedMemoryRange) -> vk::MappedMemoryRange<'static> {
    vk::MappedMemoryRange::default()
        .memory(handle(range.memory.0))
        .offset(range.offset)
        .size(range.size)
}

/// Surface capabilities, keeping only formats and modes the crate knows.
pub fn convert_surface_capabilities(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    present_modes: &[vk::PresentModeKHR],
) -> SurfaceCapabilities {
    SurfaceCapabilities {
        min_image_count: caps.min_image_count,
        max_image_count: caps.max_image_count,
        // u32::MAX means the swapchain decides the surface size
        current_extent: (caps.current_extent.width != u32::MAX)
            .then(|| convert_extent_from_vk(caps.current_extent)),
        min_extent: convert_extent_from_vk(caps.min_image_extent),
        max_extent: convert_extent_from_vk(caps.max_image_extent),
        supported_usage: convert_image_usage_from_vk(caps.supported_usage_flags),
        formats: formats
            .iter()
            .filter(|f| f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .filter_map(|f| ImageFormat::from_raw(f.format.as_raw()))
            .map(SurfaceFormat::new)
            .collect(),
        present_modes: present_modes
            .iter()
            .filter_map(|m| PresentMode::from_raw(m.as_raw()))
            .collect(),
    }
}
