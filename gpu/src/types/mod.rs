//! Plain data types shared by the driver layer and the public API.
//!
//! Flag values and enum discriminants mirror their Vulkan counterparts so the
//! Vulkan backend converts them with a raw cast.

mod memory;
mod queue;
mod resource;
mod surface;
mod sync;

pub use memory::{
    DeviceLimits, MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryRequirements,
    MemoryType, MemoryUsage,
};
pub use queue::{CommandPoolPolicy, QueueFamilyId, QueueFamilyProperties, QueueFlags, QueueKind};
pub use resource::{
    BufferDescriptor, BufferUsage, Extent2D, ImageDescriptor, ImageFormat, ImageLayout,
    ImageUsage,
};
pub use surface::{ColorSpace, PresentMode, SurfaceCapabilities, SurfaceFormat};
pub use sync::{AccessFlags, PipelineStageFlags};
