//! Buffers and images.
//!
//! Resources are created unbound; memory comes from a
//! [`MemoryAllocator`](crate::MemoryAllocator) and is attached with
//! [`DeviceMemory::bind_buffer`](crate::DeviceMemory::bind_buffer) or
//! [`DeviceMemory::bind_image`](crate::DeviceMemory::bind_image).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{RawBuffer, RawImage};
use crate::device::Device;
use crate::error::GpuResult;
use crate::types::{BufferDescriptor, ImageDescriptor, MemoryRequirements};

/// A GPU buffer.
pub struct Buffer {
    device: Arc<Device>,
    raw: RawBuffer,
    descriptor: BufferDescriptor,
    requirements: MemoryRequirements,
    bound: AtomicBool,
}

impl Buffer {
    pub(crate) fn new(device: &Arc<Device>, descriptor: &BufferDescriptor) -> GpuResult<Self> {
        let raw = device.driver().create_buffer(descriptor)?;
        let requirements = device.driver().buffer_memory_requirements(raw);
        Ok(Self {
            device: Arc::clone(device),
            raw,
            descriptor: descriptor.clone(),
            requirements,
            bound: AtomicBool::new(false),
        })
    }

    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        self.requirements
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub(crate) fn mark_bound(&self) {
        let was_bound = self.bound.swap(true, Ordering::AcqRel);
        assert!(!was_bound, "buffer {:?} is already bound to memory", self.label());
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("raw", &self.raw.0)
            .field("label", &self.descriptor.label)
            .field("size", &self.descriptor.size)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: the buffer is exclusively owned and no longer in use by the GPU.
        unsafe { self.device.driver().destroy_buffer(self.raw) };
    }
}

/// A GPU image.
pub struct Image {
    device: Arc<Device>,
    raw: RawImage,
    descriptor: ImageDescriptor,
    requirements: MemoryRequirements,
    bound: AtomicBool,
}

impl Image {
    pub(crate) fn new(device: &Arc<Device>, descriptor: &ImageDescriptor) -> GpuResult<Self> {
        let raw = device.driver().create_image(descriptor)?;
        let requirements = device.driver().image_memory_requirements(raw);
        Ok(Self {
            device: Arc::clone(device),
            raw,
            descriptor: descriptor.clone(),
            requirements,
            bound: AtomicBool::new(false),
        })
    }

    pub fn raw(&self) -> RawImage {
        self.raw
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        self.requirements
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub(crate) fn mark_bound(&self) {
        let was_bound = self.bound.swap(true, Ordering::AcqRel);
        assert!(
            !was_bound,
            "image {:?} is already bound to memory",
            self.descriptor.label
        );
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("raw", &self.raw.0)
            .field("label", &self.descriptor.label)
            .field("extent", &self.descriptor.extent)
            .field("format", &self.descriptor.format)
            .finish()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        // SAFETY: the image is exclusively owned and no longer in use by the GPU.
        unsafe { self.device.driver().destroy_image(self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::dummy_device;
    use crate::types::{
        BufferDescriptor, BufferUsage, Extent2D, ImageDescriptor, ImageFormat, ImageUsage,
        MemoryUsage,
    };

    #[test]
    fn test_buffer_requirements() {
        let (device, driver) = dummy_device();
        let buffer = device
            .create_buffer(
                &BufferDescriptor::new(100, BufferUsage::VERTEX).with_label("vertices"),
            )
            .unwrap();
        assert_eq!(buffer.size(), 100);
        assert_eq!(buffer.label(), Some("vertices"));
        let requirements = buffer.memory_requirements();
        assert!(requirements.size >= 100);
        assert_eq!(requirements.alignment, 256);
        assert_eq!(driver.live_buffers(), 1);
        drop(buffer);
        assert_eq!(driver.live_buffers(), 0);
    }

    #[test]
    fn test_image_bind() {
        let (device, driver) = dummy_device();
        let image = device
            .create_image(&ImageDescriptor::new(
                Extent2D::new(64, 64),
                ImageFormat::Rgba8Unorm,
                ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            ))
            .unwrap();
        let allocator = device.create_memory_allocator();
        let mut memory = allocator
            .allocate_for_image(&image, MemoryUsage::GpuOnly.into())
            .unwrap();
        memory.bind_image(&image).unwrap();
        assert!(image.is_bound());
        assert!(memory.is_bound());
        assert_eq!(memory.offset() % image.memory_requirements().alignment, 0);
        assert_eq!(driver.live_images(), 1);
    }
}
