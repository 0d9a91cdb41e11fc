//! Native Vulkan driver implementation using ash.
//!
//! Requires Vulkan 1.3 (synchronization2 and `vkQueueSubmit2`). Validation
//! layers are enabled when [`DeviceConfig::validation`] is set and the layer
//! is installed.

pub(crate) mod conversion;
mod debug;
mod device;
mod instance;

use std::ptr::NonNull;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::command::{OwnershipTransfer, TransferResource};
use crate::config::DeviceConfig;
use crate::error::{DriverResult, GpuError, GpuResult};
use crate::types::{
    BufferDescriptor, CommandPoolPolicy, DeviceLimits, ImageDescriptor, MemoryProperties,
    MemoryRequirements, QueueFamilyId, QueueFamilyProperties, SurfaceCapabilities,
};

use super::{
    AcquireOutcome, Driver, MappedMemoryRange, PresentOutcome, RawBuffer, RawCommandBuffer,
    RawCommandPool, RawFence, RawImage, RawMemory, RawQueue, RawSemaphore, RawSurface,
    RawSwapchain, SemaphoreSubmit, SubmitInfo, SwapchainCreateInfo, TransferHalf,
};

use self::conversion::{
    convert_access, convert_buffer_usage, convert_extent, convert_format, convert_image_usage,
    convert_layout, convert_mapped_range, convert_memory_properties, convert_memory_requirements,
    convert_pool_flags, convert_present_mode, convert_queue_family, convert_stage,
    convert_surface_capabilities, handle, vk_error,
};

/// Vulkan driver using ash.
///
/// Owns the instance, the selected physical device and a logical device that
/// exposes every hardware queue.
pub struct VulkanDriver {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    queue_families: Vec<QueueFamilyProperties>,
    memory_properties: MemoryProperties,
    limits: DeviceLimits,
}

impl std::fmt::Debug for VulkanDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDriver")
            .field("validation", &self.debug_messenger.is_some())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

impl VulkanDriver {
    /// Load Vulkan, create an instance and a logical device on the best GPU.
    pub fn new(config: &DeviceConfig) -> GpuResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GpuError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let bundle =
            instance::create_instance(&entry, config)?;
        let instance = bundle.instance;

        let destroy_instance = |instance: &ash::Instance| unsafe {
            if let (Some(utils), Some(messenger)) = (&bundle.debug_utils, bundle.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let physical_device = match device::select_physical_device(&instance) {
            Ok(physical_device) => physical_device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let vk_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let device =
            match device::create_logical_device(&instance, physical_device, &vk_families) {
                Ok(device) => device,
                Err(e) => {
                    destroy_instance(&instance);
                    return Err(e);
                }
            };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties = convert_memory_properties(&unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        });
        let limits = DeviceLimits {
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            max_memory_allocation_count: properties.limits.max_memory_allocation_count,
            buffer_image_granularity: properties.limits.buffer_image_granularity,
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let queue_families = vk_families.iter().map(convert_queue_family).collect();

        log::info!(
            "Vulkan device created ({} memory types, atom size {})",
            memory_properties.types.len(),
            limits.non_coherent_atom_size
        );

        Ok(Self {
            entry,
            instance,
            debug_utils: bundle.debug_utils,
            debug_messenger: bundle.debug_messenger,
            physical_device,
            device,
            surface_loader,
            swapchain_loader,
            queue_families,
            memory_properties,
            limits,
        })
    }

    /// Raw ash device, for recording commands outside this crate.
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn raw_instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Create a presentation surface for a window.
    pub fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GpuResult<RawSurface> {
        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)
        }
        .map_err(vk_error("vkCreateSurfaceKHR"))?;
        Ok(RawSurface(surface.as_raw()))
    }

    /// # Safety
    /// No swapchain created for the surface may still exist.
    pub unsafe fn destroy_surface(&self, surface: RawSurface) {
        unsafe {
            self.surface_loader
                .destroy_surface(handle::<vk::SurfaceKHR>(surface.0), None)
        };
    }
}

fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

fn semaphore_infos(semaphores: &[SemaphoreSubmit]) -> Vec<vk::SemaphoreSubmitInfo<'static>> {
    semaphores
        .iter()
        .map(|s| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(handle(s.semaphore.0))
                .stage_mask(convert_stage(s.stage))
        })
        .collect()
}

impl Driver for VulkanDriver {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn queue_families(&self) -> Vec<QueueFamilyProperties> {
        self.queue_families.clone()
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.memory_properties.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn get_queue(&self, family: QueueFamilyId, index: u32) -> RawQueue {
        let queue = unsafe { self.device.get_device_queue(family.index(), index) };
        RawQueue(queue.as_raw())
    }

    fn create_command_pool(
        &self,
        family: QueueFamilyId,
        policy: CommandPoolPolicy,
    ) -> GpuResult<RawCommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family.index())
            .flags(convert_pool_flags(policy));
        let pool = unsafe { self.device.create_command_pool(&create_info, None) }
            .map_err(vk_error("vkCreateCommandPool"))?;
        Ok(RawCommandPool(pool.as_raw()))
    }

    unsafe fn destroy_command_pool(&self, pool: RawCommandPool) {
        unsafe { self.device.destroy_command_pool(handle(pool.0), None) };
    }

    unsafe fn reset_command_pool(&self, pool: RawCommandPool) -> GpuResult<()> {
        unsafe {
            self.device
                .reset_command_pool(handle(pool.0), vk::CommandPoolResetFlags::empty())
        }
        .map_err(vk_error("vkResetCommandPool"))
    }

    fn allocate_command_buffers(
        &self,
        pool: RawCommandPool,
        count: u32,
    ) -> GpuResult<Vec<RawCommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(handle(pool.0))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(vk_error("vkAllocateCommandBuffers"))?;
        Ok(buffers
            .into_iter()
            .map(|b| RawCommandBuffer(b.as_raw()))
            .collect())
    }

    unsafe fn free_command_buffers(&self, pool: RawCommandPool, buffers: &[RawCommandBuffer]) {
        let buffers: Vec<vk::CommandBuffer> = buffers.iter().map(|b| handle(b.0)).collect();
        unsafe { self.device.free_command_buffers(handle(pool.0), &buffers) };
    }

    unsafe fn begin_command_buffer(
        &self,
        buffer: RawCommandBuffer,
        one_time_submit: bool,
    ) -> GpuResult<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device
                .begin_command_buffer(handle(buffer.0), &begin_info)
        }
        .map_err(vk_error("vkBeginCommandBuffer"))
    }

    unsafe fn end_command_buffer(&self, buffer: RawCommandBuffer) -> GpuResult<()> {
        unsafe { self.device.end_command_buffer(handle(buffer.0)) }
            .map_err(vk_error("vkEndCommandBuffer"))
    }

    unsafe fn reset_command_buffer(&self, buffer: RawCommandBuffer) -> GpuResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(handle(buffer.0), vk::CommandBufferResetFlags::empty())
        }
        .map_err(vk_error("vkResetCommandBuffer"))
    }

    unsafe fn cmd_ownership_barrier(
        &self,
        buffer: RawCommandBuffer,
        transfer: &OwnershipTransfer,
        half: TransferHalf,
    ) {
        // The release half only makes writes available, the acquire half only
        // makes them visible.
        let (src_stage, src_access, dst_stage, dst_access) = match half {
            TransferHalf::Release => (
                convert_stage(transfer.src_stage),
                convert_access(transfer.src_access),
                vk::PipelineStageFlags2::NONE,
                vk::AccessFlags2::NONE,
            ),
            TransferHalf::Acquire => (
                vk::PipelineStageFlags2::NONE,
                vk::AccessFlags2::NONE,
                convert_stage(transfer.dst_stage),
                convert_access(transfer.dst_access),
            ),
        };

        let buffer_barriers;
        let image_barriers;
        let dependency_info = match transfer.resource {
            TransferResource::Buffer {
                buffer: resource,
                offset,
                size,
            } => {
                buffer_barriers = [vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(src_stage)
                    .src_access_mask(src_access)
                    .dst_stage_mask(dst_stage)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(transfer.src_family.index())
                    .dst_queue_family_index(transfer.dst_family.index())
                    .buffer(handle(resource.0))
                    .offset(offset)
                    .size(size)];
                vk::DependencyInfo::default().buffer_memory_barriers(&buffer_barriers)
            }
            TransferResource::Image {
                image,
                old_layout,
                new_layout,
                depth,
            } => {
                let aspect_mask = if depth {
                    vk::ImageAspectFlags::DEPTH
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                image_barriers = [vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(src_stage)
                    .src_access_mask(src_access)
                    .dst_stage_mask(dst_stage)
                    .dst_access_mask(dst_access)
                    .old_layout(convert_layout(old_layout))
                    .new_layout(convert_layout(new_layout))
                    .src_queue_family_index(transfer.src_family.index())
                    .dst_queue_family_index(transfer.dst_family.index())
                    .image(handle(image.0))
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(aspect_mask)
                            .level_count(vk::REMAINING_MIP_LEVELS)
                            .layer_count(vk::REMAINING_ARRAY_LAYERS),
                    )];
                vk::DependencyInfo::default().image_memory_barriers(&image_barriers)
            }
        };

        unsafe {
            self.device
                .cmd_pipeline_barrier2(handle(buffer.0), &dependency_info)
        };
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> GpuResult<RawMemory> {
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }
            .map_err(vk_error("vkAllocateMemory"))?;
        Ok(RawMemory(memory.as_raw()))
    }

    unsafe fn free_memory(&self, memory: RawMemory) {
        unsafe { self.device.free_memory(handle(memory.0), None) };
    }

    unsafe fn map_memory(
        &self,
        memory: RawMemory,
        offset: u64,
        size: u64,
    ) -> GpuResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device.map_memory(
                handle(memory.0),
                offset,
                size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .map_err(vk_error("vkMapMemory"))?;
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| GpuError::driver("vkMapMemory", DriverResult::MemoryMapFailed))
    }

    unsafe fn unmap_memory(&self, memory: RawMemory) {
        unsafe { self.device.unmap_memory(handle(memory.0)) };
    }

    unsafe fn flush_memory(&self, ranges: &[MappedMemoryRange]) -> GpuResult<()> {
        let ranges: Vec<vk::MappedMemoryRange> = ranges.iter().map(convert_mapped_range).collect();
        unsafe { self.device.flush_mapped_memory_ranges(&ranges) }
            .map_err(vk_error("vkFlushMappedMemoryRanges"))
    }

    unsafe fn invalidate_memory(&self, ranges: &[MappedMemoryRange]) -> GpuResult<()> {
        let ranges: Vec<vk::MappedMemoryRange> = ranges.iter().map(convert_mapped_range).collect();
        unsafe { self.device.invalidate_mapped_memory_ranges(&ranges) }
            .map_err(vk_error("vkInvalidateMappedMemoryRanges"))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GpuResult<RawBuffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }
            .map_err(vk_error("vkCreateBuffer"))?;
        Ok(RawBuffer(buffer.as_raw()))
    }

    unsafe fn destroy_buffer(&self, buffer: RawBuffer) {
        unsafe { self.device.destroy_buffer(handle(buffer.0), None) };
    }

    fn buffer_memory_requirements(&self, buffer: RawBuffer) -> MemoryRequirements {
        convert_memory_requirements(unsafe {
            self.device.get_buffer_memory_requirements(handle(buffer.0))
        })
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: RawBuffer,
        memory: RawMemory,
        offset: u64,
    ) -> GpuResult<()> {
        unsafe {
            self.device
                .bind_buffer_memory(handle(buffer.0), handle(memory.0), offset)
        }
        .map_err(vk_error("vkBindBufferMemory"))
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> GpuResult<RawImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.extent.width,
                height: descriptor.extent.height,
                depth: 1,
            })
            .mip_levels(descriptor.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&create_info, None) }
            .map_err(vk_error("vkCreateImage"))?;
        Ok(RawImage(image.as_raw()))
    }

    unsafe fn destroy_image(&self, image: RawImage) {
        unsafe { self.device.destroy_image(handle(image.0), None) };
    }

    fn image_memory_requirements(&self, image: RawImage) -> MemoryRequirements {
        convert_memory_requirements(unsafe {
            self.device.get_image_memory_requirements(handle(image.0))
        })
    }

    unsafe fn bind_image_memory(
        &self,
        image: RawImage,
        memory: RawMemory,
        offset: u64,
    ) -> GpuResult<()> {
        unsafe {
            self.device
                .bind_image_memory(handle(image.0), handle(memory.0), offset)
        }
        .map_err(vk_error("vkBindImageMemory"))
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<RawFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&create_info, None) }
            .map_err(vk_error("vkCreateFence"))?;
        Ok(RawFence(fence.as_raw()))
    }

    unsafe fn destroy_fence(&self, fence: RawFence) {
        unsafe { self.device.destroy_fence(handle(fence.0), None) };
    }

    fn fence_status(&self, fence: RawFence) -> GpuResult<bool> {
        unsafe { self.device.get_fence_status(handle(fence.0)) }
            .map_err(vk_error("vkGetFenceStatus"))
    }

    fn reset_fences(&self, fences: &[RawFence]) -> GpuResult<()> {
        let fences: Vec<vk::Fence> = fences.iter().map(|f| handle(f.0)).collect();
        unsafe { self.device.reset_fences(&fences) }.map_err(vk_error("vkResetFences"))
    }

    fn wait_for_fences(
        &self,
        fences: &[RawFence],
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> GpuResult<bool> {
        let fences: Vec<vk::Fence> = fences.iter().map(|f| handle(f.0)).collect();
        match unsafe {
            self.device
                .wait_for_fences(&fences, wait_all, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("vkWaitForFences")(e)),
        }
    }

    fn create_semaphore(&self) -> GpuResult<RawSemaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(vk_error("vkCreateSemaphore"))?;
        Ok(RawSemaphore(semaphore.as_raw()))
    }

    unsafe fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        unsafe { self.device.destroy_semaphore(handle(semaphore.0), None) };
    }

    unsafe fn queue_submit(
        &self,
        queue: RawQueue,
        submits: &[SubmitInfo<'_>],
        fence: Option<RawFence>,
    ) -> GpuResult<()> {
        crate::profile_scope!("vkQueueSubmit2");

        let waits: Vec<Vec<vk::SemaphoreSubmitInfo>> = submits
            .iter()
            .map(|s| semaphore_infos(s.wait_semaphores))
            .collect();
        let signals: Vec<Vec<vk::SemaphoreSubmitInfo>> = submits
            .iter()
            .map(|s| semaphore_infos(s.signal_semaphores))
            .collect();
        let command_buffers: Vec<Vec<vk::CommandBufferSubmitInfo>> = submits
            .iter()
            .map(|s| {
                s.command_buffers
                    .iter()
                    .map(|cb| vk::CommandBufferSubmitInfo::default().command_buffer(handle(cb.0)))
                    .collect()
            })
            .collect();

        let infos: Vec<vk::SubmitInfo2> = (0..submits.len())
            .map(|i| {
                vk::SubmitInfo2::default()
                    .wait_semaphore_infos(&waits[i])
                    .command_buffer_infos(&command_buffers[i])
                    .signal_semaphore_infos(&signals[i])
            })
            .collect();

        let fence = fence.map_or(vk::Fence::null(), |f| handle(f.0));
        unsafe { self.device.queue_submit2(handle(queue.0), &infos, fence) }
            .map_err(vk_error("vkQueueSubmit2"))
    }

    fn queue_wait_idle(&self, queue: RawQueue) -> GpuResult<()> {
        unsafe { self.device.queue_wait_idle(handle(queue.0)) }
            .map_err(vk_error("vkQueueWaitIdle"))
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("vkDeviceWaitIdle"))
    }

    fn surface_capabilities(&self, surface: RawSurface) -> GpuResult<SurfaceCapabilities> {
        let surface = handle::<vk::SurfaceKHR>(surface.0);
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, surface)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, surface)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, surface)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
        Ok(convert_surface_capabilities(&caps, &formats, &present_modes))
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> GpuResult<RawSwapchain> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(handle(info.surface.0))
            .min_image_count(info.image_count)
            .image_format(convert_format(info.format))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(convert_extent(info.extent))
            .image_array_layers(1)
            .image_usage(convert_image_usage(info.usage))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(convert_present_mode(info.present_mode))
            .clipped(true)
            .old_swapchain(info.old_swapchain.map_or(vk::SwapchainKHR::null(), |s| handle(s.0)));
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(vk_error("vkCreateSwapchainKHR"))?;
        Ok(RawSwapchain(swapchain.as_raw()))
    }

    unsafe fn destroy_swapchain(&self, swapchain: RawSwapchain) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(handle(swapchain.0), None)
        };
    }

    fn swapchain_images(&self, swapchain: RawSwapchain) -> GpuResult<Vec<RawImage>> {
        let images = unsafe { self.swapchain_loader.get_swapchain_images(handle(swapchain.0)) }
            .map_err(vk_error("vkGetSwapchainImagesKHR"))?;
        Ok(images.into_iter().map(|i| RawImage(i.as_raw())).collect())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: RawSwapchain,
        timeout: Option<Duration>,
        semaphore: Option<RawSemaphore>,
        fence: Option<RawFence>,
    ) -> GpuResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                handle(swapchain.0),
                timeout_nanos(timeout),
                semaphore.map_or(vk::Semaphore::null(), |s| handle(s.0)),
                fence.map_or(vk::Fence::null(), |f| handle(f.0)),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::NotReady),
            Err(vk::Result::TIMEOUT) => Ok(AcquireOutcome::Timeout),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR")(e)),
        }
    }

    unsafe fn queue_present(
        &self,
        queue: RawQueue,
        swapchain: RawSwapchain,
        index: u32,
        wait_semaphore: Option<RawSemaphore>,
    ) -> GpuResult<PresentOutcome> {
        let wait_semaphores: Vec<vk::Semaphore> =
            wait_semaphore.iter().map(|s| handle(s.0)).collect();
        let swapchains = [handle::<vk::SwapchainKHR>(swapchain.0)];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe {
            self.swapchain_loader
                .queue_present(handle(queue.0), &present_info)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkQueuePresentKHR")(e)),
        }
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan driver");
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("vkDeviceWaitIdle failed during shutdown: {:?}", e);
            }
            self.device.destroy_device(None);
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
