//! Vulkan physical and logical device management.

use ash::vk;

use crate::error::GpuError;

/// Select the best physical device.
///
/// Prefers discrete GPUs over integrated ones and requires Vulkan 1.3.
pub fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, GpuError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GpuError::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    if devices.is_empty() {
        return Err(GpuError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if properties.api_version < super::instance::REQUIRED_API_VERSION {
            log::info!("Skipping GPU {:?}: Vulkan 1.3 not supported", device_name);
            continue;
        }
        if !supports_swapchain(instance, device) {
            log::info!("Skipping GPU {:?}: no swapchain support", device_name);
            continue;
        }

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or_else(|| GpuError::InitializationFailed("No suitable GPU found".to_string()))
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    })
}

/// Create a logical device exposing every queue of every family.
///
/// Queue selection happens above the driver, so all hardware queues are
/// requested up front.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &[vk::QueueFamilyProperties],
) -> Result<ash::Device, GpuError> {
    let priorities: Vec<Vec<f32>> = families
        .iter()
        .map(|family| vec![1.0; family.queue_count as usize])
        .collect();

    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = priorities
        .iter()
        .enumerate()
        .filter(|(_, priorities)| !priorities.is_empty())
        .map(|(index, priorities)| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(index as u32)
                .queue_priorities(priorities)
        })
        .collect();

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let mut vulkan_13_features =
        vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GpuError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
