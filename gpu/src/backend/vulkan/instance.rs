//! Vulkan instance creation.

use std::ffi::{CStr, CString, c_char};

use ash::vk;

use crate::config::DeviceConfig;
use crate::error::GpuError;

use super::debug;

/// Vulkan 1.3 is needed for core `vkQueueSubmit2` and synchronization2 barriers.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance with every available surface extension enabled.
pub fn create_instance(entry: &ash::Entry, config: &DeviceConfig) -> Result<InstanceBundle, GpuError> {
    let validation_enabled = config.validation;
    let validation_available = validation_enabled && check_validation_layer_support(entry);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(config.application_name.as_str()).map_err(|_| {
        GpuError::InitializationFailed("application name contains a NUL byte".to_string())
    })?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"RedLilium Engine")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(|e| {
            GpuError::InitializationFailed(format!("Failed to enumerate extensions: {:?}", e))
        })?;
    let is_available = |name: &CStr| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name))
    };

    let mut wanted: Vec<&CStr> = vec![ash::khr::surface::NAME];

    #[cfg(target_os = "windows")]
    wanted.push(ash::khr::win32_surface::NAME);

    #[cfg(target_os = "linux")]
    {
        wanted.push(ash::khr::xlib_surface::NAME);
        wanted.push(ash::khr::xcb_surface::NAME);
        wanted.push(ash::khr::wayland_surface::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        wanted.push(ash::khr::portability_enumeration::NAME);
        wanted.push(ash::ext::metal_surface::NAME);
    }

    if validation_available {
        wanted.push(ash::ext::debug_utils::NAME);
    }

    let extensions: Vec<*const c_char> = wanted
        .into_iter()
        .filter(|name| {
            let found = is_available(name);
            if !found {
                log::debug!("Instance extension {:?} not available", name);
            }
            found
        })
        .map(CStr::as_ptr)
        .collect();

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GpuError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils, config.validation_log_level) {
            Ok(messenger) => (Some(debug_utils), messenger),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        (None, None)
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
    })
}
