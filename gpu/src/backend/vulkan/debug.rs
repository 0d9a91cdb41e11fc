//! Validation output routed to `log`.
//!
//! Layer severities map onto log levels: errors and warnings keep their
//! level, info becomes `debug` and verbose becomes `trace`. The messenger
//! only subscribes to the severities that [`DeviceConfig::validation_log_level`]
//! lets through. Objects named by a message are appended by type and handle,
//! so a report can be matched with the queue, command buffer, fence or
//! swapchain handles the driver hands out.
//!
//! [`DeviceConfig::validation_log_level`]: crate::DeviceConfig::validation_log_level

use std::ffi::{CStr, c_char};
use std::fmt::Write as _;

use ash::vk;
use log::{Level, LevelFilter};

use crate::error::GpuError;

type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;

const SEVERITY_LEVELS: [(Severity, Level); 4] = [
    (Severity::ERROR, Level::Error),
    (Severity::WARNING, Level::Warn),
    (Severity::INFO, Level::Debug),
    (Severity::VERBOSE, Level::Trace),
];

/// Create a messenger for every severity `max_level` lets through.
///
/// Returns `None` when nothing would be logged.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
    max_level: LevelFilter,
) -> Result<Option<vk::DebugUtilsMessengerEXT>, GpuError> {
    let severities = severity_flags(max_level);
    if severities.is_empty() {
        return Ok(None);
    }

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severities)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| {
            GpuError::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
        })?;
    log::debug!("Validation messages routed to log up to {}", max_level);
    Ok(Some(messenger))
}

fn severity_flags(max_level: LevelFilter) -> Severity {
    SEVERITY_LEVELS
        .iter()
        .filter(|(_, level)| *level <= max_level)
        .fold(Severity::empty(), |flags, (severity, _)| flags | *severity)
}

fn log_level(severity: Severity) -> Level {
    SEVERITY_LEVELS
        .iter()
        .find(|(flag, _)| severity.contains(*flag))
        .map_or(Level::Trace, |(_, level)| *level)
}

fn kind_label(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// Read a driver-owned C string, tolerating null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn driver_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: forwarded to the caller.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

fn append_object(out: &mut String, object_type: vk::ObjectType, handle: u64, name: Option<&str>) {
    let _ = write!(out, " [{:?} {:#x}", object_type, handle);
    if let Some(name) = name {
        let _ = write!(out, " \"{}\"", name);
    }
    out.push(']');
}

unsafe extern "system" fn debug_callback(
    message_severity: Severity,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let level = log_level(message_severity);
    if level > log::max_level() {
        return vk::FALSE;
    }

    // SAFETY: the layer passes valid callback data, or null, for the duration
    // of the call; every string and the object array live as long as it.
    let line = unsafe {
        match callback_data.as_ref() {
            None => String::from("(no message)"),
            Some(data) => {
                let mut line = driver_str(data.p_message).unwrap_or_default();
                if let Some(id) = driver_str(data.p_message_id_name) {
                    line.insert_str(0, &format!("{id}: "));
                }
                if !data.p_objects.is_null() {
                    let objects =
                        std::slice::from_raw_parts(data.p_objects, data.object_count as usize);
                    for object in objects {
                        let name = driver_str(object.p_object_name);
                        append_object(
                            &mut line,
                            object.object_type,
                            object.object_handle,
                            name.as_deref(),
                        );
                    }
                }
                line
            }
        }
    };

    log::log!(level, "[Vulkan {}] {}", kind_label(message_type), line);
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_flags_follow_log_level() {
        assert!(severity_flags(LevelFilter::Off).is_empty());
        assert_eq!(
            severity_flags(LevelFilter::Warn),
            Severity::ERROR | Severity::WARNING
        );
        assert_eq!(
            severity_flags(LevelFilter::Debug),
            Severity::ERROR | Severity::WARNING | Severity::INFO
        );
        assert_eq!(severity_flags(LevelFilter::Trace), Severity::from_raw(0x1111));
    }

    #[test]
    fn test_most_severe_bit_decides_level() {
        assert_eq!(log_level(Severity::ERROR | Severity::INFO), Level::Error);
        assert_eq!(log_level(Severity::INFO), Level::Debug);
        assert_eq!(log_level(Severity::empty()), Level::Trace);
    }

    #[test]
    fn test_combined_types_prefer_validation() {
        let kind = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
        assert_eq!(kind_label(kind), "validation");
        assert_eq!(kind_label(vk::DebugUtilsMessageTypeFlagsEXT::empty()), "general");
    }

    #[test]
    fn test_objects_are_tagged_with_type_and_handle() {
        let mut line = String::from("submit failed");
        append_object(&mut line, vk::ObjectType::QUEUE, 0x2a, Some("graphics"));
        append_object(&mut line, vk::ObjectType::FENCE, 0x10, None);
        assert_eq!(line, "submit failed [QUEUE 0x2a \"graphics\"] [FENCE 0x10]");
    }
}
