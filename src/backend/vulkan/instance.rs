//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::{ComputeError, Result};

use super::debug::{self, MessageQueue};

/// Timeline semaphores are core in Vulkan 1.2.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance with optional validation layers.
///
/// # Safety
///
/// `messages` must outlive the returned messenger.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    application_name: &str,
    validation_enabled: bool,
    messages: &MessageQueue,
) -> Result<InstanceBundle> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);
    if validation_enabled && !validation_available {
        log::warn!("{VALIDATION_LAYER_NAME:?} requested but not installed; running without it");
    }

    let app_name = CString::new(application_name).map_err(|_| {
        ComputeError::InitializationFailed(format!(
            "application name {application_name:?} contains a NUL byte"
        ))
    })?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"RedLilium Compute")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let (extensions, layer_names, create_flags) = instance_requirements(validation_available);
    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        ComputeError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match unsafe { debug::create_debug_messenger(&debug_utils, messages) } {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
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

type InstanceRequirements = (
    Vec<*const std::ffi::c_char>,
    Vec<*const std::ffi::c_char>,
    vk::InstanceCreateFlags,
);

/// Extensions, layers and flags the instance is created with.
fn instance_requirements(validation: bool) -> InstanceRequirements {
    let mut extensions = Vec::new();
    let mut layers = Vec::new();
    let mut flags = vk::InstanceCreateFlags::empty();

    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER_NAME.as_ptr());
    }

    // MoltenVK is only enumerated through the portability extension.
    if cfg!(target_os = "macos") {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    (extensions, layers, flags)
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers
                .iter()
                .any(|layer| {
                    layer
                        .layer_name_as_c_str()
                        .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
                })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_without_validation() {
        let (extensions, layers, _) = instance_requirements(false);
        assert!(layers.is_empty());
        assert_eq!(extensions.len(), usize::from(cfg!(target_os = "macos")));
    }

    #[test]
    fn test_requirements_with_validation() {
        let (extensions, layers, _) = instance_requirements(true);
        assert_eq!(layers, vec![VALIDATION_LAYER_NAME.as_ptr()]);
        assert!(extensions.contains(&ash::ext::debug_utils::NAME.as_ptr()));
    }
}
