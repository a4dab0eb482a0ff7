//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::config::CoreConfig;
use crate::error::{GraphicsError, GraphicsResult};

/// Dynamic rendering and synchronization2 are core in 1.3.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions enabled whenever the loader offers them, so a surface
/// can be created later without the caller listing them.
fn optional_surface_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::surface::NAME];

    #[cfg(target_os = "windows")]
    extensions.push(ash::khr::win32_surface::NAME);

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        extensions.push(ash::khr::xlib_surface::NAME);
        extensions.push(ash::khr::xcb_surface::NAME);
        extensions.push(ash::khr::wayland_surface::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME);
        extensions.push(ash::ext::metal_surface::NAME);
    }

    extensions
}

/// A created instance and whether validation ended up active.
pub struct CreatedInstance {
    pub instance: ash::Instance,
    pub validation: bool,
}

/// Create the Vulkan instance described by `config`.
///
/// Extensions in `config.instance_extensions` are mandatory. Surface
/// extensions are added when available. Validation is silently skipped when
/// the layer is not installed.
pub fn create_instance(entry: &ash::Entry, config: &CoreConfig) -> GraphicsResult<CreatedInstance> {
    let available = available_extensions(entry);

    let validation = config.validation
        && has_validation_layer(entry)
        && available.iter().any(|e| e.as_c_str() == ash::ext::debug_utils::NAME);
    if config.validation && !validation {
        log::warn!("Validation layers requested but not available");
    }

    let extensions = select_extensions(
        &config.instance_extensions,
        &optional_surface_extensions(),
        validation,
        |name| available.iter().any(|e| e.as_c_str() == name),
    )?;
    let extension_ptrs: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|e| e.as_ptr()).collect();

    let app_name = CString::new(config.application_name.as_str()).map_err(|_| {
        GraphicsError::InvalidParameter("application name contains a NUL byte".to_string())
    })?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Lilium")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let layer_names: Vec<*const std::ffi::c_char> = if validation {
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
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    log::debug!(
        "Created Vulkan instance with extensions {:?} (validation: {})",
        extensions,
        validation
    );

    Ok(CreatedInstance {
        instance,
        validation,
    })
}

/// Resolve the final extension list.
///
/// Fails when a required extension is missing. Optional ones are dropped when
/// unavailable. Duplicates are removed.
pub fn select_extensions<'a>(
    required: &[&'a CStr],
    optional: &[&'a CStr],
    debug_utils: bool,
    is_available: impl Fn(&CStr) -> bool,
) -> GraphicsResult<Vec<&'a CStr>> {
    let mut selected: Vec<&CStr> = Vec::new();

    for &name in required {
        if !is_available(name) {
            return Err(GraphicsError::InitializationFailed(format!(
                "Required instance extension {:?} is not available",
                name
            )));
        }
        if !selected.contains(&name) {
            selected.push(name);
        }
    }

    for &name in optional {
        if is_available(name) && !selected.contains(&name) {
            selected.push(name);
        }
    }

    if debug_utils && !selected.contains(&ash::ext::debug_utils::NAME) {
        selected.push(ash::ext::debug_utils::NAME);
    }

    Ok(selected)
}

fn available_extensions(entry: &ash::Entry) -> Vec<CString> {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .unwrap_or_default()
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect()
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    layers
        .iter()
        .any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_extension_fails() {
        let result = select_extensions(&[c"VK_KHR_missing"], &[], false, |_| false);
        assert!(matches!(
            result,
            Err(GraphicsError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_optional_extensions_filtered_and_deduplicated() {
        let surface = ash::khr::surface::NAME;
        let wayland = ash::khr::wayland_surface::NAME;
        let selected = select_extensions(&[surface], &[surface, wayland], true, |name| {
            name != wayland
        })
        .unwrap();
        assert_eq!(selected, vec![surface, ash::ext::debug_utils::NAME]);
    }
}
