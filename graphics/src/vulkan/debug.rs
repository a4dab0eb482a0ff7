//! Vulkan validation layer debug messenger.

use std::ffi::{CStr, c_void};
use std::sync::Arc;

use ash::vk;

use crate::config::{DebugMessageReceiver, DebugSeverity};
use crate::error::{GraphicsError, GraphicsResult};

/// Where validation messages go. Boxed so its address stays fixed while the
/// driver holds it as callback user data.
struct DebugRouter {
    receiver: Option<Arc<dyn DebugMessageReceiver>>,
}

/// An installed debug messenger and the routing state it points at.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    _router: Box<DebugRouter>,
}

impl DebugMessenger {
    /// Install a messenger on `instance`, forwarding to `receiver` when set.
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        receiver: Option<Arc<dyn DebugMessageReceiver>>,
    ) -> GraphicsResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let router = Box::new(DebugRouter { receiver });

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(&*router as *const DebugRouter as *mut c_void);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create debug messenger: {:?}",
                    e
                ))
            })?;

        Ok(Self {
            loader,
            messenger,
            _router: router,
        })
    }

    /// Remove the messenger.
    ///
    /// # Safety
    ///
    /// Must be called once, before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

/// Map the driver's severity bits to the crate's severity.
pub fn severity_from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> DebugSeverity {
    if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        DebugSeverity::Error
    } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        DebugSeverity::Warning
    } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        DebugSeverity::Info
    } else {
        DebugSeverity::Verbose
    }
}

fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: callback_data is provided by the driver and valid for this call
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a valid null-terminated string from the driver
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let severity = severity_from_vk(message_severity);

    // SAFETY: user_data points at the boxed router owned by the DebugMessenger,
    // which outlives the messenger itself
    let router = unsafe { (user_data as *const DebugRouter).as_ref() };
    match router.and_then(|r| r.receiver.as_ref()) {
        Some(receiver) => receiver.debug_message(severity, &message),
        None => log::log!(
            severity.log_level(),
            "[Vulkan {}] {}",
            message_type_name(message_type),
            message
        ),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            severity_from_vk(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            DebugSeverity::Error
        );
        assert_eq!(
            severity_from_vk(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            DebugSeverity::Warning
        );
        assert_eq!(
            severity_from_vk(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            DebugSeverity::Verbose
        );
    }
}
