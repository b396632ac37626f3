//! Vulkan validation layer debug messenger.
//!
//! Validation output is pushed into the backend's diagnostic queue instead of
//! being logged directly, so it surfaces through the flush that caused it.

use std::ffi::CStr;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::{DiagnosticMessage, Severity};
use crate::error::{ComputeError, Result};

/// Diagnostic queue filled by the debug callback.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<Vec<DiagnosticMessage>>,
}

impl MessageQueue {
    /// Append one message.
    pub fn push(&self, message: DiagnosticMessage) {
        self.messages.lock().push(message);
    }

    /// Take every queued message.
    pub fn drain(&self) -> Vec<DiagnosticMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

/// Create a debug messenger that feeds `queue`.
///
/// # Safety
///
/// `queue` must stay alive until the messenger is destroyed.
pub unsafe fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
    queue: &MessageQueue,
) -> Result<vk::DebugUtilsMessengerEXT> {
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
        .user_data(queue as *const MessageQueue as *mut std::ffi::c_void);

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        ComputeError::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
    })
}

/// Map a Vulkan message severity to a diagnostic severity.
pub fn convert_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Option<Severity> {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Some(Severity::Error),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Some(Severity::Warning),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Some(Severity::Info),
        _ => None,
    }
}

fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    }
}

/// Render the callback data as `[Type] id: message`.
fn format_message(
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: &vk::DebugUtilsMessengerCallbackDataEXT<'_>,
) -> String {
    // SAFETY: the driver passes NUL-terminated strings or null pointers
    let text = unsafe { data.message_as_c_str() }
        .map(|m| m.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = unsafe { data.message_id_name_as_c_str() }.map(CStr::to_string_lossy);

    match id {
        Some(id) => format!("[{}] {}: {}", message_type_label(message_type), id, text),
        None => format!("[{}] {}", message_type_label(message_type), text),
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: valid for the duration of the callback when non-null
    let Some(data) = (unsafe { callback_data.as_ref() }) else {
        return vk::FALSE;
    };
    let message = format_message(message_type, data);

    let Some(severity) = convert_severity(message_severity) else {
        log::trace!("[vulkan] {}", message);
        return vk::FALSE;
    };

    // SAFETY: user_data is the MessageQueue owned by the device, which
    // destroys the messenger before dropping the queue
    match unsafe { (user_data as *const MessageQueue).as_ref() } {
        Some(queue) => queue.push(DiagnosticMessage::new(severity, message)),
        None => DiagnosticMessage::new(severity, message).log(),
    }

    vk::FALSE
}
