//! Vulkan instance, validation layer and debug messenger.
//!
//! Validation output is forwarded into `tracing` under this module's target.
//!
//! ```no_run
//! use vp_rhi::instance::Instance;
//!
//! let instance = Instance::new(cfg!(debug_assertions), &[]).expect("Vulkan instance");
//! let _entry = instance.entry();
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation layer support.
///
/// This struct manages the lifetime of the Vulkan instance and its associated
/// debug utilities. When dropped, it properly cleans up all Vulkan resources.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// `surface_extensions` are the window-system extensions reported by the
    /// platform layer. When empty, the per-OS defaults are enabled instead.
    ///
    /// # Errors
    ///
    /// Fails with [`RhiError::Loading`] when no Vulkan loader is installed and
    /// with [`RhiError::Initialization`] when the driver rejects the instance.
    pub fn new(
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vp")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vp")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = if surface_extensions.is_empty() {
            Self::get_required_extensions()
        } else {
            surface_extensions.to_vec()
        };
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!("Vulkan instance created (API version 1.3)");

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            info!("Validation layers enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Surface extensions enabled when the platform layer supplies none.
    fn get_required_extensions() -> Vec<*const c_char> {
        let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];

        #[cfg(target_os = "windows")]
        extensions.push(ash::khr::win32_surface::NAME.as_ptr());

        #[cfg(target_os = "linux")]
        {
            extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
            extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
        }

        #[cfg(target_os = "macos")]
        extensions.push(ash::ext::metal_surface::NAME.as_ptr());

        extensions
    }

    /// Checks if the Khronos validation layer is available.
    fn is_validation_layer_available(entry: &Entry) -> Result<bool, RhiError> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let validation_layer_name = VALIDATION_LAYER_NAME.to_bytes_with_nul();

        let found = available_layers.iter().any(|layer| {
            let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            layer_name.to_bytes_with_nul() == validation_layer_name
        });

        Ok(found)
    }

    /// Sets up the debug messenger for validation layer callbacks.
    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Log level a validation message is forwarded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl MessageLevel {
    fn from_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        if severity.contains(Severity::ERROR) {
            Self::Error
        } else if severity.contains(Severity::WARNING) {
            Self::Warn
        } else if severity.contains(Severity::INFO) {
            Self::Info
        } else {
            Self::Debug
        }
    }
}

/// Most specific category in `kind`; validation wins over performance.
fn message_kind(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    use vk::DebugUtilsMessageTypeFlagsEXT as Kind;
    if kind.contains(Kind::VALIDATION) {
        "validation"
    } else if kind.contains(Kind::PERFORMANCE) {
        "performance"
    } else if kind.contains(Kind::GENERAL) {
        "general"
    } else {
        "other"
    }
}

/// Reads a possibly-null C string from the callback data.
///
/// # Safety
///
/// `ptr` must be null or point at a NUL-terminated string.
unsafe fn lossy(ptr: *const c_char) -> Cow<'static, str> {
    if ptr.is_null() {
        Cow::Borrowed("-")
    } else {
        Cow::Owned(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Forwards validation-layer messages to `tracing`.
///
/// # Safety
///
/// Called by the loader with a callback-data pointer that is valid for the
/// duration of the call.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let Some(data) = (unsafe { p_callback_data.as_ref() }) else {
        return vk::FALSE;
    };
    let id = unsafe { lossy(data.p_message_id_name) };
    let message = unsafe { lossy(data.p_message) };
    let kind = message_kind(kind);

    match MessageLevel::from_severity(severity) {
        MessageLevel::Error => error!(kind, %id, "{}", message),
        MessageLevel::Warn => warn!(kind, %id, "{}", message),
        MessageLevel::Info => info!(kind, %id, "{}", message),
        MessageLevel::Debug => debug!(kind, %id, "{}", message),
    }

    // Never abort the call that triggered the message.
    vk::FALSE
}
