//! Vulkan context initialization
//!
//! Creates the instance (with optional validation layers whose messages are
//! forwarded to the `log` facade), selects a physical device with a graphics
//! queue, and creates the logical device, queue and command pool. No surface
//! is required.

use ash::{vk, Entry, Instance, Device};
use ash::extensions::ext::DebugUtils;
use std::ffi::{CStr, CString};

/// Vulkan-specific errors
#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

impl VulkanError {
    /// Whether the error means a pool or heap ran out
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::Api(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY
                    | vk::Result::ERROR_FRAGMENTED_POOL
                    | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ) | Self::NoSuitableMemoryType
        )
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Instance, device and graphics queue
pub struct VulkanContext {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance
    pub instance: Instance,
    /// Selected physical device
    pub physical_device: vk::PhysicalDevice,
    /// Logical device
    pub device: Device,
    /// Graphics queue family index
    pub graphics_family: u32,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Command pool for the graphics queue (resettable buffers)
    pub command_pool: vk::CommandPool,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanContext {
    /// Create a context without a presentation surface
    pub fn new(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new("render_engine")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let layers: Vec<*const std::os::raw::c_char> = if enable_validation {
            vec![validation_layer.as_ptr()]
        } else {
            Vec::new()
        };
        let extensions: Vec<*const std::os::raw::c_char> = if enable_validation {
            vec![DebugUtils::name().as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::Api)?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        let (physical_device, graphics_family) = Self::select_physical_device(&instance)?;

        let priorities = [1.0_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_family)
            .queue_priorities(&priorities)
            .build()];
        let features = vk::PhysicalDeviceFeatures::builder()
            .fill_mode_non_solid(true)
            .build();
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(VulkanError::Api)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        log::info!("Vulkan context created (validation: {enable_validation})");

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            graphics_family,
            graphics_queue,
            command_pool,
            debug,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(VulkanError::Api)
    }

    fn select_physical_device(instance: &Instance) -> VulkanResult<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(VulkanError::Api)?;

        let mut fallback = None;
        for device in devices {
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            let Some(graphics_family) = families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            else {
                continue;
            };

            let properties = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

            if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                log::info!("Selected GPU: {name}");
                return Ok((device, graphics_family as u32));
            }
            if fallback.is_none() {
                fallback = Some((device, graphics_family as u32, name.into_owned()));
            }
        }

        fallback
            .map(|(device, family, name)| {
                log::info!("Selected GPU: {name}");
                (device, family)
            })
            .ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    /// Find a memory type index satisfying `type_filter` and `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let memory = unsafe { self.instance.get_physical_device_memory_properties(self.physical_device) };

        (0..memory.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && memory.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}
