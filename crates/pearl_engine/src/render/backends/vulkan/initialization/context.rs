//! Vulkan context management
//!
//! Creates the Vulkan 1.3 instance, window surface, physical device selection
//! and the logical device with its graphics, present, transfer and compute
//! queues.

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use crate::render::backends::vulkan::{VulkanError, VulkanResult, Window};

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a Vulkan 1.3 instance, optionally with validation layers
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = to_cstring(app_name)?;
        let engine_name_cstr = to_cstring("PearlEngine")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let required_extensions = window.required_instance_extensions()?;
        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| to_cstring(ext))
            .collect::<VulkanResult<Vec<_>>>()?;
        let mut extensions: Vec<*const c_char> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![to_cstring("VK_LAYER_KHRONOS_validation")?]
        } else {
            Vec::new()
        };
        let layer_name_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    log::warn!("Validation messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", enable_validation);
        Ok(Self { entry, instance, debug })
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

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation layer messages to the log
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Window surface with its extension loader
pub struct Surface {
    /// Surface extension functions
    pub loader: SurfaceLoader,
    /// Surface handle
    pub surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create the surface of `window`
    pub fn new(instance: &VulkanInstance, window: &mut Window) -> VulkanResult<Self> {
        let surface = window.create_vulkan_surface(instance.instance.handle())?;
        let loader = SurfaceLoader::new(&instance.entry, &instance.instance);
        Ok(Self { loader, surface })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Queue family indices used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics work
    pub graphics: u32,
    /// Presentation
    pub present: u32,
    /// Buffer uploads, a dedicated family when available
    pub transfer: u32,
    /// Compute dispatches, a dedicated family when available
    pub compute: u32,
}

impl QueueFamilies {
    /// Distinct family indices, in a stable order
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.present, self.transfer, self.compute];
        families.sort_unstable();
        families.dedup();
        families
    }

    fn find(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &Surface,
    ) -> VulkanResult<Option<Self>> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let has = |family: &vk::QueueFamilyProperties, flags| family.queue_count > 0 && family.queue_flags.contains(flags);

        let mut graphics = None;
        let mut present = None;
        for (index, family) in (0u32..).zip(&families) {
            if graphics.is_none() && has(family, vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            let present_support = unsafe {
                surface.loader.get_physical_device_surface_support(device, index, surface.surface)
                    .map_err(VulkanError::Api)?
            };
            if present_support && (present.is_none() || Some(index) == graphics) {
                present = Some(index);
            }
        }
        let (Some(graphics), Some(present)) = (graphics, present) else {
            return Ok(None);
        };

        let dedicated = |wanted: vk::QueueFlags, excluded: vk::QueueFlags| {
            (0u32..)
                .zip(&families)
                .find(|(_, family)| has(family, wanted) && !family.queue_flags.intersects(excluded))
                .map(|(index, _)| index)
        };
        let compute = dedicated(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
            .or_else(|| has(&families[graphics as usize], vk::QueueFlags::COMPUTE).then_some(graphics));
        let transfer = dedicated(vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            .or(compute)
            .unwrap_or(graphics);

        Ok(compute.map(|compute| Self { graphics, present, transfer, compute }))
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families chosen for each role
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Pick the first device meeting every requirement, discrete GPUs first
    pub fn select_suitable_device(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        let mut devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };
        devices.sort_by_key(|&device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
        });

        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(Some(info)) => {
                    log::info!(
                        "Selected GPU: {} (queues {:?})",
                        device_name(&info.properties),
                        info.queue_families
                    );
                    return Ok(info);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Skipping device: {}", e),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice, surface: &Surface) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = device_name(&properties);
        if properties.api_version < vk::API_VERSION_1_3 {
            log::debug!("{}: Vulkan 1.3 not supported", name);
            return Ok(None);
        }

        let extensions = unsafe {
            instance.enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == SwapchainLoader::name()
        });
        if !has_swapchain {
            log::debug!("{}: no swapchain support", name);
            return Ok(None);
        }

        if !Self::supports_required_features(instance, device) {
            log::debug!("{}: missing required features", name);
            return Ok(None);
        }

        let Some(queue_families) = QueueFamilies::find(instance, device, surface)? else {
            log::debug!("{}: missing queue families", name);
            return Ok(None);
        };

        let formats = unsafe {
            surface.loader.get_physical_device_surface_formats(device, surface.surface)
                .map_err(VulkanError::Api)?
        };
        if formats.is_empty() {
            return Ok(None);
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        Ok(Some(Self { device, properties, memory_properties, queue_families }))
    }

    fn supports_required_features(instance: &Instance, device: vk::PhysicalDevice) -> bool {
        let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut features13)
            .build();
        unsafe { instance.get_physical_device_features2(device, &mut features) };

        let core = features.features;
        core.fill_mode_non_solid == vk::TRUE
            && core.multi_draw_indirect == vk::TRUE
            && core.draw_indirect_first_instance == vk::TRUE
            && core.shader_sampled_image_array_dynamic_indexing == vk::TRUE
            && features11.shader_draw_parameters == vk::TRUE
            && features12.timeline_semaphore == vk::TRUE
            && features12.draw_indirect_count == vk::TRUE
            && features13.dynamic_rendering == vk::TRUE
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn to_cstring(s: &str) -> VulkanResult<CString> {
    CString::new(s).map_err(|_| VulkanError::InitializationFailed(format!("String contains NUL: {:?}", s)))
}

/// Logical device and its queues
pub struct LogicalDevice {
    /// Device function table
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Present queue
    pub present_queue: vk::Queue,
    /// Transfer queue
    pub transfer_queue: vk::Queue,
    /// Compute queue
    pub compute_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create the device with the features the renderer relies on
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical.queue_families;
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names = [SwapchainLoader::name().as_ptr()];

        let core_features = vk::PhysicalDeviceFeatures::builder()
            .fill_mode_non_solid(true)
            .multi_draw_indirect(true)
            .draw_indirect_first_instance(true)
            .shader_sampled_image_array_dynamic_indexing(true)
            .build();
        let mut features11 = vk::PhysicalDeviceVulkan11Features::builder().shader_draw_parameters(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .draw_indirect_count(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .features(core_features)
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features);

        let device = unsafe {
            instance.create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let (graphics_queue, present_queue, transfer_queue, compute_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
                device.get_device_queue(families.compute, 0),
            )
        };

        Ok(Self { device, graphics_queue, present_queue, transfer_queue, compute_queue })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Everything needed to create and submit Vulkan work
///
/// Field order is drop order: the device goes before the surface, the
/// surface before the instance.
pub struct VulkanContext {
    /// Logical device and queues
    pub device: LogicalDevice,
    /// Selected physical device
    pub physical: PhysicalDeviceInfo,
    /// Window surface
    pub surface: Surface,
    /// Instance
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Initialize Vulkan for `window`
    pub fn new(window: &mut Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, enable_validation)?;
        let surface = Surface::new(&instance, window)?;
        let physical = PhysicalDeviceInfo::select_suitable_device(&instance.instance, &surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;
        Ok(Self { device, physical, surface, instance })
    }

    /// Device function table
    pub const fn raw(&self) -> &Device {
        &self.device.device
    }

    /// Queue family indices
    pub const fn families(&self) -> QueueFamilies {
        self.physical.queue_families
    }

    /// Sharing mode and family list for resources used by every queue
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let families = self.physical.queue_families.unique();
        if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.raw().device_wait_idle().map_err(VulkanError::Api) }
    }
}
