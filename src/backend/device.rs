// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (first suitable device wins)
// - Logical device + graphics/present queue creation

use anyhow::{bail, Context, Result};
use ash::{vk, Entry};
use raw_window_handle::HasDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::surface::Surface;
use super::swapchain::SwapchainSupport;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions a GPU must offer to be picked
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Queue family discovery state for one physical device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Walk the families in order, keeping the first graphics family and the
    /// first family that can present. Stops as soon as both are known.
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }

            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved queue families of the selected device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Each family gets exactly one queue create info
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Swapchain images are only shared when two families touch them
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, vec![self.graphics, self.present])
        }
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: Surface,
    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,
}

impl VulkanDevice {
    /// Create the instance, the surface for `window` and a logical device that
    /// can draw and present to it.
    pub fn new(app_name: &str, enable_validation: bool, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, app_name, enable_validation, window)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create the window surface
        let surface = Surface::new(&entry, &instance, window)?;

        // Step 5: Pick physical device (GPU)
        let (physical_device, queue_families) = Self::pick_physical_device(&instance, &surface)?;

        // Step 6: Create logical device
        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            device_name(&properties).to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            debug_utils,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        window: &Window,
    ) -> Result<ash::Instance> {
        if enable_validation && !Self::check_validation_layer_support(entry)? {
            bail!("Validation layers requested, but not available");
        }

        let app_name_cstr = application_name(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for whatever window system we're running on
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();

        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        Self::log_available_extensions(entry)?;

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        // Chained so vkCreateInstance/vkDestroyInstance are validated too
        let mut instance_debug_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        if enable_validation {
            create_info = create_info.push_next(&mut instance_debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn check_validation_layer_support(entry: &Entry) -> Result<bool> {
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;

        let missing = missing_names(
            &[VALIDATION_LAYER],
            available
                .iter()
                .filter_map(|layer| layer.layer_name_as_c_str().ok()),
        );

        Ok(missing.is_empty())
    }

    fn log_available_extensions(entry: &Entry) -> Result<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;

        log::info!("Available instance extensions:");
        for name in extension_names(&available) {
            log::info!("\t{}", name.to_string_lossy());
        }

        Ok(())
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = debug_messenger_create_info();

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            bail!("Failed to find GPUs with Vulkan support");
        }

        for device in devices {
            if let Some(families) = Self::check_device(instance, surface, device)? {
                return Ok((device, families));
            }
        }

        bail!("Failed to find a suitable GPU")
    }

    /// Returns the queue families to use if `device` can run us, None otherwise
    fn check_device(
        instance: &ash::Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilies>> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = device_name(&props).to_string_lossy();

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let indices =
            QueueFamilyIndices::find(&queue_families, |i| surface.supports_present(device, i))?;

        let Some(families) = indices.complete() else {
            log::debug!("Skipping {}: no graphics/present queue families ({:?})", name, indices);
            return Ok(None);
        };

        let available = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let missing = missing_names(&REQUIRED_DEVICE_EXTENSIONS, extension_names(&available));

        if !missing.is_empty() {
            log::debug!("Skipping {}: missing extensions {:?}", name, missing);
            return Ok(None);
        }

        // Only safe to ask once we know the swapchain extension is there
        let support = SwapchainSupport::query(surface, device)?;
        if !support.is_adequate() {
            log::debug!(
                "Skipping {}: {} surface formats, {} present modes",
                name,
                support.formats.len(),
                support.present_modes.len()
            );
            return Ok(None);
        }

        Ok(Some(families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Nothing special needed yet
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface.destroy();

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// The window title doubles as the Vulkan application name
fn application_name(title: &str) -> Result<CString> {
    CString::new(title).context("Window title contains a NUL byte")
}

/// Names without a terminating NUL are skipped
fn extension_names(available: &[vk::ExtensionProperties]) -> impl Iterator<Item = &CStr> {
    available
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> &CStr {
    props
        .device_name_as_c_str()
        .unwrap_or(c"<unnamed device>")
}

/// Entries of `required` that don't appear in `available`, in order
fn missing_names<'a, 'b>(
    required: &[&'a CStr],
    available: impl Iterator<Item = &'b CStr>,
) -> Vec<&'a CStr> {
    let available: Vec<&CStr> = available.collect();
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::debug!("[Vulkan] {}", message);
        }
        _ => {
            log::trace!("[Vulkan] {}", message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn shared_graphics_and_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];

        let mut asked = Vec::new();
        let indices = QueueFamilyIndices::find(&families, |i| {
            asked.push(i);
            Ok(i == 1 || i == 2)
        })
        .unwrap();

        assert_eq!(
            indices.complete(),
            Some(QueueFamilies {
                graphics: 1,
                present: 1
            })
        );
        // Stops as soon as both are known
        assert_eq!(asked, vec![0, 1]);
        assert_eq!(indices.complete().unwrap().unique(), vec![1]);
    }

    #[test]
    fn split_graphics_and_present_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];

        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 2)).unwrap();
        let resolved = indices.complete().unwrap();

        assert_eq!(resolved.graphics, 0);
        assert_eq!(resolved.present, 2);
        assert!(!resolved.is_shared());
        assert_eq!(resolved.unique(), vec![0, 2]);
    }

    #[test]
    fn missing_present_family_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];

        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, None);
        assert!(!indices.is_complete());
        assert_eq!(indices.complete(), None);
    }

    #[test]
    fn no_families_at_all() {
        let indices = QueueFamilyIndices::find(&[], |_| Ok(true)).unwrap();
        assert_eq!(indices, QueueFamilyIndices::default());
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| Err(anyhow::anyhow!("Surface lost")));
        assert!(result.is_err());
    }

    #[test]
    fn swapchain_extension_detection() {
        let available = [
            extension(c"VK_KHR_maintenance1"),
            extension(ash::khr::swapchain::NAME),
        ];
        let missing = missing_names(&REQUIRED_DEVICE_EXTENSIONS, extension_names(&available));
        assert!(missing.is_empty());

        let available = [extension(c"VK_KHR_maintenance1")];
        let missing = missing_names(&REQUIRED_DEVICE_EXTENSIONS, extension_names(&available));
        assert_eq!(missing, vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn unterminated_extension_name_is_skipped() {
        let mut garbled = vk::ExtensionProperties::default();
        garbled.extension_name.fill(b'a' as c_char);

        let available = [garbled, extension(c"VK_KHR_maintenance1")];
        let names: Vec<&CStr> = extension_names(&available).collect();
        assert_eq!(names, vec![c"VK_KHR_maintenance1"]);

        let missing = missing_names(&REQUIRED_DEVICE_EXTENSIONS, extension_names(&[garbled]));
        assert_eq!(missing, vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn unnamed_device_gets_placeholder() {
        let mut props = vk::PhysicalDeviceProperties::default();
        assert_eq!(device_name(&props), c"");

        props.device_name.fill(b'x' as c_char);
        assert_eq!(device_name(&props), c"<unnamed device>");
    }

    #[test]
    fn application_name_rejects_interior_nul() {
        assert_eq!(application_name("Triangle").unwrap().as_c_str(), c"Triangle");

        let err = application_name("Tri\0angle").unwrap_err();
        assert_eq!(err.to_string(), "Window title contains a NUL byte");
    }

    #[test]
    fn swapchain_sharing_follows_families() {
        let shared = QueueFamilies {
            graphics: 1,
            present: 1,
        };
        assert_eq!(shared.sharing(), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(split.sharing(), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn validation_layer_lookup() {
        let layers = [c"VK_LAYER_MESA_device_select", c"VK_LAYER_KHRONOS_validation"];
        assert!(missing_names(&[VALIDATION_LAYER], layers.into_iter()).is_empty());

        let layers = [c"VK_LAYER_MESA_device_select"];
        assert_eq!(
            missing_names(&[VALIDATION_LAYER], layers.into_iter()),
            vec![VALIDATION_LAYER]
        );
    }
}
