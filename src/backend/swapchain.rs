// Swapchain - Window presentation
//
// Manages the chain of images that would be presented to the screen,
// plus one image view per image.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::surface::Surface;
use super::VulkanDevice;

/// What a surface offers a given physical device
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        Ok(Self {
            capabilities: surface.capabilities(physical_device)?,
            formats: surface.formats(physical_device)?,
            present_modes: surface.present_modes(physical_device)?,
        })
    }

    /// One format and one present mode is all we need
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Prefer 8-bit BGRA sRGB, otherwise take whatever comes first
    pub fn choose_surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| self.formats.first())
            .copied()
    }

    /// FIFO is always supported
    pub fn choose_present_mode(&self, preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if self.present_modes.contains(&preferred) {
            preferred
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    /// The surface dictates the extent unless it reports u32::MAX,
    /// in which case the window size is clamped into the allowed range.
    pub fn choose_extent(&self, width: u32, height: u32) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }

        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }

    /// One more than the minimum, capped when the surface has a maximum (0 = none)
    pub fn image_count(&self) -> u32 {
        let caps = &self.capabilities;
        let count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && count > caps.max_image_count {
            caps.max_image_count
        } else {
            count
        }
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let support = SwapchainSupport::query(&device.surface, device.physical_device)?;

        let surface_format = support
            .choose_surface_format()
            .context("No suitable surface format")?;
        let present_mode = support.choose_present_mode(preferred_present_mode);
        let extent = support.choose_extent(width, height);
        let image_count = support.image_count();

        log::info!(
            "Swapchain format: {:?} / {:?}, present mode: {:?}, extent: {}x{}, min images: {}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count
        );

        let (sharing_mode, shared_families) = device.queue_families.sharing();

        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e).context("Failed to get swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        let mut this = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            device,
        };
        // Views made so far are cleaned up by Drop if one fails
        this.create_image_views()?;

        Ok(this)
    }

    fn create_image_views(&mut self) -> Result<()> {
        self.image_views.reserve(self.images.len());

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
        }

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn support() -> SwapchainSupport {
        SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            formats: vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn adequacy_needs_formats_and_present_modes() {
        let mut s = support();
        assert!(s.is_adequate());

        s.present_modes.clear();
        assert!(!s.is_adequate());

        let mut s = support();
        s.formats.clear();
        assert!(!s.is_adequate());
    }

    #[test]
    fn prefers_bgra_srgb() {
        let chosen = support().choose_surface_format().unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn srgb_format_needs_srgb_color_space() {
        let mut s = support();
        s.formats = vec![
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = s.choose_surface_format().unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT);
    }

    #[test]
    fn falls_back_to_first_format() {
        let mut s = support();
        s.formats = vec![
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = s.choose_surface_format().unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);

        s.formats.clear();
        assert!(s.choose_surface_format().is_none());
    }

    #[test]
    fn present_mode_preference() {
        let s = support();
        assert_eq!(
            s.choose_present_mode(vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            s.choose_present_mode(vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let extent = support().choose_extent(1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_window_size_when_surface_defers() {
        let mut s = support();
        s.capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        s.capabilities.max_image_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };

        let extent = s.choose_extent(800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));

        let extent = s.choose_extent(2000, 0);
        assert_eq!((extent.width, extent.height), (1024, 1));
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut s = support();
        assert_eq!(s.image_count(), 3);

        s.capabilities.max_image_count = 2;
        assert_eq!(s.image_count(), 2);

        // Zero means no upper limit
        s.capabilities.min_image_count = 7;
        s.capabilities.max_image_count = 0;
        assert_eq!(s.image_count(), 8);
    }
}
