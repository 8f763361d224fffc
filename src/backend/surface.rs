// Surface - Connection between Vulkan and the window system
//
// Created right after the instance, because physical device selection
// needs to know which queue families can present to it.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

pub struct Surface {
    pub loader: ash::khr::surface::Instance,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, window: &Window) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // ash_window picks the platform-specific create call for us
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { loader, handle })
    }

    /// Can `queue_family` of `physical_device` present to this surface?
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )
        }
        .context("Failed to query surface presentation support")?;

        Ok(supported)
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
                .context("Failed to query surface capabilities")
        }
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
                .context("Failed to query surface formats")
        }
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
                .context("Failed to query surface present modes")
        }
    }

    /// Must run after every swapchain built on this surface is gone,
    /// and before the instance is destroyed.
    pub fn destroy(&self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
