// Presentation surface - the window connection
//
// Owns the VkSurfaceKHR. Must outlive every swapchain built on it; the
// Renderer keeps its swapchain in a field declared before this one.

use super::error::{Result, VkResultExt};
use super::VulkanInstance;
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<VulkanInstance>, window: &W) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .vk_call("vkCreateSurfaceKHR")?;

        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    pub fn supports_queue_family(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)
        }
        .vk_call("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .vk_call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .vk_call("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .vk_call("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
