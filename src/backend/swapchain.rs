// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The parameter choices (extent, image count, present mode, format) are
// plain functions of the surface's reported capabilities.

use super::error::{RendererError, Result, VkResultExt};
use super::{Surface, VulkanDevice};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Clamp the requested size into the surface's supported extent range.
pub fn clamp_extent(requested: vk::Extent2D, caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Mailbox wants one image more than the minimum so the presentation engine
/// always has a spare to replace.
pub fn present_image_count(caps: &vk::SurfaceCapabilitiesKHR, present_mode: vk::PresentModeKHR) -> u32 {
    let mut count = caps.min_image_count;
    if present_mode == vk::PresentModeKHR::MAILBOX {
        count += 1;
    }
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

/// Preferred mode if supported, then MAILBOX, then FIFO (always available).
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface takes any format
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: only.color_space,
            });
        }
    }

    formats
        .iter()
        .find(|f| matches!(f.format, vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM))
        .or_else(|| formats.first())
        .copied()
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image semaphore will be signaled; the frame must be submitted.
    Ready { index: u32, suboptimal: bool },
    OutOfDate,
    /// Timed out or not ready; no semaphore was signaled.
    NotReady,
}

pub fn classify_acquire(result: VkResult<(u32, bool)>) -> std::result::Result<AcquireOutcome, vk::Result> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::NotReady),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        self != Self::Presented
    }
}

pub fn classify_present(result: VkResult<bool>) -> std::result::Result<PresentOutcome, vk::Result> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(e),
    }
}

/// Semaphore signaled by the submission that renders into `image_index`.
///
/// Keyed by image: a slot's fence only covers the submit, not the present
/// that waits on the semaphore.
pub fn image_semaphore(semaphores: &[vk::Semaphore], image_index: u32) -> vk::Semaphore {
    semaphores[image_index as usize]
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// One render-finished semaphore per image
    pub render_finished: Vec<vk::Semaphore>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Build a swapchain for `surface`. Passing the previous swapchain lets the
    /// driver hand over its resources; the caller drops it afterwards.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        preferred_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Self> {
        let surface_caps = surface.capabilities(device.physical_device)?;
        let formats = surface.formats(device.physical_device)?;
        let present_modes = surface.present_modes(device.physical_device)?;

        log::debug!("Supported present modes: {:?}", present_modes);
        log::debug!("Supported surface usage: {:?}", surface_caps.supported_usage_flags);
        log::debug!(
            "Supported surface formats: {:?}",
            formats.iter().map(|f| f.format).collect::<Vec<_>>()
        );

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            RendererError::EnvironmentUnsupported {
                reason: "surface reports no formats".into(),
            }
        })?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = clamp_extent(vk::Extent2D { width, height }, &surface_caps);
        let image_count = present_image_count(&surface_caps, present_mode);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            present_mode,
            surface_format.format
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(choose_composite_alpha(surface_caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .vk_call("vkCreateSwapchainKHR")?;

        // From here on Drop owns the handle, even if a view fails below
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            render_finished: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
            device,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .vk_call("vkGetSwapchainImagesKHR")?;

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
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

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }
                .vk_call("vkCreateImageView")?;
            this.image_views.push(view);

            let semaphore = unsafe {
                this.device
                    .device
                    .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)
            }
            .vk_call("vkCreateSemaphore")?;
            this.render_finished.push(semaphore);
        }

        log::info!("Created swapchain with {} images", this.images.len());
        Ok(this)
    }

    /// What rendering into `image_index` signals and its present waits on.
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        image_semaphore(&self.render_finished, image_index)
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout_ns: u64, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        classify_acquire(result).map_err(|e| RendererError::from_vk("vkAcquireNextImageKHR", e))
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        classify_present(result).map_err(|e| RendererError::from_vk("vkQueuePresentKHR", e))
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &semaphore in &self.render_finished {
                self.device.device.destroy_semaphore(semaphore, None);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
