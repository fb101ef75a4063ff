// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Each frame in flight owns its fence and image-available semaphore. The
// render-finished semaphores belong to the swapchain, one per image.

use super::error::{RendererError, Result, VkResultExt};
use super::VulkanDevice;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

pub fn classify_fence_wait(result: VkResult<()>) -> std::result::Result<FenceStatus, vk::Result> {
    match result {
        Ok(()) => Ok(FenceStatus::Signaled),
        Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
        Err(e) => Err(e),
    }
}

/// Wait at most `timeout_ns` for `fence`.
pub fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<FenceStatus> {
    let result = unsafe { device.wait_for_fences(&[fence], true, timeout_ns) };
    classify_fence_wait(result).map_err(|e| RendererError::from_vk("vkWaitForFences", e))
}

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            device,
        };

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on this slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            sync.image_available = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .vk_call("vkCreateSemaphore")?;
            sync.in_flight_fence = sync
                .device
                .device
                .create_fence(&fence_info, None)
                .vk_call("vkCreateFence")?;
        }

        Ok(sync)
    }

    pub fn wait(&self, timeout_ns: u64) -> Result<FenceStatus> {
        wait_for_fence(&self.device.device, self.in_flight_fence, timeout_ns)
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }.vk_call("vkResetFences")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Null handles are ignored by the destroy calls
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_wait_timeout_is_not_an_error() {
        assert_eq!(classify_fence_wait(Ok(())), Ok(FenceStatus::Signaled));
        assert_eq!(classify_fence_wait(Err(vk::Result::TIMEOUT)), Ok(FenceStatus::TimedOut));
    }

    #[test]
    fn device_loss_during_wait_is_propagated() {
        assert_eq!(
            classify_fence_wait(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(vk::Result::ERROR_DEVICE_LOST)
        );
    }
}
