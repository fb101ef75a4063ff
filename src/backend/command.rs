// Command pools and one-shot submissions

use super::error::{Result, VkResultExt};
use super::VulkanDevice;
use ash::vk;
use std::sync::Arc;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    /// Pool on the graphics family whose buffers can be reset individually.
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );

        let pool = unsafe { device.device.create_command_pool(&create_info, None) }
            .vk_call("vkCreateCommandPool")?;

        Ok(Self { pool, device })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&allocate_info) }
            .vk_call("vkAllocateCommandBuffers")
    }

    /// Record with `record`, submit to the graphics queue and block until done.
    ///
    /// Used for uploads at startup, never inside the frame loop.
    pub fn submit_once<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let command_buffer = self.allocate(1)?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            unsafe {
                device
                    .begin_command_buffer(command_buffer, &begin_info)
                    .vk_call("vkBeginCommandBuffer")?;
                record(device, command_buffer);
                device
                    .end_command_buffer(command_buffer)
                    .vk_call("vkEndCommandBuffer")?;

                let command_buffers = [command_buffer];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                device
                    .queue_submit(self.device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                    .vk_call("vkQueueSubmit")?;
                device
                    .queue_wait_idle(self.device.graphics_queue)
                    .vk_call("vkQueueWaitIdle")
            }
        })();

        unsafe {
            device.free_command_buffers(self.pool, &[command_buffer]);
        }
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
