// Descriptor set for the textured quad: one combined image sampler at
// set 0, binding 0, visible to the fragment stage.

use super::error::{Result, VkResultExt};
use super::texture::Texture;
use super::VulkanDevice;
use ash::vk;
use std::sync::Arc;

pub struct TextureBinding {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    device: Arc<VulkanDevice>,
}

impl TextureBinding {
    pub fn new(device: Arc<VulkanDevice>, texture: &Texture) -> Result<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .vk_call("vkCreateDescriptorSetLayout")?;

        let mut binding = Self {
            layout,
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            device,
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        binding.pool = unsafe { binding.device.device.create_descriptor_pool(&pool_info, None) }
            .vk_call("vkCreateDescriptorPool")?;

        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(binding.pool)
            .set_layouts(&layouts);
        binding.set = unsafe { binding.device.device.allocate_descriptor_sets(&allocate_info) }
            .vk_call("vkAllocateDescriptorSets")?[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler: texture.sampler,
            image_view: texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(binding.set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();

        unsafe {
            binding.device.device.update_descriptor_sets(&[write], &[]);
        }

        Ok(binding)
    }
}

impl Drop for TextureBinding {
    fn drop(&mut self) {
        // Destroying the pool frees the set
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
