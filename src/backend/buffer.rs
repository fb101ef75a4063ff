// Buffer utilities for vertex data and staging uploads
//
// Provides helpers for creating GPU-accessible memory buffers

use super::command::CommandPool;
use super::error::{RendererError, Result, VkResultExt};
use super::VulkanDevice;
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

/// Find a memory type allowed by `type_filter` that has every flag in `properties`.
pub fn find_memory_type(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = mem_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        has_type && has_properties
    })
}

/// Allocate and bind memory for `requirements` on `device`.
pub fn allocate_memory(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &device.memory_properties,
        requirements.memory_type_bits,
        properties,
    )
    .ok_or(RendererError::NoMemoryType {
        type_filter: requirements.memory_type_bits,
        flags: properties,
    })?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.device.allocate_memory(&alloc_info, None) }.vk_call("vkAllocateMemory")
}

/// A buffer and the memory backing it
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .vk_call("vkCreateBuffer")?;

        let mut this = Self {
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            device,
        };

        let mem_requirements = unsafe { this.device.device.get_buffer_memory_requirements(buffer) };
        this.memory = allocate_memory(&this.device, mem_requirements, memory_properties)?;

        unsafe { this.device.device.bind_buffer_memory(buffer, this.memory, 0) }
            .vk_call("vkBindBufferMemory")?;

        Ok(this)
    }

    /// Copy `data` into host-visible memory at offset 0.
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(
            bytes.len() as vk::DeviceSize <= self.size,
            "write of {} bytes into a {} byte buffer",
            bytes.len(),
            self.size
        );

        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .vk_call("vkMapMemory")? as *mut u8;

            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Host-visible staging buffer already filled with `data`.
    pub fn staging<T: Pod>(device: Arc<VulkanDevice>, data: &[T]) -> Result<Self> {
        let staging = Self::new(
            device,
            std::mem::size_of_val(data) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write(data)?;
        Ok(staging)
    }

    /// Device-local vertex buffer filled through a staging copy.
    pub fn vertex_buffer<T: Pod>(
        device: Arc<VulkanDevice>,
        command_pool: &CommandPool,
        vertices: &[T],
    ) -> Result<Self> {
        let staging = Self::staging(device.clone(), vertices)?;
        let buffer = Self::new(
            device,
            staging.size,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        command_pool.submit_once(|device, command_buffer| {
            let region = vk::BufferCopy::builder().size(staging.size).build();
            let barrier = vk::BufferMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build();

            unsafe {
                device.cmd_copy_buffer(command_buffer, staging.buffer, buffer.buffer, &[region]);
                device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::VERTEX_INPUT,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[barrier],
                    &[],
                );
            }
        })?;

        log::debug!("Uploaded {} byte vertex buffer", buffer.size);
        Ok(buffer)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn first_matching_type_is_chosen() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&props, u32::MAX, host), Some(1));
        assert_eq!(
            find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn type_filter_excludes_types() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let props = properties(&[host, host, host]);
        assert_eq!(find_memory_type(&props, 0b100, host), Some(2));
        assert_eq!(find_memory_type(&props, 0b000, host), None);
    }

    #[test]
    fn every_requested_flag_must_be_present() {
        let props = properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert_eq!(
            find_memory_type(
                &props,
                u32::MAX,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ),
            None
        );
    }

    #[test]
    fn types_past_the_reported_count_are_ignored() {
        let mut props = properties(&[vk::MemoryPropertyFlags::empty()]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(
            find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }
}
