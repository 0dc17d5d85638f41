//! Buffer management
//!
//! Memory management following RAII patterns. Host-visible buffers stay
//! mapped for their whole lifetime.

use std::ptr::NonNull;

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
}

impl Buffer {
    /// Create a buffer shared by every queue family the context uses
    pub fn new(
        context: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw().clone();
        let (sharing_mode, families) = context.sharing();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size.max(4))
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = match find_memory_type(
            &context.physical.memory_properties,
            mem_requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut this = Self { device, buffer, memory, size, mapped: None };
        unsafe {
            this.device.bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe {
                this.device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .map_err(VulkanError::Api)?
            };
            this.mapped = NonNull::new(ptr.cast::<u8>());
        }

        Ok(this)
    }

    /// Host-visible, coherent buffer
    pub fn host_visible(context: &VulkanContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(
            context,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local buffer
    pub fn device_local(context: &VulkanContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(context, size, usage, vk::MemoryPropertyFlags::DEVICE_LOCAL)
    }

    /// Copy bytes into a mapped buffer at `offset`
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_bytes(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let Some(mapped) = self.mapped else {
            return Err(VulkanError::InvalidOperation { reason: "Buffer is not host visible".to_string() });
        };
        let end = offset.checked_add(bytes.len() as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Write of {} bytes at {} exceeds buffer size {}", bytes.len(), offset, self.size),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.as_ptr().add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Copy plain-old-data values into a mapped buffer at `offset`
    pub fn write<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Find a memory type matching `type_filter` with all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = flags.len() as u32;
        for (i, &f) in flags.iter().enumerate() {
            properties.memory_types[i].property_flags = f;
        }
        properties
    }

    #[test]
    fn test_memory_type_respects_filter_and_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(), 2);
        assert!(matches!(
            find_memory_type(&props, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}
