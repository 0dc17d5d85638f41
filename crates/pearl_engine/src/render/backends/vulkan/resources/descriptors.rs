//! Descriptor set layouts, pools and samplers

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Descriptor set layout wrapper with RAII cleanup
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Create a layout from its bindings
    pub fn new(device: Device, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        let layout = unsafe {
            device.create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, layout })
    }

    /// Layout handle
    pub const fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Shorthand for a single layout binding
pub fn binding(
    index: u32,
    descriptor_type: vk::DescriptorType,
    count: u32,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(index)
        .descriptor_type(descriptor_type)
        .descriptor_count(count)
        .stage_flags(stages)
        .build()
}

/// Descriptor pool wrapper with RAII cleanup
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a pool holding `max_sets` sets drawn from `sizes`
    pub fn new(device: Device, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        let pool = unsafe {
            device.create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, pool })
    }

    /// Allocate `count` sets with the same layout
    pub fn allocate(&self, layout: &DescriptorSetLayout, count: usize) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        unsafe {
            self.device.allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Nearest-filtering, edge-clamped sampler for pixel art
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create the sampler
    pub fn nearest(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        let sampler = unsafe {
            device.create_sampler(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, sampler })
    }

    /// Sampler handle
    pub const fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Write one buffer binding
pub fn write_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
) {
    let info = [vk::DescriptorBufferInfo { buffer, offset: 0, range: vk::WHOLE_SIZE }];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(&info);
    unsafe {
        device.update_descriptor_sets(&[write.build()], &[]);
    }
}

/// Write image bindings starting at array element `first`
pub fn write_images(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    first: u32,
    descriptor_type: vk::DescriptorType,
    images: &[vk::DescriptorImageInfo],
) {
    if images.is_empty() {
        return;
    }
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(first)
        .descriptor_type(descriptor_type)
        .image_info(images);
    unsafe {
        device.update_descriptor_sets(&[write.build()], &[]);
    }
}
