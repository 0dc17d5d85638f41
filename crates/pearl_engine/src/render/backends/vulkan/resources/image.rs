//! Array images and texture uploads
//!
//! Every texture is a 2D array image, one layer per atlas cell. Uploads go
//! through a staging buffer with explicit layout transitions around the copy.

use ash::{vk, Device};

use super::buffer::{find_memory_type, Buffer};
use crate::assets::TexturePixels;
use crate::render::backends::vulkan::{CommandPool, VulkanContext, VulkanError, VulkanResult};

/// Color format of every texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Layout change plus the memory dependency around it
#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    /// Layout before
    pub old: vk::ImageLayout,
    /// Layout after
    pub new: vk::ImageLayout,
    /// Stages that must finish first
    pub src_stage: vk::PipelineStageFlags,
    /// Writes made available
    pub src_access: vk::AccessFlags,
    /// Stages that wait
    pub dst_stage: vk::PipelineStageFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
}

impl LayoutTransition {
    /// Discard contents and prepare for a transfer write
    pub const UNDEFINED_TO_TRANSFER_DST: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        src_access: vk::AccessFlags::empty(),
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    };

    /// Transfer write finished, make visible to shaders in `layout`
    pub const fn transfer_dst_to(layout: vk::ImageLayout) -> Self {
        Self {
            old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new: layout,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Record the barrier for `layer_count` layers starting at `base_layer`
    pub fn record(&self, device: &Device, command_buffer: vk::CommandBuffer, image: vk::Image, base_layer: u32, layer_count: u32) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.old)
            .new_layout(self.new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_range(base_layer, layer_count))
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access);

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
    }
}

/// Color subresource range over array layers
pub fn color_range(base_layer: u32, layer_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: base_layer,
        layer_count,
    }
}

/// Color subresource layers for copies
pub fn color_layers(base_layer: u32, layer_count: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: base_layer,
        layer_count,
    }
}

/// 2D array image with its memory and an array view
pub struct GpuImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    layers: u32,
}

impl GpuImage {
    /// Create a device-local array image shared by every queue family
    pub fn new(
        context: &VulkanContext,
        width: u32,
        height: u32,
        layers: u32,
        usage: vk::ImageUsageFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw().clone();
        let (sharing_mode, families) = context.sharing();
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(layers.max(1))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device.create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type = find_memory_type(
            &context.physical.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        let memory = memory_type.and_then(|memory_type_index| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);
            unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device,
            image,
            memory,
            view: vk::ImageView::null(),
            extent: vk::Extent2D { width, height },
            layers: layers.max(1),
        };
        unsafe {
            this.device.bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D_ARRAY)
            .format(TEXTURE_FORMAT)
            .subresource_range(color_range(0, this.layers));
        this.view = unsafe {
            this.device.create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(this)
    }

    /// Image handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// Array view over every layer
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Extent of one layer
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of layers
    pub const fn layers(&self) -> u32 {
        self.layers
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Sampled texture resident on the GPU
pub struct GpuTexture {
    image: GpuImage,
    layout: vk::ImageLayout,
}

impl GpuTexture {
    /// Upload pixels, leaving the texture in `layout`
    ///
    /// Storage textures stay in `GENERAL` so compute shaders can read them.
    pub fn upload(
        context: &VulkanContext,
        pool: &CommandPool,
        pixels: &TexturePixels,
        storage: bool,
        timeout_ms: u64,
    ) -> VulkanResult<Self> {
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        let layout = if storage {
            usage |= vk::ImageUsageFlags::STORAGE;
            vk::ImageLayout::GENERAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        };
        let image = GpuImage::new(context, pixels.width, pixels.height, pixels.layers, usage)?;

        let staging = Buffer::host_visible(context, pixels.data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write_bytes(0, &pixels.data)?;

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(color_layers(0, image.layers()))
            .image_extent(vk::Extent3D { width: pixels.width, height: pixels.height, depth: 1 })
            .build();

        pool.submit_once(context.device.graphics_queue, timeout_ms, |device, cmd| {
            LayoutTransition::UNDEFINED_TO_TRANSFER_DST.record(device, cmd, image.handle(), 0, image.layers());
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            LayoutTransition::transfer_dst_to(layout).record(device, cmd, image.handle(), 0, image.layers());
        })?;

        Ok(Self { image, layout })
    }

    /// Create a texture cleared to transparent black, for GPU-written atlases
    pub fn cleared(
        context: &VulkanContext,
        pool: &CommandPool,
        width: u32,
        height: u32,
        layers: u32,
        timeout_ms: u64,
    ) -> VulkanResult<Self> {
        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        let image = GpuImage::new(context, width, height, layers, usage)?;
        let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        pool.submit_once(context.device.graphics_queue, timeout_ms, |device, cmd| {
            LayoutTransition::UNDEFINED_TO_TRANSFER_DST.record(device, cmd, image.handle(), 0, image.layers());
            unsafe {
                device.cmd_clear_color_image(
                    cmd,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 0.0] },
                    &[color_range(0, image.layers())],
                );
            }
            LayoutTransition::transfer_dst_to(layout).record(device, cmd, image.handle(), 0, image.layers());
        })?;

        Ok(Self { image, layout })
    }

    /// Underlying image
    pub const fn image(&self) -> &GpuImage {
        &self.image
    }

    /// Layout the texture rests in between uses
    pub const fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}
