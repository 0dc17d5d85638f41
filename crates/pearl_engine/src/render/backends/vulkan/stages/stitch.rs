//! Tile-stitch compute stage
//!
//! Composes a room's tile layers into one shared transfer image sized for the
//! largest room, then copies the result into the room atlas layers of a cache
//! slot. The stage owns a single pair of command buffers and fences, so
//! stitches are serialized.

use std::path::Path;

use ash::{vk, Device};

use crate::area::{Room, RoomSize, NUM_ROOM_LAYERS, TILE_SIZE_PX};
use crate::render::backends::vulkan::resources::{
    binding, color_layers, write_buffer, write_images, DescriptorPool, DescriptorSetLayout, LayoutTransition,
};
use crate::render::backends::vulkan::rendering::{
    begin_recording, end_recording, CommandPool, ComputePipeline, PipelineLayout, ShaderModule,
};
use crate::render::backends::vulkan::{Buffer, Fence, GpuImage, VulkanContext, VulkanError, VulkanResult};

/// Tile-index slots reserved per layer in the uniform buffer
pub const MAX_TILES_PER_LAYER: usize = RoomSize::LARGEST.tile_count();

const TILE_INDEX_BYTES: vk::DeviceSize = (MAX_TILES_PER_LAYER * NUM_ROOM_LAYERS * 4) as vk::DeviceSize;

/// Compute pipeline and resources for room composition
pub struct TileStitchStage {
    device: Device,
    queue: vk::Queue,
    timeout_ms: u64,
    command_buffers: [vk::CommandBuffer; 2],
    compute_fence: Fence,
    copy_fence: Fence,
    set: vk::DescriptorSet,
    tilemap_bound: bool,
    pipeline: ComputePipeline,
    layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    tile_indices: Buffer,
    transfer_image: GpuImage,
    command_pool: CommandPool,
}

impl TileStitchStage {
    /// Build the pipeline, allocate the transfer image and bind the static descriptors
    pub fn new(context: &VulkanContext, shader_dir: &Path, timeout_ms: u64) -> VulkanResult<Self> {
        let device = context.raw().clone();

        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
                binding(1, vk::DescriptorType::STORAGE_IMAGE, 1, vk::ShaderStageFlags::COMPUTE),
                binding(2, vk::DescriptorType::STORAGE_IMAGE, 1, vk::ShaderStageFlags::COMPUTE),
            ],
        )?;
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            1,
            &[
                vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 1 },
                vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_IMAGE, descriptor_count: 2 },
            ],
        )?;
        let set = descriptor_pool
            .allocate(&set_layout, 1)?
            .pop()
            .ok_or_else(|| VulkanError::InitializationFailed("No stitch descriptor set".to_string()))?;

        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: 8,
        }];
        let layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &push_constants)?;
        let shader = ShaderModule::from_file(device.clone(), shader_dir.join("stitch_room.comp.spv"))?;
        let pipeline = ComputePipeline::new(device.clone(), &layout, &shader)?;

        let tile_indices = Buffer::host_visible(context, TILE_INDEX_BYTES, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        let (width, height) = RoomSize::LARGEST.pixel_extent();
        let transfer_image = GpuImage::new(
            context,
            width,
            height,
            NUM_ROOM_LAYERS as u32,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;

        let families = context.families();
        let command_pool = CommandPool::new(device.clone(), families.compute)?;
        let queue = context.device.compute_queue;
        command_pool.submit_once(queue, timeout_ms, |device, cmd| {
            to_general().record(device, cmd, transfer_image.handle(), 0, transfer_image.layers());
        })?;

        write_buffer(&device, set, 0, vk::DescriptorType::UNIFORM_BUFFER, tile_indices.handle());
        write_images(
            &device,
            set,
            2,
            0,
            vk::DescriptorType::STORAGE_IMAGE,
            &[vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: transfer_image.view(),
                image_layout: vk::ImageLayout::GENERAL,
            }],
        );

        let command_buffers: [vk::CommandBuffer; 2] = command_pool
            .allocate_command_buffers(2)?
            .try_into()
            .map_err(|_| VulkanError::InitializationFailed("Stitch command buffers".to_string()))?;

        log::debug!("Tile stitch stage ready ({}x{} transfer image)", width, height);
        Ok(Self {
            compute_fence: Fence::new(device.clone(), true)?,
            copy_fence: Fence::new(device.clone(), true)?,
            device,
            queue,
            timeout_ms,
            command_buffers,
            set,
            tilemap_bound: false,
            pipeline,
            layout,
            descriptor_pool,
            set_layout,
            tile_indices,
            transfer_image,
            command_pool,
        })
    }

    /// Point the stage at the tilemap texture, which must rest in `GENERAL`
    /// and hold one tile per layer
    pub fn bind_tilemap(&mut self, tilemap: &GpuImage) -> VulkanResult<()> {
        let extent = tilemap.extent();
        if extent.width != TILE_SIZE_PX || extent.height != TILE_SIZE_PX {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Tilemap cells are {}x{}, the stitch shader needs {}x{}",
                    extent.width, extent.height, TILE_SIZE_PX, TILE_SIZE_PX
                ),
            });
        }
        write_images(
            &self.device,
            self.set,
            1,
            0,
            vk::DescriptorType::STORAGE_IMAGE,
            &[vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: tilemap.view(),
                image_layout: vk::ImageLayout::GENERAL,
            }],
        );
        self.tilemap_bound = true;
        Ok(())
    }

    /// Compose `room` and copy it into atlas layers `slot * NUM_ROOM_LAYERS..`
    ///
    /// Blocks until the copy has landed. Nothing may be sampling those layers.
    pub fn stitch(&mut self, room: &Room, atlas: &GpuImage, slot: usize) -> VulkanResult<()> {
        if !self.tilemap_bound {
            return Err(VulkanError::InvalidOperation { reason: "No tilemap texture bound".to_string() });
        }
        let base_layer = (slot * NUM_ROOM_LAYERS) as u32;
        if base_layer + NUM_ROOM_LAYERS as u32 > atlas.layers() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Slot {} outside room atlas of {} layers", slot, atlas.layers()),
            });
        }

        self.compute_fence.wait("stitch compute", self.timeout_ms)?;
        self.copy_fence.wait("stitch copy", self.timeout_ms)?;
        self.upload_tile_indices(room)?;

        let (tiles_w, tiles_h) = room.size.tile_extent();
        // Fences are reset only by the submit that signals them.
        self.record_compose(tiles_w, tiles_h)?;
        self.compute_fence
            .submit_on(self.queue, |fence| self.submit(self.command_buffers[0], fence))?;
        self.compute_fence.wait("stitch compute", self.timeout_ms)?;

        self.record_copy(atlas, base_layer, tiles_w * TILE_SIZE_PX, tiles_h * TILE_SIZE_PX)?;
        self.copy_fence
            .submit_on(self.queue, |fence| self.submit(self.command_buffers[1], fence))?;
        self.copy_fence.wait("stitch copy", self.timeout_ms)?;

        log::debug!("Stitched room {} into atlas layers {}..{}", room.id, base_layer, base_layer + NUM_ROOM_LAYERS as u32);
        Ok(())
    }

    fn upload_tile_indices(&self, room: &Room) -> VulkanResult<()> {
        let expected = room.size.tile_count();
        for (layer, tiles) in room.layers.iter().enumerate() {
            if tiles.len() != expected || tiles.len() > MAX_TILES_PER_LAYER {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("Room {} layer {} has {} tiles, expected {}", room.id, layer, tiles.len(), expected),
                });
            }
            let offset = (layer * MAX_TILES_PER_LAYER * 4) as vk::DeviceSize;
            self.tile_indices.write(offset, tiles.as_slice())?;
        }
        Ok(())
    }

    fn record_compose(&self, tiles_w: u32, tiles_h: u32) -> VulkanResult<()> {
        let cmd = self.command_buffers[0];
        begin_recording(&self.device, cmd)?;
        unsafe {
            self.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.layout.handle(),
                0,
                &[self.set],
                &[],
            );
            self.device.cmd_push_constants(
                cmd,
                self.layout.handle(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::cast_slice(&[tiles_w, tiles_h]),
            );
            self.device.cmd_dispatch(cmd, tiles_w, tiles_h, NUM_ROOM_LAYERS as u32);
        }
        end_recording(&self.device, cmd)
    }

    fn record_copy(&self, atlas: &GpuImage, base_layer: u32, width: u32, height: u32) -> VulkanResult<()> {
        let cmd = self.command_buffers[1];
        let layers = NUM_ROOM_LAYERS as u32;
        begin_recording(&self.device, cmd)?;

        let transfer = self.transfer_image.handle();
        LayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        }
        .record(&self.device, cmd, transfer, 0, layers);
        LayoutTransition {
            old: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            src_access: vk::AccessFlags::empty(),
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        }
        .record(&self.device, cmd, atlas.handle(), base_layer, layers);

        let region = vk::ImageCopy {
            src_subresource: color_layers(0, layers),
            src_offset: vk::Offset3D::default(),
            dst_subresource: color_layers(base_layer, layers),
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D { width, height, depth: 1 },
        };
        unsafe {
            self.device.cmd_copy_image(
                cmd,
                transfer,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                atlas.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        LayoutTransition::transfer_dst_to(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .record(&self.device, cmd, atlas.handle(), base_layer, layers);
        LayoutTransition {
            old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new: vk::ImageLayout::GENERAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_access: vk::AccessFlags::SHADER_WRITE,
        }
        .record(&self.device, cmd, transfer, 0, layers);

        end_recording(&self.device, cmd)
    }

    fn submit(&self, cmd: vk::CommandBuffer, fence: vk::Fence) -> VulkanResult<()> {
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit.build()], fence)
                .map_err(VulkanError::Api)
        }
    }
}

const fn to_general() -> LayoutTransition {
    LayoutTransition {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::GENERAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        src_access: vk::AccessFlags::empty(),
        dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_access: vk::AccessFlags::SHADER_WRITE,
    }
}
