//! Frame orchestration
//!
//! A ring of frame slots, each with its own command buffer, image-available
//! semaphore, in-flight fence, descriptor set and buffers. A frame waits for
//! its slot's fence, acquires an image, flushes model copies on the transfer
//! queue, dispatches the matrix stage on the compute queue and draws every
//! pool with one indirect-count call on the graphics queue.

use std::path::Path;

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::config::RendererConfig;
use crate::render::backends::vulkan::model_buffers::{draw_count_offset, draw_info_offset};
use crate::render::backends::vulkan::resources::{
    binding, write_buffer, write_images, DescriptorPool, DescriptorSetLayout, LayoutTransition, Sampler,
};
use crate::render::backends::vulkan::rendering::{
    begin_recording, end_recording, CommandPool, GraphicsPipeline, PipelineLayout, ShaderModule,
};
use crate::render::backends::vulkan::stages::MatrixPushConstants;
use crate::render::backends::vulkan::{
    Fence, MatrixStage, ModelBuffers, Semaphore, Swapchain, TimelineSemaphore, VulkanContext, VulkanError,
    VulkanResult,
};
use crate::render::model_pool::{DrawInfo, GpuTransform, ModelPool};

/// Size of the sampled texture array in the graphics descriptor set
pub const MAX_TEXTURES: usize = 64;

/// How one pool is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDraw {
    /// First global model of the pool
    pub first_model: usize,
    /// Pool capacity, the upper bound on its draw count
    pub capacity: usize,
    /// Draw with the line-mode pipeline
    pub wireframe: bool,
    /// Transform by the camera projection instead of the screen projection
    pub apply_camera: bool,
}

/// Everything one frame needs from the CPU side
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Transforms of every global model slot
    pub transforms: &'a [GpuTransform],
    /// Pools in draw order; the position is the pool's draw-count index
    pub pools: &'a [PoolDraw],
    /// Projection, camera and interpolation parameters
    pub matrices: MatrixPushConstants,
}

/// Outcome of [`FrameOrchestrator::render`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented
    Presented,
    /// The swapchain was out of date or the window minimized; nothing drawn
    Skipped,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct DrawPushConstants {
    draw_base: u32,
    apply_camera: u32,
}

/// Per-frame resources and the draw/present protocol
pub struct FrameOrchestrator {
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    timeout_ms: u64,
    clear_color: [f32; 4],
    current_frame: usize,
    needs_recreate: bool,
    textures: Vec<Option<vk::DescriptorImageInfo>>,
    textures_dirty: Vec<bool>,
    sets: Vec<vk::DescriptorSet>,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: Vec<Semaphore>,
    present_ready: Vec<Semaphore>,
    in_flight: Vec<Fence>,
    rendered: TimelineSemaphore,
    matrices: MatrixStage,
    model_buffers: ModelBuffers,
    main_pipeline: GraphicsPipeline,
    debug_pipeline: GraphicsPipeline,
    layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    sampler: Sampler,
    swapchain: Swapchain,
    command_pool: CommandPool,
}

impl FrameOrchestrator {
    /// Create the swapchain, pipelines and every per-frame resource
    pub fn new(
        context: &VulkanContext,
        config: &RendererConfig,
        window_extent: vk::Extent2D,
        total_models: usize,
    ) -> VulkanResult<Self> {
        let device = context.raw().clone();
        let frames = config.max_frames_in_flight.max(1);
        let frame_count = frames as u32;
        let shader_dir = Path::new(&config.shader_dir);
        let timeout_ms = config.gpu_timeout_ms;

        let swapchain = Swapchain::new(context, window_extent)?;

        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                binding(0, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::VERTEX),
                binding(1, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::VERTEX),
                binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, MAX_TEXTURES as u32, vk::ShaderStageFlags::FRAGMENT),
            ],
        )?;
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            frame_count,
            &[
                vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: 2 * frame_count },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: MAX_TEXTURES as u32 * frame_count,
                },
            ],
        )?;
        let sets = descriptor_pool.allocate(&set_layout, frames)?;

        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: std::mem::size_of::<DrawPushConstants>() as u32,
        }];
        let layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &push_constants)?;

        let vertex = ShaderModule::from_file(device.clone(), shader_dir.join("quad.vert.spv"))?;
        let textured = ShaderModule::from_file(device.clone(), shader_dir.join("quad.frag.spv"))?;
        let flat = ShaderModule::from_file(device.clone(), shader_dir.join("debug.frag.spv"))?;
        let main_pipeline = GraphicsPipeline::quads(
            device.clone(),
            &layout,
            &vertex,
            &textured,
            swapchain.format(),
            vk::PolygonMode::FILL,
        )?;
        let debug_pipeline = GraphicsPipeline::quads(
            device.clone(),
            &layout,
            &vertex,
            &flat,
            swapchain.format(),
            vk::PolygonMode::LINE,
        )?;

        let model_buffers = ModelBuffers::new(context, frames, total_models, timeout_ms)?;
        let matrices = MatrixStage::new(context, shader_dir, frames, total_models, timeout_ms)?;
        for (frame, &set) in sets.iter().enumerate() {
            let (Some(matrix_buffer), Some(draw_buffer)) = (matrices.matrix_buffer(frame), model_buffers.draw_buffer(frame)) else {
                return Err(VulkanError::InitializationFailed(format!("Missing buffers for frame {}", frame)));
            };
            write_buffer(&device, set, 0, vk::DescriptorType::STORAGE_BUFFER, matrix_buffer.handle());
            write_buffer(&device, set, 1, vk::DescriptorType::STORAGE_BUFFER, draw_buffer.handle());
        }

        let command_pool = CommandPool::new(device.clone(), context.families().graphics)?;
        let command_buffers = command_pool.allocate_command_buffers(frame_count)?;

        let mut image_available = Vec::with_capacity(frames);
        let mut in_flight = Vec::with_capacity(frames);
        for _ in 0..frames {
            image_available.push(Semaphore::new(device.clone())?);
            in_flight.push(Fence::new(device.clone(), true)?);
        }
        let present_ready = Self::create_present_semaphores(&device, swapchain.image_count())?;

        log::info!("Frame orchestrator ready: {} frames in flight, {} models", frames, total_models);
        Ok(Self {
            rendered: TimelineSemaphore::new(device.clone(), "frame rendering")?,
            sampler: Sampler::nearest(device.clone())?,
            device,
            graphics_queue: context.device.graphics_queue,
            present_queue: context.device.present_queue,
            timeout_ms,
            clear_color: config.clear_color,
            current_frame: 0,
            needs_recreate: false,
            textures: vec![None; MAX_TEXTURES],
            textures_dirty: vec![true; frames],
            sets,
            command_buffers,
            image_available,
            present_ready,
            in_flight,
            matrices,
            model_buffers,
            main_pipeline,
            debug_pipeline,
            layout,
            descriptor_pool,
            set_layout,
            swapchain,
            command_pool,
        })
    }

    fn create_present_semaphores(device: &Device, count: usize) -> VulkanResult<Vec<Semaphore>> {
        (0..count).map(|_| Semaphore::new(device.clone())).collect()
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Slot the next frame uses
    pub const fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Swapchain extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Bind a texture view at descriptor array index `index`; applied to each
    /// frame slot the next time it renders. Unbound entries show index 0.
    pub fn set_texture(&mut self, index: usize, view: vk::ImageView, layout: vk::ImageLayout) -> VulkanResult<()> {
        let entry = self.textures.get_mut(index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Texture index {} exceeds the {} descriptor slots", index, MAX_TEXTURES),
        })?;
        *entry = Some(vk::DescriptorImageInfo { sampler: vk::Sampler::null(), image_view: view, image_layout: layout });
        self.textures_dirty.iter_mut().for_each(|dirty| *dirty = true);
        Ok(())
    }

    /// Move queued pool uploads into staging
    pub fn stage_models(&mut self, pools: &mut [ModelPool]) -> VulkanResult<()> {
        self.model_buffers.stage(pools)
    }

    /// Block until every submitted frame, copy and dispatch has finished
    pub fn wait_all(&self) -> VulkanResult<()> {
        self.rendered.wait_latest(self.timeout_ms)?;
        self.matrices.ready_semaphore().wait_latest(self.timeout_ms)?;
        self.model_buffers.ready_semaphore().wait_latest(self.timeout_ms)
    }

    /// Request a swapchain rebuild before the next frame
    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Draw and present one frame
    pub fn render(
        &mut self,
        context: &VulkanContext,
        window_extent: vk::Extent2D,
        input: &FrameInput<'_>,
    ) -> VulkanResult<FrameStatus> {
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(FrameStatus::Skipped);
        }
        let frame = self.current_frame;
        self.in_flight[frame].wait("frame in flight", self.timeout_ms)?;

        if self.needs_recreate || window_extent != self.swapchain.extent() {
            self.recreate_swapchain(context, window_extent)?;
        }

        let Some(acquired) = self.swapchain.acquire(self.image_available[frame].handle(), self.timeout_ms)? else {
            log::debug!("Swapchain out of date, skipping frame");
            self.needs_recreate = true;
            return Ok(FrameStatus::Skipped);
        };
        if acquired.suboptimal {
            self.needs_recreate = true;
        }

        let present_ready = match self.submit_frame(frame, acquired.index as usize, input) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                // The acquired image is abandoned with the old swapchain.
                self.needs_recreate = true;
                if let Err(release_error) = self.release_frame(frame) {
                    log::error!("Failed to release frame slot {}: {}", frame, release_error);
                }
                return Err(e);
            }
        };

        if self.swapchain.present(self.present_queue, present_ready, acquired.index)? {
            self.needs_recreate = true;
        }

        self.current_frame = (frame + 1) % self.frames_in_flight();
        Ok(FrameStatus::Presented)
    }

    /// Flush, dispatch, record and submit; returns the semaphore presentation waits on
    fn submit_frame(&mut self, frame: usize, image: usize, input: &FrameInput<'_>) -> VulkanResult<vk::Semaphore> {
        if self.textures_dirty[frame] {
            self.write_texture_descriptors(frame);
            self.textures_dirty[frame] = false;
        }

        let buffers_value = self.model_buffers.flush(frame)?;
        let matrices_value = self.matrices.dispatch(frame, input.transforms, input.matrices)?;

        let cmd = self.command_buffers[frame];
        self.record(cmd, frame, image, input)?;

        let present_ready = self
            .present_ready
            .get(image)
            .ok_or_else(|| VulkanError::InvalidOperation { reason: format!("No present semaphore for image {}", image) })?
            .handle();
        let rendered_value = self.rendered.upcoming_value();

        let wait_semaphores = [
            self.image_available[frame].handle(),
            self.model_buffers.ready_semaphore().handle(),
            self.matrices.ready_semaphore().handle(),
        ];
        let wait_values = [0, buffers_value, matrices_value];
        let wait_stages = [
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::DRAW_INDIRECT
                | vk::PipelineStageFlags::VERTEX_INPUT
                | vk::PipelineStageFlags::VERTEX_SHADER,
            vk::PipelineStageFlags::VERTEX_SHADER,
        ];
        let signal_semaphores = [present_ready, self.rendered.handle()];
        let signal_values = [0, rendered_value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        // Reset only right before the submit that signals it.
        self.in_flight[frame].reset()?;
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit.build()], self.in_flight[frame].handle())
                .map_err(VulkanError::Api)?;
        }
        self.rendered.commit(rendered_value);
        Ok(present_ready)
    }

    /// Consume the slot's acquire signal and signal its fence without drawing
    fn release_frame(&self, frame: usize) -> VulkanResult<()> {
        let fence = &self.in_flight[frame];
        let wait_semaphores = [self.image_available[frame].handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        fence.reset()?;
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit.build()], fence.handle())
                .map_err(VulkanError::Api)
        }
    }

    fn recreate_swapchain(&mut self, context: &VulkanContext, window_extent: vk::Extent2D) -> VulkanResult<()> {
        let format = self.swapchain.format();
        context.wait_idle()?;
        self.swapchain.recreate(context, window_extent)?;
        if self.swapchain.format() != format {
            log::warn!("Swapchain format changed from {:?} to {:?}", format, self.swapchain.format());
        }
        if self.present_ready.len() != self.swapchain.image_count() {
            self.present_ready = Self::create_present_semaphores(&self.device, self.swapchain.image_count())?;
        }
        self.needs_recreate = false;
        Ok(())
    }

    fn write_texture_descriptors(&self, frame: usize) {
        let Some(fallback) = self.textures[0] else {
            log::warn!("No placeholder texture bound, texture descriptors left unwritten");
            return;
        };
        let images: Vec<vk::DescriptorImageInfo> = self
            .textures
            .iter()
            .map(|entry| vk::DescriptorImageInfo { sampler: self.sampler.handle(), ..entry.unwrap_or(fallback) })
            .collect();
        write_images(&self.device, self.sets[frame], 2, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, &images);
    }

    fn record(&self, cmd: vk::CommandBuffer, frame: usize, image: usize, input: &FrameInput<'_>) -> VulkanResult<()> {
        let (Some(vertex_buffer), Some(draw_buffer)) = (self.model_buffers.vertex_buffer(frame), self.model_buffers.draw_buffer(frame)) else {
            return Err(VulkanError::InvalidOperation { reason: format!("No model buffers for frame {}", frame) });
        };
        let (Some(&target), Some(&view)) = (self.swapchain.images().get(image), self.swapchain.image_views().get(image)) else {
            return Err(VulkanError::InvalidOperation { reason: format!("Swapchain image {} out of range", image) });
        };
        let extent = self.swapchain.extent();

        begin_recording(&self.device, cmd)?;
        LayoutTransition {
            old: vk::ImageLayout::UNDEFINED,
            new: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::empty(),
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }
        .record(&self.device, cmd, target, 0, 1);

        let attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue { color: vk::ClearColorValue { float32: self.clear_color } })
            .build()];
        let render_area = vk::Rect2D { offset: vk::Offset2D::default(), extent };
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&attachments);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device.cmd_begin_rendering(cmd, &rendering_info);
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[render_area]);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.handle(),
                0,
                &[self.sets[frame]],
                &[],
            );
            self.device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer.handle()], &[0]);
            self.device.cmd_bind_index_buffer(cmd, self.model_buffers.index_buffer().handle(), 0, vk::IndexType::UINT16);

            for (pool_index, pool) in input.pools.iter().enumerate() {
                if pool.capacity == 0 {
                    continue;
                }
                let pipeline = if pool.wireframe { &self.debug_pipeline } else { &self.main_pipeline };
                let push = DrawPushConstants { draw_base: pool.first_model as u32, apply_camera: u32::from(pool.apply_camera) };
                self.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
                self.device.cmd_push_constants(
                    cmd,
                    self.layout.handle(),
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
                self.device.cmd_draw_indexed_indirect_count(
                    cmd,
                    draw_buffer.handle(),
                    draw_info_offset(pool.first_model),
                    draw_buffer.handle(),
                    draw_count_offset(pool_index),
                    pool.capacity as u32,
                    std::mem::size_of::<DrawInfo>() as u32,
                );
            }

            self.device.cmd_end_rendering(cmd);
        }

        LayoutTransition {
            old: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_access: vk::AccessFlags::empty(),
        }
        .record(&self.device, cmd, target, 0, 1);

        end_recording(&self.device, cmd)
    }
}
