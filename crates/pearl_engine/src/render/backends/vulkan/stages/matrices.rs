//! Model-matrix compute stage
//!
//! Expands every model's current and previous transform into an interpolated
//! model matrix, and writes the camera and screen projections in front of
//! them. The matrix buffer layout is
//! `mat4 camera_projection; mat4 screen_projection; mat4 models[];`.

use std::path::Path;

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::Vec2;
use crate::render::backends::vulkan::resources::{binding, write_buffer, DescriptorPool, DescriptorSetLayout};
use crate::render::backends::vulkan::rendering::{
    begin_recording, end_recording, CommandPool, ComputePipeline, PipelineLayout, ShaderModule,
};
use crate::render::backends::vulkan::{Buffer, TimelineSemaphore, VulkanContext, VulkanError, VulkanResult};
use crate::render::model_pool::GpuTransform;
use crate::render::ProjectionBounds;

/// Threads per workgroup of `compute_matrices.comp`
pub const MATRIX_WORKGROUP_SIZE: u32 = 64;

const MAT4_BYTES: vk::DeviceSize = 64;
const PROJECTION_COUNT: vk::DeviceSize = 2;

/// Push constants of the matrix shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct MatrixPushConstants {
    /// Left, right, top, bottom of the visible rectangle
    pub bounds: [f32; 4],
    /// Camera position in world units
    pub camera: [f32; 2],
    /// Interpolation factor between previous and current transforms
    pub delta: f32,
    /// Number of models to expand
    pub model_count: u32,
}

impl MatrixPushConstants {
    /// Push constants for one frame; `delta` is clamped to `[0, 1]`
    pub fn new(bounds: ProjectionBounds, camera: Vec2, delta: f32, model_count: u32) -> Self {
        Self {
            bounds: [bounds.left, bounds.right, bounds.top, bounds.bottom],
            camera: [camera.x, camera.y],
            delta: delta.clamp(0.0, 1.0),
            model_count,
        }
    }
}

/// Per-frame transform upload and matrix compute dispatch
pub struct MatrixStage {
    device: Device,
    queue: vk::Queue,
    timeout_ms: u64,
    model_count: u32,
    ready: TimelineSemaphore,
    frame_values: Vec<u64>,
    command_buffers: Vec<vk::CommandBuffer>,
    sets: Vec<vk::DescriptorSet>,
    transforms: Vec<Buffer>,
    matrices: Vec<Buffer>,
    pipeline: ComputePipeline,
    layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    command_pool: CommandPool,
}

impl MatrixStage {
    /// Create buffers for `model_count` models in each of `frames` frame slots
    pub fn new(
        context: &VulkanContext,
        shader_dir: &Path,
        frames: usize,
        model_count: usize,
        timeout_ms: u64,
    ) -> VulkanResult<Self> {
        let device = context.raw().clone();
        let frame_count = frames as u32;

        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                binding(0, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
                binding(1, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
            ],
        )?;
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            frame_count,
            &[vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: 2 * frame_count }],
        )?;
        let sets = descriptor_pool.allocate(&set_layout, frames)?;

        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<MatrixPushConstants>() as u32,
        }];
        let layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &push_constants)?;
        let shader = ShaderModule::from_file(device.clone(), shader_dir.join("compute_matrices.comp.spv"))?;
        let pipeline = ComputePipeline::new(device.clone(), &layout, &shader)?;

        let transform_bytes = (model_count.max(1) * std::mem::size_of::<GpuTransform>()) as vk::DeviceSize;
        let matrix_bytes = Self::matrix_buffer_size(model_count);
        let mut transforms = Vec::with_capacity(frames);
        let mut matrices = Vec::with_capacity(frames);
        for &set in &sets {
            let transform_buffer = Buffer::host_visible(context, transform_bytes, vk::BufferUsageFlags::STORAGE_BUFFER)?;
            let matrix_buffer = Buffer::device_local(context, matrix_bytes, vk::BufferUsageFlags::STORAGE_BUFFER)?;
            write_buffer(&device, set, 0, vk::DescriptorType::STORAGE_BUFFER, transform_buffer.handle());
            write_buffer(&device, set, 1, vk::DescriptorType::STORAGE_BUFFER, matrix_buffer.handle());
            transforms.push(transform_buffer);
            matrices.push(matrix_buffer);
        }

        let command_pool = CommandPool::new(device.clone(), context.families().compute)?;
        let command_buffers = command_pool.allocate_command_buffers(frame_count)?;

        Ok(Self {
            ready: TimelineSemaphore::new(device.clone(), "model matrices")?,
            device,
            queue: context.device.compute_queue,
            timeout_ms,
            model_count: model_count as u32,
            frame_values: vec![0; frames],
            command_buffers,
            sets,
            transforms,
            matrices,
            pipeline,
            layout,
            descriptor_pool,
            set_layout,
            command_pool,
        })
    }

    /// Bytes of a matrix buffer holding `model_count` models
    pub const fn matrix_buffer_size(model_count: usize) -> vk::DeviceSize {
        (PROJECTION_COUNT + model_count as vk::DeviceSize) * MAT4_BYTES
    }

    /// Matrix buffer of a frame slot, read by the vertex shader
    pub fn matrix_buffer(&self, frame: usize) -> Option<&Buffer> {
        self.matrices.get(frame)
    }

    /// Timeline signalled when a dispatch completes
    pub const fn ready_semaphore(&self) -> &TimelineSemaphore {
        &self.ready
    }

    /// Upload `transforms` and dispatch; returns the timeline value to wait on
    pub fn dispatch(&mut self, frame: usize, transforms: &[GpuTransform], push: MatrixPushConstants) -> VulkanResult<u64> {
        let cmd = *self.command_buffers.get(frame).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {} out of range", frame),
        })?;
        if transforms.len() > self.model_count as usize {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} transforms for {} models", transforms.len(), self.model_count),
            });
        }

        // The previous dispatch from this slot must be done before its buffers are rewritten.
        self.ready.wait(self.frame_values[frame], self.timeout_ms)?;
        self.transforms[frame].write(0, transforms)?;

        let push = MatrixPushConstants { model_count: transforms.len() as u32, ..push };
        begin_recording(&self.device, cmd)?;
        unsafe {
            self.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.layout.handle(),
                0,
                &[self.sets[frame]],
                &[],
            );
            self.device.cmd_push_constants(
                cmd,
                self.layout.handle(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push),
            );
            // One extra invocation writes the projections when there are no models.
            let groups = (push.model_count.max(1) + MATRIX_WORKGROUP_SIZE - 1) / MATRIX_WORKGROUP_SIZE;
            self.device.cmd_dispatch(cmd, groups, 1, 1);
        }
        end_recording(&self.device, cmd)?;

        let value = self.ready.upcoming_value();
        let signal_semaphores = [self.ready.handle()];
        let signal_values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
        }
        self.ready.commit(value);
        self.frame_values[frame] = value;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_match_shader_layout() {
        assert_eq!(std::mem::size_of::<MatrixPushConstants>(), 32);
        assert_eq!(std::mem::size_of::<GpuTransform>(), 96);
    }

    #[test]
    fn test_delta_clamped() {
        let bounds = ProjectionBounds::from_extent(40.0, 25.0);
        let push = MatrixPushConstants::new(bounds, Vec2::new(40.0, 0.0), 1.7, 3);
        assert_eq!(push.delta, 1.0);
        assert_eq!(push.bounds, [0.0, 40.0, 0.0, 25.0]);
        assert_eq!(push.camera, [40.0, 0.0]);
    }

    #[test]
    fn test_matrix_buffer_holds_projections_and_models() {
        assert_eq!(MatrixStage::matrix_buffer_size(0), 128);
        assert_eq!(MatrixStage::matrix_buffer_size(384), 128 + 384 * 64);
    }
}
