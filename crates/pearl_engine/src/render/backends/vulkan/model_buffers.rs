//! GPU mirror of the model pools
//!
//! Pool mutations land in one host-visible staging buffer and are copied on
//! the transfer queue into each frame slot's device-local vertex and draw
//! buffers. Every frame slot keeps its own list of dirty ranges, so a range
//! staged once reaches every frame's copy the next time that frame flushes.
//!
//! Draw buffer layout: `uint counts[4]` (one per pool) followed by the
//! draw-info records of all pools, pool `k` starting at record
//! `first_model(k)`.

use ash::{vk, Device};

use crate::render::backends::vulkan::rendering::{begin_recording, end_recording, CommandPool};
use crate::render::backends::vulkan::{Buffer, TimelineSemaphore, VulkanContext, VulkanError, VulkanResult};
use crate::render::model_pool::{DrawInfo, ModelPool, PoolUpload, Vertex, QUAD_INDICES, VERTICES_PER_QUAD};

const VERTEX_BYTES: vk::DeviceSize = std::mem::size_of::<Vertex>() as vk::DeviceSize;
const DRAW_INFO_BYTES: vk::DeviceSize = std::mem::size_of::<DrawInfo>() as vk::DeviceSize;

/// Bytes reserved for the per-pool draw counts
pub const DRAW_COUNT_BYTES: vk::DeviceSize = 16;

/// Byte offset of pool `pool_index`'s draw count in a draw buffer
pub const fn draw_count_offset(pool_index: usize) -> vk::DeviceSize {
    pool_index as vk::DeviceSize * 4
}

/// Byte offset of global model slot `first_model`'s record in a draw buffer
pub const fn draw_info_offset(first_model: usize) -> vk::DeviceSize {
    DRAW_COUNT_BYTES + first_model as vk::DeviceSize * DRAW_INFO_BYTES
}

/// Byte offset of a model's first vertex in a vertex buffer
pub const fn vertex_offset(global_model: usize) -> vk::DeviceSize {
    (global_model * VERTICES_PER_QUAD) as vk::DeviceSize * VERTEX_BYTES
}

/// Dirty byte ranges waiting to be copied into one frame slot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DirtyRanges {
    vertices: Vec<(vk::DeviceSize, vk::DeviceSize)>,
    draws: Vec<(vk::DeviceSize, vk::DeviceSize)>,
}

impl DirtyRanges {
    fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.draws.is_empty()
    }

    fn absorb(&mut self, other: Self) {
        for (offset, size) in other.vertices {
            self.push_vertices(offset, size);
        }
        for (offset, size) in other.draws {
            self.push_draws(offset, size);
        }
    }

    fn push_vertices(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        push_range(&mut self.vertices, offset, size);
    }

    fn push_draws(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        push_range(&mut self.draws, offset, size);
    }
}

/// Record a range, skipping exact duplicates
fn push_range(ranges: &mut Vec<(vk::DeviceSize, vk::DeviceSize)>, offset: vk::DeviceSize, size: vk::DeviceSize) {
    if size > 0 && !ranges.contains(&(offset, size)) {
        ranges.push((offset, size));
    }
}

/// Staging, per-frame vertex/draw buffers and the shared index buffer
pub struct ModelBuffers {
    device: Device,
    queue: vk::Queue,
    timeout_ms: u64,
    vertex_region: vk::DeviceSize,
    ready: TimelineSemaphore,
    frame_values: Vec<u64>,
    dirty: Vec<DirtyRanges>,
    command_buffers: Vec<vk::CommandBuffer>,
    staging: Buffer,
    vertex_buffers: Vec<Buffer>,
    draw_buffers: Vec<Buffer>,
    index_buffer: Buffer,
    command_pool: CommandPool,
}

impl ModelBuffers {
    /// Allocate buffers for `total_models` models in each of `frames` frame slots
    pub fn new(context: &VulkanContext, frames: usize, total_models: usize, timeout_ms: u64) -> VulkanResult<Self> {
        let device = context.raw().clone();
        let vertex_region = vertex_offset(total_models);
        let draw_region = draw_info_offset(total_models);

        let staging = Buffer::host_visible(context, vertex_region + draw_region, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write_bytes(vertex_region, &[0; DRAW_COUNT_BYTES as usize])?;

        let mut vertex_buffers = Vec::with_capacity(frames);
        let mut draw_buffers = Vec::with_capacity(frames);
        for _ in 0..frames {
            vertex_buffers.push(Buffer::device_local(
                context,
                vertex_region,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            )?);
            draw_buffers.push(Buffer::device_local(
                context,
                draw_region,
                vk::BufferUsageFlags::INDIRECT_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )?);
        }

        let index_bytes = (QUAD_INDICES.len() * std::mem::size_of::<u16>()) as vk::DeviceSize;
        let index_buffer = Buffer::host_visible(context, index_bytes, vk::BufferUsageFlags::INDEX_BUFFER)?;
        index_buffer.write(0, &QUAD_INDICES)?;

        let command_pool = CommandPool::new(device.clone(), context.families().transfer)?;
        let command_buffers = command_pool.allocate_command_buffers(frames as u32)?;

        // Every frame starts with zeroed draw counts.
        let dirty = vec![
            DirtyRanges { vertices: Vec::new(), draws: vec![(0, DRAW_COUNT_BYTES)] };
            frames
        ];

        log::debug!(
            "Model buffers: {} models, {} bytes of vertices, {} bytes of draws per frame",
            total_models,
            vertex_region,
            draw_region
        );

        Ok(Self {
            ready: TimelineSemaphore::new(device.clone(), "model buffer copies")?,
            device,
            queue: context.device.transfer_queue,
            timeout_ms,
            vertex_region,
            frame_values: vec![0; frames],
            dirty,
            command_buffers,
            staging,
            vertex_buffers,
            draw_buffers,
            index_buffer,
            command_pool,
        })
    }

    /// Drain the pools' queued uploads into staging and mark them dirty for every frame
    pub fn stage(&mut self, pools: &mut [ModelPool]) -> VulkanResult<()> {
        if !pools.iter().any(ModelPool::has_pending_uploads) {
            return Ok(());
        }
        // A transfer still reading staging must finish before it is overwritten.
        self.ready.wait_latest(self.timeout_ms)?;

        for (pool_index, pool) in pools.iter_mut().enumerate() {
            for upload in pool.take_uploads() {
                self.stage_upload(pool_index, pool, upload)?;
            }
        }
        Ok(())
    }

    fn stage_upload(&mut self, pool_index: usize, pool: &ModelPool, upload: PoolUpload) -> VulkanResult<()> {
        match upload {
            PoolUpload::Vertices(model) => {
                let vertices = pool.vertices(model).ok_or_else(|| VulkanError::InvalidOperation {
                    reason: format!("{:?} pool has no model {}", pool.kind(), model),
                })?;
                let offset = vertex_offset(pool.first_model() + model);
                self.staging.write(offset, vertices.as_slice())?;
                let size = VERTICES_PER_QUAD as vk::DeviceSize * VERTEX_BYTES;
                for dirty in &mut self.dirty {
                    dirty.push_vertices(offset, size);
                }
            }
            PoolUpload::AllDrawInfos => {
                let count = pool.active_count() as u32;
                let count_offset = draw_count_offset(pool_index);
                self.staging.write(self.vertex_region + count_offset, &[count])?;
                let offset = draw_info_offset(pool.first_model());
                self.staging.write(self.vertex_region + offset, pool.draw_infos())?;
                let size = pool.active_count() as vk::DeviceSize * DRAW_INFO_BYTES;
                for dirty in &mut self.dirty {
                    dirty.push_draws(count_offset, 4);
                    dirty.push_draws(offset, size);
                }
            }
            PoolUpload::DrawInfo(position) => {
                let Some(record) = pool.draw_infos().get(position) else {
                    // Superseded by a later unload; the full re-upload covers it.
                    return Ok(());
                };
                let offset = draw_info_offset(pool.first_model() + position);
                self.staging.write(self.vertex_region + offset, std::slice::from_ref(record))?;
                for dirty in &mut self.dirty {
                    dirty.push_draws(offset, DRAW_INFO_BYTES);
                }
            }
        }
        Ok(())
    }

    /// Copy this frame slot's dirty ranges; returns the timeline value that
    /// marks this frame's buffers as current
    pub fn flush(&mut self, frame: usize) -> VulkanResult<u64> {
        let Some(dirty) = self.dirty.get(frame) else {
            return Err(VulkanError::InvalidOperation { reason: format!("Frame slot {} out of range", frame) });
        };
        if dirty.is_empty() {
            return Ok(self.frame_values[frame]);
        }
        let dirty = std::mem::take(&mut self.dirty[frame]);
        self.copy_ranges(frame, &dirty).map_err(|e| {
            // Retry the same ranges with the next frame that uses this slot.
            self.dirty[frame].absorb(dirty);
            e
        })
    }

    fn copy_ranges(&mut self, frame: usize, dirty: &DirtyRanges) -> VulkanResult<u64> {
        self.ready.wait(self.frame_values[frame], self.timeout_ms)?;
        let cmd = self.command_buffers[frame];
        let vertex_copies: Vec<vk::BufferCopy> = dirty
            .vertices
            .iter()
            .map(|&(offset, size)| vk::BufferCopy { src_offset: offset, dst_offset: offset, size })
            .collect();
        let draw_copies: Vec<vk::BufferCopy> = dirty
            .draws
            .iter()
            .map(|&(offset, size)| vk::BufferCopy { src_offset: self.vertex_region + offset, dst_offset: offset, size })
            .collect();

        begin_recording(&self.device, cmd)?;
        unsafe {
            if !vertex_copies.is_empty() {
                self.device.cmd_copy_buffer(cmd, self.staging.handle(), self.vertex_buffers[frame].handle(), &vertex_copies);
            }
            if !draw_copies.is_empty() {
                self.device.cmd_copy_buffer(cmd, self.staging.handle(), self.draw_buffers[frame].handle(), &draw_copies);
            }
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
        log::trace!(
            "Frame {}: {} vertex and {} draw copies (value {})",
            frame,
            vertex_copies.len(),
            draw_copies.len(),
            value
        );
        Ok(value)
    }

    /// Timeline signalled by completed copies
    pub const fn ready_semaphore(&self) -> &TimelineSemaphore {
        &self.ready
    }

    /// Vertex buffer of a frame slot
    pub fn vertex_buffer(&self, frame: usize) -> Option<&Buffer> {
        self.vertex_buffers.get(frame)
    }

    /// Draw buffer of a frame slot
    pub fn draw_buffer(&self, frame: usize) -> Option<&Buffer> {
        self.draw_buffers.get(frame)
    }

    /// Shared quad index buffer
    pub const fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_layout_offsets() {
        assert_eq!(draw_count_offset(0), 0);
        assert_eq!(draw_count_offset(2), 8);
        assert_eq!(draw_info_offset(0), 16);
        assert_eq!(draw_info_offset(256), 16 + 256 * 32);
    }

    #[test]
    fn test_vertex_offset_per_model() {
        assert_eq!(vertex_offset(0), 0);
        assert_eq!(vertex_offset(3), 3 * 4 * 32);
    }

    #[test]
    fn test_dirty_ranges_skip_duplicates_and_empty() {
        let mut dirty = DirtyRanges::default();
        assert!(dirty.is_empty());
        dirty.push_draws(16, 32);
        dirty.push_draws(16, 32);
        dirty.push_draws(48, 0);
        dirty.push_vertices(0, 128);
        assert_eq!(dirty.draws, vec![(16, 32)]);
        assert_eq!(dirty.vertices, vec![(0, 128)]);
        assert!(!dirty.is_empty());
    }

    #[test]
    fn test_unflushed_ranges_survive_a_failed_copy() {
        let mut taken = DirtyRanges::default();
        taken.push_vertices(0, 128);
        taken.push_draws(16, 32);
        let mut pending = DirtyRanges::default();
        pending.push_draws(16, 32);
        pending.push_draws(80, 32);
        pending.absorb(taken);
        assert_eq!(pending.vertices, vec![(0, 128)]);
        assert_eq!(pending.draws, vec![(16, 32), (80, 32)]);
    }
}
