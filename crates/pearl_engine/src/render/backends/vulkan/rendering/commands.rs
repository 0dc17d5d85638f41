//! Command buffer management

use ash::{vk, Device};

use crate::render::backends::vulkan::{Fence, VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Allocate exactly one primary command buffer
    pub fn allocate_one(&self) -> VulkanResult<vk::CommandBuffer> {
        self.allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| VulkanError::InvalidOperation { reason: "No command buffer allocated".to_string() })
    }

    /// Record commands into a temporary buffer, submit them and wait
    pub fn submit_once<F>(&self, queue: vk::Queue, timeout_ms: u64, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        let command_buffer = self.allocate_one()?;
        let result = self.record_and_wait(queue, command_buffer, timeout_ms, record);
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }
        result
    }

    fn record_and_wait<F>(&self, queue: vk::Queue, command_buffer: vk::CommandBuffer, timeout_ms: u64, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        begin_recording(&self.device, command_buffer)?;
        record(&self.device, command_buffer);
        end_recording(&self.device, command_buffer)?;

        let fence = Fence::new(self.device.clone(), false)?;
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            self.device.queue_submit(queue, &[submit.build()], fence.handle())
                .map_err(VulkanError::Api)?;
        }
        fence.wait("one-time submission", timeout_ms)
    }

    /// Get the command pool handle
    pub const fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Reset and begin a one-time-submit recording
pub fn begin_recording(device: &Device, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .map_err(VulkanError::Api)?;
        device.begin_command_buffer(command_buffer, &begin_info)
            .map_err(VulkanError::Api)
    }
}

/// Finish a recording
pub fn end_recording(device: &Device, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
    unsafe {
        device.end_command_buffer(command_buffer)
            .map_err(VulkanError::Api)
    }
}
