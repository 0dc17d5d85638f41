//! Vulkan backend
//!
//! RAII wrappers over the Vulkan objects the renderer uses, the two compute
//! stages (tile stitching and model matrices), the per-frame model buffers
//! and the frame orchestrator tying them together.

pub mod window;
pub mod initialization;
pub mod state;
pub mod resources;
pub mod rendering;
pub mod stages;
pub mod model_buffers;
pub mod frame;

pub use window::{Key, Window, WindowError};
pub use initialization::{VulkanContext, QueueFamilies};
pub use state::{Fence, Semaphore, TimelineSemaphore};
pub use resources::{Buffer, GpuImage, GpuTexture};
pub use rendering::{CommandPool, Swapchain, ShaderModule};
pub use stages::{MatrixPushConstants, MatrixStage, TileStitchStage};
pub use model_buffers::ModelBuffers;
pub use frame::{FrameInput, FrameOrchestrator, FrameStatus, PoolDraw, MAX_TEXTURES};

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {result:?} ({raw})", result = .0, raw = .0.as_raw())]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A CPU wait on the GPU ran out of time
    #[error("Timed out after {timeout_ms} ms waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: &'static str,
        /// Configured limit
        timeout_ms: u64,
    },

    /// A shader module could not be loaded
    #[error("Shader error: {0}")]
    Shader(String),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),
}

impl VulkanError {
    /// Whether the device or window can no longer be used
    pub const fn is_device_failure(&self) -> bool {
        match self {
            Self::Api(result) => matches!(
                *result,
                vk::Result::ERROR_DEVICE_LOST
                    | vk::Result::ERROR_SURFACE_LOST_KHR
                    | vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_INITIALIZATION_FAILED
            ),
            Self::Timeout { .. } | Self::InitializationFailed(_) | Self::Window(_) => true,
            Self::NoSuitableMemoryType | Self::InvalidOperation { .. } | Self::Shader(_) => false,
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_failures() {
        assert!(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).is_device_failure());
        assert!(VulkanError::Timeout { what: "frame in flight", timeout_ms: 5000 }.is_device_failure());
        assert!(!VulkanError::Api(vk::Result::ERROR_FORMAT_NOT_SUPPORTED).is_device_failure());
        assert!(!VulkanError::InvalidOperation { reason: "slot".to_string() }.is_device_failure());
    }
}
