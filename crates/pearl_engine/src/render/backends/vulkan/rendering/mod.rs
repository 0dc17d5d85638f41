//! Command recording, pipelines and presentation

pub mod commands;
pub mod pipeline;
pub mod swapchain;

pub use commands::{begin_recording, end_recording, CommandPool};
pub use pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout, ShaderModule};
pub use swapchain::{AcquiredImage, Swapchain};
