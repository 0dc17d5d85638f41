//! GPU resources: buffers, images and descriptors

pub mod buffer;
pub mod image;
pub mod descriptors;

pub use buffer::{find_memory_type, Buffer};
pub use image::{color_layers, color_range, GpuImage, GpuTexture, LayoutTransition, TEXTURE_FORMAT};
pub use descriptors::{binding, write_buffer, write_images, DescriptorPool, DescriptorSetLayout, Sampler};
