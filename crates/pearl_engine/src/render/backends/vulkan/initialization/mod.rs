//! Instance, device and queue setup

pub mod context;

pub use context::{LogicalDevice, PhysicalDeviceInfo, QueueFamilies, Surface, VulkanContext, VulkanInstance};
