//! Vulkan swapchain management
//!
//! Handles swapchain creation, recreation, and management following RAII principles

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Image handed out by [`Swapchain::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Swapchain image index
    pub index: u32,
    /// The swapchain still works but no longer matches the surface
    pub suboptimal: bool,
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain
    pub fn new(context: &VulkanContext, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(&context.instance.instance, context.raw());
        let mut this = Self {
            device: context.raw().clone(),
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: window_extent,
        };
        this.build(context, window_extent)?;
        Ok(this)
    }

    /// Recreate the swapchain with new window dimensions
    ///
    /// The caller must make sure no submitted work still uses the old images.
    pub fn recreate(&mut self, context: &VulkanContext, window_extent: vk::Extent2D) -> VulkanResult<()> {
        self.destroy_views();
        self.build(context, window_extent)
    }

    fn build(&mut self, context: &VulkanContext, window_extent: vk::Extent2D) -> VulkanResult<()> {
        let surface = &context.surface;
        let physical_device = context.physical.device;

        let surface_caps = unsafe {
            surface.loader
                .get_physical_device_surface_capabilities(physical_device, surface.surface)
                .map_err(VulkanError::Api)?
        };

        let surface_formats = unsafe {
            surface.loader
                .get_physical_device_surface_formats(physical_device, surface.surface)
                .map_err(VulkanError::Api)?
        };
        let format = surface_formats
            .iter()
            .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;

        let present_modes = unsafe {
            surface.loader
                .get_physical_device_surface_present_modes(physical_device, surface.surface)
                .map_err(VulkanError::Api)?
        };
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: window_extent.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: window_extent.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 {
            image_count = image_count.min(surface_caps.max_image_count);
        }

        let families = context.families();
        let present_families = [families.graphics, families.present];
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);
        let create_info = if families.graphics == families.present {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&present_families)
        };

        let swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;

        self.images = unsafe {
            self.loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe {
                self.device.create_image_view(&create_info, None)
                    .map_err(VulkanError::Api)?
            };
            self.image_views.push(view);
        }

        log::info!(
            "Swapchain ready: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            present_mode
        );
        Ok(())
    }

    /// Acquire the next image; `None` means the swapchain is out of date
    pub fn acquire(&self, signal: vk::Semaphore, timeout_ms: u64) -> VulkanResult<Option<AcquiredImage>> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                timeout_ms.saturating_mul(1_000_000),
                signal,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Some(AcquiredImage { index, suboptimal })),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Err(VulkanError::Timeout { what: "swapchain image", timeout_ms })
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Present `index`; returns true when the swapchain should be recreated
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, index: u32) -> VulkanResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Surface format
    pub const fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
