//! Shader modules and pipelines
//!
//! Graphics pipelines use dynamic rendering, so they carry the color format
//! they draw into instead of a render pass.

use std::ffi::CStr;
use std::path::Path;

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::model_pool::Vertex;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
            .map_err(|e| VulkanError::Shader(format!("Invalid SPIR-V: {}", e)))?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe {
            device.create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Load a compiled shader from disk
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| VulkanError::Shader(format!("Failed to read {}: {}", path.display(), e)))?;
        log::debug!("Loaded shader {}", path.display());
        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub const fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout from descriptor set layouts and push constant ranges
    pub fn new(
        device: Device,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        let layout = unsafe {
            device.create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, layout })
    }

    /// Layout handle
    pub const fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline drawing pooled quads
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Alpha-blended quad pipeline; `LINE` polygon mode draws wireframes
    pub fn quads(
        device: Device,
        layout: &PipelineLayout,
        vertex: &ShaderModule,
        fragment: &ShaderModule,
        color_format: vk::Format,
        polygon_mode: vk::PolygonMode,
    ) -> VulkanResult<Self> {
        let stages = [
            vertex.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            vk::VertexInputAttributeDescription { location: 0, binding: 0, format: vk::Format::R32G32_SFLOAT, offset: 0 },
            vk::VertexInputAttributeDescription { location: 1, binding: 0, format: vk::Format::R32G32_SFLOAT, offset: 8 },
            vk::VertexInputAttributeDescription { location: 2, binding: 0, format: vk::Format::R32G32B32A32_SFLOAT, offset: 16 },
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(polygon_mode)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering = vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering);

        let pipeline = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        let pipeline = pipeline.into_iter().next().ok_or_else(|| {
            VulkanError::InitializationFailed("Graphics pipeline creation returned nothing".to_string())
        })?;

        Ok(Self { device, pipeline })
    }

    /// Pipeline handle
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Compute pipeline wrapper with RAII cleanup
pub struct ComputePipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl ComputePipeline {
    /// Create a compute pipeline from one shader module
    pub fn new(device: Device, layout: &PipelineLayout, shader: &ShaderModule) -> VulkanResult<Self> {
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(shader.stage_info(vk::ShaderStageFlags::COMPUTE))
            .layout(layout.handle());

        let pipeline = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        let pipeline = pipeline.into_iter().next().ok_or_else(|| {
            VulkanError::InitializationFailed("Compute pipeline creation returned nothing".to_string())
        })?;

        Ok(Self { device, pipeline })
    }

    /// Pipeline handle
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}
