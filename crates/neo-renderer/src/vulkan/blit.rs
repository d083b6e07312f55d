//! Offscreen-to-display blit pipeline.
//!
//! A textured triangle fan with no vertex buffers: the four vertices travel
//! as push constants and the source texture is a combined image sampler in
//! set 0.

use ash::vk;

use crate::device::BlitQuad;
use crate::RenderError;

// ============================================================================
// SPIR-V bytecode (compiled at build time by glslc)
// ============================================================================

macro_rules! spv {
    ($name:expr) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/spirv/", $name))
    };
}

const BLIT_VERT_SPV: &[u8] = spv!("blit.vert.spv");
const BLIT_FRAG_SPV: &[u8] = spv!("blit.frag.spv");

/// Bytes of push constant data: four vertices of five floats.
pub const BLIT_PUSH_CONSTANT_SIZE: u32 = 4 * 5 * 4;

/// Decode SPIR-V bytecode into words.
pub fn spirv_words(name: &str, bytes: &[u8]) -> Result<Vec<u32>, RenderError> {
    if bytes.is_empty() {
        return Err(RenderError::ShaderCompilation(format!(
            "{} was not compiled (glslc unavailable at build time)",
            name
        )));
    }
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|e| RenderError::ShaderCompilation(format!("{}: {}", name, e)))
}

/// Push constant payload for `quad`.
pub fn push_constant_bytes(quad: &BlitQuad) -> &[u8] {
    bytemuck::cast_slice(&quad.vertices)
}

/// # Safety
/// `device` must be live.
pub unsafe fn create_descriptor_set_layout(
    device: &ash::Device,
) -> Result<vk::DescriptorSetLayout, RenderError> {
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    Ok(device.create_descriptor_set_layout(&info, None)?)
}

unsafe fn create_shader_module(
    device: &ash::Device,
    name: &str,
    spirv: &[u8],
) -> Result<vk::ShaderModule, RenderError> {
    let code = spirv_words(name, spirv)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    Ok(device.create_shader_module(&create_info, None)?)
}

/// Vulkan pipeline wrapper for the blit.
pub struct BlitPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl BlitPipeline {
    /// # Safety
    /// `device` must be live and `set_layout` created on it.
    pub unsafe fn new(
        device: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
    ) -> Result<Self, RenderError> {
        let vert_module = create_shader_module(device, "blit.vert", BLIT_VERT_SPV)?;
        let frag_module = match create_shader_module(device, "blit.frag", BLIT_FRAG_SPV) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_shader_module(vert_module, None);
                return Err(e);
            }
        };

        let result = Self::create(device, set_layout, color_format, vert_module, frag_module);

        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
        result
    }

    unsafe fn create(
        device: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
    ) -> Result<Self, RenderError> {
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(BLIT_PUSH_CONSTANT_SIZE)];
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout = device.create_pipeline_layout(&layout_info, None)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_FAN)
            .primitive_restart_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // blend, scissor and depth are all off for the blit
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        match device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) {
            Ok(pipelines) => Ok(Self { pipeline: pipelines[0], layout }),
            Err((_, e)) => {
                device.destroy_pipeline_layout(layout, None);
                log::error!("blit pipeline creation failed: {:?}", e);
                Err(RenderError::ShaderCompilation(format!("blit pipeline: {:?}", e)))
            }
        }
    }

    /// # Safety
    /// The GPU must be done with the pipeline.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlitVertex;

    #[test]
    fn test_empty_spirv_reports_missing_compiler() {
        let err = spirv_words("blit.vert", &[]).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilation(ref m) if m.contains("glslc")));
    }

    #[test]
    fn test_misaligned_spirv_is_rejected() {
        assert!(spirv_words("blit.frag", &[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn test_push_constants_match_shader_layout() {
        let quad = BlitQuad {
            vertices: [
                BlitVertex { position: [-1.0, -1.0, 0.0], texcoord: [0.0, 0.0] },
                BlitVertex { position: [-1.0, 1.0, 0.0], texcoord: [0.0, 0.5] },
                BlitVertex { position: [1.0, 1.0, 0.0], texcoord: [0.75, 0.5] },
                BlitVertex { position: [1.0, -1.0, 0.0], texcoord: [0.75, 0.0] },
            ],
        };
        let bytes = push_constant_bytes(&quad);
        assert_eq!(bytes.len() as u32, BLIT_PUSH_CONSTANT_SIZE);

        let floats: &[f32] = bytemuck::cast_slice(bytes);
        // vertex 2: xyz then st
        assert_eq!(&floats[10..15], &[1.0, 1.0, 0.0, 0.75, 0.5]);
    }
}
