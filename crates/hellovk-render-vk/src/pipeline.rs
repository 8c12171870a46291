// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptor-set layout and the fixed graphics pipeline.
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use hellovk_render::{AssetSource, RendererConfig};
use tracing::{debug, info};

/// SPIR-V words for both stages. Kept so the pipeline can be rebuilt on a
/// format change without touching the asset source again.
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn from_bytes(vertex: &[u8], fragment: &[u8]) -> Result<Self> {
        let vertex = read_spv(&mut Cursor::new(vertex)).context("vertex shader is not SPIR-V")?;
        let fragment =
            read_spv(&mut Cursor::new(fragment)).context("fragment shader is not SPIR-V")?;
        Ok(Self { vertex, fragment })
    }

    /// A missing shader is fatal.
    pub fn load(assets: &dyn AssetSource, cfg: &RendererConfig) -> Result<Self> {
        let vs = assets
            .read(&cfg.vertex_shader)
            .with_context(|| format!("load {}", cfg.vertex_shader))?;
        let fs = assets
            .read(&cfg.fragment_shader)
            .with_context(|| format!("load {}", cfg.fragment_shader))?;
        Self::from_bytes(&vs, &fs)
    }
}

pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Orders our color writes after the presentation engine is done reading the image.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// binding 0: mvp uniform (vertex), binding 1: texture (fragment).
pub fn descriptor_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ]
}

pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        line_width: 1.0,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        ..Default::default()
    }
}

pub fn dynamic_states() -> [vk::DynamicState; 2] {
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_att = color_attachment(format);
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    let dependency = external_dependency();

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.context("create_render_pass")
}

unsafe fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = descriptor_bindings();
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&ci, None) }
        .context("create_descriptor_set_layout")
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.context("create_shader_module")
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    shaders: &ShaderSet,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    // --- Shader modules (destroyed before return) ---
    let vs = unsafe { create_shader_module(device, &shaders.vertex) }?;
    let fs = match unsafe { create_shader_module(device, &shaders.fragment) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // --- Fixed-function state ---
    // Positions and UVs are generated in the vertex shader.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };
    let dyn_states = dynamic_states();
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = rasterization_state();
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    // --- Pipeline layout: set 0 = mvp + texture ---
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
        Ok(l) => l,
        Err(e) => {
            unsafe {
                device.destroy_shader_module(vs, None);
                device.destroy_shader_module(fs, None);
            }
            return Err(e).context("create_pipeline_layout");
        }
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: std::ptr::null(),
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_handle: vk::Pipeline::null(),
        base_pipeline_index: -1,
        ..Default::default()
    };

    // --- Create pipeline; shader modules go either way ---
    let created = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    match created {
        Ok(p) => Ok((layout, p[0])),
        Err((_, err)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(anyhow!("create_graphics_pipelines failed: {err:?}"))
        }
    }
}

/// Render pass, set layout, pipeline layout and pipeline for one color format.
pub struct PipelineState {
    pub format: vk::Format,
    pub render_pass: vk::RenderPass,
    pub set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineState {
    pub unsafe fn build(device: &ash::Device, format: vk::Format, shaders: &ShaderSet) -> Result<Self> {
        let render_pass = unsafe { create_render_pass(device, format) }?;
        let set_layout = unsafe { create_set_layout(device) }?;
        let (layout, pipeline) = unsafe { create_pipeline(device, render_pass, set_layout, shaders) }?;
        info!("graphics pipeline ready (fmt {format:?})");
        Ok(Self {
            format,
            render_pass,
            set_layout,
            layout,
            pipeline,
        })
    }

    /// The render pass is tied to the attachment format; the set layout is not.
    pub unsafe fn rebuild_for_format(
        &mut self,
        device: &ash::Device,
        format: vk::Format,
        shaders: &ShaderSet,
    ) -> Result<()> {
        unsafe {
            self.destroy_pipeline_objects(device);
            self.render_pass = create_render_pass(device, format)?;
            let (layout, pipeline) =
                create_pipeline(device, self.render_pass, self.set_layout, shaders)?;
            self.layout = layout;
            self.pipeline = pipeline;
        }
        debug!("pipeline rebuilt: {:?} -> {:?}", self.format, format);
        self.format = format;
        Ok(())
    }

    /// Pipeline, then pipeline layout, then render pass.
    pub unsafe fn destroy_pipeline_objects(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
    }

    pub unsafe fn destroy_set_layout(&mut self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_set_layout(self.set_layout, None) };
        self.set_layout = vk::DescriptorSetLayout::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spv_words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn color_attachment_clears_and_ends_presentable() {
        let a = color_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(a.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn dependency_waits_on_color_output_from_external() {
        let d = external_dependency();
        assert_eq!(d.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(d.dst_subpass, 0);
        assert_eq!(d.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(d.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(d.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn bindings_match_shader_interface() {
        let [ubo, tex] = descriptor_bindings();
        assert_eq!((ubo.binding, ubo.descriptor_type), (0, vk::DescriptorType::UNIFORM_BUFFER));
        assert_eq!(ubo.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            (tex.binding, tex.descriptor_type),
            (1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        );
        assert_eq!(tex.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn raster_culls_back_faces_wound_clockwise() {
        let r = rasterization_state();
        assert_eq!(r.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(r.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(r.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(dynamic_states(), [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
    }

    #[test]
    fn shader_bytes_must_be_spirv() {
        let ok = spv_words(&[0x0723_0203, 0x0001_0000, 0, 1, 0]);
        let set = ShaderSet::from_bytes(&ok, &ok).unwrap();
        assert_eq!(set.vertex.len(), 5);
        // not a multiple of four bytes
        assert!(ShaderSet::from_bytes(&ok[..7], &ok).is_err());
    }
}
