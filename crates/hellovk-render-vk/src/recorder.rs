// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;

/// What one frame's command buffer draws into.
pub struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub clear: [f32; 4],
}

/// Covers the whole identity extent; not flipped.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

// STRICT PER-FRAME ORDER:
// begin -> render pass -> viewport/scissor -> pipeline -> set -> draw(3) -> end pass -> end
pub unsafe fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &RecordTarget,
) -> Result<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    unsafe { device.begin_command_buffer(cmd, &begin) }.context("begin_command_buffer")?;

    let clears = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: target.clear,
        },
    }];
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        render_area: full_scissor(target.extent),
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };

    unsafe {
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        device.cmd_set_viewport(cmd, 0, &[full_viewport(target.extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(target.extent)]);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            target.layout,
            0,
            &[target.descriptor_set],
            &[],
        );
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd).context("end_command_buffer")?;
    }
    Ok(())
}
