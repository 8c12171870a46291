// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: brings up a device for a native window, builds the textured
//! triangle pipeline and drives frames in flight across swapchain rebuilds.
#![deny(unsafe_op_in_unsafe_fn)]
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use hellovk_math::prerotation_matrix;
use hellovk_render::{AssetSource, ImageDecoder, NativeWindow, Renderer, RendererConfig};
use tracing::{debug, info};

pub mod context;
pub mod debug;
pub mod frame;
pub mod memory;
pub mod pipeline;
pub mod probe;
pub mod recorder;
pub mod swapchain;
pub mod texture;

use context::DeviceContext;
use frame::{
    AcquireOutcome, FrameLoop, FrameResources, FrameStatus, FrameTarget, PresentOutcome,
    UniformBufferObject,
};
use pipeline::{PipelineState, ShaderSet};
use probe::query_surface_support;
use recorder::{record_frame, RecordTarget};
use swapchain::{plan_swapchain, Swapchain};
use texture::{load_pixels, TextureResource};

pub use frame::MAX_FRAMES_IN_FLIGHT;

/// Everything that exists once a window has been bound.
struct RendererState {
    ctx: DeviceContext,
    window: Arc<dyn NativeWindow>,
    assets: Arc<dyn AssetSource>,
    swapchain: Swapchain,
    shaders: ShaderSet,
    pipeline: PipelineState,
    cmd_pool: vk::CommandPool,
    texture: TextureResource,
    frames: FrameResources,
    clear: [f32; 4],
}

impl RendererState {
    // STRICT ORDER:
    // device context -> swapchain + views -> render pass / set layout / pipeline
    // -> framebuffers -> command pool -> texture -> uniforms, sets, sync
    unsafe fn new(
        cfg: &RendererConfig,
        decoder: &dyn ImageDecoder,
        window: Arc<dyn NativeWindow>,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Self> {
        let ctx = unsafe { DeviceContext::new(window.as_ref(), cfg.enable_validation) }?;

        // --- Swapchain ---
        let support =
            unsafe { query_surface_support(&ctx.surface_loader, ctx.phys, ctx.surface) }?;
        let plan = plan_swapchain(&support, ctx.families, window.inner_size())?;
        let mut swapchain = if plan.is_drawable() {
            unsafe { Swapchain::create(&ctx.device, &ctx.swapchain_loader, ctx.surface, &plan) }?
        } else {
            debug!("surface is 0x0 at init, swapchain deferred");
            Swapchain::deferred(&plan)
        };

        // --- Pipeline ---
        let shaders = ShaderSet::load(assets.as_ref(), cfg)?;
        let pipeline = unsafe { PipelineState::build(&ctx.device, swapchain.format, &shaders) }?;
        if swapchain.is_built() {
            unsafe { swapchain.create_framebuffers(&ctx.device, pipeline.render_pass) }?;
        }

        // --- Commands ---
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let cmd_pool = unsafe { ctx.device.create_command_pool(&pool_info, None) }
            .context("create_command_pool")?;

        // --- Texture + per-frame resources ---
        let pixels = load_pixels(assets.as_ref(), decoder, &cfg.texture);
        let texture = unsafe { TextureResource::upload(&ctx, cmd_pool, &pixels) }?;
        let frames =
            unsafe { FrameResources::create(&ctx, cmd_pool, pipeline.set_layout, &texture) }?;

        info!(
            "Vulkan swapchain ready ({}x{}, fmt {:?}, {} images)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.images.len()
        );

        Ok(Self {
            ctx,
            window,
            assets,
            swapchain,
            shaders,
            pipeline,
            cmd_pool,
            texture,
            frames,
            clear: cfg.clear_color,
        })
    }

    /// Points the renderer at a new window. The old swapchain is torn down here;
    /// the caller schedules the rebuild.
    unsafe fn rebind(
        &mut self,
        window: Arc<dyn NativeWindow>,
        assets: Arc<dyn AssetSource>,
    ) -> Result<()> {
        let ctx = &mut self.ctx;
        unsafe {
            ctx.device.device_wait_idle().context("device_wait_idle")?;
            self.swapchain.destroy(&ctx.device, &ctx.swapchain_loader);
            ctx.replace_surface(window.as_ref())?;
        }
        self.window = window;
        self.assets = assets;
        info!("window rebound");
        Ok(())
    }

    /// Teardown in reverse dependency order. Consumes the state so it can only run once.
    unsafe fn destroy(mut self) {
        let device = &self.ctx.device;
        unsafe {
            // 1) QUIESCE
            device.device_wait_idle().ok();

            // 2) SWAPCHAIN: framebuffers, views, swapchain
            self.swapchain.destroy(device, &self.ctx.swapchain_loader);

            // 3) DESCRIPTORS
            self.frames.destroy_descriptor_pool(device);
            self.pipeline.destroy_set_layout(device);

            // 4) TEXTURE HANDLES, THEN BUFFER + IMAGE MEMORY
            self.texture.destroy_handles(device);
            self.frames.destroy_uniforms(device);
            self.texture.free_memory(device);

            // 5) SYNC, THEN COMMAND POOL (frees its buffers)
            self.frames.destroy_sync(device);
            device.destroy_command_pool(self.cmd_pool, None);

            // 6) PIPELINE, LAYOUT, RENDER PASS
            self.pipeline.destroy_pipeline_objects(device);

            // 7) DEVICE, DEBUG MESSENGER, SURFACE, INSTANCE
            self.ctx.destroy();
        }
        debug!("renderer torn down");
    }
}

impl FrameTarget for RendererState {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames.slots[slot].in_flight;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("wait_for_fences(in-flight)")
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let sem = self.frames.slots[slot].image_available;
        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                sem,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("acquire_next_image"),
        }
    }

    fn write_uniforms(&mut self, slot: usize, spin_degrees: f32) -> Result<()> {
        let mvp = prerotation_matrix(
            self.swapchain.rotation(),
            self.swapchain.aspect_ratio(),
            spin_degrees,
        );
        let ubo = UniformBufferObject {
            mvp: mvp.to_cols_array_2d(),
        };
        unsafe {
            self.frames.uniforms[slot].write(&self.ctx.device, std::slice::from_ref(&ubo))
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = &self.ctx.device;
        let fs = &self.frames.slots[slot];
        let framebuffer = *self
            .swapchain
            .framebuffers
            .get(image_index as usize)
            .context("acquired image has no framebuffer")?;
        let target = RecordTarget {
            render_pass: self.pipeline.render_pass,
            framebuffer,
            extent: self.swapchain.extent,
            pipeline: self.pipeline.pipeline,
            layout: self.pipeline.layout,
            descriptor_set: fs.set,
            clear: self.clear,
        };
        unsafe {
            // Only reset once we know this frame will be submitted.
            device.reset_fences(&[fs.in_flight]).context("reset_fences")?;
            device
                .reset_command_buffer(fs.cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")?;
            record_frame(device, fs.cmd, &target)
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let fs = &self.frames.slots[slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &fs.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &fs.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &fs.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&submit),
                fs.in_flight,
            )
        }
        .context("queue_submit")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let fs = &self.frames.slots[slot];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &fs.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).context("queue_present"),
        }
    }

    // STRICT ORDER (recreate):
    // 1) fresh support snapshot; bail out early while the surface is zero-sized
    // 2) device_wait_idle()
    // 3) framebuffers -> views -> swapchain
    // 4) new swapchain + views
    // 5) pipeline ONLY if the color format changed
    // 6) framebuffers
    fn recreate_swapchain(&mut self) -> Result<bool> {
        let ctx = &self.ctx;
        let support =
            unsafe { query_surface_support(&ctx.surface_loader, ctx.phys, ctx.surface) }?;
        let plan = plan_swapchain(&support, ctx.families, self.window.inner_size())?;
        if !plan.is_drawable() {
            debug!("surface is 0x0, deferring swapchain rebuild");
            return Ok(false);
        }

        unsafe {
            ctx.device.device_wait_idle().context("device_wait_idle")?;
            self.swapchain.destroy(&ctx.device, &ctx.swapchain_loader);
            self.swapchain =
                Swapchain::create(&ctx.device, &ctx.swapchain_loader, ctx.surface, &plan)?;
            if self.swapchain.format != self.pipeline.format {
                self.pipeline
                    .rebuild_for_format(&ctx.device, self.swapchain.format, &self.shaders)?;
            }
            self.swapchain
                .create_framebuffers(&ctx.device, self.pipeline.render_pass)?;
        }

        info!(
            "swapchain recreated ({}x{}, {:?})",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            self.swapchain.rotation()
        );
        Ok(true)
    }
}

/// A swapchain deferred at init (minimized window) is built by the first
/// drawable recreation.
fn needs_first_build(swapchain: &Swapchain) -> bool {
    !swapchain.is_built()
}

pub struct VkRenderer {
    cfg: RendererConfig,
    decoder: Box<dyn ImageDecoder>,
    state: Option<RendererState>,
    frames: FrameLoop,
}

impl VkRenderer {
    /// Cheap: no Vulkan call happens until the first `bind_window`.
    pub fn new(cfg: RendererConfig, decoder: Box<dyn ImageDecoder>) -> Self {
        Self {
            cfg,
            decoder,
            state: None,
            frames: FrameLoop::new(),
        }
    }

    #[cfg(test)]
    fn config(&self) -> &RendererConfig {
        &self.cfg
    }

    #[cfg(test)]
    fn assets(&self) -> Option<&Arc<dyn AssetSource>> {
        self.state.as_ref().map(|s| &s.assets)
    }

    /// Releases every GPU object. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(state) = self.state.take() {
            unsafe { state.destroy() };
        }
        self.frames = FrameLoop::new();
    }
}

impl Renderer for VkRenderer {
    fn bind_window(
        &mut self,
        window: Arc<dyn NativeWindow>,
        assets: Arc<dyn AssetSource>,
    ) -> Result<()> {
        match self.state.as_mut() {
            Some(state) => {
                unsafe { state.rebind(window, assets) }?;
                self.frames.request_recreate();
            }
            None => {
                let state =
                    unsafe { RendererState::new(&self.cfg, self.decoder.as_ref(), window, assets) }?;
                if needs_first_build(&state.swapchain) {
                    self.frames.request_recreate();
                }
                self.state = Some(state);
            }
        }
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if self.frames.render_frame(state)? == FrameStatus::Skipped {
            debug!("frame skipped");
        }
        Ok(())
    }

    fn surface_changed(&mut self) {
        self.frames.request_recreate();
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.cfg.clear_color = rgba;
        if let Some(state) = self.state.as_mut() {
            state.clear = rgba;
        }
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.teardown();
    }
}
