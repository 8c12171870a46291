// SPDX-License-Identifier: CEPL-1.0
//! The sampled texture: decode, staged upload with layout transitions, view, sampler.
use anyhow::{bail, Context, Result};
use ash::vk;
use hellovk_render::{AssetSource, DecodedImage, ImageDecoder};
use tracing::{info, warn};

use crate::context::DeviceContext;
use crate::memory::{find_memory_type, BufferAlloc};
use crate::swapchain::color_subresource_range;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Bound when the texture asset is missing or undecodable.
pub const FALLBACK_TEXEL: [u8; 4] = [255, 0, 255, 255];

/// Reads and decodes `path`; any failure is logged and replaced by a 1x1 fallback.
pub fn load_pixels(
    assets: &dyn AssetSource,
    decoder: &dyn ImageDecoder,
    path: &str,
) -> DecodedImage {
    let bytes = match assets.read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!("texture {path}: {e}; using fallback");
            return DecodedImage::solid(FALLBACK_TEXEL);
        }
    };
    match decoder.decode_rgba(&bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("texture {path}: {e}; using fallback");
            DecodedImage::solid(FALLBACK_TEXEL)
        }
    }
}

pub fn staging_size(img: &DecodedImage) -> vk::DeviceSize {
    img.width as vk::DeviceSize * img.height as vk::DeviceSize * 4
}

pub fn copy_region(width: u32, height: u32) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width,
            height,
            depth: 1,
        },
    }
}

pub struct LayoutTransition {
    pub barrier: vk::ImageMemoryBarrier<'static>,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Only the two transitions the upload needs are supported.
pub fn layout_transition(
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<LayoutTransition> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => bail!("unsupported layout transition {old:?} -> {new:?}"),
    };
    Ok(LayoutTransition {
        barrier: vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: src_access,
            dst_access_mask: dst_access,
            old_layout: old,
            new_layout: new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: color_subresource_range(),
            ..Default::default()
        },
        src_stage,
        dst_stage,
    })
}

pub fn sampler_info() -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::FALSE,
        max_anisotropy: 16.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        mip_lod_bias: 0.0,
        min_lod: 0.0,
        max_lod: vk::LOD_CLAMP_NONE,
        ..Default::default()
    }
}

/// Records into a throwaway command buffer, submits it and blocks until the
/// queue is idle.
pub unsafe fn submit_one_shot(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
) -> Result<()> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = unsafe { device.allocate_command_buffers(&ai) }
        .context("allocate_command_buffers(one-shot)")?[0];

    let run = || -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { device.begin_command_buffer(cmd, &bi) }.context("begin_command_buffer")?;
        record(cmd)?;
        unsafe { device.end_command_buffer(cmd) }.context("end_command_buffer")?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        unsafe {
            device
                .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
                .context("queue_submit(one-shot)")?;
            device.queue_wait_idle(queue).context("queue_wait_idle")?;
        }
        Ok(())
    };
    let result = run();
    unsafe { device.free_command_buffers(pool, std::slice::from_ref(&cmd)) };
    result
}

pub struct TextureResource {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl TextureResource {
    // STRICT ORDER:
    // 1) staging buffer filled from the host
    // 2) device-local image + memory
    // 3) UNDEFINED -> TRANSFER_DST, copy, TRANSFER_DST -> SHADER_READ_ONLY
    // 4) wait, drop staging
    // 5) view + sampler
    pub unsafe fn upload(
        ctx: &DeviceContext,
        cmd_pool: vk::CommandPool,
        pixels: &DecodedImage,
    ) -> Result<Self> {
        let device = &ctx.device;

        // --- Staging ---
        let staging = unsafe {
            BufferAlloc::host_visible(
                device,
                &ctx.mem_props,
                staging_size(pixels),
                vk::BufferUsageFlags::TRANSFER_SRC,
            )
        }?;
        unsafe { staging.write(device, &pixels.pixels) }?;

        // --- Image ---
        let image_info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: TEXTURE_FORMAT,
            extent: vk::Extent3D {
                width: pixels.width,
                height: pixels.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { device.create_image(&image_info, None) }.context("create_image")?;
        let req = unsafe { device.get_image_memory_requirements(image) };
        let mem_type = find_memory_type(
            &ctx.mem_props,
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let memory =
            unsafe { device.allocate_memory(&mai, None) }.context("allocate_memory(texture)")?;
        unsafe { device.bind_image_memory(image, memory, 0) }.context("bind_image_memory")?;

        // --- Transfer ---
        let to_dst = layout_transition(
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let to_read = layout_transition(
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        let region = copy_region(pixels.width, pixels.height);
        let uploaded = unsafe {
            submit_one_shot(device, cmd_pool, ctx.graphics_queue, |cmd| {
                device.cmd_pipeline_barrier(
                    cmd,
                    to_dst.src_stage,
                    to_dst.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&to_dst.barrier),
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    to_read.src_stage,
                    to_read.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&to_read.barrier),
                );
                Ok(())
            })
        };
        unsafe { staging.destroy(device) };
        uploaded?;

        // --- View + sampler ---
        let view_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: TEXTURE_FORMAT,
            subresource_range: color_subresource_range(),
            ..Default::default()
        };
        let view = unsafe { device.create_image_view(&view_info, None) }
            .context("create_image_view(texture)")?;
        let sampler =
            unsafe { device.create_sampler(&sampler_info(), None) }.context("create_sampler")?;

        info!("texture uploaded ({}x{})", pixels.width, pixels.height);
        Ok(Self {
            image,
            memory,
            view,
            sampler,
        })
    }

    /// Sampler, view, image. Memory is released separately by `free_memory`.
    pub unsafe fn destroy_handles(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
        self.sampler = vk::Sampler::null();
        self.view = vk::ImageView::null();
        self.image = vk::Image::null();
    }

    pub unsafe fn free_memory(self, device: &ash::Device) {
        unsafe { device.free_memory(self.memory, None) };
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hellovk_render::{AssetError, DecodeError};

    use super::*;

    struct MapAssets(HashMap<&'static str, Vec<u8>>);

    impl AssetSource for MapAssets {
        fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| AssetError::NotFound(path.to_owned()))
        }
    }

    /// Treats the bytes as a square RGBA image.
    struct RawDecoder;

    impl ImageDecoder for RawDecoder {
        fn decode_rgba(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
            let side = ((bytes.len() / 4) as f64).sqrt() as u32;
            DecodedImage::new(side, side, bytes.to_vec())
        }
    }

    fn assets_with(path: &'static str, bytes: Vec<u8>) -> MapAssets {
        MapAssets(HashMap::from([(path, bytes)]))
    }

    #[test]
    fn missing_texture_falls_back() {
        let img = load_pixels(&MapAssets(HashMap::new()), &RawDecoder, "texture.png");
        assert_eq!(img, DecodedImage::solid(FALLBACK_TEXEL));
    }

    #[test]
    fn undecodable_texture_falls_back() {
        let assets = assets_with("texture.png", vec![1, 2, 3]);
        let img = load_pixels(&assets, &RawDecoder, "texture.png");
        assert_eq!((img.width, img.height), (1, 1));
        assert_eq!(img.texel(0, 0), Some(FALLBACK_TEXEL));
    }

    #[test]
    fn decoded_texture_is_passed_through() {
        let assets = assets_with("texture.png", vec![9; 16]);
        let img = load_pixels(&assets, &RawDecoder, "texture.png");
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(staging_size(&img), 16);
    }

    #[test]
    fn upload_transitions_chain_correctly() {
        let img = vk::Image::null();
        let first = layout_transition(
            img,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        let second = layout_transition(
            img,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();

        assert_eq!(first.barrier.src_access_mask, vk::AccessFlags::empty());
        assert_eq!(first.barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(first.dst_stage, vk::PipelineStageFlags::TRANSFER);
        // the second barrier picks up where the first left off
        assert_eq!(second.barrier.old_layout, first.barrier.new_layout);
        assert_eq!(second.barrier.src_access_mask, first.barrier.dst_access_mask);
        assert_eq!(second.src_stage, first.dst_stage);
        assert_eq!(second.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(second.barrier.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(
            second.barrier.src_queue_family_index,
            vk::QUEUE_FAMILY_IGNORED
        );
    }

    #[test]
    fn other_transitions_are_rejected() {
        assert!(layout_transition(
            vk::Image::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .is_err());
    }

    #[test]
    fn copy_covers_whole_image() {
        let r = copy_region(64, 32);
        assert_eq!(r.image_extent.width, 64);
        assert_eq!(r.image_extent.height, 32);
        assert_eq!(r.image_extent.depth, 1);
        assert_eq!(r.buffer_row_length, 0);
        assert_eq!(r.image_subresource.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn sampler_is_linear_repeat_without_anisotropy() {
        let s = sampler_info();
        assert_eq!(s.mag_filter, vk::Filter::LINEAR);
        assert_eq!(s.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(s.anisotropy_enable, vk::FALSE);
        assert_eq!(s.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(s.max_lod, vk::LOD_CLAMP_NONE);
    }
}
