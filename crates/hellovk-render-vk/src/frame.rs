// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight: the per-slot GPU objects and the loop that drives them.
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use hellovk_math::SpinAngle;
use tracing::debug;

use crate::context::DeviceContext;
use crate::memory::BufferAlloc;
use crate::texture::TextureResource;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub mvp: [[f32; 4]; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A suboptimal image is still drawn.
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing drawn: the surface is zero-sized and recreation is still pending.
    Skipped,
    /// Swapchain rebuilt mid-frame; nothing presented.
    Recreated,
}

/// The GPU-facing half of a frame. `FrameLoop` decides the order; implementors
/// only perform each step.
pub trait FrameTarget {
    /// Blocks until the slot's previous submission has finished.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn write_uniforms(&mut self, slot: usize, spin_degrees: f32) -> Result<()>;
    /// Resets the slot's fence and command buffer, then records the draw.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    /// Returns `false` when the surface cannot be drawn to yet (zero extent).
    fn recreate_swapchain(&mut self) -> Result<bool>;
}

pub struct FrameLoop {
    current: usize,
    slots: [SlotState; MAX_FRAMES_IN_FLIGHT],
    recreate_pending: bool,
    spin: SpinAngle,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            current: 0,
            slots: [SlotState::Idle; MAX_FRAMES_IN_FLIGHT],
            recreate_pending: false,
            spin: SpinAngle::default(),
        }
    }

    #[cfg(test)]
    fn current_slot(&self) -> usize {
        self.current
    }

    #[cfg(test)]
    fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    #[cfg(test)]
    fn submitted(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| **s == SlotState::Submitted)
            .count()
    }

    pub fn request_recreate(&mut self) {
        self.recreate_pending = true;
    }

    #[cfg(test)]
    fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    // STRICT PER-FRAME ORDER:
    // 0) pending recreation (from a suboptimal present or the host)
    // 1) wait the slot fence; the only unconditional CPU block
    // 2) acquire (out of date -> recreate, no draw)
    // 3) uniforms, 4) record, 5) submit, 6) present
    // 7) advance the ring
    pub fn render_frame<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<FrameStatus> {
        if self.recreate_pending {
            if !target.recreate_swapchain()? {
                return Ok(FrameStatus::Skipped);
            }
            self.recreate_pending = false;
        }

        let slot = self.current;
        debug_assert_ne!(self.slots[slot], SlotState::Recording);
        target.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Idle;

        let image_index = match target.acquire_image(slot)? {
            AcquireOutcome::OutOfDate => {
                debug!("acquire: out of date");
                self.recreate_now(target)?;
                return Ok(FrameStatus::Recreated);
            }
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!("acquire: suboptimal, drawing anyway");
                }
                image_index
            }
        };

        let angle = self.spin.advance();
        target.write_uniforms(slot, angle)?;

        self.slots[slot] = SlotState::Recording;
        target.record(slot, image_index)?;
        target.submit(slot)?;
        self.slots[slot] = SlotState::Submitted;

        let status = match target.present(slot, image_index)? {
            PresentOutcome::Presented => FrameStatus::Presented,
            PresentOutcome::Suboptimal => {
                debug!("present: suboptimal, recreating next frame");
                self.recreate_pending = true;
                FrameStatus::Presented
            }
            PresentOutcome::OutOfDate => {
                debug!("present: out of date");
                self.recreate_now(target)?;
                FrameStatus::Recreated
            }
        };

        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(status)
    }

    fn recreate_now<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<()> {
        self.recreate_pending = !target.recreate_swapchain()?;
        Ok(())
    }
}

/// `N` of each descriptor type; a set needs one of both.
pub fn descriptor_pool_sizes(n: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: n,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: n,
        },
    ]
}

/// GPU objects exclusively owned by one ring slot.
pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub set: vk::DescriptorSet,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub struct FrameResources {
    pub pool: vk::DescriptorPool,
    pub slots: Vec<FrameSlot>,
    /// `uniforms[i]` backs `slots[i].set` binding 0.
    pub uniforms: Vec<BufferAlloc>,
}

impl FrameResources {
    pub unsafe fn create(
        ctx: &DeviceContext,
        cmd_pool: vk::CommandPool,
        set_layout: vk::DescriptorSetLayout,
        texture: &TextureResource,
    ) -> Result<Self> {
        let device = &ctx.device;
        let n = MAX_FRAMES_IN_FLIGHT as u32;
        let ubo_size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;

        // 1) Command buffers
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: n,
            ..Default::default()
        };
        let cmds = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")?;

        // 2) Uniform buffers
        let mut uniforms = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            uniforms.push(unsafe {
                BufferAlloc::host_visible(
                    device,
                    &ctx.mem_props,
                    ubo_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
            }?);
        }

        // 3) Pool + sets
        let pool_sizes = descriptor_pool_sizes(n);
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: n * 2,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .context("create_descriptor_pool")?;

        let layouts = vec![set_layout; MAX_FRAMES_IN_FLIGHT];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: n,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { device.allocate_descriptor_sets(&alloc) }
            .context("allocate_descriptor_sets")?;

        // 4) Write both bindings once; they never change afterwards
        let image_info = vk::DescriptorImageInfo {
            sampler: texture.sampler,
            image_view: texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        for (set, ubo) in sets.iter().zip(&uniforms) {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: ubo.buffer,
                offset: 0,
                range: ubo_size,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 0,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 1,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                },
            ];
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }

        // 5) Sync; fences start signalled so the first wait returns at once
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for (cmd, set) in cmds.into_iter().zip(sets) {
            let slot = unsafe {
                FrameSlot {
                    cmd,
                    set,
                    image_available: device
                        .create_semaphore(&sem_ci, None)
                        .context("create_semaphore")?,
                    render_finished: device
                        .create_semaphore(&sem_ci, None)
                        .context("create_semaphore")?,
                    in_flight: device.create_fence(&fence_ci, None).context("create_fence")?,
                }
            };
            slots.push(slot);
        }

        debug!("{} frame slots ready", slots.len());
        Ok(Self {
            pool,
            slots,
            uniforms,
        })
    }

    pub unsafe fn destroy_descriptor_pool(&mut self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
        self.pool = vk::DescriptorPool::null();
    }

    pub unsafe fn destroy_uniforms(&mut self, device: &ash::Device) {
        for ubo in self.uniforms.drain(..) {
            unsafe { ubo.destroy(device) };
        }
    }

    /// Semaphores and fences. Command buffers go with their pool.
    pub unsafe fn destroy_sync(&mut self, device: &ash::Device) {
        for slot in self.slots.drain(..) {
            unsafe {
                device.destroy_semaphore(slot.image_available, None);
                device.destroy_semaphore(slot.render_finished, None);
                device.destroy_fence(slot.in_flight, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};

    use anyhow::bail;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Uniforms(usize, f32),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
    }

    /// Scripted GPU: fences complete when waited on, swapchain generations count
    /// recreations.
    #[derive(Default)]
    struct Scripted {
        calls: Vec<Call>,
        acquire: VecDeque<AcquireOutcome>,
        present: VecDeque<PresentOutcome>,
        recreate_ok: VecDeque<bool>,
        in_flight: HashSet<usize>,
        max_in_flight: usize,
        generation: u32,
        recorded_with: Vec<u32>,
        next_image: u32,
    }

    impl FrameTarget for Scripted {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            self.in_flight.remove(&slot);
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Ok(self.acquire.pop_front().unwrap_or(AcquireOutcome::Ready {
                image_index,
                suboptimal: false,
            }))
        }

        fn write_uniforms(&mut self, slot: usize, spin_degrees: f32) -> Result<()> {
            self.calls.push(Call::Uniforms(slot, spin_degrees));
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            if self.in_flight.contains(&slot) {
                bail!("slot {slot} recorded while its fence is unsignalled");
            }
            self.calls.push(Call::Record(slot, image_index));
            self.recorded_with.push(self.generation);
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            self.in_flight.insert(slot);
            self.max_in_flight = self.max_in_flight.max(self.in_flight.len());
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self) -> Result<bool> {
            self.calls.push(Call::Recreate);
            let ok = self.recreate_ok.pop_front().unwrap_or(true);
            if ok {
                // device idle: every fence is signalled
                self.in_flight.clear();
                self.generation += 1;
            }
            Ok(ok)
        }
    }

    fn frame_calls(gpu: &mut Scripted, lp: &mut FrameLoop) -> (FrameStatus, Vec<Call>) {
        let before = gpu.calls.len();
        let status = lp.render_frame(gpu).unwrap();
        (status, gpu.calls[before..].to_vec())
    }

    #[test]
    fn steady_state_follows_strict_order() {
        let mut gpu = Scripted::default();
        let mut lp = FrameLoop::new();
        let (status, calls) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Uniforms(0, 1.0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(lp.current_slot(), 1);
        assert_eq!(lp.slot_state(0), SlotState::Submitted);
    }

    #[test]
    fn ring_never_exceeds_depth() {
        let mut gpu = Scripted::default();
        let mut lp = FrameLoop::new();
        for _ in 0..7 {
            lp.render_frame(&mut gpu).unwrap();
            assert!(lp.submitted() <= MAX_FRAMES_IN_FLIGHT);
        }
        assert!(gpu.max_in_flight <= MAX_FRAMES_IN_FLIGHT);
        let waits: Vec<_> = gpu
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![0, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn slot_is_recorded_only_after_its_wait() {
        let mut gpu = Scripted::default();
        let mut lp = FrameLoop::new();
        for _ in 0..5 {
            lp.render_frame(&mut gpu).unwrap();
        }
        let mut waited = [false; MAX_FRAMES_IN_FLIGHT];
        for call in &gpu.calls {
            match call {
                Call::Wait(s) => waited[*s] = true,
                Call::Record(s, _) => assert!(waited[*s], "slot {s} recorded without a wait"),
                Call::Submit(s) => waited[*s] = false,
                _ => {}
            }
        }
    }

    #[test]
    fn out_of_date_acquire_recreates_without_drawing() {
        let mut gpu = Scripted::default();
        gpu.acquire.push_back(AcquireOutcome::OutOfDate);
        let mut lp = FrameLoop::new();

        let (status, calls) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(status, FrameStatus::Recreated);
        assert_eq!(calls, vec![Call::Wait(0), Call::Acquire(0), Call::Recreate]);
        // same slot is retried, nothing was submitted from it
        assert_eq!(lp.current_slot(), 0);
        assert_eq!(lp.submitted(), 0);

        let (status, calls) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(status, FrameStatus::Presented);
        assert!(calls.iter().any(|c| matches!(c, Call::Present(0, _))));
        // every recording happened against the rebuilt swapchain
        assert_eq!(gpu.recorded_with, vec![1]);
    }

    #[test]
    fn suboptimal_present_defers_recreation_to_next_frame() {
        let mut gpu = Scripted::default();
        gpu.present.push_back(PresentOutcome::Suboptimal);
        let mut lp = FrameLoop::new();

        let (status, calls) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(status, FrameStatus::Presented);
        assert!(!calls.contains(&Call::Recreate));
        assert!(lp.recreate_pending());

        let (_, calls) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(calls[0], Call::Recreate);
        assert_eq!(calls[1], Call::Wait(1));
        assert!(!lp.recreate_pending());
    }

    #[test]
    fn out_of_date_present_recreates_immediately_and_advances() {
        let mut gpu = Scripted::default();
        gpu.present.push_back(PresentOutcome::OutOfDate);
        let mut lp = FrameLoop::new();

        let (status, calls) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(status, FrameStatus::Recreated);
        assert_eq!(calls.last(), Some(&Call::Recreate));
        assert_eq!(lp.current_slot(), 1);
        assert!(!lp.recreate_pending());
    }

    #[test]
    fn zero_sized_surface_keeps_recreation_pending() {
        let mut gpu = Scripted::default();
        gpu.recreate_ok.extend([false, false, true]);
        let mut lp = FrameLoop::new();
        lp.request_recreate();

        for _ in 0..2 {
            let (status, calls) = frame_calls(&mut gpu, &mut lp);
            assert_eq!(status, FrameStatus::Skipped);
            assert_eq!(calls, vec![Call::Recreate]);
            assert!(lp.recreate_pending());
        }
        let (status, _) = frame_calls(&mut gpu, &mut lp);
        assert_eq!(status, FrameStatus::Presented);
        assert!(!lp.recreate_pending());
    }

    #[test]
    fn spin_advances_only_on_drawn_frames() {
        let mut gpu = Scripted::default();
        gpu.acquire.extend([
            AcquireOutcome::Ready {
                image_index: 0,
                suboptimal: false,
            },
            AcquireOutcome::OutOfDate,
            AcquireOutcome::Ready {
                image_index: 1,
                suboptimal: true,
            },
        ]);
        let mut lp = FrameLoop::new();
        for _ in 0..3 {
            lp.render_frame(&mut gpu).unwrap();
        }
        let angles: Vec<f32> = gpu
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Uniforms(_, a) => Some(*a),
                _ => None,
            })
            .collect();
        assert_eq!(angles, vec![1.0, 2.0]);
    }

    #[test]
    fn pool_holds_one_of_each_descriptor_per_slot() {
        let sizes = descriptor_pool_sizes(MAX_FRAMES_IN_FLIGHT as u32);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert!(sizes.iter().all(|s| s.descriptor_count == 2));
    }

    #[test]
    fn uniform_block_is_one_mat4() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 64);
    }
}
