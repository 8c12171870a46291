// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::Pod;

/// Index of the first memory type allowed by `type_bits` that has all of `req`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    for (i, ty) in props.memory_types[..count].iter().enumerate() {
        if type_bits & (1 << i) != 0 && ty.property_flags.contains(req) {
            return Ok(i as u32);
        }
    }
    bail!("failed to find suitable memory type (bits {type_bits:#b}, flags {req:?})")
}

/// A buffer together with its dedicated allocation.
#[derive(Debug)]
pub struct BufferAlloc {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl BufferAlloc {
    pub unsafe fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { device.create_buffer(&bci, None) }.context("create_buffer")?;
        let req = unsafe { device.get_buffer_memory_requirements(buffer) };
        let mem_type = match find_memory_type(mem_props, req.memory_type_bits, props) {
            Ok(t) => t,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let memory = unsafe { device.allocate_memory(&mai, None) }.context("allocate_memory")?;
        unsafe { device.bind_buffer_memory(buffer, memory, 0) }.context("bind_buffer_memory")?;
        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Host-visible + coherent buffer, written through `write`.
    pub unsafe fn host_visible(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        unsafe {
            Self::new(
                device,
                mem_props,
                size,
                usage,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
        }
    }

    /// Map, copy, unmap. Memory must be host visible and coherent.
    pub unsafe fn write<T: Pod>(&self, device: &ash::Device, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            bail!(
                "write of {} bytes exceeds buffer of {} bytes",
                bytes.len(),
                self.size
            );
        }
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}
