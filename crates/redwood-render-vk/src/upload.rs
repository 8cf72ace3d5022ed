// SPDX-License-Identifier: CEPL-1.0
//! Blocking host -> device-local copies through a staging buffer.
//!
//! Meant for load-time data. Each call records a one-time command buffer,
//! submits it to the graphics queue and waits for the queue to drain.
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RenderError, Result, VkResultExt};

const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Buffer and its backing allocation, freed together.
struct RawBuffer {
    ctx: Arc<DeviceContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl RawBuffer {
    fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let device = ctx.device();
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = device
                .create_buffer(&bci, None)
                .call("vkCreateBuffer")?;
            let mut raw = RawBuffer {
                ctx: ctx.clone(),
                buffer,
                memory: vk::DeviceMemory::null(),
                size,
            };

            let req = device.get_buffer_memory_requirements(buffer);
            let mai = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index: ctx.find_memory_type(req.memory_type_bits, props)?,
                ..Default::default()
            };
            raw.memory = device
                .allocate_memory(&mai, None)
                .call("vkAllocateMemory")?;
            device
                .bind_buffer_memory(buffer, raw.memory, 0)
                .call("vkBindBufferMemory")?;
            Ok(raw)
        }
    }

    /// Host-visible buffers only.
    fn write(&self, bytes: &[u8]) -> Result<()> {
        let device = self.ctx.device();
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .call("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Host-visible buffers only.
    fn read(&self) -> Result<Vec<u8>> {
        let device = self.ctx.device();
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .call("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
            device.unmap_memory(self.memory);
        }
        Ok(out)
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
            }
        }
    }
}

/// Device-local buffer. Freed exactly once, when dropped.
pub struct GpuBuffer {
    raw: RawBuffer,
    usage: vk::BufferUsageFlags,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.raw.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Debug path: copies the device contents back into host memory.
    pub fn read_back(&self, uploader: &Uploader) -> Result<Vec<u8>> {
        let staging = RawBuffer::new(
            &uploader.ctx,
            self.size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            HOST_MEMORY,
        )?;
        uploader.copy(self.raw.buffer, staging.buffer, self.size())?;
        staging.read()
    }
}

/// Device-local buffers also get these so uploads and read-backs can target them.
pub fn device_usage(usage: vk::BufferUsageFlags) -> vk::BufferUsageFlags {
    usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC
}

/// Frees the one-time command buffer on every exit path.
struct OneTimeCmd<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}

impl Drop for OneTimeCmd<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .free_command_buffers(self.pool, std::slice::from_ref(&self.cmd))
        };
    }
}

pub struct Uploader {
    ctx: Arc<DeviceContext>,
    pool: vk::CommandPool,
}

impl Uploader {
    pub fn new(ctx: Arc<DeviceContext>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queue_families().graphics,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = unsafe { ctx.device().create_command_pool(&pool_info, None) }
            .call("vkCreateCommandPool")?;
        Ok(Self { ctx, pool })
    }

    /// Staging copy into a new device-local buffer. Blocks until the copy is done.
    pub fn upload(&self, bytes: &[u8], usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
        if bytes.is_empty() {
            return Err(RenderError::EmptyUpload);
        }
        let size = bytes.len() as vk::DeviceSize;

        let staging = RawBuffer::new(
            &self.ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_MEMORY,
        )?;
        staging.write(bytes)?;

        let dst = RawBuffer::new(
            &self.ctx,
            size,
            device_usage(usage),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.copy(staging.buffer, dst.buffer, size)?;
        // Copy has completed, the staging buffer can go.
        drop(staging);

        debug!("uploaded {} bytes ({:?})", size, usage);
        Ok(GpuBuffer { raw: dst, usage })
    }

    fn copy(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        let device = self.ctx.device();
        let queue = self.ctx.graphics_queue();
        unsafe {
            let ai = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: self.pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let bufs = device
                .allocate_command_buffers(&ai)
                .call("vkAllocateCommandBuffers")?;
            let one = OneTimeCmd {
                device,
                pool: self.pool,
                cmd: bufs[0],
            };

            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(one.cmd, &bi)
                .call("vkBeginCommandBuffer")?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            device.cmd_copy_buffer(one.cmd, src, dst, std::slice::from_ref(&region));
            device
                .end_command_buffer(one.cmd)
                .call("vkEndCommandBuffer")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &one.cmd,
                ..Default::default()
            };
            device
                .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
                .call("vkQueueSubmit")?;
            device.queue_wait_idle(queue).call("vkQueueWaitIdle")?;
        }
        Ok(())
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_command_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_buffers_are_copy_targets_and_sources() {
        let u = device_usage(vk::BufferUsageFlags::VERTEX_BUFFER);
        assert!(u.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(u.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(u.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(!u.contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    fn host_memory_is_visible_and_coherent() {
        assert!(HOST_MEMORY.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_MEMORY.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(!HOST_MEMORY.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}
