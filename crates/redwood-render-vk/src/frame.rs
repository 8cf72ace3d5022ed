// SPDX-License-Identifier: CEPL-1.0
//! Per-frame acquire -> record -> submit -> present loop.
//!
//! [`FramePacer`] is the bookkeeping half (slot index, which slots are in
//! flight, deferred rebuilds, pause) and touches no GPU state, so the cycle
//! can be tested on its own. [`FrameExecutor`] owns the command buffers and
//! sync objects and drives the pacer from the real fences.
use std::sync::Arc;

use ash::vk;
use redwood_render::{DrawList, RenderSize};
use tracing::{debug, info, warn};

use crate::device::DeviceContext;
use crate::error::{RenderError, Result, VkResultExt};
use crate::mesh::{GpuMesh, MeshStore};
use crate::pipeline::PipelineCache;
use crate::swapchain::{Acquire, Swapchain};

pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The swapchain was rebuilt instead of drawing.
    Rebuilt,
    /// Window or surface has a zero-sized area.
    Paused,
    /// Acquire reported the surface stale; a rebuild is queued.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image: u32 },
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStep {
    Rebuild(RenderSize),
    Paused,
    Record { slot: usize },
}

#[derive(Debug)]
pub struct FramePacer {
    slot: usize,
    // Mirrors the slot fences: true from submit until the fence wait returns.
    in_flight: [bool; FRAMES_IN_FLIGHT],
    rebuild: bool,
    size: RenderSize,
    submitted: u64,
}

impl FramePacer {
    pub fn new(size: RenderSize) -> Self {
        Self {
            slot: 0,
            in_flight: [false; FRAMES_IN_FLIGHT],
            rebuild: false,
            size,
            submitted: 0,
        }
    }

    pub fn current_slot(&self) -> usize {
        self.slot
    }
    pub fn size(&self) -> RenderSize {
        self.size
    }
    pub fn is_paused(&self) -> bool {
        self.size.is_empty()
    }
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild
    }
    pub fn is_in_flight(&self, slot: usize) -> bool {
        self.in_flight[slot]
    }
    pub fn submitted_frames(&self) -> u64 {
        self.submitted
    }

    /// Only records the new size. The rebuild itself happens at the top of the next frame.
    pub fn resize(&mut self, size: RenderSize) {
        if size == self.size && !self.rebuild {
            return;
        }
        match (self.size.is_empty(), size.is_empty()) {
            (false, true) => info!("resize to {}x{}: paused", size.width, size.height),
            (true, false) => info!("resize to {}x{}: resumed", size.width, size.height),
            _ => debug!("resize to {}x{}", size.width, size.height),
        }
        self.size = size;
        self.rebuild = true;
    }

    pub fn request_rebuild(&mut self) {
        self.rebuild = true;
    }

    /// The current slot's fence has been waited on.
    pub fn retire_current(&mut self) {
        self.in_flight[self.slot] = false;
    }

    pub fn begin(&mut self) -> Result<FrameStep> {
        if self.is_paused() {
            return Ok(FrameStep::Paused);
        }
        if self.in_flight[self.slot] {
            return Err(RenderError::SlotBusy { slot: self.slot });
        }
        if self.rebuild {
            self.rebuild = false;
            return Ok(FrameStep::Rebuild(self.size));
        }
        Ok(FrameStep::Record { slot: self.slot })
    }

    /// Marks the current slot in flight and moves to the next one.
    pub fn submitted(&mut self) {
        self.in_flight[self.slot] = true;
        self.slot = (self.slot + 1) % FRAMES_IN_FLIGHT;
        self.submitted += 1;
    }
}

/// True when `next` differs from what is currently bound, updating `bound`.
fn needs_bind<P: PartialEq + Copy>(bound: &mut Option<P>, next: P) -> bool {
    if *bound == Some(next) {
        false
    } else {
        *bound = Some(next);
        true
    }
}

#[derive(Clone, Copy, Default)]
struct FrameSlot {
    cmd: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

pub struct FrameExecutor {
    slots: Vec<FrameSlot>,
    pool: vk::CommandPool,
    pacer: FramePacer,
    clear_color: [f32; 4],
    ctx: Arc<DeviceContext>,
}

impl FrameExecutor {
    pub fn new(ctx: Arc<DeviceContext>, size: RenderSize, clear_color: [f32; 4]) -> Result<Self> {
        let device = ctx.device();
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queue_families().graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .call("vkCreateCommandPool")?;

        let mut exec = FrameExecutor {
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            pool,
            pacer: FramePacer::new(size),
            clear_color,
            ctx: ctx.clone(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: FRAMES_IN_FLIGHT as u32,
            ..Default::default()
        };
        let cmds = unsafe { device.allocate_command_buffers(&alloc_info) }
            .call("vkAllocateCommandBuffers")?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for cmd in cmds {
            exec.slots.push(FrameSlot {
                cmd,
                ..Default::default()
            });
            let slot = exec.slots.len() - 1;
            unsafe {
                exec.slots[slot].image_available = device
                    .create_semaphore(&sem_ci, None)
                    .call("vkCreateSemaphore")?;
                exec.slots[slot].render_finished = device
                    .create_semaphore(&sem_ci, None)
                    .call("vkCreateSemaphore")?;
                exec.slots[slot].in_flight = device
                    .create_fence(&fence_ci, None)
                    .call("vkCreateFence")?;
            }
        }
        Ok(exec)
    }

    pub fn resize(&mut self, size: RenderSize) {
        self.pacer.resize(size);
    }

    pub fn request_rebuild(&mut self) {
        self.pacer.request_rebuild();
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait slot fence            (bounds work in flight to FRAMES_IN_FLIGHT)
    // 2) pending rebuild? rebuild and skip the frame
    // 3) acquire (signals image_available)
    // 4) reset fence, re-record the slot's command buffer
    // 5) submit (waits image_available, signals render_finished + fence)
    // 6) present (waits render_finished), advance slot
    // The fence is reset only after a successful acquire so a stale surface
    // never leaves it unsignaled.
    pub fn draw_frame(
        &mut self,
        swapchain: &mut Swapchain,
        pipelines: &PipelineCache,
        meshes: &MeshStore,
        draws: &DrawList,
    ) -> Result<FrameOutcome> {
        if self.pacer.is_paused() {
            return Ok(FrameOutcome::Skipped(SkipReason::Paused));
        }
        let device = self.ctx.device();
        let slot_idx = self.pacer.current_slot();
        let slot = self.slots[slot_idx];

        unsafe { device.wait_for_fences(&[slot.in_flight], true, u64::MAX) }
            .call("vkWaitForFences")?;
        self.pacer.retire_current();

        match self.pacer.begin()? {
            FrameStep::Record { .. } => {}
            FrameStep::Paused => return Ok(FrameOutcome::Skipped(SkipReason::Paused)),
            FrameStep::Rebuild(size) => {
                if swapchain.rebuild(size)? {
                    return Ok(FrameOutcome::Skipped(SkipReason::Rebuilt));
                }
                self.pacer.request_rebuild();
                return Ok(FrameOutcome::Skipped(SkipReason::Paused));
            }
        }

        // Resolve every draw before any GPU state changes.
        let resolved = resolve_draws(pipelines, meshes, draws)?;

        let (image, suboptimal) = match swapchain.acquire(slot.image_available)? {
            Acquire::Image { index, suboptimal } => (index, suboptimal),
            Acquire::OutOfDate => {
                debug!("acquire: surface out of date");
                self.pacer.request_rebuild();
                return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
            }
        };
        let framebuffer = swapchain.framebuffer(image)?;

        unsafe {
            device
                .reset_fences(&[slot.in_flight])
                .call("vkResetFences")?;
            device
                .reset_command_buffer(slot.cmd, vk::CommandBufferResetFlags::empty())
                .call("vkResetCommandBuffer")?;
            self.record(slot.cmd, swapchain, framebuffer, &resolved)?;

            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &slot.image_available,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &slot.cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &slot.render_finished,
                ..Default::default()
            };
            device
                .queue_submit(
                    self.ctx.graphics_queue(),
                    std::slice::from_ref(&submit),
                    slot.in_flight,
                )
                .call("vkQueueSubmit")?;
        }
        self.pacer.submitted();

        let stale = swapchain.present(image, slot.render_finished)?;
        if stale || suboptimal {
            debug!("present: surface suboptimal or out of date, rebuilding next frame");
            self.pacer.request_rebuild();
        }
        Ok(FrameOutcome::Presented {
            slot: slot_idx,
            image,
        })
    }

    unsafe fn record(
        &self,
        cmd: vk::CommandBuffer,
        swapchain: &Swapchain,
        framebuffer: vk::Framebuffer,
        draws: &[(vk::Pipeline, &GpuMesh)],
    ) -> Result<()> {
        let device = self.ctx.device();
        let extent = swapchain.extent();

        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &bi)
            .call("vkBeginCommandBuffer")?;

        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: swapchain.render_pass().handle(),
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: 1,
            p_clear_values: &clear,
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
        device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));

        let mut bound = None;
        for &(pipeline, mesh) in draws {
            if needs_bind(&mut bound, pipeline) {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
            device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, mesh.indices.handle(), 0, mesh.index_type);
            device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
        }

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd).call("vkEndCommandBuffer")?;
        Ok(())
    }
}

fn resolve_draws<'m>(
    pipelines: &PipelineCache,
    meshes: &'m MeshStore,
    draws: &DrawList,
) -> Result<Vec<(vk::Pipeline, &'m GpuMesh)>> {
    draws
        .iter()
        .map(|d| -> Result<_> {
            let pipeline = pipelines
                .get(d.shader)
                .ok_or(RenderError::UnknownShader(d.shader))?;
            Ok((pipeline, meshes.get(d.mesh)?))
        })
        .collect()
}

impl Drop for FrameExecutor {
    fn drop(&mut self) {
        // STRICT ORDER: GPU idle, sync objects, then command buffers with their pool.
        if let Err(e) = self.ctx.wait_idle() {
            warn!("frame teardown: {e}");
        }
        let device = self.ctx.device();
        unsafe {
            for s in &self.slots {
                device.destroy_semaphore(s.image_available, None);
                device.destroy_semaphore(s.render_finished, None);
                device.destroy_fence(s.in_flight, None);
            }
            let cmds: Vec<_> = self.slots.iter().map(|s| s.cmd).collect();
            if !cmds.is_empty() {
                device.free_command_buffers(self.pool, &cmds);
            }
            device.destroy_command_pool(self.pool, None);
        }
    }
}
