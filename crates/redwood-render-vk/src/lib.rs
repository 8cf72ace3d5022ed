// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device context, swapchain, pipeline cache, frame loop and uploads.
use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use redwood_render::{DrawList, Mesh, MeshHandle, RenderSize, Renderer, Shader, ShaderSource};
use tracing::{info, warn};

mod debug;
mod device;
mod error;
mod frame;
mod memory;
mod mesh;
mod pipeline;
mod select;
#[cfg(feature = "embedded-shaders")]
mod shaders;
mod swapchain;
mod upload;

pub use debug::{resolve_validation, ValidationPolicy, VALIDATION_LAYER};
pub use device::DeviceContext;
pub use error::{RenderError, Result};
pub use frame::{FrameExecutor, FrameOutcome, FramePacer, FrameStep, SkipReason, FRAMES_IN_FLIGHT};
pub use memory::find_memory_type;
pub use mesh::{GpuMesh, MeshStore};
pub use pipeline::{PipelineCache, PipelineTable, RenderPass};
pub use select::{
    find_queue_families, select_physical_device, DeviceCandidate, QueueFamilyIndices,
    QueueFamilySupport, Suitability, REQUIRED_DEVICE_EXTENSIONS,
};
#[cfg(feature = "embedded-shaders")]
pub use shaders::EmbeddedShaders;
pub use swapchain::{
    choose_extent, choose_present_mode, choose_settings, choose_surface_format, extent_is_empty,
    image_count, Acquire, PresentModePreference, Swapchain, SwapchainSettings, SwapchainSupport,
};
pub use upload::{GpuBuffer, Uploader};

#[derive(Clone, Copy, Debug)]
pub struct VkConfig {
    pub validation: ValidationPolicy,
    pub present_mode: PresentModePreference,
    pub clear_color: [f32; 4],
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            validation: ValidationPolicy::Auto,
            present_mode: PresentModePreference::Mailbox,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

pub struct VkRenderer {
    // STRICT TEARDOWN ORDER (fields drop top to bottom, after Drop waits for idle):
    // - sync objects + command buffers
    // - mesh buffers, then the upload pool
    // - pipelines + layout, BEFORE the render pass they were built against
    // - framebuffers/views/swapchain, then the render pass
    // - device, surface, instance last (inside DeviceContext)
    frames: FrameExecutor,
    meshes: MeshStore,
    uploader: Uploader,
    pipelines: PipelineCache,
    swapchain: Swapchain,
    shaders: Box<dyn ShaderSource>,
    draws: DrawList,
    ctx: Arc<DeviceContext>,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: VkConfig,
        shaders: Box<dyn ShaderSource>,
    ) -> Result<Self> {
        // STRICT ORDER: device, swapchain (+ render pass), pipelines, frames.
        let ctx = Arc::new(DeviceContext::new(window, display, config.validation)?);
        let swapchain = Swapchain::new(ctx.clone(), size, config.present_mode)?;
        let pipelines = PipelineCache::new(ctx.clone(), swapchain.render_pass().clone())?;
        let frames = FrameExecutor::new(ctx.clone(), size, config.clear_color)?;
        let uploader = Uploader::new(ctx.clone())?;

        info!(
            "vulkan renderer ready on '{}' (validation={})",
            ctx.device_name(),
            ctx.validation_enabled()
        );
        Ok(Self {
            frames,
            meshes: MeshStore::default(),
            uploader,
            pipelines,
            swapchain,
            shaders,
            draws: DrawList::default(),
            ctx,
        })
    }

    pub fn draw_frame(&mut self) -> Result<FrameOutcome> {
        self.frames.draw_frame(
            &mut self.swapchain,
            &self.pipelines,
            &self.meshes,
            &self.draws,
        )
    }

    pub fn device(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn draw_list(&self) -> &DrawList {
        &self.draws
    }

    /// Debug copy of a mesh's device buffers: (vertex bytes, index bytes).
    pub fn read_back_mesh(&self, handle: MeshHandle) -> Result<(Vec<u8>, Vec<u8>)> {
        let mesh = self.meshes.get(handle)?;
        Ok((
            mesh.vertices.read_back(&self.uploader)?,
            mesh.indices.read_back(&self.uploader)?,
        ))
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("renderer teardown: {e}");
        }
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) -> anyhow::Result<()> {
        self.frames.resize(size);
        Ok(())
    }

    fn render(&mut self) -> anyhow::Result<()> {
        self.draw_frame()?;
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.frames.set_clear_color(rgba);
    }

    fn upload_mesh(&mut self, mesh: Mesh) -> anyhow::Result<MeshHandle> {
        let gpu = GpuMesh::upload(&self.uploader, mesh)?;
        Ok(self.meshes.insert(gpu))
    }

    fn draw_mesh(&mut self, mesh: MeshHandle, shader: &Shader) -> anyhow::Result<()> {
        self.meshes.get(mesh)?;
        self.pipelines.get_or_create(shader, self.shaders.as_ref())?;
        self.draws.push(shader.id(), mesh);
        Ok(())
    }

    fn clear_draw_list(&mut self) {
        self.draws.clear();
    }
}
