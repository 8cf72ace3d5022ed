// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use redwood_render::{MeshHandle, ShaderId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
    #[error("could not load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error("no physical device is a discrete GPU with geometry shaders, graphics+present queues and a usable swapchain")]
    NoSuitableDevice,
    #[error("no memory type in bits {type_bits:#b} has {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("surface advertises no formats")]
    NoSurfaceFormat,
    #[error("surface format changed from {old:?} to {new:?}; render pass is no longer compatible")]
    FormatChanged { old: vk::Format, new: vk::Format },
    #[error("loading shader '{name}': {reason}")]
    ShaderLoad { name: String, reason: String },
    #[error("graphics pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),
    #[error("swapchain returned image {index} but only {count} images exist")]
    ImageOutOfRange { index: u32, count: usize },
    #[error("frame slot {slot} is still in flight")]
    SlotBusy { slot: usize },
    #[error("unknown mesh handle {0:?}")]
    UnknownMesh(MeshHandle),
    #[error("no pipeline compiled for {0}")]
    UnknownShader(ShaderId),
    #[error("refusing to upload an empty buffer")]
    EmptyUpload,
}

impl RenderError {
    /// Transient presentation failure, recovered by rebuilding the swapchain.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            RenderError::Vulkan {
                result: vk::Result::ERROR_OUT_OF_DATE_KHR,
                ..
            }
        )
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

/// Tags a raw `VkResult` with the driver call that produced it.
pub(crate) trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn call(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { call, result })
    }
}
