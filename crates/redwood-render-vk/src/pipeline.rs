// SPDX-License-Identifier: CEPL-1.0
//! Render pass plus one compiled graphics pipeline per shader identity.
use std::collections::HashMap;
use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use redwood_render::{Shader, ShaderId, ShaderSource, Vertex};
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{RenderError, Result, VkResultExt};

const SHADER_ENTRY: &CStr = c"main";

/// Single colour attachment: clear on load, store, undefined -> present.
pub struct RenderPass {
    ctx: Arc<DeviceContext>,
    handle: vk::RenderPass,
}

impl RenderPass {
    pub fn new(ctx: Arc<DeviceContext>, format: vk::Format) -> Result<Self> {
        let color = vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            ..Default::default()
        };
        // Keeps the layout transition from running before the acquired image is ready.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let handle = unsafe { ctx.device().create_render_pass(&info, None) }
            .call("vkCreateRenderPass")?;
        Ok(Self { ctx, handle })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_render_pass(self.handle, None) };
    }
}

/// Shader identity -> compiled pipeline. Entries are only removed by `drain`.
#[derive(Debug)]
pub struct PipelineTable<P> {
    entries: HashMap<ShaderId, P>,
}

impl<P> Default for PipelineTable<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<P: Copy> PipelineTable<P> {
    pub fn get(&self, id: ShaderId) -> Option<P> {
        self.entries.get(&id).copied()
    }

    /// Runs `compile` only on a miss; a failed compile leaves no entry.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        id: ShaderId,
        compile: impl FnOnce() -> Result<P, E>,
    ) -> Result<P, E> {
        if let Some(p) = self.entries.get(&id) {
            return Ok(*p);
        }
        let p = compile()?;
        self.entries.insert(id, p);
        Ok(p)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = P> + '_ {
        self.entries.drain().map(|(_, p)| p)
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 2] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: Vertex::POS_OFFSET,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: Vertex::COLOR_OFFSET,
        },
    ]
}

pub struct PipelineCache {
    table: PipelineTable<vk::Pipeline>,
    // Shared by every pipeline: no descriptor sets, no push constants.
    layout: vk::PipelineLayout,
    render_pass: Arc<RenderPass>,
    ctx: Arc<DeviceContext>,
}

impl PipelineCache {
    pub fn new(ctx: Arc<DeviceContext>, render_pass: Arc<RenderPass>) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = unsafe { ctx.device().create_pipeline_layout(&layout_info, None) }
            .call("vkCreatePipelineLayout")?;
        Ok(Self {
            table: PipelineTable::default(),
            layout,
            render_pass,
            ctx,
        })
    }

    pub fn get_or_create(
        &mut self,
        shader: &Shader,
        source: &dyn ShaderSource,
    ) -> Result<vk::Pipeline> {
        let Self {
            table,
            layout,
            render_pass,
            ctx,
        } = self;
        table.get_or_try_insert_with(shader.id(), || unsafe {
            let pipeline = compile(ctx.device(), *layout, render_pass.handle(), shader, source)?;
            info!(
                "compiled pipeline for {} ({} + {})",
                shader.id(),
                shader.vertex(),
                shader.fragment()
            );
            Ok(pipeline)
        })
    }

    pub fn get(&self, id: ShaderId) -> Option<vk::Pipeline> {
        self.table.get(id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            for p in self.table.drain() {
                device.destroy_pipeline(p, None);
            }
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Destroys the module when the pipeline has been created (or creation failed).
struct ShaderModule<'a> {
    device: &'a ash::Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    unsafe fn load(device: &'a ash::Device, source: &dyn ShaderSource, name: &str) -> Result<Self> {
        let load_err = |reason: String| RenderError::ShaderLoad {
            name: name.to_owned(),
            reason,
        };
        let bytes = source
            .load_bytecode(name)
            .map_err(|e| load_err(format!("{e:#}")))?;
        let code = read_spv(&mut Cursor::new(&bytes[..])).map_err(|e| load_err(e.to_string()))?;
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: code.len() * 4,
            ..Default::default()
        };
        let module = device
            .create_shader_module(&ci, None)
            .call("vkCreateShaderModule")?;
        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

unsafe fn compile(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    shader: &Shader,
    source: &dyn ShaderSource,
) -> Result<vk::Pipeline> {
    let vs = ShaderModule::load(device, source, shader.vertex())?;
    let fs = ShaderModule::load(device, source, shader.fragment())?;

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs.module,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs.module,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
    ];

    // --- Fixed-function state ---
    let vb = vertex_binding();
    let va = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Viewport/scissor are set per frame.
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
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
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
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
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    // Shader modules drop at the end of this scope either way.
    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(pipelines) => pipelines
            .into_iter()
            .next()
            .ok_or(RenderError::PipelineCreation(vk::Result::ERROR_UNKNOWN)),
        Err((_, err)) => Err(RenderError::PipelineCreation(err)),
    }
}
