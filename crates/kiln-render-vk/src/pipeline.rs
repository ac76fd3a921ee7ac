// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline from a render pass, a vertex layout and two SPIR-V files.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use kiln_render::{Geometry, Vertex};
use tracing::{debug, info};

use crate::error::{RenderResult, VkCall, VkError};

const ENTRY_POINT: &std::ffi::CStr = c"main";

#[derive(Clone, Debug, Default)]
pub(crate) struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// No vertex buffer: positions come from `gl_VertexIndex`.
    pub fn none() -> Self {
        Self::default()
    }

    /// Binding 0 with [`Vertex`] { pos: vec2, color: vec3 }.
    pub fn of_vertex() -> Self {
        Self {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: Vertex::STRIDE,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
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
            ],
        }
    }

    pub fn for_geometry(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Procedural { .. } => Self::none(),
            Geometry::Vertices(_) => Self::of_vertex(),
        }
    }
}

pub(crate) fn load_shader(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| VkError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| VkError::ShaderInvalid {
        path: path.to_path_buf(),
        source,
    })
}

fn input_assembly_state() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
    vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    }
}

fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        line_width: 1.0,
        ..Default::default()
    }
}

fn multisample_state() -> vk::PipelineMultisampleStateCreateInfo<'static> {
    vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        min_sample_shading: 1.0,
        ..Default::default()
    }
}

/// src-alpha / one-minus-src-alpha for color, additive for alpha.
fn blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    }
}

/// Viewport and scissor come from the swapchain every frame.
const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

#[derive(Clone, Debug)]
pub(crate) struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

/// Pipeline layout + pipeline. Immutable once built; survives swapchain rebuilds.
#[derive(Default)]
pub(crate) struct PipelineState {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineState {
    /// Fills `self` as objects are created, so a failure part-way leaves
    /// only valid-or-null handles for teardown.
    pub unsafe fn build(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vertex_layout: &VertexLayout,
        shaders: &ShaderPaths,
    ) -> RenderResult<()> {
        // Both files must be readable before any GPU object is made.
        let vs_code = load_shader(&shaders.vertex)?;
        let fs_code = load_shader(&shaders.fragment)?;

        let vs = unsafe { create_shader_module(device, &vs_code) }?;
        let fs = match unsafe { create_shader_module(device, &fs_code) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_shader_module(vs, None) };
                return Err(e);
            }
        };

        let result = unsafe { self.build_with_modules(device, render_pass, vertex_layout, vs, fs) };

        // Modules are only needed while the pipeline is being created.
        unsafe {
            device.destroy_shader_module(vs, None);
            device.destroy_shader_module(fs, None);
        }
        result?;

        info!(
            "created graphics pipeline ({} vertex bindings, {} attributes)",
            vertex_layout.bindings.len(),
            vertex_layout.attributes.len()
        );
        Ok(())
    }

    unsafe fn build_with_modules(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vertex_layout: &VertexLayout,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
    ) -> RenderResult<()> {
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: vertex_layout.bindings.len() as u32,
            p_vertex_binding_descriptions: vertex_layout.bindings.as_ptr(),
            vertex_attribute_description_count: vertex_layout.attributes.len() as u32,
            p_vertex_attribute_descriptions: vertex_layout.attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = input_assembly_state();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: DYNAMIC_STATES.len() as u32,
            p_dynamic_states: DYNAMIC_STATES.as_ptr(),
            ..Default::default()
        };
        // Counts only; the rectangles are dynamic.
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = rasterization_state();
        let multisample = multisample_state();
        let color_blend_att = blend_attachment();
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            logic_op: vk::LogicOp::COPY,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            blend_constants: [0.0; 4],
            ..Default::default()
        };

        // No descriptor sets or push constants yet.
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        self.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .call("vkCreatePipelineLayout")?;
        debug!("created pipeline layout");

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
            layout: self.layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_, result)| result)
        .call("vkCreateGraphicsPipelines")?;
        self.pipeline = pipelines[0];
        Ok(())
    }

    pub unsafe fn destroy_pipeline(&mut self, device: &ash::Device) {
        unsafe { device.destroy_pipeline(self.pipeline, None) };
        self.pipeline = vk::Pipeline::null();
    }

    pub unsafe fn destroy_layout(&mut self, device: &ash::Device) {
        unsafe { device.destroy_pipeline_layout(self.layout, None) };
        self.layout = vk::PipelineLayout::null();
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: std::mem::size_of_val(code),
        p_code: code.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.call("vkCreateShaderModule")
}
