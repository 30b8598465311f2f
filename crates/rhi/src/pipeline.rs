//! Graphics pipelines for dynamic rendering.
//!
//! - [`RenderState`] is the fixed-function configuration of a pipeline.
//! - [`PipelineDesc`] gathers everything a pipeline is built from; its
//!   [`PipelineKey`] is a 64-bit content hash of those inputs.
//! - [`Pipeline::build`] reflects both stages, validates the shader
//!   interface against the vertex and descriptor layouts, then creates the
//!   descriptor-set layout, pipeline layout and pipeline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use ash::vk;
//! use vp_rhi::descriptor::DescriptorBinding;
//! use vp_rhi::device::Device;
//! use vp_rhi::pipeline::{AttachmentFormats, Pipeline, PipelineDesc, RenderState};
//! use vp_rhi::shader::{ShaderSource, ShaderStage};
//! use vp_rhi::vertex::ModelVertex;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vp_rhi::RhiError> {
//! let vertex = ShaderSource::from_file(Path::new("vert.spv"), ShaderStage::Vertex, "main")?;
//! let fragment = ShaderSource::from_file(Path::new("frag.spv"), ShaderStage::Fragment, "main")?;
//! let bindings = [
//!     DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
//!     DescriptorBinding::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
//! ];
//! let layout = ModelVertex::layout();
//! let desc = PipelineDesc {
//!     vertex: &vertex,
//!     fragment: &fragment,
//!     vertex_layout: &layout,
//!     bindings: &bindings,
//!     push_constant_size: 64,
//!     state: RenderState::default(),
//!     formats: AttachmentFormats {
//!         color: vk::Format::B8G8R8A8_SRGB,
//!         depth: vk::Format::D32_SFLOAT,
//!     },
//! };
//! let pipeline = Pipeline::build(device, &desc)?;
//! # Ok(())
//! # }
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::descriptor::{DescriptorBinding, DescriptorSetLayout};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::reflect::{reflect, validate_link};
use crate::shader::{Shader, ShaderSource, ShaderStage};
use crate::vertex::VertexLayout;

/// Fraction of samples shaded individually when sample shading is on.
pub const MIN_SAMPLE_SHADING: f32 = 0.2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    /// Requires the `fillModeNonSolid` device feature
    Line,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrontFace {
    /// Counter-clockwise after the projection's Y flip
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareOp {
    #[default]
    Less,
    LessOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// `src * a + dst * (1 - a)`
    Alpha,
}

impl BlendMode {
    pub fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        let state =
            vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            BlendMode::Opaque => state.blend_enable(false),
            BlendMode::Alpha => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// Fixed-function state of a pipeline. Viewport and scissor are dynamic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub topology: PrimitiveTopology,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    /// Pulls fragments towards the camera, for lines drawn over their own faces
    pub depth_bias: bool,
    pub samples: vk::SampleCountFlags,
    /// Ignored when the device lacks `sampleRateShading`
    pub sample_shading: bool,
    pub blend: BlendMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_test: true,
            depth_write: true,
            depth_compare: CompareOp::Less,
            depth_bias: false,
            samples: vk::SampleCountFlags::TYPE_1,
            sample_shading: false,
            blend: BlendMode::Opaque,
        }
    }
}

impl RenderState {
    /// Lines over already-drawn geometry: no culling, no depth writes,
    /// depth-biased so the edges win against their own faces.
    pub fn wireframe_overlay(samples: vk::SampleCountFlags) -> Self {
        Self {
            polygon_mode: PolygonMode::Line,
            cull_mode: CullMode::None,
            depth_write: false,
            depth_compare: CompareOp::LessOrEqual,
            depth_bias: true,
            samples,
            ..Self::default()
        }
    }
}

/// Attachment formats the pipeline renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

/// Everything a pipeline is built from.
#[derive(Clone, Copy, Debug)]
pub struct PipelineDesc<'a> {
    pub vertex: &'a ShaderSource,
    pub fragment: &'a ShaderSource,
    pub vertex_layout: &'a VertexLayout,
    pub bindings: &'a [DescriptorBinding],
    /// Bytes of vertex-stage push constants at offset 0; 0 for none
    pub push_constant_size: u32,
    pub state: RenderState,
    pub formats: AttachmentFormats,
}

impl PipelineDesc<'_> {
    pub fn key(&self) -> PipelineKey {
        let mut hasher = DefaultHasher::new();
        self.vertex.hash(&mut hasher);
        self.fragment.hash(&mut hasher);
        self.vertex_layout.hash(&mut hasher);
        self.bindings.hash(&mut hasher);
        self.push_constant_size.hash(&mut hasher);
        self.state.hash(&mut hasher);
        self.formats.hash(&mut hasher);
        PipelineKey(hasher.finish())
    }
}

/// Content hash identifying a pipeline.
///
/// Identical inputs always give the same key within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey(pub u64);

impl std::fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout: {} set layout(s), {} push constant range(s)",
            set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline layout");
    }
}

/// Immutable graphics pipeline with the layouts it was created with.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    // Dropped after the pipeline.
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    key: PipelineKey,
    state: RenderState,
}

impl Pipeline {
    /// Validates and builds the pipeline described by `desc`.
    ///
    /// # Errors
    ///
    /// - [`RhiError::PipelineLink`] when a shader input or descriptor has no
    ///   matching vertex attribute or binding.
    /// - [`RhiError::Shader`] for SPIR-V that cannot be reflected.
    /// - [`RhiError::InvalidArgument`] for line rendering on a device
    ///   without `fillModeNonSolid`.
    pub fn build(device: Arc<Device>, desc: &PipelineDesc<'_>) -> RhiResult<Self> {
        if desc.vertex.stage != ShaderStage::Vertex || desc.fragment.stage != ShaderStage::Fragment {
            return Err(RhiError::InvalidArgument(
                "pipeline needs a vertex and a fragment stage".to_string(),
            ));
        }
        if desc.state.polygon_mode == PolygonMode::Line && !device.wireframe_enabled() {
            return Err(RhiError::InvalidArgument(
                "line polygon mode needs the fillModeNonSolid feature".to_string(),
            ));
        }

        let interfaces = [reflect(desc.vertex)?, reflect(desc.fragment)?];
        validate_link(&interfaces, desc.vertex_layout, desc.bindings)?;

        let key = desc.key();
        let set_layout = DescriptorSetLayout::new(device.clone(), desc.bindings)?;

        let push_constant_ranges: Vec<vk::PushConstantRange> = if desc.push_constant_size > 0 {
            vec![
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::VERTEX)
                    .offset(0)
                    .size(desc.push_constant_size),
            ]
        } else {
            Vec::new()
        };
        let layout = PipelineLayout::new(
            device.clone(),
            &[set_layout.handle()],
            &push_constant_ranges,
        )?;

        let vertex_module = Shader::new(device.clone(), desc.vertex)?;
        let fragment_module = Shader::new(device.clone(), desc.fragment)?;
        let shader_stages = [
            vertex_module.stage_create_info(),
            fragment_module.stage_create_info(),
        ];

        let bindings = [desc.vertex_layout.binding_description()];
        let attributes = desc.vertex_layout.attribute_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let state = desc.state;
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(state.topology.to_vk())
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let mut rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(state.polygon_mode.to_vk())
            .line_width(1.0)
            .cull_mode(state.cull_mode.to_vk())
            .front_face(state.front_face.to_vk());
        if state.depth_bias {
            rasterization_state = rasterization_state
                .depth_bias_enable(true)
                .depth_bias_constant_factor(-1.0)
                .depth_bias_slope_factor(-1.0);
        }

        let sample_shading = state.sample_shading && device.sample_rate_shading_enabled();
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(state.samples)
            .sample_shading_enable(sample_shading)
            .min_sample_shading(if sample_shading { MIN_SAMPLE_SHADING } else { 1.0 });

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(state.depth_compare.to_vk())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [state.blend.to_vk()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [desc.formats.color];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.formats.depth);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| RhiError::from(result))?
        };
        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::Initialization("driver returned no pipeline".to_string())
        })?;

        info!(
            "Created graphics pipeline {} ({:?}, {:?} samples, sample shading: {})",
            key, state.polygon_mode, state.samples, sample_shading
        );

        Ok(Self {
            device,
            pipeline,
            layout,
            set_layout,
            key,
            state,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn set_layout(&self) -> &DescriptorSetLayout {
        &self.set_layout
    }

    #[inline]
    pub fn key(&self) -> PipelineKey {
        self.key
    }

    #[inline]
    pub fn state(&self) -> &RenderState {
        &self.state
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Destroyed graphics pipeline {}", self.key);
    }
}
