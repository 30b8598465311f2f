//! The frame loop.
//!
//! [`Renderer`] owns every GPU resource of the viewer and drives one frame
//! per [`render_frame`](Renderer::render_frame) call:
//!
//! 1. skip while the surface is zero-sized, rebuild the swapchain if pending
//! 2. begin the frame (waits on the slot's fence)
//! 3. acquire a swapchain image, retrying the frame on `OutOfDate`
//! 4. release retired resources, update the slot's uniforms, record
//! 5. submit and present
//! 6. rebuild the swapchain after an out-of-date or suboptimal present
//!
//! # Resource Destruction Order
//!
//! Fields drop in declaration order, so GPU resources are declared before
//! the [`RenderContext`] that owns the device, surface and instance.
//! [`Drop`] waits for the device to go idle first.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use glam::{Mat4, Vec3};
use gpu_allocator::MemoryLocation;
use tracing::{debug, error, info, trace, warn};

use vp_core::{FrameStats, RendererConfig, Timer};
use vp_platform::{SurfaceEvent, Window};
use vp_resources::{MeshData, load_image, load_obj};
use vp_rhi::buffer::{Buffer, BufferUsage};
use vp_rhi::command::CommandBuffer;
use vp_rhi::descriptor::{
    DescriptorBinding, DescriptorPool, write_combined_image_sampler, write_uniform_buffer,
};
use vp_rhi::device::Device;
use vp_rhi::image::Image;
use vp_rhi::pipeline::{AttachmentFormats, CullMode, PipelineDesc, PipelineKey, RenderState};
use vp_rhi::sampler::Sampler;
use vp_rhi::shader::{ShaderSource, ShaderStage};
use vp_rhi::swapchain::Swapchain;
use vp_rhi::upload::ResourceUploader;
use vp_rhi::RhiError;
use vp_rhi::vertex::{ModelVertex, VertexLayout};

use crate::context::RenderContext;
use crate::deletion_queue::DeletionQueue;
use crate::error::RenderResult;
use crate::frame_sync::{FrameSlot, FrameSynchronizer};
use crate::pipeline_cache::PipelineCache;
use crate::render_targets::RenderTargets;
use crate::surface_state::{AcquireAction, FrameStart, SurfaceState};
use crate::ubo::{DrawPushConstants, UniformBufferObject};

const SHADER_ENTRY_POINT: &str = "main";
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const STATS_WINDOW: Duration = Duration::from_secs(2);

/// What a [`Renderer::render_frame`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and presented.
    Rendered,
    /// Nothing to draw: the surface is zero-sized or acquisition timed out.
    Skipped,
    /// The swapchain was out of date at acquire and has been rebuilt.
    Retry,
}

/// Device-local geometry.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    pub fn upload(uploader: &ResourceUploader, data: &MeshData) -> RenderResult<Self> {
        let vertex_buffer = uploader.upload_buffer(data.vertex_bytes(), BufferUsage::Vertex)?;
        let index_buffer = uploader.upload_buffer(data.index_bytes(), BufferUsage::Index)?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        })
    }
}

/// A sampled image and its sampler.
pub struct Texture {
    image: Image,
    sampler: Sampler,
}

/// How a draw item is shaded: a render state variant plus a texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub name: &'static str,
    pub state: RenderState,
    pub texture: usize,
    /// Set once the pipeline for the current attachment formats exists.
    pub pipeline: Option<PipelineKey>,
}

/// One indexed draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub mesh: usize,
    pub material: usize,
    pub transform: Mat4,
}

/// Per-slot uniform buffer and descriptor sets (one per texture).
struct SlotBindings {
    uniform_buffer: Buffer,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

/// Shader stages and the layout every material pipeline shares.
struct ShaderProgram {
    vertex: ShaderSource,
    fragment: ShaderSource,
    vertex_layout: VertexLayout,
    bindings: Vec<DescriptorBinding>,
}

impl ShaderProgram {
    fn load(config: &RendererConfig) -> RenderResult<Self> {
        let vertex = ShaderSource::from_file(
            &config.assets.vertex_shader_path(),
            ShaderStage::Vertex,
            SHADER_ENTRY_POINT,
        )?;
        let fragment = ShaderSource::from_file(
            &config.assets.fragment_shader_path(),
            ShaderStage::Fragment,
            SHADER_ENTRY_POINT,
        )?;

        Ok(Self {
            vertex,
            fragment,
            vertex_layout: ModelVertex::layout(),
            bindings: vec![
                DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
                DescriptorBinding::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
            ],
        })
    }

    fn desc(&self, state: RenderState, formats: AttachmentFormats) -> PipelineDesc<'_> {
        PipelineDesc {
            vertex: &self.vertex,
            fragment: &self.fragment,
            vertex_layout: &self.vertex_layout,
            bindings: &self.bindings,
            push_constant_size: DrawPushConstants::SIZE,
            state,
            formats,
        }
    }
}

/// Renders the textured, spinning model into a window.
pub struct Renderer {
    deletion_queue: DeletionQueue<Box<dyn Any>>,
    draw_items: Vec<DrawItem>,
    materials: Vec<Material>,
    meshes: Vec<Mesh>,
    pipelines: PipelineCache,
    slot_bindings: Vec<SlotBindings>,
    // Referenced by the descriptor sets in `slot_bindings`.
    _descriptor_pool: DescriptorPool,
    _textures: Vec<Texture>,
    sync: FrameSynchronizer,
    targets: RenderTargets,
    swapchain: Swapchain,
    program: ShaderProgram,

    surface_state: SurfaceState,
    timer: Timer,
    stats: FrameStats,
    acquire_timeout_ns: u64,
    prefer_mailbox: bool,

    context: RenderContext,
}

impl Renderer {
    /// Brings up Vulkan for `window` and loads the configured assets.
    ///
    /// # Errors
    ///
    /// Any failure here is an initialization failure: no GPU, unsupported
    /// surface, missing or malformed assets, or shaders that do not link
    /// against the vertex and descriptor layouts.
    pub fn new(window: &Window, config: &RendererConfig) -> RenderResult<Self> {
        config.validate()?;
        let (width, height) = window.inner_size();
        info!("Initializing renderer ({}x{})", width, height);

        let context = RenderContext::new(window, config)?;
        let device = context.device().clone();

        let surface_state = SurfaceState::new(width, height);
        let swapchain = Swapchain::new(
            context.instance(),
            device.clone(),
            context.surface().handle(),
            surface_state.extent(),
            config.prefer_mailbox,
        )?;

        let samples = device.info().max_usable_sample_count(config.max_msaa_samples);
        let formats = AttachmentFormats {
            color: swapchain.format(),
            depth: device.depth_format()?,
        };
        let targets = RenderTargets::new(device.clone(), swapchain.extent(), formats, samples)?;
        info!("MSAA: {:?}, depth format: {:?}", samples, formats.depth);

        let sync = FrameSynchronizer::new(
            device.clone(),
            config.frames_in_flight,
            swapchain.image_count(),
            config.fence_timeout_ns,
        )?;

        let uploader = ResourceUploader::new(device.clone())?;

        let mesh_data = load_obj(&config.assets.model_path())?;
        let meshes = vec![Mesh::upload(&uploader, &mesh_data)?];

        let texture = Self::load_texture(&device, &uploader, config)?;
        let textures = vec![texture];

        let program = ShaderProgram::load(config)?;
        let (materials, draw_items) = Self::scene(config, &device, samples);

        let mut pipelines = PipelineCache::new(device.clone());
        let mut materials = materials;
        build_material_pipelines(&mut pipelines, &program, &mut materials, formats)?;

        let slot_count = config.frames_in_flight as u32;
        let set_count = slot_count * textures.len() as u32;
        let descriptor_pool = DescriptorPool::for_bindings(device.clone(), &program.bindings, set_count)?;
        let slot_bindings = Self::create_slot_bindings(
            &device,
            &descriptor_pool,
            &pipelines,
            &materials,
            &textures,
            config.frames_in_flight,
        )?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight, {} draw items, {} pipelines",
            swapchain.image_count(),
            config.frames_in_flight,
            draw_items.len(),
            pipelines.len()
        );

        Ok(Self {
            deletion_queue: DeletionQueue::new(),
            draw_items,
            materials,
            meshes,
            pipelines,
            slot_bindings,
            _descriptor_pool: descriptor_pool,
            _textures: textures,
            sync,
            targets,
            swapchain,
            program,
            surface_state,
            timer: Timer::new(),
            stats: FrameStats::new(STATS_WINDOW),
            acquire_timeout_ns: config.acquire_timeout_ns,
            prefer_mailbox: config.prefer_mailbox,
            context,
        })
    }

    fn load_texture(
        device: &Arc<Device>,
        uploader: &ResourceUploader,
        config: &RendererConfig,
    ) -> RenderResult<Texture> {
        let pixels = load_image(&config.assets.texture_path())?;
        let image = uploader.upload_image(
            &pixels.pixels,
            pixels.width,
            pixels.height,
            pixels.channels,
            config.generate_mipmaps,
        )?;
        let sampler = Sampler::new(device.clone(), image.mip_levels())?;
        info!(
            "Texture uploaded: {}x{}, {} mip levels",
            pixels.width,
            pixels.height,
            image.mip_levels()
        );
        Ok(Texture { image, sampler })
    }

    /// The filled model, plus a wireframe overlay when the device can draw
    /// lines, or a second filled instance when it cannot.
    fn scene(
        config: &RendererConfig,
        device: &Device,
        samples: vk::SampleCountFlags,
    ) -> (Vec<Material>, Vec<DrawItem>) {
        let filled = RenderState {
            samples,
            sample_shading: samples != vk::SampleCountFlags::TYPE_1,
            ..RenderState::default()
        };
        let mut materials = vec![Material {
            name: "filled",
            state: filled,
            texture: 0,
            pipeline: None,
        }];
        let mut draw_items = vec![DrawItem {
            mesh: 0,
            material: 0,
            transform: Mat4::IDENTITY,
        }];

        if !config.wireframe_overlay {
            return (materials, draw_items);
        }

        if device.wireframe_enabled() {
            materials.push(Material {
                name: "wireframe",
                state: RenderState::wireframe_overlay(samples),
                texture: 0,
                pipeline: None,
            });
            draw_items.push(DrawItem {
                mesh: 0,
                material: 1,
                transform: Mat4::IDENTITY,
            });
        } else {
            warn!("fillModeNonSolid unsupported, drawing a second filled instance instead");
            materials.push(Material {
                name: "filled-double-sided",
                state: RenderState {
                    cull_mode: CullMode::None,
                    ..filled
                },
                texture: 0,
                pipeline: None,
            });
            draw_items.push(DrawItem {
                mesh: 0,
                material: 1,
                transform: Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0))
                    * Mat4::from_scale(Vec3::splat(0.5)),
            });
        }

        (materials, draw_items)
    }

    fn create_slot_bindings(
        device: &Arc<Device>,
        pool: &DescriptorPool,
        pipelines: &PipelineCache,
        materials: &[Material],
        textures: &[Texture],
        frames_in_flight: usize,
    ) -> RenderResult<Vec<SlotBindings>> {
        // Every material pipeline shares the same bindings, so any of their
        // set layouts is compatible with all of them.
        let set_layout = materials
            .iter()
            .find_map(|m| m.pipeline.and_then(|key| pipelines.get(key)))
            .map(|p| p.set_layout().handle())
            .ok_or_else(|| RhiError::InvalidArgument("no material pipeline built".to_string()))?;

        let mut slots = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            let uniform_buffer = Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                UniformBufferObject::SIZE as vk::DeviceSize,
                MemoryLocation::CpuToGpu,
            )?;

            let layouts = vec![set_layout; textures.len()];
            let descriptor_sets = pool.allocate(&layouts)?;
            for (set, texture) in descriptor_sets.iter().zip(textures) {
                write_uniform_buffer(
                    device,
                    *set,
                    0,
                    uniform_buffer.handle(),
                    UniformBufferObject::SIZE as vk::DeviceSize,
                );
                write_combined_image_sampler(
                    device,
                    *set,
                    1,
                    texture.sampler.handle(),
                    texture.image.view(),
                );
            }

            debug!("Created bindings for frame slot {}", i);
            slots.push(SlotBindings {
                uniform_buffer,
                descriptor_sets,
            });
        }
        Ok(slots)
    }

    /// Forwards a window event.
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) {
        self.surface_state.handle(event);
    }

    pub fn close_requested(&self) -> bool {
        self.surface_state.close_requested()
    }

    /// Runs one iteration of the frame loop.
    pub fn render_frame(&mut self) -> RenderResult<FrameStatus> {
        match self.surface_state.frame_start() {
            FrameStart::Skip => return Ok(FrameStatus::Skipped),
            FrameStart::Rebuild => {
                debug!("Resize pending, recreating swapchain before acquire");
                self.recreate_swapchain()?;
            }
            FrameStart::Render => {}
        }

        let slot = self.sync.begin_frame()?;

        let acquired = self
            .swapchain
            .acquire_next_image(slot.image_available, self.acquire_timeout_ns)?;
        let image_index = match self.surface_state.on_acquire(acquired) {
            AcquireAction::Record(index) => index,
            AcquireAction::Retry => {
                debug!("Swapchain out of date at acquire, recreating");
                self.sync.cancel_frame(slot);
                if self.surface_state.needs_rebuild() {
                    self.recreate_swapchain()?;
                }
                return Ok(FrameStatus::Retry);
            }
            AcquireAction::Skip => {
                warn!("Timed out acquiring a swapchain image");
                self.sync.skip_frame(slot);
                return Ok(FrameStatus::Skipped);
            }
        };

        self.sync.image_acquired(slot)?;
        self.deletion_queue.drain(self.sync.completed_epoch());

        self.update_uniforms(slot)?;
        self.record(slot, image_index)?;

        let presented = self.sync.end_frame(slot, image_index, &self.swapchain)?;
        if self.surface_state.on_present(presented) {
            self.recreate_swapchain()?;
        }

        if let Some((fps, frame_ms)) = self.stats.record(self.timer.tick()) {
            debug!("{:.1} fps ({:.2} ms/frame)", fps, frame_ms);
        }
        Ok(FrameStatus::Rendered)
    }

    fn update_uniforms(&self, slot: FrameSlot) -> RenderResult<()> {
        let ubo = UniformBufferObject::animated(self.timer.elapsed_secs(), self.swapchain.extent());
        self.slot_bindings[slot.index]
            .uniform_buffer
            .write_data(0, bytemuck::bytes_of(&ubo))?;
        Ok(())
    }

    fn record(&self, slot: FrameSlot, image_index: u32) -> RenderResult<()> {
        let cmd = self.sync.command_buffer(slot);
        let extent = self.swapchain.extent();
        let swapchain_image = self.swapchain.image(image_index as usize);
        let color_range = color_subresource_range();

        cmd.transition_image_layout(
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            color_range,
        );
        if let Some(msaa) = self.targets.msaa_color() {
            cmd.transition_image_layout(
                msaa.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                msaa.full_range(),
            );
        }
        let depth = self.targets.depth();
        cmd.transition_image_layout(
            depth.handle(),
            vk::ImageLayout::UNDEFINED,
            self.targets.depth_layout(),
            depth.full_range(),
        );

        let swapchain_view = self.swapchain.image_view(image_index as usize);
        let clear_color = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        };
        let color_attachment = match self.targets.msaa_color() {
            Some(msaa) => vk::RenderingAttachmentInfo::default()
                .image_view(msaa.view())
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(swapchain_view)
                .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(clear_color),
            None => vk::RenderingAttachmentInfo::default()
                .image_view(swapchain_view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_color),
        };
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view())
            .image_layout(self.targets.depth_layout())
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        cmd.begin_rendering(&rendering_info);
        cmd.set_viewport_and_scissor(extent);
        self.record_draws(cmd, slot)?;
        cmd.end_rendering();

        cmd.transition_image_layout(
            swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            color_range,
        );
        Ok(())
    }

    fn record_draws(&self, cmd: &CommandBuffer, slot: FrameSlot) -> RenderResult<()> {
        let bindings = &self.slot_bindings[slot.index];
        let mut bound: Option<PipelineKey> = None;

        for item in &self.draw_items {
            let material = &self.materials[item.material];
            let pipeline = material
                .pipeline
                .and_then(|key| self.pipelines.get(key))
                .ok_or_else(|| {
                    RhiError::InvalidArgument(format!("material '{}' has no pipeline", material.name))
                })?;
            let mesh = &self.meshes[item.mesh];

            if bound != Some(pipeline.key()) {
                cmd.bind_graphics_pipeline(pipeline.handle());
                bound = Some(pipeline.key());
                trace!("Bound pipeline {} for '{}'", pipeline.key(), material.name);
            }
            cmd.bind_descriptor_set(pipeline.layout(), bindings.descriptor_sets[material.texture]);
            cmd.bind_vertex_buffer(mesh.vertex_buffer.handle());
            cmd.bind_index_buffer(mesh.index_buffer.handle(), vk::IndexType::UINT32);
            cmd.push_constants(
                pipeline.layout(),
                vk::ShaderStageFlags::VERTEX,
                &DrawPushConstants {
                    model: item.transform,
                },
            );
            cmd.draw_indexed(mesh.index_count, 1);
        }
        Ok(())
    }

    /// Rebuilds the swapchain and everything sized or counted by it. Old
    /// attachments and semaphores are retired rather than destroyed.
    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        let old_format = self.swapchain.format();
        let old_present_mode = self.swapchain.present_mode();
        self.swapchain.recreate(self.surface_state.extent())?;

        let device = self.context.device().clone();
        let formats = AttachmentFormats {
            color: self.swapchain.format(),
            depth: self.targets.formats().depth,
        };
        let targets = RenderTargets::new(device, self.swapchain.extent(), formats, self.targets.samples())?;
        let old_targets = std::mem::replace(&mut self.targets, targets);

        let epoch = self.sync.last_submitted_epoch();
        self.deletion_queue.retire(epoch, Box::new(old_targets));
        let old_semaphores = self.sync.rebuild_image_semaphores(self.swapchain.image_count())?;
        self.deletion_queue.retire(epoch, Box::new(old_semaphores));

        if self.swapchain.format() != old_format {
            info!(
                "Swapchain format changed {:?} -> {:?}, rebuilding pipelines",
                old_format,
                self.swapchain.format()
            );
            build_material_pipelines(&mut self.pipelines, &self.program, &mut self.materials, formats)?;
        }
        if self.swapchain.present_mode() != old_present_mode {
            warn!(
                "Present mode changed {:?} -> {:?} (mailbox preferred: {})",
                old_present_mode,
                self.swapchain.present_mode(),
                self.prefer_mailbox
            );
        }

        self.surface_state.rebuilt();
        Ok(())
    }

    /// Waits for the GPU and releases every retired resource. Call before
    /// dropping the renderer at the end of the loop.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        info!("Shutting down renderer");
        self.context.device().wait_idle()?;
        let released = self.deletion_queue.flush();
        debug!("Released {} retired resource(s)", released);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.device().wait_idle() {
            error!("Failed to wait for device idle during drop: {}", e);
        }
        self.deletion_queue.flush();
    }
}

/// Makes sure every material has a pipeline for `formats`, building only
/// the ones the cache does not hold yet.
fn build_material_pipelines(
    cache: &mut PipelineCache,
    program: &ShaderProgram,
    materials: &mut [Material],
    formats: AttachmentFormats,
) -> RenderResult<()> {
    for material in materials.iter_mut() {
        let mut state = material.state;
        state.sample_shading &= state.samples != vk::SampleCountFlags::TYPE_1;
        let pipeline = cache.get_or_build(&program.desc(state, formats))?;
        debug!("Material '{}' uses pipeline {}", material.name, pipeline.key());
        material.pipeline = Some(pipeline.key());
    }
    Ok(())
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_range_covers_one_level() {
        let range = color_subresource_range();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!((range.level_count, range.layer_count), (1, 1));
    }

    #[test]
    fn test_material_variants_have_distinct_states() {
        let samples = vk::SampleCountFlags::TYPE_4;
        let filled = RenderState {
            samples,
            sample_shading: true,
            ..RenderState::default()
        };
        let wire = RenderState::wireframe_overlay(samples);
        assert_ne!(filled, wire);
        assert_eq!(filled.samples, wire.samples);
    }
}
