//! Everything sized to one swapchain.
//!
//! A [`Generation`] is created by a rebuild and shared through an `Arc` by
//! the backend, the scene recorder and every command buffer recorded against
//! it. It is destroyed when the last of those lets go, which after a clean
//! rebuild is the backend itself.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, info};

use pacer_rhi::RhiResult;
use pacer_rhi::buffer::{Buffer, BufferUsage};
use pacer_rhi::command::{CommandBuffer, CommandPool, ImageTransition};
use pacer_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, uniform_buffer_binding, write_uniform_buffer,
};
use pacer_rhi::device::Device;
use pacer_rhi::instance::Instance;
use pacer_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout, PolygonMode};
use pacer_rhi::shader::{Shader, ShaderStage};
use pacer_rhi::swapchain::Swapchain;
use pacer_rhi::vertex::Vertex;

use super::depth_buffer::{DEPTH_FORMAT, DepthBuffer};
use super::mesh_buffers::MeshBuffers;
use crate::ubo::{DrawPushConstants, FrameUniforms};

/// Background color behind the scene.
const CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Stages that read [`DrawPushConstants`].
pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

static NEXT_GENERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Swapchain-sized resources for one rebuild.
///
/// Field order is drop order: the pipeline goes before its layout, the
/// descriptor pool before the set layout, and the swapchain last.
pub struct Generation {
    id: u64,
    device: Arc<Device>,
    pool: Arc<Mutex<CommandPool>>,
    /// One clear-only buffer per image, submitted when a frame has no scene
    /// buffer ready. Recorded reusable so it may be pending more than once.
    release_buffers: Vec<vk::CommandBuffer>,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    descriptor_sets: Vec<vk::DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    _set_layout: DescriptorSetLayout,
    uniform_buffers: Vec<Buffer>,
    depth_buffers: Vec<DepthBuffer>,
    swapchain: Swapchain,
}

/// Inputs for [`Generation::new`] that stay fixed across rebuilds.
pub struct GenerationDesc<'a> {
    pub instance: &'a Instance,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub shader_dir: &'a Path,
    pub polygon_mode: PolygonMode,
    pub prefer_low_latency: bool,
}

impl Generation {
    pub fn new(
        device: Arc<Device>,
        pool: Arc<Mutex<CommandPool>>,
        desc: &GenerationDesc<'_>,
        drawable: vk::Extent2D,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(
            desc.instance,
            device.clone(),
            desc.surface,
            desc.surface_loader,
            drawable,
            desc.prefer_low_latency,
        )?;
        let image_count = swapchain.image_count();
        let extent = swapchain.extent();

        let depth_buffers = (0..image_count)
            .map(|_| DepthBuffer::new(device.clone(), extent))
            .collect::<RhiResult<Vec<_>>>()?;

        let uniform_buffers = (0..image_count)
            .map(|_| {
                Buffer::new(
                    device.clone(),
                    BufferUsage::Uniform,
                    size_of::<FrameUniforms>() as vk::DeviceSize,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[uniform_buffer_binding(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let descriptor_pool = DescriptorPool::for_uniform_buffers(device.clone(), image_count as u32)?;
        let descriptor_sets = descriptor_pool.allocate(&vec![set_layout.handle(); image_count])?;
        for (set, buffer) in descriptor_sets.iter().zip(&uniform_buffers) {
            write_uniform_buffer(&device, *set, 0, buffer.handle());
        }

        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(PUSH_CONSTANT_STAGES)
            .offset(0)
            .size(size_of::<DrawPushConstants>() as u32)];
        let pipeline_layout =
            PipelineLayout::new(device.clone(), &[set_layout.handle()], &push_ranges)?;

        let pipeline = {
            let vertex_shader = Shader::from_spirv_file(
                device.clone(),
                &desc.shader_dir.join("mesh.vert.spv"),
                ShaderStage::Vertex,
                "main",
            )?;
            let fragment_shader = Shader::from_spirv_file(
                device.clone(),
                &desc.shader_dir.join("mesh.frag.spv"),
                ShaderStage::Fragment,
                "main",
            )?;
            GraphicsPipelineBuilder::new()
                .vertex_shader(&vertex_shader)
                .fragment_shader(&fragment_shader)
                .vertex_input(
                    Vertex::binding_description(),
                    &Vertex::attribute_descriptions(),
                )
                .polygon_mode(desc.polygon_mode)
                .color_attachment_format(swapchain.format())
                .depth_attachment_format(DEPTH_FORMAT)
                .build(device.clone(), &pipeline_layout)?
        };

        let mut this = Self {
            id: NEXT_GENERATION_ID.fetch_add(1, Ordering::Relaxed),
            device,
            pool,
            release_buffers: Vec::new(),
            pipeline,
            pipeline_layout,
            descriptor_sets,
            _descriptor_pool: descriptor_pool,
            _set_layout: set_layout,
            uniform_buffers,
            depth_buffers,
            swapchain,
        };

        // Drop frees whatever was allocated if recording fails part way.
        let pool = Arc::clone(&this.pool);
        let guard = pool.lock();
        this.release_buffers = guard.allocate_many(image_count as u32)?;
        for image in 0..image_count {
            let cmd = CommandBuffer::from_handle(this.device.clone(), this.release_buffers[image]);
            cmd.begin_reusable()?;
            this.begin_pass(&cmd, image, false);
            this.end_pass(&cmd, image);
            cmd.end()?;
        }
        drop(guard);

        info!(
            "Swapchain generation {} ready: {}x{}, {} images, {:?}",
            this.id, extent.width, extent.height, image_count, desc.polygon_mode
        );
        Ok(this)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn release_buffer(&self, image: usize) -> vk::CommandBuffer {
        self.release_buffers[image]
    }

    #[inline]
    pub fn pool(&self) -> &Arc<Mutex<CommandPool>> {
        &self.pool
    }

    pub fn write_uniforms(&self, image: usize, uniforms: &FrameUniforms) -> RhiResult<()> {
        self.uniform_buffers[image].write(uniforms)
    }

    /// Records the scene pass for `image` into `cmd`.
    ///
    /// The caller holds the command pool lock for the whole call.
    pub fn record_scene(
        &self,
        cmd: &CommandBuffer,
        image: usize,
        mesh: &MeshBuffers,
        draws: &[DrawPushConstants],
    ) -> RhiResult<()> {
        cmd.begin()?;
        self.begin_pass(cmd, image, true);

        cmd.bind_graphics_pipeline(self.pipeline.handle());
        cmd.bind_descriptor_sets(
            self.pipeline_layout.handle(),
            0,
            &[self.descriptor_sets[image]],
        );
        cmd.bind_vertex_buffer(mesh.vertex_buffer());
        cmd.bind_index_buffer(mesh.index_buffer(), vk::IndexType::UINT32);
        for draw in draws {
            cmd.push_constants(self.pipeline_layout.handle(), PUSH_CONSTANT_STAGES, draw);
            cmd.draw_indexed(mesh.index_count(), 1);
        }

        self.end_pass(cmd, image);
        cmd.end()
    }

    fn begin_pass(&self, cmd: &CommandBuffer, image: usize, with_depth: bool) {
        let extent = self.swapchain.extent();
        cmd.transition_image(&ImageTransition::color_to_attachment(
            self.swapchain.image(image),
        ));

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.swapchain.image_view(image))
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            });

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_buffers[image].image_view())
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));

        if with_depth {
            cmd.transition_image(&ImageTransition::depth_to_attachment(
                self.depth_buffers[image].image(),
            ));
            rendering_info = rendering_info.depth_attachment(&depth_attachment);
        }

        cmd.begin_rendering(&rendering_info);
        cmd.set_full_viewport(extent);
    }

    fn end_pass(&self, cmd: &CommandBuffer, image: usize) {
        cmd.end_rendering();
        cmd.transition_image(&ImageTransition::color_to_present(
            self.swapchain.image(image),
        ));
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.pool.lock().free(&self.release_buffers);
        self.release_buffers.clear();
        debug!("Swapchain generation {} destroyed", self.id);
    }
}
