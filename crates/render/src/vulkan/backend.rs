//! [`GpuBackend`] over Vulkan.

use std::mem::{self, ManuallyDrop};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use pacer_core::RendererConfig;
use pacer_platform::{Surface, Window};
use pacer_rhi::RhiError;
use pacer_rhi::command::CommandPool;
use pacer_rhi::device::Device;
use pacer_rhi::instance::Instance;
use pacer_rhi::physical_device::select_physical_device;
use pacer_rhi::pipeline::PolygonMode;
use pacer_rhi::sync::FrameSync;
use pacer_scene::{ModelId, SceneQuery};

use super::generation::{Generation, GenerationDesc};
use super::mesh_buffers::MeshBuffers;
use super::recorder::{SceneRecorder, VulkanCommandBuffer};
use crate::backend::{
    AcquireOutcome, Extent, FenceWait, GpuBackend, PresentOutcome, SwapchainInfo,
};
use crate::command_queue::CommandBufferFactory;
use crate::error::{RenderError, RenderResult};
use crate::mesh::MeshData;
use crate::renderer::Renderer;
use crate::ubo::FrameUniforms;

/// Edge length of the cube every instance draws.
const CUBE_SIZE: f32 = 1.0;

/// Surface and instance, destroyed after everything created from them.
///
/// Skipped entirely once a detached worker may still use the device.
struct VulkanParents {
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
    leaked: bool,
}

impl Drop for VulkanParents {
    fn drop(&mut self) {
        if self.leaked {
            warn!("Leaking the Vulkan surface and instance behind a detached worker");
            return;
        }
        // SAFETY: neither field is used again, and the surface goes first.
        unsafe {
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }
    }
}

/// Vulkan device, frame slots and the current swapchain generation.
///
/// Field order is drop order. The generation and everything allocated from
/// the device go first, then the device, the surface and the instance.
pub struct VulkanBackend {
    generation: Option<Arc<Generation>>,
    mesh: Arc<MeshBuffers>,
    scene: Arc<dyn SceneQuery>,
    model: ModelId,
    pool: Arc<Mutex<CommandPool>>,
    frames: Vec<FrameSync>,
    shader_dir: PathBuf,
    polygon_mode: PolygonMode,
    prefer_low_latency: bool,
    acquire_timeout: Duration,
    device: Arc<Device>,
    parents: VulkanParents,
}

impl VulkanBackend {
    /// Creates the device, frame slots and mesh for `window`.
    ///
    /// No swapchain exists until the first
    /// [`create_swapchain`](GpuBackend::create_swapchain).
    pub fn new(
        window: &Window,
        scene: Arc<dyn SceneQuery>,
        model: ModelId,
        config: &RendererConfig,
        shader_dir: &Path,
    ) -> RenderResult<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(c"pacer", extensions, config.enable_validation)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let pool = Arc::new(Mutex::new(CommandPool::new(
            device.clone(),
            device.queue_family(),
        )?));
        let frames = (0..config.frames_in_flight)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<Result<Vec<_>, RhiError>>()?;
        let mesh = Arc::new(MeshBuffers::upload(
            device.clone(),
            &MeshData::cube(CUBE_SIZE),
        )?);

        info!(
            "Vulkan backend ready: {} frame slot(s), wireframe {}",
            frames.len(),
            if device.wireframe_supported() {
                "supported"
            } else {
                "unsupported"
            }
        );

        Ok(Self {
            generation: None,
            mesh,
            scene,
            model,
            pool,
            frames,
            shader_dir: shader_dir.to_path_buf(),
            polygon_mode: PolygonMode::Fill,
            prefer_low_latency: config.prefer_low_latency,
            acquire_timeout: config.fence_timeout(),
            device,
            parents: VulkanParents {
                surface: ManuallyDrop::new(surface),
                instance: ManuallyDrop::new(instance),
                leaked: false,
            },
        })
    }

    /// Selects line or fill rasterization for the next generation.
    ///
    /// Returns true when the mode changed and a rebuild is needed to apply it.
    pub fn set_wireframe(&mut self, enabled: bool) -> bool {
        let mode = if enabled {
            PolygonMode::Line
        } else {
            PolygonMode::Fill
        };
        if mode == self.polygon_mode {
            return false;
        }
        if enabled && !self.device.wireframe_supported() {
            warn!("Wireframe requested but fillModeNonSolid is not supported");
            return false;
        }
        self.polygon_mode = mode;
        true
    }

    pub fn is_wireframe(&self) -> bool {
        self.polygon_mode == PolygonMode::Line
    }

    fn generation(&self) -> RenderResult<&Arc<Generation>> {
        self.generation.as_ref().ok_or_else(|| {
            RenderError::Rhi(RhiError::SwapchainError(
                "No swapchain has been created".to_string(),
            ))
        })
    }

    fn frame(&self, frame: usize) -> &FrameSync {
        &self.frames[frame % self.frames.len()]
    }

    /// Resets the fence of `frame` and submits `cmd` for `image`.
    fn submit_raw(&self, frame: usize, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let sync = self.frame(frame);
        let wait_semaphores = [sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished()];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        sync.in_flight_fence().reset()?;
        // SAFETY: `cmd` is fully recorded and kept alive by the caller until
        // the fence signals, and the fence was just reset.
        unsafe {
            self.device
                .submit(&[submit_info], sync.in_flight_fence().handle())?;
        }
        Ok(())
    }

    fn present_raw(&self, frame: usize, image: usize) -> RenderResult<PresentOutcome> {
        let generation = self.generation()?;
        let result = generation.swapchain().present(
            self.device.queue(),
            image as u32,
            self.frame(frame).render_finished(),
        );
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RhiError::from(e).into()),
        }
    }
}

impl GpuBackend for VulkanBackend {
    type CommandBuffer = VulkanCommandBuffer;

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn wait_for_fence(&mut self, frame: usize, timeout: Duration) -> RenderResult<FenceWait> {
        if self.frame(frame).in_flight_fence().wait_timeout(timeout)? {
            Ok(FenceWait::Signaled)
        } else {
            Ok(FenceWait::TimedOut)
        }
    }

    fn acquire_next_image(&mut self, frame: usize) -> RenderResult<AcquireOutcome> {
        let generation = self.generation()?;
        let timeout_ns = u64::try_from(self.acquire_timeout.as_nanos()).unwrap_or(u64::MAX);
        match generation
            .swapchain()
            .acquire_next_image(self.frame(frame).image_available(), timeout_ns)
        {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image: image as usize,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireOutcome::NotReady),
            Err(e) => Err(RhiError::from(e).into()),
        }
    }

    fn write_uniforms(&mut self, image: usize, uniforms: &FrameUniforms) -> RenderResult<()> {
        self.generation()?.write_uniforms(image, uniforms)?;
        Ok(())
    }

    fn submit(&mut self, frame: usize, image: usize, cmd: &VulkanCommandBuffer) -> RenderResult<()> {
        let generation = self.generation()?;
        if cmd.generation_id() != generation.id() || cmd.image() != image {
            return Err(RenderError::Rhi(RhiError::SwapchainError(format!(
                "Command buffer for image {} of generation {} submitted to image {} of generation {}",
                cmd.image(),
                cmd.generation_id(),
                image,
                generation.id()
            ))));
        }
        self.submit_raw(frame, cmd.handle())
    }

    fn present(&mut self, frame: usize, image: usize) -> RenderResult<PresentOutcome> {
        self.present_raw(frame, image)
    }

    fn release_image(&mut self, frame: usize, image: usize) -> RenderResult<PresentOutcome> {
        let release = self.generation()?.release_buffer(image);
        self.submit_raw(frame, release)?;
        self.present_raw(frame, image)
    }

    fn destroy_command_buffer(&mut self, cmd: VulkanCommandBuffer) {
        cmd.free();
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    fn worker_detached(&mut self) {
        // The worker's recorder holds the generation, the mesh and the
        // device. None of them may be destroyed while it can still run, and
        // neither may the surface and instance they were created from.
        if let Some(generation) = &self.generation {
            warn!(
                "Leaking swapchain generation {} and the device behind a detached worker",
                generation.id()
            );
            mem::forget(Arc::clone(generation));
        }
        mem::forget(Arc::clone(&self.mesh));
        mem::forget(Arc::clone(&self.device));
        self.parents.leaked = true;
    }

    fn destroy_swapchain(&mut self) {
        if let Some(generation) = self.generation.take() {
            let id = generation.id();
            let others = Arc::strong_count(&generation) - 1;
            if others > 0 {
                warn!(
                    "Swapchain generation {} still referenced {} time(s); destruction deferred",
                    id, others
                );
            }
            drop(generation);
            debug!("Released swapchain generation {}", id);
        }
    }

    fn create_swapchain(&mut self, drawable: Extent) -> RenderResult<SwapchainInfo> {
        // Frame slots keep their fences for the whole session, but their
        // semaphores are replaced here. An acquire abandoned as suboptimal
        // or image-busy leaves image_available signaled with nothing waiting
        // on it, and the device is idle at this point.
        for frame in &mut self.frames {
            frame.recreate_semaphores()?;
        }

        let desc = GenerationDesc {
            instance: &self.parents.instance,
            surface: self.parents.surface.handle(),
            surface_loader: self.parents.surface.loader(),
            shader_dir: &self.shader_dir,
            polygon_mode: self.polygon_mode,
            prefer_low_latency: self.prefer_low_latency,
        };
        let generation = Generation::new(
            self.device.clone(),
            Arc::clone(&self.pool),
            &desc,
            vk::Extent2D {
                width: drawable.width,
                height: drawable.height,
            },
        )?;

        let extent = generation.swapchain().extent();
        let info = SwapchainInfo {
            extent: Extent::new(extent.width, extent.height),
            image_count: generation.image_count(),
        };
        self.generation = Some(Arc::new(generation));
        Ok(info)
    }

    fn command_factory(
        &self,
    ) -> RenderResult<Arc<dyn CommandBufferFactory<VulkanCommandBuffer>>> {
        let generation = Arc::clone(self.generation()?);
        Ok(Arc::new(SceneRecorder::new(
            self.device.clone(),
            generation,
            Arc::clone(&self.mesh),
            Arc::clone(&self.scene),
            self.model,
        )))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during backend drop: {}", e);
        }
        self.generation = None;
        info!("Vulkan backend destroyed");
    }
}

impl Renderer<VulkanBackend> {
    /// Switches between line and fill rasterization.
    ///
    /// The pipeline is rebuilt with the next swapchain generation, so a
    /// rebuild is requested whenever the mode changes.
    pub fn set_wireframe(&mut self, enabled: bool) -> bool {
        let changed = self.backend_mut().set_wireframe(enabled);
        if changed {
            self.request_rebuild();
        }
        changed
    }

    pub fn is_wireframe(&self) -> bool {
        self.backend().is_wireframe()
    }
}
