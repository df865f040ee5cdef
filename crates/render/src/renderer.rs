//! The render-loop facing entry point.
//!
//! [`Renderer`] ties a [`GpuBackend`] to the command buffer worker, the frame
//! pacer and the swapchain lifecycle. The application calls
//! [`Renderer::render_frame`] once per loop iteration.

use std::sync::Arc;

use tracing::{debug, error, info};

use pacer_core::RendererConfig;
use pacer_platform::SurfaceState;
use pacer_scene::{DirectionalLight, SharedCamera};

use crate::backend::{GpuBackend, SwapchainInfo};
use crate::command_queue::CommandBufferQueue;
use crate::error::{RenderError, RenderResult};
use crate::frame_pacer::{FramePacer, FrameStats, FrameStatus, PacingLimits};
use crate::swapchain_lifecycle::{
    LifecycleState, RebuildHandle, RebuildOutcome, SwapchainLifecycle,
};
use crate::ubo::FrameUniforms;

/// Frame pacing, background command buffer production and swapchain
/// rebuilds behind one handle.
pub struct Renderer<B: GpuBackend> {
    queue: CommandBufferQueue<B::CommandBuffer>,
    pacer: FramePacer<B::CommandBuffer>,
    lifecycle: SwapchainLifecycle,
    surface: Arc<SurfaceState>,
    camera: SharedCamera,
    light: DirectionalLight,
    shut_down: bool,
    // Dropped last, after the worker and every buffer recorded against it.
    backend: B,
}

impl<B: GpuBackend> Renderer<B> {
    /// Creates the first swapchain generation and starts the worker.
    ///
    /// # Errors
    ///
    /// Fails if the surface has no area or the generation cannot be built.
    pub fn new(
        backend: B,
        surface: Arc<SurfaceState>,
        camera: SharedCamera,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let frames_in_flight = backend.frames_in_flight();
        let mut renderer = Self {
            queue: CommandBufferQueue::new(config.max_queued_per_image),
            pacer: FramePacer::new(frames_in_flight, PacingLimits::from_config(config)),
            lifecycle: SwapchainLifecycle::new(config.worker_stop_timeout()),
            surface,
            camera,
            light: DirectionalLight::default(),
            shut_down: false,
            backend,
        };

        match renderer.rebuild()? {
            RebuildOutcome::Rebuilt(_) => {}
            RebuildOutcome::Deferred => {
                return Err(RenderError::RebuildFailed(
                    "surface has no area at startup".to_string(),
                ));
            }
        }

        info!(
            "Renderer initialized with {} frame(s) in flight",
            frames_in_flight
        );
        Ok(renderer)
    }

    /// Renders one frame, or rebuilds the swapchain if that is pending.
    ///
    /// Bounded in time apart from the device-idle wait of a rebuild.
    /// Returns [`RenderError::Halted`] once a rebuild has failed.
    pub fn render_frame(&mut self) -> RenderResult<FrameStatus> {
        if self.shut_down || self.lifecycle.state() == LifecycleState::Failed {
            return Err(RenderError::Halted);
        }

        if self.surface.take_dirty() {
            debug!("Surface changed, requesting swapchain rebuild");
            self.lifecycle.handle().request();
        }

        if self.lifecycle.is_rebuild_requested() {
            return match self.rebuild()? {
                RebuildOutcome::Rebuilt(_) => Ok(FrameStatus::Rebuilt),
                RebuildOutcome::Deferred => Ok(FrameStatus::Deferred),
            };
        }

        let uniforms = FrameUniforms::from_camera(&self.camera, self.light);
        let rebuild = self.lifecycle.handle();
        self.pacer
            .render_frame(&mut self.backend, &self.queue, &uniforms, &rebuild)
    }

    /// Requests a rebuild before the next frame. Repeated calls coalesce.
    pub fn request_rebuild(&self) {
        self.lifecycle.handle().request();
    }

    /// Handle for requesting rebuilds from other code or threads.
    pub fn rebuild_handle(&self) -> RebuildHandle {
        self.lifecycle.handle()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn swapchain_info(&self) -> Option<SwapchainInfo> {
        self.lifecycle.current()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.lifecycle.rebuild_count()
    }

    pub fn stats(&self) -> FrameStats {
        self.pacer.stats()
    }

    pub fn set_light(&mut self, light: DirectionalLight) {
        self.light = light;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access for settings that take effect on the next
    /// rebuild.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Drains the worker and releases every GPU object of the current
    /// generation. Further frames return [`RenderError::Halted`].
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!("Shutting down renderer");
        self.lifecycle
            .teardown(&mut self.backend, &mut self.queue, &mut self.pacer)
    }

    fn rebuild(&mut self) -> RenderResult<RebuildOutcome> {
        self.lifecycle.rebuild(
            &mut self.backend,
            &mut self.queue,
            &mut self.pacer,
            &self.surface,
            &self.camera,
        )
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Renderer shutdown failed: {}", e);
        }
    }
}
