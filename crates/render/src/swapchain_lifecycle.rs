//! Teardown and rebuild of everything sized to the swapchain.
//!
//! ```text
//! Active ──request──▶ Invalidating ──stop worker──▶ Rebuilding ──restart──▶ Active
//!                          │                            │
//!                    (empty surface:                (any step fails)
//!                     stay, retry later)                ▼
//!                                                     Failed
//! ```
//!
//! Teardown never waits on the device without a bound. Every frame slot
//! fence is waited for at most the worker stop timeout first; a GPU that
//! does not finish in time fails the rebuild instead of hanging it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use pacer_platform::SurfaceState;
use pacer_scene::SharedCamera;

use crate::backend::{Extent, FenceWait, GpuBackend, SwapchainInfo};
use crate::command_queue::CommandBufferQueue;
use crate::error::{RenderError, RenderResult};
use crate::frame_pacer::FramePacer;

/// Where the swapchain currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Frames are being rendered against a live generation.
    Active,
    /// A rebuild was requested and has not completed.
    Invalidating,
    /// Old objects are being destroyed and new ones created.
    Rebuilding,
    /// A rebuild failed; no further frames are attempted.
    Failed,
}

/// Sticky rebuild request flag.
///
/// Cloneable and safe to set from any thread. Any number of requests before
/// the next rebuild collapse into one.
#[derive(Clone, Debug, Default)]
pub struct RebuildHandle {
    requested: Arc<AtomicBool>,
}

impl RebuildHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::Release);
    }
}

/// Result of a rebuild attempt that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt(SwapchainInfo),
    /// The surface has no area; the request stays pending.
    Deferred,
}

/// Owns the rebuild protocol and the sticky flag that triggers it.
pub struct SwapchainLifecycle {
    state: LifecycleState,
    rebuild: RebuildHandle,
    stop_timeout: Duration,
    current: Option<SwapchainInfo>,
    /// Generations created so far, including the first.
    created: u64,
}

impl SwapchainLifecycle {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            state: LifecycleState::Invalidating,
            rebuild: RebuildHandle::new(),
            stop_timeout,
            current: None,
            created: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Handle for requesting a rebuild from elsewhere.
    pub fn handle(&self) -> RebuildHandle {
        self.rebuild.clone()
    }

    pub fn is_rebuild_requested(&self) -> bool {
        self.rebuild.is_requested()
    }

    /// Current generation, if one exists.
    pub fn current(&self) -> Option<SwapchainInfo> {
        self.current
    }

    /// Completed rebuilds, not counting the initial creation.
    pub fn rebuild_count(&self) -> u64 {
        self.created.saturating_sub(1)
    }

    /// Runs the rebuild protocol once.
    ///
    /// Also used for the initial creation, when there is no old generation
    /// and no running worker. Requests raised while this runs are absorbed
    /// into it. On failure the lifecycle enters [`LifecycleState::Failed`].
    pub fn rebuild<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        queue: &mut CommandBufferQueue<B::CommandBuffer>,
        pacer: &mut FramePacer<B::CommandBuffer>,
        surface: &SurfaceState,
        camera: &SharedCamera,
    ) -> RenderResult<RebuildOutcome> {
        if self.state == LifecycleState::Failed {
            return Err(RenderError::Halted);
        }
        self.state = LifecycleState::Invalidating;

        // Resizes observed up to here are covered by this rebuild.
        surface.take_dirty();
        let size = surface.drawable_size();
        if size.is_empty() {
            debug!("Surface has no area, deferring swapchain rebuild");
            self.rebuild.request();
            return Ok(RebuildOutcome::Deferred);
        }

        match self.run(backend, queue, pacer, Extent::new(size.width, size.height), camera) {
            Ok(info) => {
                self.created += 1;
                self.current = Some(info);
                self.rebuild.clear();
                self.state = LifecycleState::Active;
                info!(
                    "Swapchain ready: {}x{}, {} image(s)",
                    info.extent.width, info.extent.height, info.image_count
                );
                Ok(RebuildOutcome::Rebuilt(info))
            }
            // The surface can report no area before the window system tells
            // us about a minimize.
            Err(e) if e.is_empty_surface() => {
                debug!("Surface reported an empty extent, deferring swapchain rebuild");
                self.state = LifecycleState::Invalidating;
                self.current = None;
                self.rebuild.request();
                Ok(RebuildOutcome::Deferred)
            }
            Err(e) => {
                error!("Swapchain rebuild failed, halting rendering: {}", e);
                self.state = LifecycleState::Failed;
                self.current = None;
                Err(match e {
                    RenderError::RebuildFailed(_) => e,
                    other => RenderError::RebuildFailed(other.to_string()),
                })
            }
        }
    }

    /// Stops the worker and releases every command buffer and the swapchain.
    ///
    /// If the GPU does not finish in time, submitted buffers and the
    /// swapchain are left alive rather than destroyed under a running queue.
    pub fn teardown<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        queue: &mut CommandBufferQueue<B::CommandBuffer>,
        pacer: &mut FramePacer<B::CommandBuffer>,
    ) -> RenderResult<()> {
        let result = self.release_generation(backend, queue, pacer);
        match &result {
            Ok(()) => backend.destroy_swapchain(),
            Err(e) => warn!("Leaving the swapchain alive: {}", e),
        }
        self.current = None;
        result
    }

    fn run<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        queue: &mut CommandBufferQueue<B::CommandBuffer>,
        pacer: &mut FramePacer<B::CommandBuffer>,
        drawable: Extent,
        camera: &SharedCamera,
    ) -> RenderResult<SwapchainInfo> {
        debug!(
            "Rebuilding swapchain for {}x{}",
            drawable.width, drawable.height
        );

        self.state = LifecycleState::Rebuilding;
        self.release_generation(backend, queue, pacer)?;
        backend.destroy_swapchain();

        let info = backend.create_swapchain(drawable)?;
        if info.extent.is_empty() || info.image_count == 0 {
            return Err(RenderError::RebuildFailed(format!(
                "backend created an unusable swapchain: {}x{}, {} image(s)",
                info.extent.width, info.extent.height, info.image_count
            )));
        }

        camera.set_aspect_ratio(info.extent.width as f32 / info.extent.height as f32);
        pacer.on_swapchain_rebuilt(info.image_count);

        let factory = backend.command_factory()?;
        queue.start(factory, info.image_count)?;
        Ok(info)
    }

    /// Stops the worker, waits for the GPU and destroys every command
    /// buffer of the current generation.
    ///
    /// Fails without destroying submitted buffers when a frame slot fence
    /// stays unsignaled past the stop timeout.
    fn release_generation<B: GpuBackend>(
        &self,
        backend: &mut B,
        queue: &mut CommandBufferQueue<B::CommandBuffer>,
        pacer: &mut FramePacer<B::CommandBuffer>,
    ) -> RenderResult<()> {
        let stopped = queue.stop(self.stop_timeout);
        if !stopped.clean {
            warn!("Continuing rebuild with a detached command buffer worker");
            backend.worker_detached();
        }

        // Queued and recycled buffers are not pending on the GPU.
        let drained = stopped.drained.len();
        for cmd in stopped.drained {
            backend.destroy_command_buffer(cmd);
        }

        for frame in 0..backend.frames_in_flight() {
            if backend.wait_for_fence(frame, self.stop_timeout)? == FenceWait::TimedOut {
                return Err(RenderError::RebuildFailed(format!(
                    "frame slot {} did not finish within {:?}",
                    frame, self.stop_timeout
                )));
            }
        }
        // Every submission has completed, so this returns promptly.
        backend.wait_idle()?;

        let released = pacer.release_all();
        let count = drained + released.len();
        for cmd in released {
            backend.destroy_command_buffer(cmd);
        }
        debug!("Destroyed {} command buffer(s) of the old generation", count);
        Ok(())
    }
}
