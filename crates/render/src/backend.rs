//! The seam between frame pacing and a concrete GPU API.
//!
//! [`FramePacer`](crate::FramePacer) and the swapchain lifecycle only talk to
//! a [`GpuBackend`]. The Vulkan implementation lives in [`crate::vulkan`];
//! tests drive the same code against a recording mock.

use std::sync::Arc;
use std::time::Duration;

use crate::command_queue::CommandBufferFactory;
use crate::error::RenderResult;
use crate::ubo::FrameUniforms;

/// Size of a swapchain or drawable surface in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Result of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// Result of requesting the next presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image-acquired semaphore of the frame slot will be signaled.
    Acquired { image: usize, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
    /// No image became available within the timeout.
    NotReady,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Properties of a freshly created swapchain generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: Extent,
    pub image_count: usize,
}

/// Operations the render core needs from a GPU API.
///
/// Frame slots (fence plus semaphores) live as long as the backend. Swapchain
/// images and everything sized to them belong to one generation that is
/// replaced by [`destroy_swapchain`](Self::destroy_swapchain) followed by
/// [`create_swapchain`](Self::create_swapchain).
pub trait GpuBackend {
    /// A recorded, submittable command buffer.
    type CommandBuffer: Send + 'static;

    fn frames_in_flight(&self) -> usize;

    /// Waits up to `timeout` for the fence of `frame`.
    fn wait_for_fence(&mut self, frame: usize, timeout: Duration) -> RenderResult<FenceWait>;

    /// Acquires an image, signaling the image-acquired semaphore of `frame`.
    fn acquire_next_image(&mut self, frame: usize) -> RenderResult<AcquireOutcome>;

    /// Copies uniforms into the buffer read by command buffers for `image`.
    ///
    /// Callers ensure no pending submission still reads that buffer.
    fn write_uniforms(&mut self, image: usize, uniforms: &FrameUniforms) -> RenderResult<()>;

    /// Resets the fence of `frame` and submits `cmd`, waiting on the
    /// image-acquired semaphore and signaling render-finished and the fence.
    fn submit(
        &mut self,
        frame: usize,
        image: usize,
        cmd: &Self::CommandBuffer,
    ) -> RenderResult<()>;

    /// Presents `image` after the render-finished semaphore of `frame`.
    fn present(&mut self, frame: usize, image: usize) -> RenderResult<PresentOutcome>;

    /// Hands an acquired image back without drawing the scene.
    ///
    /// Consumes the image-acquired semaphore and returns the image to the
    /// presentation engine. Signals the fence of `frame` like a submission.
    fn release_image(&mut self, frame: usize, image: usize) -> RenderResult<PresentOutcome>;

    /// Frees a command buffer. The caller guarantees it is not pending.
    fn destroy_command_buffer(&mut self, cmd: Self::CommandBuffer);

    /// Blocks until the device has finished all submitted work.
    ///
    /// Only called once every frame slot fence has been seen signaled.
    fn wait_idle(&mut self) -> RenderResult<()>;

    /// The command buffer worker did not exit in time and still holds
    /// objects of the current generation.
    ///
    /// The backend must keep whatever the worker references alive for the
    /// rest of the process instead of destroying it later in the wrong order.
    fn worker_detached(&mut self) {}

    /// Destroys the current swapchain generation. Safe to call twice.
    fn destroy_swapchain(&mut self);

    /// Creates a new generation for `drawable` and fresh frame-slot
    /// semaphores.
    fn create_swapchain(&mut self, drawable: Extent) -> RenderResult<SwapchainInfo>;

    /// Factory recording command buffers against the current generation.
    fn command_factory(
        &self,
    ) -> RenderResult<Arc<dyn CommandBufferFactory<Self::CommandBuffer>>>;
}
