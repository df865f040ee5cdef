//! Frame pacing, background command buffer production and swapchain
//! lifecycle management.
//!
//! - [`CommandBufferQueue`] keeps pre-recorded command buffers per swapchain
//!   image, produced by a worker thread
//! - [`FramePacer`] runs one frame: bounded fence waits, acquire, submit
//!   and present, with deferred destruction of retired buffers
//! - [`SwapchainLifecycle`] coalesces rebuild requests and replaces the
//!   swapchain generation in a fixed order
//! - [`Renderer`] ties them to a [`GpuBackend`]; [`vulkan::VulkanBackend`]
//!   is the production backend

pub mod backend;
pub mod command_queue;
pub mod deletion_queue;
mod error;
pub mod frame_pacer;
pub mod mesh;
mod renderer;
pub mod swapchain_lifecycle;
pub mod ubo;
pub mod vulkan;

pub use backend::{
    AcquireOutcome, Extent, FenceWait, GpuBackend, PresentOutcome, SwapchainInfo,
};
pub use command_queue::{CommandBufferFactory, CommandBufferQueue, StopOutcome};
pub use deletion_queue::{DeletionQueue, FrameTickets};
pub use error::{RenderError, RenderResult};
pub use frame_pacer::{FramePacer, FrameStats, FrameStatus, PacingLimits, SkipReason};
pub use mesh::MeshData;
pub use renderer::Renderer;
pub use swapchain_lifecycle::{LifecycleState, RebuildHandle, RebuildOutcome, SwapchainLifecycle};
pub use ubo::{DrawPushConstants, FrameUniforms};
