//! Vulkan implementation of [`GpuBackend`](crate::GpuBackend).
//!
//! Resources fall into three lifetimes:
//!
//! - backend: instance, surface, device, command pool, frame slots, mesh
//! - generation: swapchain, depth buffers, uniform buffers, descriptor sets,
//!   pipeline and the per-image release buffers
//! - command buffer: one recorded scene pass for one image of one generation
//!
//! Scene buffers are allocated and freed on the worker thread while it runs;
//! used ones come back to it through the queue. The render thread only
//! touches the command pool during a rebuild, with the worker stopped, so
//! the pool mutex is uncontended between rebuilds.

mod backend;
mod depth_buffer;
mod generation;
mod mesh_buffers;
mod recorder;

pub use backend::VulkanBackend;
pub use recorder::{SceneRecorder, VulkanCommandBuffer};
