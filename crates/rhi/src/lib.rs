//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides safe wrappers over Vulkan using the `ash` crate.
//! It handles:
//! - Instance creation and physical device scoring
//! - Logical device and queue creation
//! - Swapchain creation and parameter selection
//! - Fences and semaphores with bounded waits
//! - Command pools and command buffer recording
//! - Buffers, descriptors, shaders and graphics pipelines

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
