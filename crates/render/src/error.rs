//! Error types for the render core.

use thiserror::Error;

use pacer_rhi::RhiError;

/// Errors surfaced by the renderer.
///
/// Transient presentation problems never show up here; they are reported as
/// [`FrameStatus`](crate::FrameStatus) values and handled by a rebuild.
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU API failure outside the recoverable presentation results
    #[error("GPU error: {0}")]
    Rhi(#[from] RhiError),

    /// Window or surface setup failure
    #[error("Platform error: {0}")]
    Platform(#[from] pacer_core::Error),

    /// A swapchain rebuild step failed; the session cannot continue
    #[error("Swapchain rebuild failed: {0}")]
    RebuildFailed(String),

    /// A previous rebuild failed and the renderer no longer draws frames
    #[error("Renderer halted after a failed rebuild")]
    Halted,

    /// The command buffer worker thread could not be spawned
    #[error("Failed to spawn command buffer worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// `start` was called while a worker is still running
    #[error("Command buffer worker is already running")]
    WorkerRunning,
}

impl RenderError {
    /// True when the surface had no area at swapchain creation. The rebuild
    /// is retried once the surface has a size again.
    pub fn is_empty_surface(&self) -> bool {
        matches!(self, RenderError::Rhi(RhiError::EmptySurface))
    }
}

/// Result type alias for render operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
