//! Platform layer for the frame pacer.
//!
//! This crate provides:
//! - Window management via winit
//! - Presentation surface creation and the shared surface state
//! - Input handling for the orbit camera

mod input;
mod surface_state;
mod window;

pub use input::{FrameInput, InputState, KeyCode, MouseButton};
pub use surface_state::{DrawableSize, SurfaceState};
pub use window::{Surface, Window, required_extensions};

pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
