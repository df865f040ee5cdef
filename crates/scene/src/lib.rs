//! Scene state read by the renderer.
//!
//! This crate provides:
//! - A camera and a thread-safe handle to it
//! - Light definitions
//! - Object transforms
//! - The read-only scene query used while encoding draw calls
//! - Frustum culling

pub mod camera;
pub mod frustum;
pub mod light;
pub mod query;
pub mod transform;

pub use camera::{Camera, SharedCamera};
pub use frustum::Frustum;
pub use light::DirectionalLight;
pub use query::{DrawInstance, Material, ModelId, Scene, SceneQuery};
pub use transform::Transform;
