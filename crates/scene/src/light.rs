//! Light definitions.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A directional light (sun-like), laid out for std140 uniforms.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    /// Direction the light travels (normalized)
    pub direction: Vec3,
    /// Ambient term added to every fragment
    pub ambient: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            ambient: 0.08,
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}
