//! Uniform data shared by every draw of a frame.
//!
//! The layout matches the `FrameData` uniform block in `shaders/mesh.vert`
//! and `shaders/mesh.frag` (std140).

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use pacer_scene::{DirectionalLight, SharedCamera};

/// Camera and light data for one frame.
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Offset 128: view-projection matrix (64 bytes)
/// - Offset 192: camera position, w unused (16 bytes)
/// - Offset 208: directional light (32 bytes)
/// - Total size: 240 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec4,
    pub light: DirectionalLight,
}

impl FrameUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3, light: DirectionalLight) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position: camera_position.extend(1.0),
            light,
        }
    }

    /// Reads the camera once. Each matrix is read under its own lock, so
    /// concurrent camera updates may mix values from adjacent updates.
    pub fn from_camera(camera: &SharedCamera, light: DirectionalLight) -> Self {
        Self::new(
            camera.view_matrix(),
            camera.projection_matrix(),
            camera.position(),
            light,
        )
    }
}

/// Per-draw data pushed with push constants.
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: base color (16 bytes)
/// - Offset 80: shading factor plus padding (16 bytes)
/// - Total size: 96 bytes, under the guaranteed 128-byte minimum
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub model: Mat4,
    pub base_color: Vec4,
    pub shading: f32,
    pub _padding: [f32; 3],
}

impl DrawPushConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, base_color: Vec4, shading: f32) -> Self {
        Self {
            model,
            base_color,
            shading,
            _padding: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_scene::Camera;

    #[test]
    fn test_frame_uniforms_layout() {
        assert_eq!(FrameUniforms::SIZE, 240);
        assert_eq!(std::mem::align_of::<FrameUniforms>(), 16);
        assert_eq!(std::mem::offset_of!(FrameUniforms, light), 208);
    }

    #[test]
    fn test_push_constants_fit_minimum_range() {
        assert_eq!(DrawPushConstants::SIZE, 96);
        assert!(DrawPushConstants::SIZE <= 128);
    }

    #[test]
    fn test_from_camera() {
        let camera = SharedCamera::new(Camera::default());
        let uniforms = FrameUniforms::from_camera(&camera, DirectionalLight::default());

        let snapshot = camera.snapshot();
        assert_eq!(uniforms.view, snapshot.view_matrix());
        assert_eq!(
            uniforms.view_projection,
            snapshot.projection_matrix() * snapshot.view_matrix()
        );
        assert_eq!(uniforms.camera_position, snapshot.position.extend(1.0));
    }
}
