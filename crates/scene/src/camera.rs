//! Camera and the handle the render path reads it through.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::RwLock;

/// A perspective camera looking at a target point.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the aspect ratio from a drawable size.
    ///
    /// Zero heights are ignored so a minimized window keeps the last ratio.
    pub fn set_aspect_from_size(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Right-handed look-at view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Perspective projection with the Y axis flipped for Vulkan clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Places the camera on a sphere around `target`.
    ///
    /// `yaw` rotates around the Y axis and `pitch` is clamped short of the
    /// poles so the up vector never lines up with the view direction.
    pub fn orbit(&mut self, target: Vec3, radius: f32, yaw: f32, pitch: f32) {
        const PITCH_LIMIT: f32 = 1.5;

        let pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        let offset = Vec3::new(
            radius * pitch.cos() * yaw.sin(),
            radius * pitch.sin(),
            radius * pitch.cos() * yaw.cos(),
        );
        self.target = target;
        self.position = target + offset;
    }
}

/// Camera shared between the application thread and the command buffer
/// worker.
///
/// Readers take a snapshot or a single matrix under a read lock; the
/// application and the swapchain rebuild write through [`SharedCamera::update`]
/// and [`SharedCamera::set_aspect_ratio`].
#[derive(Clone, Debug, Default)]
pub struct SharedCamera {
    inner: Arc<RwLock<Camera>>,
}

impl SharedCamera {
    pub fn new(camera: Camera) -> Self {
        Self {
            inner: Arc::new(RwLock::new(camera)),
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.inner.read().view_matrix()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.inner.read().projection_matrix()
    }

    pub fn position(&self) -> Vec3 {
        self.inner.read().position
    }

    pub fn set_aspect_ratio(&self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.inner.write().aspect = aspect;
        }
    }

    /// Copy of the current camera.
    pub fn snapshot(&self) -> Camera {
        self.inner.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Camera)) {
        f(&mut self.inner.write());
    }
}
