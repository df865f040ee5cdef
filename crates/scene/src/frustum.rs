//! View frustum planes for sphere culling.

use glam::{Mat4, Vec3, Vec4};

/// Six planes extracted from a view-projection matrix.
///
/// Planes point inward; a point is inside when every plane distance is
/// non-negative. Depth uses the [0, 1] range of `Mat4::perspective_rh`.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
            let len = p.truncate().length();
            if len > 0.0 { p / len } else { p }
        });

        Self { planes }
    }

    /// Whether a sphere at `center` with `radius` touches the frustum.
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    fn frustum() -> Frustum {
        Frustum::from_view_projection(Camera::default().view_projection_matrix())
    }

    #[test]
    fn test_point_in_front_is_inside() {
        assert!(frustum().contains_sphere(Vec3::ZERO, 0.5));
    }

    #[test]
    fn test_point_behind_is_outside() {
        assert!(!frustum().contains_sphere(Vec3::new(0.0, 0.0, 20.0), 0.5));
    }

    #[test]
    fn test_far_side_is_outside() {
        assert!(!frustum().contains_sphere(Vec3::new(500.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn test_radius_reaches_across_plane() {
        // Just behind the camera, but a large sphere still overlaps the near plane.
        let f = frustum();
        assert!(!f.contains_sphere(Vec3::new(0.0, 0.0, 5.5), 0.1));
        assert!(f.contains_sphere(Vec3::new(0.0, 0.0, 5.5), 2.0));
    }
}
