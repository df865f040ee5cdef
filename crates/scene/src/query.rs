//! Read-only view of the scene used while encoding draw calls.
//!
//! The command buffer worker holds an `Arc<dyn SceneQuery>` and calls it from
//! its own thread, so implementations must be safe to read concurrently with
//! application updates.

use std::collections::HashMap;

use glam::{Vec3, Vec4};
use parking_lot::RwLock;

use crate::camera::SharedCamera;
use crate::frustum::Frustum;
use crate::transform::Transform;

/// Identifies a loaded model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

/// Surface parameters for one instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub base_color: Vec4,
    /// Blend between flat color and lit color
    pub shading: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            shading: 1.0,
        }
    }
}

impl Material {
    pub fn with_color(base_color: Vec4) -> Self {
        Self {
            base_color,
            ..Self::default()
        }
    }
}

/// One placement of a model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawInstance {
    pub transform: Transform,
    pub visible: bool,
    pub material: Material,
}

impl DrawInstance {
    pub fn new(transform: Transform, material: Material) -> Self {
        Self {
            transform,
            visible: true,
            material,
        }
    }
}

/// Scene queries issued by command buffer encoding.
pub trait SceneQuery: Send + Sync {
    /// Calls `f` for every instance of `model`, visible or not.
    fn for_each_drawable_instance(&self, model: ModelId, f: &mut dyn FnMut(&DrawInstance));

    /// Whether a point lies in the current view frustum.
    fn is_in_frustum(&self, position: Vec3) -> bool;
}

/// In-memory scene: a set of instances per model plus the active camera.
pub struct Scene {
    instances: RwLock<HashMap<ModelId, Vec<DrawInstance>>>,
    camera: SharedCamera,
    cull_radius: f32,
}

impl Scene {
    /// Default bounding radius around each instance origin used for culling.
    pub const DEFAULT_CULL_RADIUS: f32 = 1.0;

    pub fn new(camera: SharedCamera) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            camera,
            cull_radius: Self::DEFAULT_CULL_RADIUS,
        }
    }

    pub fn with_cull_radius(mut self, radius: f32) -> Self {
        self.cull_radius = radius.max(0.0);
        self
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    /// Adds an instance and returns its index within the model.
    pub fn add_instance(&self, model: ModelId, instance: DrawInstance) -> usize {
        let mut instances = self.instances.write();
        let list = instances.entry(model).or_default();
        list.push(instance);
        list.len() - 1
    }

    /// Applies `f` to one instance. Returns false if it does not exist.
    pub fn update_instance(
        &self,
        model: ModelId,
        index: usize,
        f: impl FnOnce(&mut DrawInstance),
    ) -> bool {
        let mut instances = self.instances.write();
        match instances.get_mut(&model).and_then(|list| list.get_mut(index)) {
            Some(instance) => {
                f(instance);
                true
            }
            None => false,
        }
    }

    pub fn instance_count(&self, model: ModelId) -> usize {
        self.instances.read().get(&model).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.instances.write().clear();
    }
}

impl SceneQuery for Scene {
    fn for_each_drawable_instance(&self, model: ModelId, f: &mut dyn FnMut(&DrawInstance)) {
        let instances = self.instances.read();
        if let Some(list) = instances.get(&model) {
            list.iter().for_each(|instance| f(instance));
        }
    }

    fn is_in_frustum(&self, position: Vec3) -> bool {
        let view_proj = {
            let camera = self.camera.snapshot();
            camera.view_projection_matrix()
        };
        Frustum::from_view_projection(view_proj).contains_sphere(position, self.cull_radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    const CUBE: ModelId = ModelId(0);

    fn scene() -> Scene {
        Scene::new(SharedCamera::new(Camera::default()))
    }

    #[test]
    fn test_instances_are_visited_in_order() {
        let scene = scene();
        for x in 0..3 {
            let transform = Transform::new().with_position(Vec3::new(x as f32, 0.0, 0.0));
            scene.add_instance(CUBE, DrawInstance::new(transform, Material::default()));
        }

        let mut xs = Vec::new();
        scene.for_each_drawable_instance(CUBE, &mut |i| xs.push(i.transform.position.x));
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
        assert_eq!(scene.instance_count(ModelId(7)), 0);
    }

    #[test]
    fn test_update_instance() {
        let scene = scene();
        let index = scene.add_instance(
            CUBE,
            DrawInstance::new(Transform::new(), Material::default()),
        );
        assert!(scene.update_instance(CUBE, index, |i| i.visible = false));
        assert!(!scene.update_instance(CUBE, index + 1, |i| i.visible = false));

        let mut visible = Vec::new();
        scene.for_each_drawable_instance(CUBE, &mut |i| visible.push(i.visible));
        assert_eq!(visible, vec![false]);
    }

    #[test]
    fn test_frustum_follows_camera() {
        let scene = scene();
        assert!(scene.is_in_frustum(Vec3::ZERO));
        assert!(!scene.is_in_frustum(Vec3::new(0.0, 0.0, 50.0)));

        scene.camera().update(|c| {
            c.position = Vec3::new(0.0, 0.0, 60.0);
            c.target = Vec3::new(0.0, 0.0, 100.0);
        });
        assert!(!scene.is_in_frustum(Vec3::ZERO));
        assert!(scene.is_in_frustum(Vec3::new(0.0, 0.0, 80.0)));
    }

    #[test]
    fn test_scene_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Scene>();
    }
}
