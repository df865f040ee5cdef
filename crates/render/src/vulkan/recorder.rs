//! Scene command buffers recorded on the worker thread.

use std::sync::Arc;

use ash::vk;
use tracing::{trace, warn};

use pacer_rhi::command::CommandBuffer;
use pacer_rhi::device::Device;
use pacer_scene::{ModelId, SceneQuery};

use super::generation::Generation;
use super::mesh_buffers::MeshBuffers;
use crate::command_queue::CommandBufferFactory;
use crate::ubo::DrawPushConstants;

/// A recorded scene buffer for one swapchain image.
///
/// Keeps its generation alive so the images, pipeline and descriptor sets it
/// references outlive it.
pub struct VulkanCommandBuffer {
    handle: vk::CommandBuffer,
    image: usize,
    generation: Arc<Generation>,
}

impl VulkanCommandBuffer {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    #[inline]
    pub fn image(&self) -> usize {
        self.image
    }

    #[inline]
    pub fn generation_id(&self) -> u64 {
        self.generation.id()
    }

    /// Returns the buffer to its pool. It must not be pending.
    ///
    /// Runs on the worker, or on the render thread while the worker is
    /// stopped.
    pub fn free(self) {
        self.generation.pool().lock().free(&[self.handle]);
    }
}

/// Records every visible instance of one model.
pub struct SceneRecorder {
    device: Arc<Device>,
    generation: Arc<Generation>,
    mesh: Arc<MeshBuffers>,
    scene: Arc<dyn SceneQuery>,
    model: ModelId,
}

impl SceneRecorder {
    pub fn new(
        device: Arc<Device>,
        generation: Arc<Generation>,
        mesh: Arc<MeshBuffers>,
        scene: Arc<dyn SceneQuery>,
        model: ModelId,
    ) -> Self {
        Self {
            device,
            generation,
            mesh,
            scene,
            model,
        }
    }

    /// Per-draw constants for instances that are visible and inside the
    /// camera frustum, gathered before the pool lock is taken.
    fn collect_draws(&self) -> Vec<DrawPushConstants> {
        let mut draws = Vec::new();
        self.scene
            .for_each_drawable_instance(self.model, &mut |instance| {
                if instance.visible && self.scene.is_in_frustum(instance.transform.position) {
                    draws.push(DrawPushConstants::new(
                        instance.transform.matrix(),
                        instance.material.base_color,
                        instance.material.shading,
                    ));
                }
            });
        draws
    }
}

impl CommandBufferFactory<VulkanCommandBuffer> for SceneRecorder {
    fn record(&self, image: usize) -> Option<VulkanCommandBuffer> {
        if image >= self.generation.image_count() {
            return None;
        }
        let draws = self.collect_draws();

        let pool = self.generation.pool().lock();
        let handle = match pool.allocate() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to allocate command buffer for image {}: {}", image, e);
                return None;
            }
        };

        let cmd = CommandBuffer::from_handle(self.device.clone(), handle);
        if let Err(e) = self
            .generation
            .record_scene(&cmd, image, &self.mesh, &draws)
        {
            warn!("Failed to record command buffer for image {}: {}", image, e);
            pool.free(&[handle]);
            return None;
        }
        drop(pool);

        trace!("Recorded {} draw(s) for image {}", draws.len(), image);
        Some(VulkanCommandBuffer {
            handle,
            image,
            generation: Arc::clone(&self.generation),
        })
    }

    fn discard(&self, cmd: VulkanCommandBuffer) {
        cmd.free();
    }
}
