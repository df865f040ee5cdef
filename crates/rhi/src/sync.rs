//! Synchronization primitives for Vulkan.
//!
//! - [`Semaphore`] orders queue operations on the GPU
//! - [`Fence`] lets the host observe GPU completion, always with a bounded wait
//! - [`FrameSync`] groups the objects owned by one frame slot
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pacer_rhi::device::Device;
//! use pacer_rhi::sync::Fence;
//!
//! # fn example(device: Arc<Device>) -> Result<(), pacer_rhi::RhiError> {
//! let fence = Fence::new(device, true)?;
//! if !fence.wait_timeout(Duration::from_millis(100))? {
//!     // GPU still busy, try again later
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan semaphore wrapper.
///
/// Created unsignaled. Used between image acquisition, submission and
/// presentation.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if self.semaphore != vk::Semaphore::null() {
            unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
            self.semaphore = vk::Semaphore::null();
        }
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence, optionally already signaled.
    ///
    /// Frame slot fences start signaled so the first wait returns at once.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits up to `timeout` for the fence.
    ///
    /// Returns `Ok(true)` once signaled and `Ok(false)` on timeout. Device
    /// loss and other failures are errors.
    pub fn wait_timeout(&self, timeout: Duration) -> RhiResult<bool> {
        let fences = [self.fence];
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);

        match unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout_ns)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resets the fence to unsignaled.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if self.fence != vk::Fence::null() {
            unsafe { self.device.handle().destroy_fence(self.fence, None) };
            self.fence = vk::Fence::null();
        }
    }
}

/// Synchronization objects owned by one frame slot.
///
/// ```text
/// 1. wait in_flight_fence (bounded)
/// 2. acquire image, signaling image_available
/// 3. reset in_flight_fence, submit waiting on image_available,
///    signaling render_finished and in_flight_fence
/// 4. present waiting on render_finished
/// ```
///
/// The fence lives as long as the slot. Semaphores are replaced on every
/// swapchain rebuild because an aborted acquire can leave one signaled
/// with no submission waiting on it.
pub struct FrameSync {
    device: Arc<Device>,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight_fence: Fence,
}

impl FrameSync {
    /// Creates the slot's objects with the fence signaled.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight_fence = Fence::new(device.clone(), true)?;

        Ok(Self {
            device,
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Replaces both semaphores with fresh unsignaled ones.
    ///
    /// The device must be idle.
    pub fn recreate_semaphores(&mut self) -> RhiResult<()> {
        self.image_available = Semaphore::new(self.device.clone())?;
        self.render_finished = Semaphore::new(self.device.clone())?;
        debug!("Frame slot semaphores recreated");
        Ok(())
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight_fence
    }
}
