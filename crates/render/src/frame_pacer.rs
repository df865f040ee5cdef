//! The per-frame wait, acquire, submit and present sequence.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on the frame slot fence (bounded; repeated timeouts request a rebuild)
//! 2. Acquire an image (out of date or suboptimal: request a rebuild, abort)
//! 3. Retire the command buffer last submitted for that image
//! 4. Take the newest ready command buffer for the image (bounded; skip on timeout)
//! 5. Wait on the fence of an older submission still using the image
//! 6. Write the image's uniforms
//! 7. Submit (signals render-finished + fence) and present
//! 8. Present out of date or suboptimal: request a rebuild
//! ```
//!
//! A skipped frame still hands the acquired image back through a release
//! submission, so step 5 runs on that path as well.
//!
//! Buffers the GPU is done with go back to the worker through
//! [`CommandBufferQueue::recycle`] while it runs, so only the worker touches
//! the command pool between rebuilds.
//!
//! Uniform buffers belong to swapchain images because command buffers are
//! recorded per image ahead of time, so the uniform copy happens after the
//! image's older fence has been waited.

use std::time::Duration;

use tracing::{debug, trace, warn};

use pacer_core::RendererConfig;

use crate::backend::{AcquireOutcome, FenceWait, GpuBackend, PresentOutcome};
use crate::command_queue::CommandBufferQueue;
use crate::deletion_queue::{DeletionQueue, FrameTickets};
use crate::error::RenderResult;
use crate::swapchain_lifecycle::RebuildHandle;
use crate::ubo::FrameUniforms;

/// Why a frame produced no new image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The frame slot fence did not signal in time.
    FenceTimeout,
    /// No swapchain image became available.
    NoImage,
    /// No command buffer was ready for the acquired image in time.
    NoCommandBuffer,
    /// An older submission still holds the acquired image.
    ImageBusy,
}

/// Outcome of one `render_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A command buffer was submitted and its image presented.
    Presented,
    /// Nothing new was drawn this iteration.
    Skipped(SkipReason),
    /// The swapchain stopped matching the surface; a rebuild was requested.
    Invalidated,
    /// The swapchain was rebuilt instead of drawing.
    Rebuilt,
    /// A rebuild is pending until the surface has a non-zero size.
    Deferred,
}

/// Counters for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuild_requests: u64,
    pub fence_timeouts: u64,
    /// Ready buffers superseded by a newer one for the same image.
    pub superseded: u64,
}

/// Timeouts used while pacing frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingLimits {
    pub fence_timeout: Duration,
    pub fence_timeout_escalation: u32,
    pub command_wait: Duration,
}

impl PacingLimits {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            fence_timeout: config.fence_timeout(),
            fence_timeout_escalation: config.fence_timeout_escalation.max(1),
            command_wait: config.command_wait(),
        }
    }
}

impl Default for PacingLimits {
    fn default() -> Self {
        Self::from_config(&RendererConfig::default())
    }
}

/// A command buffer and the submission that last used it.
struct Bound<C> {
    cmd: C,
    frame: usize,
    ticket: u64,
}

/// Drives frames through a [`GpuBackend`], consuming the command buffer queue.
///
/// Owns every command buffer between submission and destruction: buffers
/// bound to an image until it is reacquired, then in the deletion queue
/// until their fence is seen signaled.
pub struct FramePacer<C> {
    limits: PacingLimits,
    frames_in_flight: usize,
    current_frame: usize,
    consecutive_timeouts: u32,
    /// Frame slot and ticket of the last submission per image.
    images_in_flight: Vec<Option<(usize, u64)>>,
    bound: Vec<Option<Bound<C>>>,
    deletion: DeletionQueue<C>,
    tickets: FrameTickets,
    stats: FrameStats,
}

impl<C: Send + 'static> FramePacer<C> {
    pub fn new(frames_in_flight: usize, limits: PacingLimits) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            limits,
            frames_in_flight,
            current_frame: 0,
            consecutive_timeouts: 0,
            images_in_flight: Vec::new(),
            bound: Vec::new(),
            deletion: DeletionQueue::new(),
            tickets: FrameTickets::new(frames_in_flight),
            stats: FrameStats::default(),
        }
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Buffers waiting for a fence before destruction.
    pub fn pending_deletions(&self) -> usize {
        self.deletion.len()
    }

    /// Renders one frame. Never blocks longer than the configured waits.
    ///
    /// Presentation problems request a rebuild through `rebuild` and come
    /// back as a [`FrameStatus`]; only device-level failures are errors.
    pub fn render_frame<B>(
        &mut self,
        backend: &mut B,
        queue: &CommandBufferQueue<C>,
        uniforms: &FrameUniforms,
        rebuild: &RebuildHandle,
    ) -> RenderResult<FrameStatus>
    where
        B: GpuBackend<CommandBuffer = C>,
    {
        let frame = self.current_frame;

        match backend.wait_for_fence(frame, self.limits.fence_timeout)? {
            FenceWait::Signaled => {
                self.consecutive_timeouts = 0;
                self.tickets.mark_completed(frame);
                self.collect_garbage(backend, queue);
            }
            FenceWait::TimedOut => {
                self.consecutive_timeouts += 1;
                self.stats.fence_timeouts += 1;
                warn!(
                    "Frame {} fence not signaled within {:?} ({} in a row)",
                    frame, self.limits.fence_timeout, self.consecutive_timeouts
                );
                if self.consecutive_timeouts >= self.limits.fence_timeout_escalation {
                    self.consecutive_timeouts = 0;
                    self.request_rebuild(rebuild, "repeated fence timeouts");
                }
                return Ok(self.skip(SkipReason::FenceTimeout));
            }
        }

        let image = match backend.acquire_next_image(frame)? {
            AcquireOutcome::Acquired {
                image,
                suboptimal: false,
            } if image < self.bound.len() => image,
            AcquireOutcome::Acquired { image, suboptimal } => {
                let reason = if suboptimal {
                    "acquired image is suboptimal"
                } else {
                    "acquired image is not tracked"
                };
                self.request_rebuild(rebuild, reason);
                trace!("Abandoning acquired image {}", image);
                return Ok(FrameStatus::Invalidated);
            }
            AcquireOutcome::OutOfDate => {
                self.request_rebuild(rebuild, "swapchain out of date on acquire");
                return Ok(FrameStatus::Invalidated);
            }
            AcquireOutcome::NotReady => {
                debug!("No swapchain image available for frame {}", frame);
                return Ok(self.skip(SkipReason::NoImage));
            }
        };

        if let Some(previous) = self.bound[image].take() {
            self.deletion
                .retire(previous.cmd, previous.frame, previous.ticket);
        }

        let Some((cmd, stale)) = queue.wait_newest(image, self.limits.command_wait) else {
            warn!(
                "No command buffer ready for image {} within {:?}, skipping frame",
                image, self.limits.command_wait
            );
            if !self.wait_for_image(backend, image, rebuild)? {
                return Ok(self.skip(SkipReason::ImageBusy));
            }
            return self.release(backend, frame, image, rebuild);
        };
        // Superseded buffers were never submitted.
        self.stats.superseded += stale.len() as u64;
        for old in stale {
            dispose(backend, queue, old);
        }

        if !self.wait_for_image(backend, image, rebuild)? {
            dispose(backend, queue, cmd);
            return Ok(self.skip(SkipReason::ImageBusy));
        }

        backend.write_uniforms(image, uniforms)?;

        if let Err(e) = backend.submit(frame, image, &cmd) {
            // A failed submit leaves the buffer unused.
            dispose(backend, queue, cmd);
            return Err(e);
        }
        let ticket = self.tickets.record_submission(frame);
        self.images_in_flight[image] = Some((frame, ticket));
        self.bound[image] = Some(Bound { cmd, frame, ticket });

        let outcome = backend.present(frame, image)?;
        self.advance();
        self.stats.presented += 1;

        if outcome.needs_rebuild() {
            self.request_rebuild(rebuild, present_reason(outcome));
        }
        Ok(FrameStatus::Presented)
    }

    /// Frees every buffer whose fence has been observed signaled.
    pub fn collect_garbage<B>(&mut self, backend: &mut B, queue: &CommandBufferQueue<C>)
    where
        B: GpuBackend<CommandBuffer = C>,
    {
        for cmd in self.deletion.collect(&self.tickets) {
            dispose(backend, queue, cmd);
        }
    }

    /// Hands back every bound and retired buffer.
    ///
    /// Call only after the device went idle; all fences count as signaled.
    pub fn release_all(&mut self) -> Vec<C> {
        self.tickets.mark_all_completed();
        self.images_in_flight.iter_mut().for_each(|slot| *slot = None);

        let mut released = self.deletion.drain_all();
        released.extend(self.bound.iter_mut().filter_map(|b| b.take()).map(|b| b.cmd));
        released
    }

    /// Resizes per-image tracking for a new swapchain generation.
    pub fn on_swapchain_rebuilt(&mut self, image_count: usize) {
        debug_assert!(self.bound.iter().all(Option::is_none));
        self.images_in_flight = vec![None; image_count];
        self.bound = (0..image_count).map(|_| None).collect();
        self.consecutive_timeouts = 0;
        debug!(
            "Frame pacer tracking {} image(s) across {} frame slot(s)",
            image_count, self.frames_in_flight
        );
    }

    /// Waits for an older submission still rendering to `image`.
    ///
    /// Returns false, after requesting a rebuild, if it does not finish
    /// within the fence timeout.
    fn wait_for_image<B>(
        &mut self,
        backend: &mut B,
        image: usize,
        rebuild: &RebuildHandle,
    ) -> RenderResult<bool>
    where
        B: GpuBackend<CommandBuffer = C>,
    {
        let Some((owner, ticket)) = self.images_in_flight[image] else {
            return Ok(true);
        };
        if self.tickets.is_complete(owner, ticket) {
            return Ok(true);
        }
        match backend.wait_for_fence(owner, self.limits.fence_timeout)? {
            FenceWait::Signaled => {
                self.tickets.mark_completed(owner);
                Ok(true)
            }
            FenceWait::TimedOut => {
                warn!(
                    "Image {} still in use by frame {} after {:?}",
                    image, owner, self.limits.fence_timeout
                );
                self.request_rebuild(rebuild, "image held by a stuck submission");
                Ok(false)
            }
        }
    }

    fn release<B>(
        &mut self,
        backend: &mut B,
        frame: usize,
        image: usize,
        rebuild: &RebuildHandle,
    ) -> RenderResult<FrameStatus>
    where
        B: GpuBackend<CommandBuffer = C>,
    {
        let outcome = backend.release_image(frame, image)?;
        let ticket = self.tickets.record_submission(frame);
        self.images_in_flight[image] = Some((frame, ticket));
        self.advance();

        if outcome.needs_rebuild() {
            self.request_rebuild(rebuild, present_reason(outcome));
        }
        Ok(self.skip(SkipReason::NoCommandBuffer))
    }

    fn skip(&mut self, reason: SkipReason) -> FrameStatus {
        self.stats.skipped += 1;
        FrameStatus::Skipped(reason)
    }

    fn request_rebuild(&mut self, rebuild: &RebuildHandle, reason: &str) {
        debug!("Requesting swapchain rebuild: {}", reason);
        self.stats.rebuild_requests += 1;
        rebuild.request();
    }

    fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
    }
}

/// Hands `cmd` to the worker for freeing, or destroys it here when no
/// worker runs.
fn dispose<B, C>(backend: &mut B, queue: &CommandBufferQueue<C>, cmd: C)
where
    B: GpuBackend<CommandBuffer = C>,
    C: Send + 'static,
{
    if let Some(cmd) = queue.recycle(cmd) {
        backend.destroy_command_buffer(cmd);
    }
}

fn present_reason(outcome: PresentOutcome) -> &'static str {
    match outcome {
        PresentOutcome::Presented => "presented",
        PresentOutcome::Suboptimal => "swapchain suboptimal on present",
        PresentOutcome::OutOfDate => "swapchain out of date on present",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_config() {
        let config = RendererConfig {
            fence_timeout_ms: 10,
            fence_timeout_escalation: 0,
            command_wait_ms: 20,
            ..RendererConfig::default()
        };
        let limits = PacingLimits::from_config(&config);
        assert_eq!(limits.fence_timeout, Duration::from_millis(10));
        assert_eq!(limits.fence_timeout_escalation, 1);
        assert_eq!(limits.command_wait, Duration::from_millis(20));
    }

    #[test]
    fn test_release_all_returns_bound_and_retired() {
        let mut pacer: FramePacer<u32> = FramePacer::new(2, PacingLimits::default());
        pacer.on_swapchain_rebuilt(3);
        pacer.bound[1] = Some(Bound {
            cmd: 7,
            frame: 0,
            ticket: 1,
        });
        pacer.deletion.retire(3, 1, 4);

        let mut released = pacer.release_all();
        released.sort();
        assert_eq!(released, vec![3, 7]);
        assert_eq!(pacer.pending_deletions(), 0);
    }

    #[test]
    fn test_pacer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FramePacer<u32>>();
    }
}
