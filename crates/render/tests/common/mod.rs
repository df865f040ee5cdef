//! Recording GPU backend for driving the render core without a device.
//!
//! Fences are simulated per frame slot: a submission stays pending until
//! its slot fence is waited, or the device is idled. Every call is logged
//! and ordering mistakes are collected as violations instead of panicking,
//! so tests can assert on them after the fact.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use pacer_core::RendererConfig;
use pacer_platform::SurfaceState;
use pacer_render::{
    AcquireOutcome, CommandBufferFactory, Extent, FenceWait, FrameUniforms, GpuBackend,
    PresentOutcome, RebuildHandle, RenderError, RenderResult, Renderer, SwapchainInfo,
};
use pacer_rhi::RhiError;
use pacer_scene::{Camera, SharedCamera};

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// A "recorded" command buffer.
#[derive(Debug)]
pub struct MockCommand {
    pub id: u64,
    pub image: usize,
    pub generation: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    FenceWait { frame: usize, signaled: bool },
    Acquire { frame: usize, outcome: AcquireOutcome },
    WriteUniforms { image: usize },
    Submit { frame: usize, image: usize, cmd: u64 },
    Release { frame: usize, image: usize },
    Present { frame: usize, image: usize, extent: Extent },
    Destroy { cmd: u64 },
    WaitIdle,
    WorkerDetached,
    DestroySwapchain,
    CreateSwapchain { extent: Extent },
}

/// Knobs a test flips to steer the mock.
#[derive(Debug)]
pub struct Script {
    pub acquire: VecDeque<AcquireOutcome>,
    pub present: VecDeque<PresentOutcome>,
    pub fences_stuck: bool,
    pub fail_create: bool,
    /// The surface reports no area when a swapchain is created.
    pub empty_surface: bool,
    /// Resize delivered while the next swapchain is being created.
    pub resize_on_create: Option<(u32, u32)>,
    /// Rebuild requested while the next swapchain is being created.
    pub request_on_create: bool,
    /// When false the factory declines to record.
    pub produce: bool,
    pub record_delay: Duration,
    pub image_count: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            acquire: VecDeque::new(),
            present: VecDeque::new(),
            fences_stuck: false,
            fail_create: false,
            empty_surface: false,
            resize_on_create: None,
            request_on_create: false,
            produce: true,
            record_delay: Duration::ZERO,
            image_count: 3,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Image of the submission waiting on this slot's fence.
    pending_image: Option<usize>,
    pending_cmd: Option<u64>,
}

/// Everything the mock observed.
#[derive(Debug, Default)]
pub struct GpuLog {
    pub events: Vec<Event>,
    pub violations: Vec<String>,
    pub script: Script,
    pub created: u64,
    pub destroyed: u64,
    pub discarded: u64,
    /// Id and image of every recorded buffer, in recording order.
    pub recorded: Vec<(u64, usize)>,
    /// Ids freed by the worker through the factory.
    pub discarded_ids: Vec<u64>,
    pub surface: Option<Arc<SurfaceState>>,
    pub rebuild_handle: Option<RebuildHandle>,
    slots: Vec<Slot>,
    /// Command ids submitted and not yet known complete.
    in_flight: HashMap<u64, usize>,
}

impl GpuLog {
    fn complete_slot(&mut self, frame: usize) {
        let slot = &mut self.slots[frame];
        slot.pending_image = None;
        if let Some(cmd) = slot.pending_cmd.take() {
            self.in_flight.remove(&cmd);
        }
    }

    fn check_submit(&mut self, frame: usize, image: usize, generation: Option<u64>, current: u64) {
        if self.slots[frame].pending_image.is_some() {
            self.violations
                .push(format!("frame slot {frame} reused before its fence was waited"));
        }
        for (other, slot) in self.slots.iter().enumerate() {
            if other != frame && slot.pending_image == Some(image) {
                self.violations.push(format!(
                    "image {image} submitted while frame slot {other} still renders to it"
                ));
            }
        }
        if let Some(generation) = generation
            && generation != current
        {
            self.violations.push(format!(
                "command buffer of generation {generation} submitted to generation {current}"
            ));
        }
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// Command buffers recorded and not yet destroyed or discarded.
    pub fn live_commands(&self) -> u64 {
        self.created - self.destroyed - self.discarded
    }

    /// Ids recorded for `image`, oldest first.
    pub fn recorded_for(&self, image: usize) -> Vec<u64> {
        self.recorded
            .iter()
            .filter(|(_, recorded)| *recorded == image)
            .map(|(id, _)| *id)
            .collect()
    }
}

pub type SharedLog = Arc<Mutex<GpuLog>>;

/// Mock [`GpuBackend`] sharing its log with the test.
pub struct MockGpu {
    log: SharedLog,
    frames: usize,
    generation: u64,
    swapchain: Option<SwapchainInfo>,
    next_image: usize,
}

impl MockGpu {
    pub fn new(frames: usize) -> (Self, SharedLog) {
        let log = Arc::new(Mutex::new(GpuLog::default()));
        log.lock().slots = (0..frames).map(|_| Slot::default()).collect();
        (
            Self {
                log: Arc::clone(&log),
                frames,
                generation: 0,
                swapchain: None,
                next_image: 0,
            },
            log,
        )
    }
}

impl GpuBackend for MockGpu {
    type CommandBuffer = MockCommand;

    fn frames_in_flight(&self) -> usize {
        self.frames
    }

    fn wait_for_fence(&mut self, frame: usize, _timeout: Duration) -> RenderResult<FenceWait> {
        let mut log = self.log.lock();
        let signaled = !log.script.fences_stuck;
        if signaled {
            log.complete_slot(frame);
        }
        log.events.push(Event::FenceWait { frame, signaled });
        Ok(if signaled {
            FenceWait::Signaled
        } else {
            FenceWait::TimedOut
        })
    }

    fn acquire_next_image(&mut self, frame: usize) -> RenderResult<AcquireOutcome> {
        let Some(swapchain) = self.swapchain else {
            return Err(RenderError::RebuildFailed("no swapchain".to_string()));
        };
        let mut log = self.log.lock();
        let outcome = log.script.acquire.pop_front().unwrap_or_else(|| {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % swapchain.image_count;
            AcquireOutcome::Acquired {
                image,
                suboptimal: false,
            }
        });
        log.events.push(Event::Acquire { frame, outcome });
        Ok(outcome)
    }

    fn write_uniforms(&mut self, image: usize, _uniforms: &FrameUniforms) -> RenderResult<()> {
        self.log.lock().events.push(Event::WriteUniforms { image });
        Ok(())
    }

    fn submit(&mut self, frame: usize, image: usize, cmd: &MockCommand) -> RenderResult<()> {
        let mut log = self.log.lock();
        if cmd.image != image {
            log.violations
                .push(format!("buffer for image {} submitted to image {image}", cmd.image));
        }
        log.check_submit(frame, image, Some(cmd.generation), self.generation);
        log.slots[frame].pending_image = Some(image);
        log.slots[frame].pending_cmd = Some(cmd.id);
        log.in_flight.insert(cmd.id, frame);
        log.events.push(Event::Submit {
            frame,
            image,
            cmd: cmd.id,
        });
        Ok(())
    }

    fn present(&mut self, frame: usize, image: usize) -> RenderResult<PresentOutcome> {
        let extent = self.swapchain.map(|s| s.extent).unwrap_or(Extent::new(0, 0));
        let mut log = self.log.lock();
        log.events.push(Event::Present {
            frame,
            image,
            extent,
        });
        Ok(log
            .script
            .present
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn release_image(&mut self, frame: usize, image: usize) -> RenderResult<PresentOutcome> {
        {
            let mut log = self.log.lock();
            log.check_submit(frame, image, None, self.generation);
            log.slots[frame].pending_image = Some(image);
            log.events.push(Event::Release { frame, image });
        }
        self.present(frame, image)
    }

    fn destroy_command_buffer(&mut self, cmd: MockCommand) {
        let mut log = self.log.lock();
        if let Some(&frame) = log.in_flight.get(&cmd.id) {
            let message = format!(
                "command buffer {} destroyed while frame slot {frame} may still execute it",
                cmd.id
            );
            log.violations.push(message);
        }
        log.destroyed += 1;
        log.events.push(Event::Destroy { cmd: cmd.id });
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        let mut log = self.log.lock();
        for frame in 0..self.frames {
            log.complete_slot(frame);
        }
        log.events.push(Event::WaitIdle);
        Ok(())
    }

    fn worker_detached(&mut self) {
        self.log.lock().events.push(Event::WorkerDetached);
    }

    fn destroy_swapchain(&mut self) {
        if self.swapchain.take().is_some() {
            self.log.lock().events.push(Event::DestroySwapchain);
        }
    }

    fn create_swapchain(&mut self, drawable: Extent) -> RenderResult<SwapchainInfo> {
        let mut log = self.log.lock();
        log.events.push(Event::CreateSwapchain { extent: drawable });
        if log.script.fail_create {
            return Err(RenderError::RebuildFailed(
                "surface lost during swapchain creation".to_string(),
            ));
        }
        if log.script.empty_surface {
            return Err(RhiError::EmptySurface.into());
        }
        if self.swapchain.is_some() {
            log.violations
                .push("swapchain created while the previous one is alive".to_string());
        }
        let info = SwapchainInfo {
            extent: drawable,
            image_count: log.script.image_count,
        };
        self.generation += 1;
        self.swapchain = Some(info);
        self.next_image = 0;

        if let Some((width, height)) = log.script.resize_on_create.take()
            && let Some(surface) = &log.surface
        {
            surface.notify_resized(width, height);
        }
        if std::mem::take(&mut log.script.request_on_create)
            && let Some(handle) = &log.rebuild_handle
        {
            handle.request();
        }
        Ok(info)
    }

    fn command_factory(&self) -> RenderResult<Arc<dyn CommandBufferFactory<MockCommand>>> {
        Ok(Arc::new(MockFactory {
            log: Arc::clone(&self.log),
            generation: self.generation,
        }))
    }
}

/// Worker-side recorder handing out numbered commands.
pub struct MockFactory {
    log: SharedLog,
    generation: u64,
}

impl CommandBufferFactory<MockCommand> for MockFactory {
    fn record(&self, image: usize) -> Option<MockCommand> {
        let (produce, delay) = {
            let log = self.log.lock();
            (log.script.produce, log.script.record_delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if !produce {
            return None;
        }
        let id = NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed);
        let mut log = self.log.lock();
        log.created += 1;
        log.recorded.push((id, image));
        Some(MockCommand {
            id,
            image,
            generation: self.generation,
        })
    }

    fn discard(&self, cmd: MockCommand) {
        let mut log = self.log.lock();
        if let Some(&frame) = log.in_flight.get(&cmd.id) {
            let message = format!(
                "command buffer {} freed by the worker while frame slot {frame} may still execute it",
                cmd.id
            );
            log.violations.push(message);
        }
        log.discarded += 1;
        log.discarded_ids.push(cmd.id);
    }
}

/// Short timeouts so failing paths finish quickly.
pub fn test_config() -> RendererConfig {
    RendererConfig {
        frames_in_flight: 2,
        max_queued_per_image: 2,
        fence_timeout_ms: 20,
        fence_timeout_escalation: 2,
        command_wait_ms: 500,
        worker_stop_timeout_ms: 1000,
        ..RendererConfig::default()
    }
}

pub struct Harness {
    pub renderer: Renderer<MockGpu>,
    pub log: SharedLog,
    pub surface: Arc<SurfaceState>,
    pub camera: SharedCamera,
}

pub fn harness(width: u32, height: u32) -> Harness {
    harness_with(width, height, test_config())
}

pub fn harness_with(width: u32, height: u32, config: RendererConfig) -> Harness {
    harness_scripted(width, height, config, |_| {})
}

/// Builds a renderer after `script` has adjusted the mock, so the worker
/// sees the settings from its first recording on.
pub fn harness_scripted(
    width: u32,
    height: u32,
    config: RendererConfig,
    script: impl FnOnce(&mut Script),
) -> Harness {
    let (gpu, log) = MockGpu::new(config.frames_in_flight);
    let surface = Arc::new(SurfaceState::new(width, height));
    {
        let mut log = log.lock();
        script(&mut log.script);
        log.surface = Some(Arc::clone(&surface));
    }
    let camera = SharedCamera::new(Camera::default());
    let renderer = Renderer::new(gpu, Arc::clone(&surface), camera.clone(), &config)
        .expect("renderer should start against the mock backend");
    log.lock().rebuild_handle = Some(renderer.rebuild_handle());
    Harness {
        renderer,
        log,
        surface,
        camera,
    }
}

/// Polls `condition` on the log until it holds or `timeout` passes.
pub fn wait_for_log(log: &SharedLog, timeout: Duration, condition: impl Fn(&GpuLog) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition(&log.lock()) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition(&log.lock())
}
