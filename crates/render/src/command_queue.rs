//! Background production of command buffers, one bounded FIFO per
//! swapchain image.
//!
//! A single worker thread walks the image slots round-robin and asks a
//! [`CommandBufferFactory`] for a buffer whenever a slot holds fewer than
//! `max_items`. Full slots put the worker to sleep on a condition variable
//! until the render thread takes something out or hands a used buffer back
//! through [`CommandBufferQueue::recycle`]. The worker frees recycled
//! buffers itself, so while it runs it is the only thread that allocates
//! or frees them.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pacer_render::{CommandBufferFactory, CommandBufferQueue};
//!
//! let mut queue = CommandBufferQueue::new(3);
//! let factory: Arc<dyn CommandBufferFactory<String>> =
//!     Arc::new(|image: usize| Some(format!("draw image {image}")));
//! queue.start(factory, 2).unwrap();
//!
//! let (newest, _stale) = queue.wait_newest(1, Duration::from_secs(1)).unwrap();
//! assert_eq!(newest, "draw image 1");
//!
//! let outcome = queue.stop(Duration::from_secs(5));
//! assert!(outcome.clean);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::error::{RenderError, RenderResult};

/// Name of the worker thread, visible in logs and debuggers.
pub const WORKER_THREAD_NAME: &str = "command-buffer-worker";

/// Pause after the factory declines to produce a buffer.
const EMPTY_RECORD_BACKOFF: Duration = Duration::from_millis(2);

/// Records ready-to-submit command buffers for one swapchain image.
///
/// Called from the worker thread. Returning `None` means nothing can be
/// recorded right now; the worker retries after a short pause and never
/// queues a placeholder.
pub trait CommandBufferFactory<C>: Send + Sync {
    fn record(&self, image: usize) -> Option<C>;

    /// Frees a buffer the GPU is not using: one recorded after `stop` was
    /// requested, or one handed back through
    /// [`CommandBufferQueue::recycle`].
    fn discard(&self, cmd: C) {
        drop(cmd);
    }
}

impl<C, F> CommandBufferFactory<C> for F
where
    F: Fn(usize) -> Option<C> + Send + Sync,
{
    fn record(&self, image: usize) -> Option<C> {
        self(image)
    }
}

/// What [`CommandBufferQueue::stop`] left behind.
#[derive(Debug)]
pub struct StopOutcome<C> {
    /// Every buffer still queued, oldest first per slot, followed by
    /// recycled buffers the worker had not freed yet. None is pending on
    /// the GPU.
    pub drained: Vec<C>,
    /// False if the worker did not exit within the timeout and was detached.
    pub clean: bool,
}

struct QueueState<C> {
    slots: Vec<VecDeque<C>>,
    /// Used buffers waiting for the worker to free them.
    recycled: Vec<C>,
    stop: bool,
    worker_done: bool,
}

impl<C> QueueState<C> {
    /// First slot at or after `start` (wrapping) with room for another buffer.
    fn next_open_slot(&self, start: usize, max_items: usize) -> Option<usize> {
        let count = self.slots.len();
        (0..count)
            .map(|offset| (start + offset) % count)
            .find(|&slot| self.slots[slot].len() < max_items)
    }

    fn drain(&mut self) -> Vec<C> {
        let mut drained: Vec<C> = self.slots.iter_mut().flat_map(|q| q.drain(..)).collect();
        drained.append(&mut self.recycled);
        drained
    }
}

struct Shared<C> {
    state: Mutex<QueueState<C>>,
    /// A buffer was queued.
    ready: Condvar,
    /// A slot dropped below capacity, a buffer was recycled, or stop was
    /// requested.
    space: Condvar,
    /// The worker exited.
    exited: Condvar,
}

impl<C> Shared<C> {
    fn new(slot_count: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                slots: (0..slot_count).map(|_| VecDeque::new()).collect(),
                recycled: Vec::new(),
                stop: false,
                worker_done: false,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
            exited: Condvar::new(),
        }
    }
}

/// Marks the worker as finished even if the factory panics.
struct ExitGuard<'a, C> {
    shared: &'a Shared<C>,
}

impl<C> Drop for ExitGuard<'_, C> {
    fn drop(&mut self) {
        self.shared.state.lock().worker_done = true;
        self.shared.exited.notify_all();
        self.shared.ready.notify_all();
    }
}

/// Per-image bounded queues filled by one background worker.
///
/// All slots share one lock. Recording happens outside it, so the lock is
/// only held for queue bookkeeping.
pub struct CommandBufferQueue<C: Send + 'static> {
    shared: Arc<Shared<C>>,
    worker: Option<JoinHandle<()>>,
    max_items: usize,
}

impl<C: Send + 'static> CommandBufferQueue<C> {
    /// Creates a stopped queue holding at most `max_items` buffers per slot.
    pub fn new(max_items: usize) -> Self {
        let shared = Shared::new(0);
        shared.state.lock().worker_done = true;
        Self {
            shared: Arc::new(shared),
            worker: None,
            max_items: max_items.max(1),
        }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Spawns the worker for `slot_count` swapchain images.
    ///
    /// Each start gets fresh queue state, so a worker detached by a timed
    /// out [`stop`](Self::stop) can never push into the new generation.
    pub fn start(
        &mut self,
        factory: Arc<dyn CommandBufferFactory<C>>,
        slot_count: usize,
    ) -> RenderResult<()> {
        if self.worker.is_some() {
            return Err(RenderError::WorkerRunning);
        }

        let shared = Arc::new(Shared::new(slot_count));
        let worker_shared = Arc::clone(&shared);
        let max_items = self.max_items;

        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(&worker_shared, factory.as_ref(), max_items))
            .map_err(RenderError::WorkerSpawn)?;

        self.shared = shared;
        self.worker = Some(worker);
        info!(
            "Command buffer worker started for {} image(s), up to {} queued each",
            slot_count, max_items
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of image slots of the current generation.
    pub fn slot_count(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Buffers currently queued for `slot`.
    pub fn len(&self, slot: usize) -> usize {
        self.shared
            .state
            .lock()
            .slots
            .get(slot)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, slot: usize) -> bool {
        self.len(slot) == 0
    }

    /// Removes the oldest buffer for `slot` without blocking.
    ///
    /// Returns `None` when nothing is ready.
    pub fn pop(&self, slot: usize) -> Option<C> {
        let cmd = self.shared.state.lock().slots.get_mut(slot)?.pop_front();
        if cmd.is_some() {
            self.shared.space.notify_one();
        }
        cmd
    }

    /// Empties `slot` without blocking, returning the newest buffer and the
    /// older ones it supersedes (oldest first).
    pub fn take_newest(&self, slot: usize) -> Option<(C, Vec<C>)> {
        let mut state = self.shared.state.lock();
        let taken = take_all(state.slots.get_mut(slot)?);
        drop(state);
        if taken.is_some() {
            self.shared.space.notify_one();
        }
        taken
    }

    /// Like [`take_newest`](Self::take_newest), but waits up to `timeout`
    /// for a buffer to arrive.
    ///
    /// Returns immediately when no worker is producing.
    pub fn wait_newest(&self, slot: usize, timeout: Duration) -> Option<(C, Vec<C>)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            let queue = state.slots.get_mut(slot)?;
            if let Some(taken) = take_all(queue) {
                drop(state);
                self.shared.space.notify_one();
                return Some(taken);
            }
            if state.stop || state.worker_done {
                return None;
            }
            if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
                let taken = take_all(state.slots.get_mut(slot)?);
                drop(state);
                if taken.is_some() {
                    self.shared.space.notify_one();
                }
                return taken;
            }
        }
    }

    /// Hands a buffer the GPU has finished with to the worker, which frees
    /// it through [`CommandBufferFactory::discard`].
    ///
    /// Gives the buffer back when no worker is running; the caller then
    /// destroys it itself.
    pub fn recycle(&self, cmd: C) -> Option<C> {
        if self.worker.is_none() {
            return Some(cmd);
        }
        let mut state = self.shared.state.lock();
        if state.stop || state.worker_done {
            return Some(cmd);
        }
        state.recycled.push(cmd);
        drop(state);
        self.shared.space.notify_one();
        None
    }

    /// Stops the worker and hands back every queued buffer.
    ///
    /// Waits up to `timeout` for the worker to exit. Past that the worker is
    /// detached: a buffer it is still recording is discarded through the
    /// factory whenever it finishes, without any guarantee the GPU handle
    /// is released before the process exits.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome<C> {
        let Some(worker) = self.worker.take() else {
            return StopOutcome {
                drained: self.drain(),
                clean: true,
            };
        };

        self.shared.state.lock().stop = true;
        self.shared.space.notify_all();
        self.shared.ready.notify_all();

        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.worker_done {
            if self
                .shared
                .exited
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let clean = state.worker_done;
        let drained = state.drain();
        drop(state);

        if clean {
            if worker.join().is_err() {
                warn!("Command buffer worker panicked");
            }
            info!(
                "Command buffer worker stopped, {} queued buffer(s) drained",
                drained.len()
            );
        } else {
            warn!(
                "Command buffer worker did not exit within {:?}; detaching it",
                timeout
            );
        }

        StopOutcome { drained, clean }
    }

    fn drain(&self) -> Vec<C> {
        self.shared.state.lock().drain()
    }
}

impl<C: Send + 'static> Drop for CommandBufferQueue<C> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let outcome = self.stop(Duration::from_secs(5));
            if !outcome.drained.is_empty() {
                debug!(
                    "Dropping {} queued command buffer(s) with the queue",
                    outcome.drained.len()
                );
            }
        }
    }
}

fn take_all<C>(queue: &mut VecDeque<C>) -> Option<(C, Vec<C>)> {
    let newest = queue.pop_back()?;
    let stale = queue.drain(..).collect();
    Some((newest, stale))
}

fn run_worker<C>(shared: &Shared<C>, factory: &dyn CommandBufferFactory<C>, max_items: usize) {
    let _guard = ExitGuard { shared };
    let slot_count = shared.state.lock().slots.len();
    if slot_count == 0 {
        debug!("Command buffer worker has no slots to fill");
        return;
    }

    debug!("Command buffer worker running");
    let mut next = 0;
    loop {
        let (slot, recycled) = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    debug!("Command buffer worker exiting");
                    return;
                }
                let recycled = std::mem::take(&mut state.recycled);
                let slot = state.next_open_slot(next, max_items);
                if slot.is_some() || !recycled.is_empty() {
                    break (slot, recycled);
                }
                shared.space.wait(&mut state);
            }
        };

        if !recycled.is_empty() {
            trace!("Freeing {} recycled command buffer(s)", recycled.len());
            for cmd in recycled {
                factory.discard(cmd);
            }
        }
        let Some(slot) = slot else {
            continue;
        };
        next = (slot + 1) % slot_count;

        let Some(cmd) = factory.record(slot) else {
            let mut state = shared.state.lock();
            if !state.stop {
                shared.space.wait_for(&mut state, EMPTY_RECORD_BACKOFF);
            }
            continue;
        };

        let mut state = shared.state.lock();
        if state.stop {
            drop(state);
            trace!("Discarding buffer for image {} recorded after stop", slot);
            factory.discard(cmd);
            return;
        }
        state.slots[slot].push_back(cmd);
        drop(state);
        shared.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    /// Produces increasing version numbers per call.
    fn versioned() -> Arc<dyn CommandBufferFactory<usize>> {
        let counter = AtomicUsize::new(0);
        Arc::new(move |_image: usize| Some(counter.fetch_add(1, Ordering::SeqCst) + 1))
    }

    struct CountingFactory {
        delay: Duration,
        entered: AtomicUsize,
        recorded: AtomicUsize,
        discarded: AtomicUsize,
    }

    impl CountingFactory {
        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                entered: AtomicUsize::new(0),
                recorded: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
            })
        }
    }

    impl CommandBufferFactory<usize> for CountingFactory {
        fn record(&self, image: usize) -> Option<usize> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.recorded.fetch_add(1, Ordering::SeqCst);
            Some(image)
        }

        fn discard(&self, _cmd: usize) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_drains_in_production_order() {
        let mut queue = CommandBufferQueue::new(5);
        queue.start(versioned(), 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || queue.len(0) == 5));

        let outcome = queue.stop(Duration::from_secs(5));
        assert!(outcome.clean);
        assert_eq!(outcome.drained, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_pop_returns_oldest_first() {
        let mut queue = CommandBufferQueue::new(5);
        queue.start(versioned(), 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || queue.len(0) == 5));

        assert_eq!(queue.pop(0), Some(1));
        assert_eq!(queue.pop(0), Some(2));
        queue.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_depth_never_exceeds_max_items() {
        let mut queue = CommandBufferQueue::new(3);
        queue.start(versioned(), 2).unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            queue.len(0) == 3 && queue.len(1) == 3
        }));
        for _ in 0..20 {
            assert!(queue.len(0) <= 3);
            assert!(queue.len(1) <= 3);
            std::thread::sleep(Duration::from_millis(1));
        }

        queue.pop(0);
        assert!(wait_until(Duration::from_secs(5), || queue.len(0) == 3));
        assert!(queue.len(0) <= 3);
        queue.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_pop_on_empty_returns_immediately() {
        let queue: CommandBufferQueue<usize> = CommandBufferQueue::new(3);
        let started = Instant::now();
        assert_eq!(queue.pop(0), None);
        assert!(queue.take_newest(0).is_none());
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_pop_on_empty_running_slot_does_not_block() {
        let mut queue = CommandBufferQueue::new(3);
        let never: Arc<dyn CommandBufferFactory<usize>> = Arc::new(|_image: usize| None);
        queue.start(never, 2).unwrap();

        let started = Instant::now();
        assert_eq!(queue.pop(1), None);
        assert!(started.elapsed() < Duration::from_millis(100));
        queue.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_none_is_never_queued() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let factory: Arc<dyn CommandBufferFactory<usize>> = Arc::new(move |_image: usize| {
            counted.fetch_add(1, Ordering::SeqCst);
            None
        });

        let mut queue = CommandBufferQueue::new(3);
        queue.start(factory, 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || calls.load(Ordering::SeqCst) >= 3));
        assert_eq!(queue.len(0), 0);
        assert!(queue.stop(Duration::from_secs(5)).drained.is_empty());
    }

    #[test]
    fn test_wait_newest_returns_stale_in_order() {
        let mut queue = CommandBufferQueue::new(4);
        queue.start(versioned(), 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || queue.len(0) == 4));

        let (newest, stale) = queue.wait_newest(0, Duration::from_secs(1)).unwrap();
        assert!(!stale.is_empty());
        assert!(stale.windows(2).all(|w| w[0] < w[1]));
        assert!(stale.iter().all(|&v| v < newest));
        queue.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_wait_newest_times_out() {
        let mut queue = CommandBufferQueue::new(3);
        let never: Arc<dyn CommandBufferFactory<usize>> = Arc::new(|_image: usize| None);
        queue.start(never, 1).unwrap();

        let started = Instant::now();
        assert!(queue.wait_newest(0, Duration::from_millis(50)).is_none());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_secs(2));
        queue.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_wait_newest_without_worker_returns_immediately() {
        let queue: CommandBufferQueue<usize> = CommandBufferQueue::new(3);
        let started = Instant::now();
        assert!(queue.wait_newest(0, Duration::from_secs(5)).is_none());
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_stop_discards_buffer_recorded_after_stop() {
        let factory = CountingFactory::slow(Duration::from_millis(100));

        let mut queue = CommandBufferQueue::new(3);
        queue.start(factory.clone(), 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            factory.entered.load(Ordering::SeqCst) == 1
        }));

        let outcome = queue.stop(Duration::from_secs(5));
        assert!(outcome.clean);
        assert!(outcome.drained.is_empty());
        assert_eq!(factory.recorded.load(Ordering::SeqCst), 1);
        assert_eq!(factory.discarded.load(Ordering::SeqCst), 1);
        assert!(!queue.is_running());
    }

    #[test]
    fn test_stop_times_out_on_stuck_worker() {
        let factory = CountingFactory::slow(Duration::from_millis(500));

        let mut queue = CommandBufferQueue::new(3);
        queue.start(factory.clone(), 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            factory.entered.load(Ordering::SeqCst) == 1
        }));

        let started = Instant::now();
        let outcome = queue.stop(Duration::from_millis(50));
        assert!(!outcome.clean);
        assert!(started.elapsed() < Duration::from_millis(400));

        // The detached worker finishes on its own and never queues its buffer.
        assert!(wait_until(Duration::from_secs(2), || {
            factory.discarded.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(queue.len(0), 0);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut queue = CommandBufferQueue::new(2);
        queue.start(versioned(), 3).unwrap();
        assert!(matches!(
            queue.start(versioned(), 3),
            Err(RenderError::WorkerRunning)
        ));
        queue.stop(Duration::from_secs(5));

        queue.start(versioned(), 1).unwrap();
        assert_eq!(queue.slot_count(), 1);
        assert!(wait_until(Duration::from_secs(5), || queue.len(0) == 2));
        queue.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_recycled_buffers_are_freed_by_worker() {
        let factory = CountingFactory::slow(Duration::ZERO);
        let mut queue = CommandBufferQueue::new(2);
        queue.start(factory.clone(), 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || queue.len(0) == 2));

        assert!(queue.recycle(7).is_none());
        assert!(queue.recycle(8).is_none());
        assert!(wait_until(Duration::from_secs(5), || {
            factory.discarded.load(Ordering::SeqCst) == 2
        }));

        let outcome = queue.stop(Duration::from_secs(5));
        assert!(outcome.clean);
        assert_eq!(outcome.drained.len(), 2);
    }

    #[test]
    fn test_recycle_without_worker_returns_buffer() {
        let mut queue: CommandBufferQueue<usize> = CommandBufferQueue::new(2);
        assert_eq!(queue.recycle(3), Some(3));

        queue.start(versioned(), 1).unwrap();
        queue.stop(Duration::from_secs(5));
        assert_eq!(queue.recycle(4), Some(4));
    }

    #[test]
    fn test_queue_types_cross_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBufferQueue<usize>>();
        assert_send::<Arc<dyn CommandBufferFactory<usize>>>();
    }
}
