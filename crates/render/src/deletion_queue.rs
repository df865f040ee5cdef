//! Deferred destruction of command buffers gated on frame fences.
//!
//! Every submission on a frame slot gets the next ticket of that slot. A
//! buffer retired with `(frame, ticket)` may be destroyed once the fence of
//! `frame` has been observed signaled after that submission.

use tracing::trace;

/// Submission and completion counters per frame slot.
#[derive(Debug, Clone)]
pub struct FrameTickets {
    submitted: Vec<u64>,
    completed: Vec<u64>,
}

impl FrameTickets {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            submitted: vec![0; frames_in_flight],
            completed: vec![0; frames_in_flight],
        }
    }

    /// Books a submission on `frame` and returns its ticket.
    pub fn record_submission(&mut self, frame: usize) -> u64 {
        self.submitted[frame] += 1;
        self.submitted[frame]
    }

    /// The fence of `frame` was seen signaled: everything submitted on it
    /// so far has completed.
    pub fn mark_completed(&mut self, frame: usize) {
        self.completed[frame] = self.submitted[frame];
    }

    /// The whole device went idle.
    pub fn mark_all_completed(&mut self) {
        self.completed.copy_from_slice(&self.submitted);
    }

    pub fn is_complete(&self, frame: usize, ticket: u64) -> bool {
        self.completed[frame] >= ticket
    }

    pub fn submitted(&self, frame: usize) -> u64 {
        self.submitted[frame]
    }

    pub fn completed(&self, frame: usize) -> u64 {
        self.completed[frame]
    }
}

#[derive(Debug)]
struct Retired<C> {
    frame: usize,
    ticket: u64,
    item: C,
}

/// Buffers waiting for their fence.
#[derive(Debug)]
pub struct DeletionQueue<C> {
    pending: Vec<Retired<C>>,
}

impl<C> Default for DeletionQueue<C> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<C> DeletionQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `item`, last used by submission `ticket` on `frame`.
    pub fn retire(&mut self, item: C, frame: usize, ticket: u64) {
        trace!("Retiring command buffer from frame {} ticket {}", frame, ticket);
        self.pending.push(Retired {
            frame,
            ticket,
            item,
        });
    }

    /// Removes and returns every item whose submission has completed.
    pub fn collect(&mut self, tickets: &FrameTickets) -> Vec<C> {
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| tickets.is_complete(r.frame, r.ticket));
        self.pending = waiting;
        done.into_iter().map(|r| r.item).collect()
    }

    /// Removes everything. Only valid once the device is idle.
    pub fn drain_all(&mut self) -> Vec<C> {
        self.pending.drain(..).map(|r| r.item).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_advance_per_frame() {
        let mut tickets = FrameTickets::new(2);
        assert_eq!(tickets.record_submission(0), 1);
        assert_eq!(tickets.record_submission(0), 2);
        assert_eq!(tickets.record_submission(1), 1);

        assert!(!tickets.is_complete(0, 2));
        tickets.mark_completed(0);
        assert!(tickets.is_complete(0, 2));
        assert!(!tickets.is_complete(1, 1));

        tickets.mark_all_completed();
        assert_eq!(tickets.completed(1), 1);
    }

    #[test]
    fn test_collect_waits_for_fence() {
        let mut tickets = FrameTickets::new(2);
        let mut queue = DeletionQueue::new();

        let t0 = tickets.record_submission(0);
        let t1 = tickets.record_submission(1);
        queue.retire("a", 0, t0);
        queue.retire("b", 1, t1);

        assert!(queue.collect(&tickets).is_empty());

        tickets.mark_completed(1);
        assert_eq!(queue.collect(&tickets), vec!["b"]);
        assert_eq!(queue.len(), 1);

        // A later submission on frame 0 does not release the earlier one
        // until its fence is seen.
        tickets.record_submission(0);
        assert!(queue.collect(&tickets).is_empty());
        tickets.mark_completed(0);
        assert_eq!(queue.collect(&tickets), vec!["a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_all() {
        let mut queue = DeletionQueue::new();
        queue.retire(1, 0, 5);
        queue.retire(2, 1, 9);
        assert_eq!(queue.drain_all(), vec![1, 2]);
        assert!(queue.is_empty());
    }
}
