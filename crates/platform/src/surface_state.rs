//! Surface state shared between the window thread and the renderer.
//!
//! The window event handler records resizes and minimization here; the
//! renderer polls [`SurfaceState::take_dirty`] once per frame and reads the
//! drawable size when it rebuilds the swapchain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Current drawable size in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawableSize {
    pub width: u32,
    pub height: u32,
}

impl DrawableSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero in either dimension means nothing can be presented.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> Option<f32> {
        (!self.is_empty()).then(|| self.width as f32 / self.height as f32)
    }
}

/// Lock-free resize and minimize notifications.
///
/// Width and height are packed into one atomic so readers never observe a
/// torn size.
#[derive(Debug)]
pub struct SurfaceState {
    size: AtomicU64,
    minimized: AtomicBool,
    dirty: AtomicBool,
}

impl SurfaceState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: AtomicU64::new(pack(width, height)),
            minimized: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Records a new drawable size and marks the surface dirty.
    pub fn notify_resized(&self, width: u32, height: u32) {
        self.size.store(pack(width, height), Ordering::Release);
        self.minimized
            .store(width == 0 || height == 0, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn notify_minimized(&self) {
        self.minimized.store(true, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn notify_restored(&self) {
        self.minimized.store(false, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns whether the surface changed since the last call and clears
    /// the flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized.load(Ordering::Acquire)
    }

    /// Size to build the swapchain for; empty while minimized.
    pub fn drawable_size(&self) -> DrawableSize {
        if self.is_minimized() {
            return DrawableSize::new(0, 0);
        }
        let (width, height) = unpack(self.size.load(Ordering::Acquire));
        DrawableSize::new(width, height)
    }
}

fn pack(width: u32, height: u32) -> u64 {
    (u64::from(width) << 32) | u64::from(height)
}

fn unpack(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_marks_dirty_once() {
        let state = SurfaceState::new(800, 600);
        assert!(!state.take_dirty());

        state.notify_resized(1920, 1080);
        state.notify_resized(1280, 720);
        assert!(state.take_dirty());
        assert!(!state.take_dirty());
        assert_eq!(state.drawable_size(), DrawableSize::new(1280, 720));
    }

    #[test]
    fn test_minimized_reports_empty_size() {
        let state = SurfaceState::new(800, 600);
        state.notify_minimized();
        assert!(state.drawable_size().is_empty());

        state.notify_restored();
        assert_eq!(state.drawable_size(), DrawableSize::new(800, 600));
    }

    #[test]
    fn test_zero_resize_counts_as_minimized() {
        let state = SurfaceState::new(800, 600);
        state.notify_resized(0, 600);
        assert!(state.is_minimized());
        assert_eq!(state.drawable_size().aspect_ratio(), None);
    }

    #[test]
    fn test_pack_roundtrip_extremes() {
        assert_eq!(unpack(pack(u32::MAX, 1)), (u32::MAX, 1));
    }
}
