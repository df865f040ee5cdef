//! Swapchain lifecycle behavior against the recording mock backend.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use pacer_render::{
    AcquireOutcome, Extent, FrameStatus, LifecycleState, PresentOutcome, RenderError,
};

use common::{Event, harness, harness_scripted, harness_with, test_config};

fn creations(h: &common::Harness) -> Vec<Extent> {
    h.log
        .lock()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::CreateSwapchain { extent } => Some(*extent),
            _ => None,
        })
        .collect()
}

#[test]
fn test_many_requests_cause_one_rebuild() {
    let mut h = harness(800, 600);
    assert_eq!(h.renderer.state(), LifecycleState::Active);

    let handle = h.renderer.rebuild_handle();
    let requesters: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    handle.request();
                }
            })
        })
        .collect();
    for requester in requesters {
        requester.join().unwrap();
    }
    h.renderer.request_rebuild();
    h.renderer.request_rebuild();

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.rebuild_count(), 1);
    assert_eq!(creations(&h).len(), 2);

    let log = h.log.lock();
    assert_eq!(log.count(|e| *e == Event::DestroySwapchain), 1);
    assert!(log.violations.is_empty(), "violations: {:#?}", log.violations);
}

#[test]
fn test_rebuild_tears_down_in_order() {
    let mut h = harness(800, 600);
    for _ in 0..3 {
        h.renderer.render_frame().unwrap();
    }
    h.renderer.request_rebuild();
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);

    let log = h.log.lock();
    let position = |target: &Event| {
        log.events
            .iter()
            .rposition(|e| e == target)
            .expect("event should be logged")
    };
    let idle = position(&Event::WaitIdle);
    let destroyed = position(&Event::DestroySwapchain);
    let created = log
        .events
        .iter()
        .rposition(|e| matches!(e, Event::CreateSwapchain { .. }))
        .unwrap();
    assert!(idle < destroyed, "device must be idle before the swapchain goes");
    assert!(destroyed < created, "old swapchain must be gone before the new one");

    // Command buffers of the old generation are destroyed in between.
    let destroys_between = log.events[idle..destroyed]
        .iter()
        .filter(|e| matches!(e, Event::Destroy { .. }))
        .count();
    assert!(destroys_between > 0);
    assert!(log.violations.is_empty(), "violations: {:#?}", log.violations);
}

#[test]
fn test_resize_rebuilds_once_at_new_size() {
    let mut h = harness(800, 600);
    assert_eq!(
        h.renderer.swapchain_info().unwrap().extent,
        Extent::new(800, 600)
    );
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);

    // A drag resize delivers a burst of events before the next frame.
    h.surface.notify_resized(1024, 768);
    h.surface.notify_resized(1600, 900);
    h.surface.notify_resized(1920, 1080);

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.rebuild_count(), 1);
    assert_eq!(
        creations(&h),
        vec![Extent::new(800, 600), Extent::new(1920, 1080)]
    );

    let last_present = h
        .log
        .lock()
        .events
        .iter()
        .rev()
        .find_map(|e| match e {
            Event::Present { extent, .. } => Some(*extent),
            _ => None,
        });
    assert_eq!(last_present, Some(Extent::new(1920, 1080)));

    let aspect = h.camera.snapshot().aspect;
    assert!((aspect - 1920.0 / 1080.0).abs() < 1e-4);
}

#[test]
fn test_minimized_window_defers_rebuild() {
    let mut h = harness(800, 600);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);

    h.surface.notify_minimized();
    for _ in 0..3 {
        assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Deferred);
    }
    assert_eq!(creations(&h).len(), 1, "no swapchain is built for an empty surface");
    assert_eq!(h.renderer.state(), LifecycleState::Invalidating);

    h.surface.notify_restored();
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.state(), LifecycleState::Active);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_out_of_date_acquire_invalidates_then_rebuilds() {
    let mut h = harness(800, 600);
    h.log
        .lock()
        .script
        .acquire
        .push_back(AcquireOutcome::OutOfDate);

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Invalidated);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.rebuild_count(), 1);
}

#[test]
fn test_suboptimal_acquire_abandons_frame() {
    let mut h = harness(800, 600);
    h.log
        .lock()
        .script
        .acquire
        .push_back(AcquireOutcome::Acquired {
            image: 0,
            suboptimal: true,
        });

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Invalidated);
    assert_eq!(
        h.log.lock().count(|e| matches!(e, Event::Submit { .. })),
        0,
        "nothing is drawn to a suboptimal image"
    );
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
}

#[test]
fn test_out_of_date_present_rebuilds_next_frame() {
    let mut h = harness(800, 600);
    h.log
        .lock()
        .script
        .present
        .push_back(PresentOutcome::OutOfDate);

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert!(h.log.lock().violations.is_empty());
}

#[test]
fn test_failed_rebuild_halts_rendering() {
    let mut h = harness(800, 600);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);

    h.log.lock().script.fail_create = true;
    h.renderer.request_rebuild();

    let err = h.renderer.render_frame().unwrap_err();
    assert!(matches!(err, RenderError::RebuildFailed(_)), "got {:?}", err);
    assert_eq!(h.renderer.state(), LifecycleState::Failed);
    assert!(h.renderer.swapchain_info().is_none());

    // The failure is permanent, even once the backend would succeed again.
    h.log.lock().script.fail_create = false;
    for _ in 0..3 {
        assert!(matches!(
            h.renderer.render_frame(),
            Err(RenderError::Halted)
        ));
    }
    assert_eq!(creations(&h).len(), 2);
}

#[test]
fn test_startup_with_empty_surface_fails() {
    let (gpu, _log) = common::MockGpu::new(2);
    let surface = std::sync::Arc::new(pacer_platform::SurfaceState::new(0, 0));
    let camera = pacer_scene::SharedCamera::default();
    let result = pacer_render::Renderer::new(gpu, surface, camera, &test_config());
    assert!(matches!(result, Err(RenderError::RebuildFailed(_))));
}

#[test]
fn test_shutdown_is_bounded_by_stuck_worker() {
    let mut config = test_config();
    config.worker_stop_timeout_ms = 100;
    let mut h = harness_scripted(800, 600, config, |script| {
        script.record_delay = Duration::from_secs(3);
    });
    // Let the worker enter its first recording.
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    h.renderer.shutdown().expect("shutdown should not fail");
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "shutdown took {:?}",
        start.elapsed()
    );
    assert!(matches!(h.renderer.render_frame(), Err(RenderError::Halted)));

    // A second shutdown is a no-op.
    h.renderer.shutdown().unwrap();
    let log = h.log.lock();
    assert_eq!(log.count(|e| *e == Event::DestroySwapchain), 1);

    // The backend hears about the detached worker before anything goes.
    let detached = log
        .events
        .iter()
        .position(|e| *e == Event::WorkerDetached)
        .expect("backend should be told the worker was detached");
    let destroyed = log
        .events
        .iter()
        .position(|e| *e == Event::DestroySwapchain)
        .unwrap();
    assert!(detached < destroyed);
}

#[test]
fn test_clean_shutdown_releases_everything() {
    let mut h = harness(800, 600);
    for _ in 0..10 {
        h.renderer.render_frame().unwrap();
    }
    h.renderer.shutdown().unwrap();

    let log = h.log.lock();
    assert_eq!(log.live_commands(), 0);
    assert_eq!(log.count(|e| *e == Event::DestroySwapchain), 1);
    assert!(log.violations.is_empty(), "violations: {:#?}", log.violations);
}

#[test]
fn test_hung_gpu_fails_rebuild_without_blocking() {
    let mut config = test_config();
    config.worker_stop_timeout_ms = 50;
    let mut h = harness_with(800, 600, config);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);

    h.log.lock().script.fences_stuck = true;
    for _ in 0..2 {
        h.renderer.render_frame().unwrap();
    }
    assert!(h.renderer.rebuild_handle().is_requested());
    let idles_before = h.log.lock().count(|e| *e == Event::WaitIdle);

    let start = Instant::now();
    let err = h.renderer.render_frame().unwrap_err();
    assert!(matches!(err, RenderError::RebuildFailed(_)), "got {:?}", err);
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "rebuild took {:?}",
        start.elapsed()
    );
    assert_eq!(h.renderer.state(), LifecycleState::Failed);

    let log = h.log.lock();
    assert_eq!(log.count(|e| *e == Event::WaitIdle), idles_before);
    assert_eq!(log.count(|e| *e == Event::DestroySwapchain), 0);
    assert!(log.violations.is_empty(), "violations: {:#?}", log.violations);
}

#[test]
fn test_empty_surface_at_creation_defers() {
    let mut h = harness(800, 600);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);

    // Out of date before the minimize event reaches the surface state.
    h.log.lock().script.empty_surface = true;
    h.log
        .lock()
        .script
        .present
        .push_back(PresentOutcome::OutOfDate);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);

    for _ in 0..3 {
        assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Deferred);
        assert_eq!(h.renderer.state(), LifecycleState::Invalidating);
    }
    assert!(h.renderer.swapchain_info().is_none());

    h.log.lock().script.empty_surface = false;
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.state(), LifecycleState::Active);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.rebuild_count(), 1);
    assert!(h.log.lock().violations.is_empty());
}

#[test]
fn test_resize_during_rebuild_causes_one_more() {
    let mut h = harness(800, 600);
    h.log.lock().script.resize_on_create = Some((1920, 1080));
    h.renderer.request_rebuild();

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.rebuild_count(), 2);
    assert_eq!(
        creations(&h),
        vec![
            Extent::new(800, 600),
            Extent::new(800, 600),
            Extent::new(1920, 1080)
        ]
    );
}

#[test]
fn test_request_during_rebuild_is_absorbed() {
    let mut h = harness(800, 600);
    h.log.lock().script.request_on_create = true;
    h.renderer.request_rebuild();

    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Rebuilt);
    assert!(!h.renderer.rebuild_handle().is_requested());
    assert_eq!(h.renderer.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.renderer.rebuild_count(), 1);
}
