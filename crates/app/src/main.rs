//! Windowed driver for the frame-paced renderer.
//!
//! Draws a grid of spinning cubes seen through an orbit camera.
//!
//! - Left drag: orbit
//! - Scroll: zoom
//! - F: toggle wireframe
//! - R: force a swapchain rebuild
//! - Escape: quit
//!
//! An optional first argument names a TOML file with [`RendererConfig`]
//! overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Quat, Vec3, Vec4};
use tracing::{error, info, trace, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use pacer_core::{FrameTimer, RendererConfig};
use pacer_platform::{FrameInput, InputState, KeyCode, MouseButton, Window};
use pacer_render::vulkan::VulkanBackend;
use pacer_render::{FrameStatus, RenderError, Renderer};
use pacer_scene::{Camera, DrawInstance, Material, ModelId, Scene, SharedCamera, Transform};

const CUBE: ModelId = ModelId(0);
const GRID_HALF_EXTENT: i32 = 3;
const GRID_SPACING: f32 = 2.0;

const ORBIT_SPEED: f32 = 0.005;
const ZOOM_STEP: f32 = 0.1;
const MIN_RADIUS: f32 = 3.0;
const MAX_RADIUS: f32 = 60.0;

/// Orbit camera parameters driven by mouse input.
struct Orbit {
    yaw: f32,
    pitch: f32,
    radius: f32,
}

impl Orbit {
    fn apply(&mut self, input: &FrameInput, camera: &SharedCamera) {
        self.yaw -= input.drag.x * ORBIT_SPEED;
        self.pitch = (self.pitch + input.drag.y * ORBIT_SPEED).clamp(-1.5, 1.5);
        self.radius = (self.radius * (1.0 - input.scroll * ZOOM_STEP)).clamp(MIN_RADIUS, MAX_RADIUS);

        let (yaw, pitch, radius) = (self.yaw, self.pitch, self.radius);
        camera.update(|c| c.orbit(Vec3::ZERO, radius, yaw, pitch));
    }
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            yaw: 0.6,
            pitch: 0.5,
            radius: 16.0,
        }
    }
}

/// Fills `scene` with a square grid of colored cubes.
fn populate_scene(scene: &Scene) {
    let span = (2 * GRID_HALF_EXTENT) as f32;
    for x in -GRID_HALF_EXTENT..=GRID_HALF_EXTENT {
        for z in -GRID_HALF_EXTENT..=GRID_HALF_EXTENT {
            let transform = Transform::new()
                .with_position(Vec3::new(x as f32 * GRID_SPACING, 0.0, z as f32 * GRID_SPACING))
                .with_scale(Vec3::splat(0.8));
            let u = (x + GRID_HALF_EXTENT) as f32 / span;
            let v = (z + GRID_HALF_EXTENT) as f32 / span;
            let material = Material::with_color(Vec4::new(0.3 + 0.7 * u, 0.4, 0.3 + 0.7 * v, 1.0));
            scene.add_instance(CUBE, DrawInstance::new(transform, material));
        }
    }
    info!("Scene populated with {} cube(s)", scene.instance_count(CUBE));
}

struct App {
    config: RendererConfig,
    shader_dir: PathBuf,
    // Dropped before the window its surface belongs to.
    renderer: Option<Renderer<VulkanBackend>>,
    window: Option<Window>,
    scene: Arc<Scene>,
    camera: SharedCamera,
    orbit: Orbit,
    input: InputState,
    timer: FrameTimer,
}

impl App {
    fn new(config: RendererConfig, shader_dir: PathBuf) -> Self {
        let camera = SharedCamera::new(Camera::new());
        let scene = Arc::new(Scene::new(camera.clone()));
        populate_scene(&scene);

        let mut orbit = Orbit::default();
        orbit.apply(&FrameInput::default(), &camera);

        Self {
            config,
            shader_dir,
            renderer: None,
            window: None,
            scene,
            camera,
            orbit,
            input: InputState::new(),
            timer: FrameTimer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let backend = VulkanBackend::new(
            &window,
            Arc::clone(&self.scene) as Arc<dyn pacer_scene::SceneQuery>,
            CUBE,
            &self.config,
            &self.shader_dir,
        )?;
        let renderer = Renderer::new(
            backend,
            window.surface_state(),
            self.camera.clone(),
            &self.config,
        )?;

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            let stats = renderer.stats();
            info!(
                "Frames presented: {}, skipped: {}, rebuilds: {}",
                stats.presented,
                stats.skipped,
                renderer.rebuild_count()
            );
            if let Err(e) = renderer.shutdown() {
                error!("Renderer shutdown failed: {}", e);
            }
        }
    }

    fn animate(&self) {
        let t = self.timer.elapsed().as_secs_f32();
        for i in 0..self.scene.instance_count(CUBE) {
            self.scene.update_instance(CUBE, i, |instance| {
                instance.transform.rotation = Quat::from_rotation_y(t + i as f32 * 0.25);
            });
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let input = self.input.take_frame();
        if input.was_pressed(KeyCode::Escape) {
            event_loop.exit();
            return;
        }
        if input.was_pressed(KeyCode::KeyF) {
            let enabled = !renderer.is_wireframe();
            if renderer.set_wireframe(enabled) {
                info!("Wireframe {}", if enabled { "on" } else { "off" });
            }
        }
        if input.was_pressed(KeyCode::KeyR) {
            info!("Swapchain rebuild requested from keyboard");
            renderer.request_rebuild();
        }
        self.orbit.apply(&input, &self.camera);

        match renderer.render_frame() {
            Ok(FrameStatus::Presented) => {}
            Ok(status) => trace!("Frame status: {:?}", status),
            Err(RenderError::Halted) => {
                error!("Renderer halted, exiting");
                event_loop.exit();
                return;
            }
            Err(e) => {
                error!("Render error: {}", e);
                event_loop.exit();
                return;
            }
        }

        let (_, fps) = self.timer.tick();
        if let Some(fps) = fps {
            let stats = renderer.stats();
            info!(
                "{:.1} fps, presented {}, skipped {}, superseded {}",
                fps, stats.presented, stats.skipped, stats.superseded
            );
        }
        self.animate();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            error!("Failed to initialize: {:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &self.window {
                    window.on_resized(size);
                }
            }
            WindowEvent::Occluded(occluded) => {
                if let Some(window) = &self.window {
                    window.on_occluded(occluded);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.input.on_key(key, event.state.is_pressed());
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = MouseButton::from_winit(button) {
                    self.input
                        .on_mouse_button(button, state == ElementState::Pressed);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.input
                    .on_cursor_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::CursorLeft { .. } => self.input.on_cursor_left(),
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 40.0,
                };
                self.input.on_scroll(lines);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn load_config() -> Result<RendererConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            RendererConfig::load(&path).with_context(|| format!("failed to load {}", path))
        }
        None => Ok(RendererConfig::default()),
    }
}

fn shader_dir() -> PathBuf {
    match std::env::var_os("PACER_SHADER_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => Path::new(env!("CARGO_MANIFEST_DIR")).join("../../shaders"),
    }
}

fn main() -> Result<()> {
    pacer_core::init_logging();
    info!("Starting pacer");

    let config = load_config()?;
    let shader_dir = shader_dir();
    if !shader_dir.join("mesh.vert.spv").exists() {
        warn!(
            "Compiled shaders not found in {:?}; see shaders/README.md",
            shader_dir
        );
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, shader_dir);
    event_loop.run_app(&mut app)?;

    Ok(())
}
