//! Window creation and the Vulkan presentation surface.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use pacer_core::{Error, Result, WindowConfig};

use crate::surface_state::{DrawableSize, SurfaceState};

/// RAII wrapper for a Vulkan surface.
///
/// The caller must keep the Vulkan instance alive for as long as the surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for querying capabilities, formats and present modes.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // as the loader, and destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Application window plus the surface state it feeds.
pub struct Window {
    window: Arc<WinitWindow>,
    state: Arc<SurfaceState>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The platform may not honor the requested size exactly.
        let size = window.inner_size();
        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            state: Arc::new(SurfaceState::new(size.width, size.height)),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Shared state handed to the renderer.
    pub fn surface_state(&self) -> Arc<SurfaceState> {
        Arc::clone(&self.state)
    }

    pub fn drawable_size(&self) -> DrawableSize {
        self.state.drawable_size()
    }

    /// Forwards a `Resized` event. winit reports a zero size on minimize.
    pub fn on_resized(&self, size: PhysicalSize<u32>) {
        tracing::debug!("Window resized: {}x{}", size.width, size.height);
        self.state.notify_resized(size.width, size.height);
    }

    /// Forwards an `Occluded` event.
    pub fn on_occluded(&self, occluded: bool) {
        if occluded {
            self.state.notify_minimized();
        } else {
            let size = self.window.inner_size();
            self.state.notify_resized(size.width, size.height);
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface on this display.
    pub fn required_extensions(&self) -> Result<&'static [*const c_char]> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        required_extensions(display_handle.as_raw())
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// `instance` must outlive the returned [`Surface`].
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are valid and the handles come from a
        // live winit window. The surface is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

/// Instance extensions required to present to `display_handle`.
///
/// The returned pointers reference static strings owned by `ash_window`.
pub fn required_extensions(
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<&'static [*const c_char]> {
    let extensions = ash_window::enumerate_required_extensions(display_handle).map_err(|e| {
        Error::Surface(format!("Failed to enumerate required extensions: {}", e))
    })?;

    tracing::debug!(
        "Required surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns valid, null-terminated static strings.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions)
}
