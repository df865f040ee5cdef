//! Renderer configuration.
//!
//! Every field has a default, so a TOML file only needs to list the
//! values it overrides:
//!
//! ```toml
//! frames_in_flight = 2
//! command_wait_ms = 500
//!
//! [window]
//! width = 1920
//! height = 1080
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Initial window settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: String::from("pacer"),
        }
    }
}

/// Tunables for frame pacing, the command buffer worker and swapchain setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots (fence + semaphore pairs) rotating per frame.
    pub frames_in_flight: usize,
    /// Maximum pre-built command buffers held per swapchain image.
    pub max_queued_per_image: usize,
    /// Bound on a single frame fence wait.
    pub fence_timeout_ms: u64,
    /// Consecutive fence timeouts after which a rebuild is requested.
    pub fence_timeout_escalation: u32,
    /// How long a frame waits for a ready command buffer before it is skipped.
    pub command_wait_ms: u64,
    /// How long shutdown waits for the worker thread to exit.
    pub worker_stop_timeout_ms: u64,
    /// Prefer a non-blocking present mode over FIFO when available.
    pub prefer_low_latency: bool,
    /// Enable the Vulkan validation layer.
    pub enable_validation: bool,
    pub window: WindowConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_queued_per_image: 3,
            fence_timeout_ms: 1000,
            fence_timeout_escalation: 3,
            command_wait_ms: 2000,
            worker_stop_timeout_ms: 5000,
            prefer_low_latency: true,
            enable_validation: cfg!(debug_assertions),
            window: WindowConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.max_queued_per_image == 0 {
            return Err(Error::Config(
                "max_queued_per_image must be at least 1".into(),
            ));
        }
        if self.fence_timeout_escalation == 0 {
            return Err(Error::Config(
                "fence_timeout_escalation must be at least 1".into(),
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size {}x{} is empty",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn command_wait(&self) -> Duration {
        Duration::from_millis(self.command_wait_ms)
    }

    pub fn worker_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_stop_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.max_queued_per_image, 3);
        assert_eq!(config.command_wait(), Duration::from_millis(2000));
        assert_eq!(config.worker_stop_timeout(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            command_wait_ms = 250

            [window]
            width = 800
            height = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.command_wait_ms, 250);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.title, "pacer");
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn test_zero_frames_in_flight_is_rejected() {
        let err = RendererConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = RendererConfig::from_toml_str("frames_in_flight = \"two\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RendererConfig::load("/nonexistent/pacer.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
