//! Physical device (GPU) selection.
//!
//! The selection process:
//! 1. Enumerate all available GPUs
//! 2. Reject GPUs without a queue family that can both draw and present to
//!    the surface, without the required extensions, without Vulkan 1.3, or
//!    without a usable surface format
//! 3. Score the rest by device type plus graphics queue count
//! 4. Pick the highest score
//!
//! # Example
//!
//! ```no_run
//! use pacer_rhi::instance::Instance;
//! use pacer_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(c"pacer", &[], false).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("Failed to select physical device");
//! println!("Selected GPU: {}", device_info.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Device extensions every candidate must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family chosen for rendering.
///
/// Submission and presentation always share one family so swapchain images
/// never need ownership transfers between queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family that supports both graphics and presentation to the surface.
    pub graphics_present_family: Option<u32>,
    /// Total queues across all graphics-capable families.
    pub graphics_queue_count: u32,
}

impl QueueFamilyIndices {
    /// Checks if a combined graphics + present family was found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_present_family.is_some()
    }
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Queue family selection for this device.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Score used to rank suitable devices. Higher is better.
    pub fn score(&self) -> u32 {
        rate_device(
            self.properties.device_type,
            self.queue_families.graphics_queue_count,
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for rendering to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let candidates: Vec<PhysicalDeviceInfo> = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .inspect(|info| {
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                info.score()
            );
        })
        .collect();

    let Some(selected) = choose_best(candidates) else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        selected.score()
    );

    Ok(selected)
}

/// Returns the highest scoring candidate. Ties keep enumeration order.
pub fn choose_best(candidates: Vec<PhysicalDeviceInfo>) -> Option<PhysicalDeviceInfo> {
    let mut best: Option<PhysicalDeviceInfo> = None;
    for candidate in candidates {
        match &best {
            Some(current) if current.score() >= candidate.score() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Ranks a device: type dominates, graphics queue count breaks ties.
pub fn rate_device(device_type: vk::PhysicalDeviceType, graphics_queue_count: u32) -> u32 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        _ => 10,
    };

    // Keep the queue bonus below the gap between two device types.
    type_score + graphics_queue_count.min(64)
}

/// Returns the required extensions missing from `available`.
pub fn missing_extensions<'a>(
    available: &[vk::ExtensionProperties],
    required: &[&'a CStr],
) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(*name))
        })
        .collect()
}

/// Checks if a physical device is suitable for rendering.
fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };

    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown".to_string());

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: no queue family supports both graphics and present", name);
        return None;
    }

    let available = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
    };
    let missing = missing_extensions(&available, REQUIRED_DEVICE_EXTENSIONS);
    if !missing.is_empty() {
        debug!("GPU '{}' skipped: missing extensions {:?}", name, missing);
        return None;
    }

    let formats = unsafe {
        surface_loader
            .get_physical_device_surface_formats(device, surface)
            .unwrap_or_default()
    };
    if formats.is_empty() {
        debug!("GPU '{}' skipped: no compatible surface format", name);
        return None;
    }

    let major = vk::api_version_major(properties.api_version);
    let minor = vk::api_version_minor(properties.api_version);
    if (major, minor) < (1, 3) {
        debug!(
            "GPU '{}' skipped: Vulkan 1.3 not supported (version: {}.{})",
            name, major, minor
        );
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        queue_families,
    })
}

/// Finds a family supporting graphics and present, and counts graphics queues.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 || !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }

        indices.graphics_queue_count += family.queue_count;

        if indices.graphics_present_family.is_none() {
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };
            if present_support {
                indices.graphics_present_family = Some(i);
            }
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(device_type: vk::PhysicalDeviceType, queues: u32) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties {
                device_type,
                api_version: vk::API_VERSION_1_3,
                ..Default::default()
            },
            features: vk::PhysicalDeviceFeatures::default(),
            queue_families: QueueFamilyIndices {
                graphics_present_family: Some(0),
                graphics_queue_count: queues,
            },
        }
    }

    #[test]
    fn test_discrete_beats_integrated() {
        let integrated = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 1);
        let discrete = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1);

        let selected = choose_best(vec![integrated, discrete]).unwrap();
        assert_eq!(
            selected.properties.device_type,
            vk::PhysicalDeviceType::DISCRETE_GPU
        );
    }

    #[test]
    fn test_type_order() {
        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 0);
        let integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 0);
        let virtual_gpu = rate_device(vk::PhysicalDeviceType::VIRTUAL_GPU, 0);
        let cpu = rate_device(vk::PhysicalDeviceType::CPU, 0);
        assert!(discrete > integrated);
        assert!(integrated > virtual_gpu);
        assert!(virtual_gpu > cpu);
    }

    #[test]
    fn test_queue_count_breaks_ties_but_not_types() {
        let more_queues = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 16);
        let fewer_queues = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 1);
        assert!(more_queues.score() > fewer_queues.score());

        let huge_integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, u32::MAX);
        let small_discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 1);
        assert!(small_discrete > huge_integrated);
    }

    #[test]
    fn test_choose_best_empty() {
        assert!(choose_best(Vec::new()).is_none());
    }

    #[test]
    fn test_missing_extensions() {
        let swapchain = vk::ExtensionProperties::default()
            .extension_name(ash::khr::swapchain::NAME)
            .unwrap();
        let unrelated = vk::ExtensionProperties::default()
            .extension_name(c"VK_KHR_unrelated")
            .unwrap();

        assert!(missing_extensions(&[unrelated, swapchain], REQUIRED_DEVICE_EXTENSIONS).is_empty());
        assert_eq!(
            missing_extensions(&[unrelated], REQUIRED_DEVICE_EXTENSIONS),
            vec![ash::khr::swapchain::NAME]
        );
    }

    #[test]
    fn test_queue_family_indices_complete() {
        assert!(!QueueFamilyIndices::default().is_complete());
        let indices = QueueFamilyIndices {
            graphics_present_family: Some(2),
            graphics_queue_count: 1,
        };
        assert!(indices.is_complete());
    }
}
