//! Vulkan context: the instance, device and queue handed over by the host.
//!
//! Instance and device creation belong to the windowing layer; the renderer
//! only queries what it needs from them.

use ash::{vk, Device, Instance};

use super::REQUIRED_VK_VERSION;
use crate::tr_local::GlConfig;
use crate::RenderError;

/// Packed depth/stencil formats in order of preference.
pub const DEPTH_STENCIL_FORMATS: [vk::Format; 2] =
    [vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT_S8_UINT];

/// Main Vulkan context holding the core objects the renderer draws with.
pub struct VulkanContext {
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub graphics_family: u32,
    pub graphics_queue: vk::Queue,
    pub device_properties: vk::PhysicalDeviceProperties,
    pub device_features: vk::PhysicalDeviceFeatures,
}

impl VulkanContext {
    /// Wrap host-created handles.
    ///
    /// # Safety
    /// `device` must have been created from `physical_device` with dynamic
    /// rendering and extended dynamic state enabled, and must outlive the
    /// context.
    pub unsafe fn from_handles(
        instance: Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        graphics_family: u32,
    ) -> Result<Self, RenderError> {
        let device_properties = instance.get_physical_device_properties(physical_device);
        if device_properties.api_version < REQUIRED_VK_VERSION {
            return Err(RenderError::Unsupported("Vulkan 1.3 required"));
        }

        let device_features = instance.get_physical_device_features(physical_device);
        let graphics_queue = device.get_device_queue(graphics_family, 0);

        let name = device_properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!(
            "Vulkan device: {} (API {}.{}.{})",
            name,
            vk::api_version_major(device_properties.api_version),
            vk::api_version_minor(device_properties.api_version),
            vk::api_version_patch(device_properties.api_version)
        );

        Ok(Self {
            instance,
            physical_device,
            device,
            graphics_family,
            graphics_queue,
            device_properties,
            device_features,
        })
    }

    /// Whether `format` supports `features` with optimal tiling.
    pub fn supports_format(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool {
        // SAFETY: instance and physical device are valid for the context lifetime
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props.optimal_tiling_features.contains(features)
    }

    /// First packed depth/stencil format usable as an attachment.
    pub fn depth_stencil_format(&self) -> Option<vk::Format> {
        DEPTH_STENCIL_FORMATS
            .into_iter()
            .find(|&f| self.supports_format(f, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
    }

    /// Capabilities as seen by the back end.
    pub fn gl_config(&self, logical: (u32, u32), real: (u32, u32)) -> GlConfig {
        derive_gl_config(
            self.device_features.full_draw_index_uint32 == vk::TRUE,
            self.depth_stencil_format(),
            logical,
            real,
        )
    }
}

/// Build a `GlConfig` from device capabilities.
pub fn derive_gl_config(
    full_draw_index_uint32: bool,
    depth_stencil_format: Option<vk::Format>,
    logical: (u32, u32),
    real: (u32, u32),
) -> GlConfig {
    GlConfig {
        use_short_index_elements: !full_draw_index_uint32,
        npot_available: true,
        depth_stencil_available: depth_stencil_format.is_some(),
        stencil_bits: 8,
        vid_width: logical.0,
        vid_height: logical.1,
        vid_width_real: real.0,
        vid_height_real: real.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_indices_without_full_uint32() {
        let config = derive_gl_config(false, Some(vk::Format::D24_UNORM_S8_UINT), (800, 600), (1280, 720));
        assert!(config.use_short_index_elements);
        assert!(config.depth_stencil_available);
        assert_eq!(config.stencil_bits, 8);
        assert_eq!((config.vid_width, config.vid_height), (800, 600));
        assert_eq!((config.vid_width_real, config.vid_height_real), (1280, 720));
    }

    #[test]
    fn test_full_uint32_and_no_packed_format() {
        let config = derive_gl_config(true, None, (640, 480), (640, 480));
        assert!(!config.use_short_index_elements);
        assert!(!config.depth_stencil_available);
    }

    #[test]
    fn test_depth_stencil_preference() {
        assert_eq!(DEPTH_STENCIL_FORMATS[0], vk::Format::D24_UNORM_S8_UINT);
    }
}
