//! Vulkan implementation of the hardware draw layer.
//!
//! The host owns the instance, the device and the swapchain. Each frame it
//! hands the device a command buffer in the recording state plus the display
//! image to draw into; everything else (offscreen targets, the index stream,
//! the blit pipeline) is owned here.

pub mod blit;
pub mod context;
pub mod device;
pub mod memory;

pub use context::VulkanContext;
pub use device::{DisplayTarget, VulkanDevice, DYNAMIC_STATES};
pub use memory::{Buffer, Image, MemoryManager};

use ash::vk;

/// Dynamic rendering and extended dynamic state are core from 1.3.
pub const REQUIRED_VK_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);
