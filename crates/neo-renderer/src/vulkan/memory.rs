//! GPU memory management using gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::VulkanContext;
use crate::RenderError;

fn creation_error(what: &'static str, err: impl std::fmt::Display) -> RenderError {
    RenderError::ResourceCreation { what, reason: err.to_string() }
}

/// GPU buffer with associated memory.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// Copy `data` into the mapped buffer at `offset`. Returns false when the
    /// buffer is not host visible or the data does not fit.
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, data: &[u8]) -> bool {
        let Some(mapped) = self.allocation.as_mut().and_then(|a| a.mapped_slice_mut()) else {
            return false;
        };
        let start = offset as usize;
        match mapped.get_mut(start..start + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

/// GPU image with associated memory.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Aspect flags of an image view for `format`.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn allocator_debug_settings() -> gpu_allocator::AllocatorDebugSettings {
    let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
    debug_settings.log_memory_information = cfg!(debug_assertions);
    debug_settings.log_leaks_on_shutdown = true;
    debug_settings
}

/// Memory manager wrapping gpu-allocator.
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    /// # Safety
    /// `ctx` must hold live instance and device handles.
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self, RenderError> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings: allocator_debug_settings(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| creation_error("allocator", e))?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: ctx.device.clone(),
        })
    }

    /// # Safety
    /// The device must be live.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Buffer, RenderError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self.device.create_buffer(&buffer_info, None)?;
        let requirements = self.device.get_buffer_memory_requirements(handle);

        let allocation = match self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.device.destroy_buffer(handle, None);
                return Err(creation_error("buffer memory", e));
            }
        };

        self.device
            .bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;

        Ok(Buffer {
            handle,
            allocation: Some(allocation),
            size,
        })
    }

    /// Host-visible index stream for per-draw uploads.
    ///
    /// # Safety
    /// The device must be live.
    pub unsafe fn create_stream_index_buffer(&self, size: vk::DeviceSize) -> Result<Buffer, RenderError> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::INDEX_BUFFER,
            MemoryLocation::CpuToGpu,
            "stream indices",
        )
    }

    /// # Safety
    /// The device must be live and `format` usable with `usage`.
    pub unsafe fn create_image_2d(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> Result<Image, RenderError> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self.device.create_image(&image_info, None)?;
        let requirements = self.device.get_image_memory_requirements(handle);

        let allocation = match self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.device.destroy_image(handle, None);
                return Err(creation_error("image memory", e));
            }
        };

        self.device
            .bind_image_memory(handle, allocation.memory(), allocation.offset())?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = self.device.create_image_view(&view_info, None)?;

        Ok(Image {
            handle,
            view,
            allocation: Some(allocation),
            format,
            extent: vk::Extent2D { width, height },
        })
    }

    /// Colour target that is later sampled by the blit.
    ///
    /// # Safety
    /// The device must be live.
    pub unsafe fn create_render_target(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<Image, RenderError> {
        self.create_image_2d(
            width,
            height,
            format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            "offscreen color",
        )
    }

    /// # Safety
    /// The device must be live.
    pub unsafe fn create_depth_stencil(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<Image, RenderError> {
        self.create_image_2d(
            width,
            height,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            "offscreen depth",
        )
    }

    /// # Safety
    /// The GPU must be done with the buffer.
    pub unsafe fn destroy_buffer(&self, buffer: Buffer) {
        self.device.destroy_buffer(buffer.handle, None);
        if let Some(allocation) = buffer.allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("failed to free buffer memory: {}", e);
            }
        }
    }

    /// # Safety
    /// The GPU must be done with the image.
    pub unsafe fn destroy_image(&self, image: Image) {
        self.device.destroy_image_view(image.view, None);
        self.device.destroy_image(image.handle, None);
        if let Some(allocation) = image.allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("failed to free image memory: {}", e);
            }
        }
    }
}
