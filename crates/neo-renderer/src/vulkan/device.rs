//! `RenderDevice` on Vulkan 1.3.
//!
//! Fixed-function state is mapped onto extended dynamic state, so the host's
//! surface pipelines must be created with `DYNAMIC_STATES`. Blend factors and
//! colour masks cannot be set dynamically in core 1.3; they stay in the state
//! bits for the host to pick a matching pipeline (`state_bits`,
//! `blend_enabled`).
//!
//! Render passes are begun lazily on the first clear or draw after a target
//! is bound, and ended when the binding changes or the frame ends. The display
//! image is expected in `COLOR_ATTACHMENT_OPTIMAL` on entry and is left in
//! that layout.

use std::collections::HashMap;

use ash::vk;

use super::blit::{self, BlitPipeline};
use super::memory::{aspect_mask, Buffer, Image, MemoryManager};
use super::VulkanContext;
use crate::device::{
    Attachment, BlitQuad, Capability, ClearValues, CullType, FramebufferId, FramebufferStatus, GlsBits,
    IndexData, IndexType, PrimitiveMode, ProgramId, RenderDevice, RenderbufferFormat, RenderbufferId,
    TextureFilter, TextureId,
};
use crate::tr_local::{GlConfig, PixelRect};
use crate::RenderError;

/// Dynamic states every surface pipeline must declare.
pub const DYNAMIC_STATES: [vk::DynamicState; 9] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::CULL_MODE,
    vk::DynamicState::PRIMITIVE_TOPOLOGY,
    vk::DynamicState::DEPTH_TEST_ENABLE,
    vk::DynamicState::DEPTH_WRITE_ENABLE,
    vk::DynamicState::DEPTH_COMPARE_OP,
    vk::DynamicState::STENCIL_TEST_ENABLE,
    vk::DynamicState::STENCIL_WRITE_MASK,
];

/// Offscreen colour format.
pub const OFFSCREEN_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Per-frame index stream size.
const INDEX_RING_BYTES: vk::DeviceSize = 8 * 1024 * 1024;

/// Offscreen textures alive at once.
const MAX_TEXTURES: u32 = 16;

/// Display image for the current frame, owned by the host.
#[derive(Clone, Copy, Debug)]
pub struct DisplayTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

struct TextureEntry {
    image: Image,
    sampler: vk::Sampler,
    descriptor_set: vk::DescriptorSet,
    layout: vk::ImageLayout,
}

struct RenderbufferEntry {
    image: Image,
    layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug, Default)]
struct FramebufferObject {
    color: Option<TextureId>,
    depth: Option<RenderbufferId>,
    stencil: Option<RenderbufferId>,
}

#[derive(Clone, Copy)]
struct FrameRecording {
    cmd: vk::CommandBuffer,
    display: DisplayTarget,
}

/// What the bound target resolves to when a pass begins.
#[derive(Clone, Copy)]
struct TargetViews {
    color: vk::ImageView,
    extent: vk::Extent2D,
    depth: Option<vk::ImageView>,
    stencil: Option<vk::ImageView>,
}

/// An attachment as seen by the completeness check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachedBuffer {
    pub id: u32,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

// ============================================================================
// State translation
// ============================================================================

/// GL viewport (origin bottom-left) as a flipped Vulkan viewport.
pub fn gl_viewport(rect: PixelRect, target_height: u32) -> vk::Viewport {
    vk::Viewport {
        x: rect.x as f32,
        y: (target_height as i32 - rect.y) as f32,
        width: rect.width as f32,
        height: -(rect.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// GL scissor (origin bottom-left) clipped to the target.
pub fn gl_scissor(rect: PixelRect, target: vk::Extent2D) -> vk::Rect2D {
    let w = target.width as i32;
    let h = target.height as i32;
    let x0 = rect.x.clamp(0, w);
    let x1 = (rect.x + rect.width).clamp(0, w);
    let y0 = (h - (rect.y + rect.height)).clamp(0, h);
    let y1 = (h - rect.y).clamp(0, h);
    vk::Rect2D {
        offset: vk::Offset2D { x: x0, y: y0 },
        extent: vk::Extent2D {
            width: (x1 - x0).max(0) as u32,
            height: (y1 - y0).max(0) as u32,
        },
    }
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent }
}

pub fn depth_compare_op(bits: GlsBits) -> vk::CompareOp {
    if bits.contains(GlsBits::DEPTHFUNC_ALWAYS) {
        vk::CompareOp::ALWAYS
    } else if bits.contains(GlsBits::DEPTHFUNC_EQUAL) {
        vk::CompareOp::EQUAL
    } else if bits.contains(GlsBits::DEPTHFUNC_LESS) {
        vk::CompareOp::LESS
    } else {
        vk::CompareOp::LESS_OR_EQUAL
    }
}

/// Front-sided surfaces cull their back faces.
pub fn cull_mode(cull: CullType) -> vk::CullModeFlags {
    match cull {
        CullType::FrontSided => vk::CullModeFlags::BACK,
        CullType::BackSided => vk::CullModeFlags::FRONT,
        CullType::TwoSided => vk::CullModeFlags::NONE,
    }
}

pub fn topology(mode: PrimitiveMode) -> vk::PrimitiveTopology {
    match mode {
        PrimitiveMode::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveMode::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveMode::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        PrimitiveMode::Lines => vk::PrimitiveTopology::LINE_LIST,
    }
}

pub fn vk_index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub fn vk_filter(filter: TextureFilter) -> vk::Filter {
    match filter {
        TextureFilter::Nearest => vk::Filter::NEAREST,
        TextureFilter::Linear => vk::Filter::LINEAR,
    }
}

/// Vulkan format for a renderbuffer. Stencil must share the depth image
/// under dynamic rendering, so a stencil-only buffer is not offered.
pub fn renderbuffer_format(
    format: RenderbufferFormat,
    packed: Option<vk::Format>,
) -> Result<vk::Format, RenderError> {
    match format {
        RenderbufferFormat::Depth24Stencil8 => {
            packed.ok_or(RenderError::Unsupported("packed depth/stencil format"))
        }
        RenderbufferFormat::Depth16 => Ok(vk::Format::D16_UNORM),
        RenderbufferFormat::Stencil8 => Err(RenderError::Unsupported("separate stencil renderbuffer")),
    }
}

/// Completeness of an offscreen framebuffer.
pub fn check_completeness(
    color: Option<vk::Extent2D>,
    depth: Option<AttachedBuffer>,
    stencil: Option<AttachedBuffer>,
) -> FramebufferStatus {
    let Some(extent) = color else {
        return FramebufferStatus::Incomplete("missing color attachment".into());
    };
    if depth.iter().chain(stencil.iter()).any(|b| b.extent != extent) {
        return FramebufferStatus::Incomplete("attachment dimensions differ".into());
    }
    if let Some(d) = depth {
        if !aspect_mask(d.format).contains(vk::ImageAspectFlags::DEPTH) {
            return FramebufferStatus::Incomplete("depth attachment has no depth aspect".into());
        }
    }
    if let Some(s) = stencil {
        if !aspect_mask(s.format).contains(vk::ImageAspectFlags::STENCIL) {
            return FramebufferStatus::Incomplete("stencil attachment has no stencil aspect".into());
        }
    }
    if let (Some(d), Some(s)) = (depth, stencil) {
        if d.id != s.id {
            return FramebufferStatus::Incomplete("depth and stencil must share one image".into());
        }
    }
    FramebufferStatus::Complete
}

/// Access masks and stages for a layout transition.
pub fn barrier_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Option<(vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    let ds_stages = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    match (old, new) {
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Some((
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Some((
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            ds_stages,
        )),
        _ => None,
    }
}

/// Bytes to skip so an index write at `cursor` is 4-byte aligned.
fn align_index_offset(cursor: vk::DeviceSize) -> vk::DeviceSize {
    (cursor + 3) & !3
}

// ============================================================================
// VulkanDevice
// ============================================================================

pub struct VulkanDevice {
    ctx: VulkanContext,
    memory: MemoryManager,
    gl_config: GlConfig,
    depth_stencil_format: Option<vk::Format>,
    display_format: vk::Format,

    blit_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,

    textures: HashMap<u32, TextureEntry>,
    renderbuffers: HashMap<u32, RenderbufferEntry>,
    framebuffers: HashMap<u32, FramebufferObject>,
    programs: HashMap<u32, BlitPipeline>,
    next_id: u32,

    index_ring: Option<Buffer>,
    index_cursor: vk::DeviceSize,

    frame: Option<FrameRecording>,
    bound_framebuffer: Option<FramebufferId>,
    rendering: Option<TargetViews>,

    viewport: PixelRect,
    scissor: PixelRect,
    state_bits: GlsBits,
    face_cull: CullType,
    depth_test: bool,
    stencil_test: bool,
    blend: bool,
    scissor_test: bool,
    stencil_write_mask: u32,
}

impl VulkanDevice {
    /// # Safety
    /// `ctx` must hold live handles; `display_format` is the format of every
    /// `DisplayTarget` later passed to `begin_frame`.
    pub unsafe fn new(
        ctx: VulkanContext,
        display_format: vk::Format,
        logical: (u32, u32),
        real: (u32, u32),
    ) -> Result<Self, RenderError> {
        let memory = MemoryManager::new(&ctx)?;
        let gl_config = ctx.gl_config(logical, real);
        let depth_stencil_format = ctx.depth_stencil_format();
        log::info!(
            "GL_CONFIG: short indices {}, depth/stencil {:?}",
            gl_config.use_short_index_elements,
            depth_stencil_format
        );

        let blit_set_layout = blit::create_descriptor_set_layout(&ctx.device)?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_TEXTURES,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_TEXTURES)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = match ctx.device.create_descriptor_pool(&pool_info, None) {
            Ok(pool) => pool,
            Err(e) => {
                ctx.device.destroy_descriptor_set_layout(blit_set_layout, None);
                return Err(e.into());
            }
        };

        let index_ring = match memory.create_stream_index_buffer(INDEX_RING_BYTES) {
            Ok(buffer) => buffer,
            Err(e) => {
                ctx.device.destroy_descriptor_pool(descriptor_pool, None);
                ctx.device.destroy_descriptor_set_layout(blit_set_layout, None);
                return Err(e);
            }
        };

        Ok(Self {
            ctx,
            memory,
            gl_config,
            depth_stencil_format,
            display_format,
            blit_set_layout,
            descriptor_pool,
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            index_ring: Some(index_ring),
            index_cursor: 0,
            frame: None,
            bound_framebuffer: None,
            rendering: None,
            viewport: PixelRect::default(),
            scissor: PixelRect::default(),
            state_bits: GlsBits::empty(),
            face_cull: CullType::FrontSided,
            depth_test: false,
            stencil_test: false,
            blend: false,
            scissor_test: false,
            stencil_write_mask: 0xff,
        })
    }

    pub fn context(&self) -> &VulkanContext {
        &self.ctx
    }

    /// Current state bits, for the host's pipeline selection.
    pub fn state_bits(&self) -> GlsBits {
        self.state_bits
    }

    pub fn blend_enabled(&self) -> bool {
        self.blend
    }

    /// Update logical and real display sizes after a mode change.
    pub fn set_render_sizes(&mut self, logical: (u32, u32), real: (u32, u32)) {
        self.gl_config.vid_width = logical.0;
        self.gl_config.vid_height = logical.1;
        self.gl_config.vid_width_real = real.0;
        self.gl_config.vid_height_real = real.1;
    }

    /// Start recording into `cmd`, which must be in the recording state.
    pub fn begin_frame(&mut self, cmd: vk::CommandBuffer, display: DisplayTarget) {
        if self.frame.is_some() {
            log::warn!("begin_frame called twice without end_frame");
            self.end_frame();
        }
        self.frame = Some(FrameRecording { cmd, display });
        self.bound_framebuffer = None;
        self.index_cursor = 0;
    }

    /// Close any open pass. The host submits the command buffer afterwards.
    pub fn end_frame(&mut self) {
        self.end_pass();
        self.frame = None;
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> bool {
        let Some((src_access, dst_access, src_stage, dst_stage)) = barrier_masks(old, new) else {
            return old == new;
        };
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);
        // SAFETY: cmd is recording and outside a render pass
        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        true
    }

    fn set_texture_layout(&mut self, cmd: vk::CommandBuffer, id: TextureId, layout: vk::ImageLayout) {
        let Some(tex) = self.textures.get(&id.0) else {
            return;
        };
        if tex.layout == layout {
            return;
        }
        let (image, aspect, old) = (tex.image.handle, aspect_mask(tex.image.format), tex.layout);
        if self.transition(cmd, image, aspect, old, layout) {
            if let Some(tex) = self.textures.get_mut(&id.0) {
                tex.layout = layout;
            }
        }
    }

    fn prepare_renderbuffer(&mut self, cmd: vk::CommandBuffer, id: RenderbufferId) -> Option<vk::ImageView> {
        let rb = self.renderbuffers.get(&id.0)?;
        let (image, view, aspect, old) = (rb.image.handle, rb.image.view, aspect_mask(rb.image.format), rb.layout);
        let target = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        if old != target && self.transition(cmd, image, aspect, old, target) {
            if let Some(rb) = self.renderbuffers.get_mut(&id.0) {
                rb.layout = target;
            }
        }
        Some(view)
    }

    /// Resolve the bound target and begin a pass on it if none is open.
    fn ensure_pass(&mut self) -> Option<(vk::CommandBuffer, TargetViews)> {
        let frame = self.frame?;
        if let Some(views) = self.rendering {
            return Some((frame.cmd, views));
        }

        let views = match self.bound_framebuffer {
            None => TargetViews {
                color: frame.display.view,
                extent: frame.display.extent,
                depth: None,
                stencil: None,
            },
            Some(fb) => {
                let fbo = *self.framebuffers.get(&fb.0)?;
                let color_id = fbo.color?;
                self.set_texture_layout(frame.cmd, color_id, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                let color = self.textures.get(&color_id.0)?;
                let (color_view, extent) = (color.image.view, color.image.extent);
                let depth = fbo.depth.and_then(|rb| self.prepare_renderbuffer(frame.cmd, rb));
                let stencil = fbo.stencil.and_then(|rb| self.prepare_renderbuffer(frame.cmd, rb));
                TargetViews { color: color_view, extent, depth, stencil }
            }
        };

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(views.color)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let depth_attachment = views.depth.map(|view| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });
        let stencil_attachment = views.stencil.map(|view| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(full_rect(views.extent))
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        if let Some(stencil) = stencil_attachment.as_ref() {
            rendering_info = rendering_info.stencil_attachment(stencil);
        }

        // SAFETY: cmd is recording; all views belong to live images
        unsafe {
            self.ctx.device.cmd_begin_rendering(frame.cmd, &rendering_info);
        }
        self.rendering = Some(views);
        Some((frame.cmd, views))
    }

    /// End the open pass; an offscreen colour target becomes sampleable.
    fn end_pass(&mut self) {
        let (Some(frame), Some(_)) = (self.frame, self.rendering.take()) else {
            return;
        };
        // SAFETY: a pass was begun on this command buffer
        unsafe {
            self.ctx.device.cmd_end_rendering(frame.cmd);
        }
        if let Some(color) = self
            .bound_framebuffer
            .and_then(|fb| self.framebuffers.get(&fb.0))
            .and_then(|fbo| fbo.color)
        {
            self.set_texture_layout(frame.cmd, color, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
    }

    fn scissor_rect(&self, extent: vk::Extent2D) -> vk::Rect2D {
        if self.scissor_test {
            gl_scissor(self.scissor, extent)
        } else {
            full_rect(extent)
        }
    }

    fn flush_dynamic_state(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D, mode: PrimitiveMode) {
        let device = &self.ctx.device;
        // SAFETY: cmd is recording inside a pass
        unsafe {
            device.cmd_set_viewport(cmd, 0, &[gl_viewport(self.viewport, extent.height)]);
            device.cmd_set_scissor(cmd, 0, &[self.scissor_rect(extent)]);
            device.cmd_set_cull_mode(cmd, cull_mode(self.face_cull));
            device.cmd_set_primitive_topology(cmd, topology(mode));
            device.cmd_set_depth_test_enable(cmd, self.depth_test);
            device.cmd_set_depth_write_enable(cmd, !self.state_bits.contains(GlsBits::DEPTHMASK));
            device.cmd_set_depth_compare_op(cmd, depth_compare_op(self.state_bits));
            device.cmd_set_stencil_test_enable(cmd, self.stencil_test);
            device.cmd_set_stencil_write_mask(cmd, vk::StencilFaceFlags::FRONT_AND_BACK, self.stencil_write_mask);
        }
    }

    /// Copy `indices` into the stream and return the offset they landed at.
    fn stream_indices(&mut self, indices: IndexData<'_>) -> Option<vk::DeviceSize> {
        let bytes = indices.as_bytes();
        let offset = align_index_offset(self.index_cursor);
        let ring = self.index_ring.as_mut()?;
        if offset + bytes.len() as vk::DeviceSize > ring.size || !ring.write_bytes(offset, bytes) {
            log::warn!("index stream full, dropping draw of {} indexes", indices.len());
            return None;
        }
        self.index_cursor = offset + bytes.len() as vk::DeviceSize;
        Some(offset)
    }

    fn destroy_texture_entry(&self, tex: TextureEntry) {
        // SAFETY: callers wait for the device to go idle first
        unsafe {
            if let Err(e) = self
                .ctx
                .device
                .free_descriptor_sets(self.descriptor_pool, &[tex.descriptor_set])
            {
                log::warn!("failed to free descriptor set: {:?}", e);
            }
            self.ctx.device.destroy_sampler(tex.sampler, None);
            self.memory.destroy_image(tex.image);
        }
    }

    fn wait_idle(&self) {
        // SAFETY: device is live
        if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
            log::warn!("device_wait_idle failed: {:?}", e);
        }
    }

    /// Release everything the device created. The context's handles stay
    /// with the host.
    ///
    /// # Safety
    /// No command buffer referencing these resources may still be pending.
    pub unsafe fn destroy(mut self) {
        self.wait_idle();
        for (_, tex) in std::mem::take(&mut self.textures) {
            self.destroy_texture_entry(tex);
        }
        for (_, rb) in std::mem::take(&mut self.renderbuffers) {
            self.memory.destroy_image(rb.image);
        }
        for (_, program) in std::mem::take(&mut self.programs) {
            program.destroy(&self.ctx.device);
        }
        if let Some(ring) = self.index_ring.take() {
            self.memory.destroy_buffer(ring);
        }
        self.ctx.device.destroy_descriptor_pool(self.descriptor_pool, None);
        self.ctx.device.destroy_descriptor_set_layout(self.blit_set_layout, None);
    }
}

impl RenderDevice for VulkanDevice {
    fn gl_config(&self) -> &GlConfig {
        &self.gl_config
    }

    fn viewport(&mut self, rect: PixelRect) {
        self.viewport = rect;
    }

    fn scissor(&mut self, rect: PixelRect) {
        self.scissor = rect;
    }

    fn set_state(&mut self, bits: GlsBits) {
        self.state_bits = bits;
    }

    fn cull(&mut self, cull: CullType) {
        self.face_cull = cull;
    }

    fn set_enabled(&mut self, cap: Capability, enabled: bool) {
        match cap {
            Capability::DepthTest => self.depth_test = enabled,
            Capability::StencilTest => self.stencil_test = enabled,
            Capability::Blend => self.blend = enabled,
            Capability::ScissorTest => self.scissor_test = enabled,
        }
    }

    fn stencil_mask(&mut self, mask: u32) {
        self.stencil_write_mask = mask;
    }

    fn clear(&mut self, values: ClearValues) {
        let Some((cmd, views)) = self.ensure_pass() else {
            log::warn!("clear outside of a frame");
            return;
        };

        let mut attachments = Vec::with_capacity(2);
        if let Some(color) = values.color {
            attachments.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            });
        }
        let mut ds_aspect = vk::ImageAspectFlags::empty();
        if values.depth.is_some() && views.depth.is_some() {
            ds_aspect |= vk::ImageAspectFlags::DEPTH;
        }
        if values.stencil.is_some() && views.stencil.is_some() {
            ds_aspect |= vk::ImageAspectFlags::STENCIL;
        }
        if !ds_aspect.is_empty() {
            attachments.push(vk::ClearAttachment {
                aspect_mask: ds_aspect,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: values.depth.unwrap_or(1.0),
                        stencil: values.stencil.unwrap_or(0),
                    },
                },
            });
        }
        if attachments.is_empty() {
            return;
        }

        let rect = self.scissor_rect(views.extent);
        if rect.extent.width == 0 || rect.extent.height == 0 {
            return;
        }
        let rects = [vk::ClearRect { rect, base_array_layer: 0, layer_count: 1 }];
        // SAFETY: cmd is recording inside a pass with these attachments
        unsafe {
            self.ctx.device.cmd_clear_attachments(cmd, &attachments, &rects);
        }
    }

    fn draw_elements(&mut self, mode: PrimitiveMode, indices: IndexData<'_>) {
        if indices.is_empty() {
            return;
        }
        let Some(offset) = self.stream_indices(indices) else {
            return;
        };
        let Some((cmd, views)) = self.ensure_pass() else {
            log::warn!("draw_elements outside of a frame");
            return;
        };
        let Some(ring) = self.index_ring.as_ref().map(|b| b.handle) else {
            return;
        };
        self.flush_dynamic_state(cmd, views.extent, mode);
        // SAFETY: the host bound a pipeline declaring DYNAMIC_STATES
        unsafe {
            self.ctx
                .device
                .cmd_bind_index_buffer(cmd, ring, offset, vk_index_type(indices.index_type()));
            self.ctx.device.cmd_draw_indexed(cmd, indices.len() as u32, 1, 0, 0, 0);
        }
    }

    fn unbind_geometry_buffers(&mut self) {
        // every draw rebinds the index stream; the blit reads no buffers
    }

    fn create_color_texture(
        &mut self,
        width: u32,
        height: u32,
        filter: TextureFilter,
    ) -> Result<TextureId, RenderError> {
        // SAFETY: device is live for the lifetime of self
        unsafe {
            let image = self.memory.create_render_target(width, height, OFFSCREEN_COLOR_FORMAT)?;

            let sampler_info = vk::SamplerCreateInfo::default()
                .mag_filter(vk_filter(filter))
                .min_filter(vk_filter(filter))
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .max_lod(0.0);
            let sampler = match self.ctx.device.create_sampler(&sampler_info, None) {
                Ok(s) => s,
                Err(e) => {
                    self.memory.destroy_image(image);
                    return Err(e.into());
                }
            };

            let set_layouts = [self.blit_set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.descriptor_pool)
                .set_layouts(&set_layouts);
            let descriptor_set = match self.ctx.device.allocate_descriptor_sets(&alloc_info) {
                Ok(sets) if !sets.is_empty() => sets[0],
                Ok(_) => {
                    self.ctx.device.destroy_sampler(sampler, None);
                    self.memory.destroy_image(image);
                    return Err(RenderError::ResourceCreation {
                        what: "descriptor set",
                        reason: "pool returned no sets".into(),
                    });
                }
                Err(e) => {
                    self.ctx.device.destroy_sampler(sampler, None);
                    self.memory.destroy_image(image);
                    return Err(e.into());
                }
            };

            let image_infos = [vk::DescriptorImageInfo::default()
                .sampler(sampler)
                .image_view(image.view)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_infos);
            self.ctx.device.update_descriptor_sets(&[write], &[]);

            let id = self.alloc_id();
            self.textures.insert(
                id,
                TextureEntry {
                    image,
                    sampler,
                    descriptor_set,
                    layout: vk::ImageLayout::UNDEFINED,
                },
            );
            Ok(TextureId(id))
        }
    }

    fn create_renderbuffer(
        &mut self,
        format: RenderbufferFormat,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferId, RenderError> {
        let vk_format = renderbuffer_format(format, self.depth_stencil_format)?;
        // SAFETY: device is live for the lifetime of self
        let image = unsafe { self.memory.create_depth_stencil(width, height, vk_format)? };
        let id = self.alloc_id();
        self.renderbuffers.insert(
            id,
            RenderbufferEntry {
                image,
                layout: vk::ImageLayout::UNDEFINED,
            },
        );
        Ok(RenderbufferId(id))
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let id = self.alloc_id();
        self.framebuffers.insert(id, FramebufferObject::default());
        Ok(FramebufferId(id))
    }

    fn create_blit_program(&mut self) -> Result<ProgramId, RenderError> {
        // SAFETY: the set layout was created on this device
        let pipeline = unsafe { BlitPipeline::new(&self.ctx.device, self.blit_set_layout, self.display_format)? };
        let id = self.alloc_id();
        self.programs.insert(id, pipeline);
        Ok(ProgramId(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self.bound_framebuffer == framebuffer {
            return;
        }
        self.end_pass();
        self.bound_framebuffer = framebuffer;
    }

    fn attach_texture(&mut self, attachment: Attachment, texture: TextureId) {
        let Some(fbo) = self.bound_framebuffer.and_then(|fb| self.framebuffers.get_mut(&fb.0)) else {
            log::warn!("attach_texture with no framebuffer bound");
            return;
        };
        match attachment {
            Attachment::Color0 => fbo.color = Some(texture),
            Attachment::Depth | Attachment::Stencil => {
                log::warn!("colour texture attached as {:?}", attachment);
            }
        }
    }

    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: RenderbufferId) {
        let Some(fbo) = self.bound_framebuffer.and_then(|fb| self.framebuffers.get_mut(&fb.0)) else {
            log::warn!("attach_renderbuffer with no framebuffer bound");
            return;
        };
        match attachment {
            Attachment::Depth => fbo.depth = Some(renderbuffer),
            Attachment::Stencil => fbo.stencil = Some(renderbuffer),
            Attachment::Color0 => log::warn!("renderbuffer attached as colour"),
        }
    }

    fn framebuffer_status(&mut self) -> FramebufferStatus {
        let Some(fb) = self.bound_framebuffer else {
            return FramebufferStatus::Complete;
        };
        let Some(fbo) = self.framebuffers.get(&fb.0).copied() else {
            return FramebufferStatus::Incomplete("framebuffer does not exist".into());
        };
        let attached = |id: Option<RenderbufferId>| -> Result<Option<AttachedBuffer>, FramebufferStatus> {
            match id {
                None => Ok(None),
                Some(rb) => match self.renderbuffers.get(&rb.0) {
                    Some(entry) => Ok(Some(AttachedBuffer {
                        id: rb.0,
                        extent: entry.image.extent,
                        format: entry.image.format,
                    })),
                    None => Err(FramebufferStatus::Incomplete("renderbuffer no longer exists".into())),
                },
            }
        };
        let depth = match attached(fbo.depth) {
            Ok(d) => d,
            Err(status) => return status,
        };
        let stencil = match attached(fbo.stencil) {
            Ok(s) => s,
            Err(status) => return status,
        };
        let color = fbo
            .color
            .and_then(|tex| self.textures.get(&tex.0))
            .map(|t| t.image.extent);
        check_completeness(color, depth, stencil)
    }

    fn draw_blit(&mut self, program: ProgramId, texture: TextureId, quad: &BlitQuad) {
        let Some(frame) = self.frame else {
            log::warn!("draw_blit outside of a frame");
            return;
        };
        let needs_transition = self
            .textures
            .get(&texture.0)
            .is_some_and(|t| t.layout != vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        if needs_transition {
            // barriers cannot be recorded inside a pass
            self.end_pass();
            self.set_texture_layout(frame.cmd, texture, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        let Some((cmd, views)) = self.ensure_pass() else {
            return;
        };
        let (Some(pipeline), Some(tex)) = (self.programs.get(&program.0), self.textures.get(&texture.0)) else {
            log::warn!("draw_blit with unknown program {} or texture {}", program.0, texture.0);
            return;
        };
        let device = &self.ctx.device;
        // SAFETY: cmd is recording inside a pass on a colour target of display_format
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[gl_viewport(self.viewport, views.extent.height)]);
            device.cmd_set_scissor(cmd, 0, &[self.scissor_rect(views.extent)]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                &[tex.descriptor_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                blit::push_constant_bytes(quad),
            );
            device.cmd_draw(cmd, 4, 1, 0, 0);
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            self.wait_idle();
            self.destroy_texture_entry(tex);
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if let Some(rb) = self.renderbuffers.remove(&renderbuffer.0) {
            self.wait_idle();
            // SAFETY: device is idle
            unsafe { self.memory.destroy_image(rb.image) };
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.bound_framebuffer == Some(framebuffer) {
            self.end_pass();
            self.bound_framebuffer = None;
        }
        self.framebuffers.remove(&framebuffer.0);
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(pipeline) = self.programs.remove(&program.0) {
            self.wait_idle();
            // SAFETY: device is idle
            unsafe { pipeline.destroy(&self.ctx.device) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn packed(id: u32, w: u32, h: u32) -> AttachedBuffer {
        AttachedBuffer { id, extent: extent(w, h), format: vk::Format::D24_UNORM_S8_UINT }
    }

    // ========================================================================
    // State translation
    // ========================================================================

    #[test]
    fn test_viewport_is_flipped_from_bottom_left() {
        let vp = gl_viewport(PixelRect::new(10, 20, 300, 200), 600);
        assert_eq!(vp.x, 10.0);
        assert_eq!(vp.y, 580.0);
        assert_eq!(vp.width, 300.0);
        assert_eq!(vp.height, -200.0);
    }

    #[test]
    fn test_scissor_is_flipped_and_clipped() {
        let sc = gl_scissor(PixelRect::new(0, 0, 100, 50), extent(640, 480));
        assert_eq!(sc.offset, vk::Offset2D { x: 0, y: 430 });
        assert_eq!(sc.extent, extent(100, 50));

        let clipped = gl_scissor(PixelRect::new(-10, 460, 100, 50), extent(640, 480));
        assert_eq!(clipped.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(clipped.extent, extent(90, 20));
    }

    #[test]
    fn test_scissor_outside_target_is_empty() {
        let sc = gl_scissor(PixelRect::new(700, 0, 50, 50), extent(640, 480));
        assert_eq!(sc.extent.width, 0);
    }

    #[test]
    fn test_depth_compare_from_state_bits() {
        assert_eq!(depth_compare_op(GlsBits::empty()), vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(depth_compare_op(GlsBits::DEPTHFUNC_EQUAL), vk::CompareOp::EQUAL);
        assert_eq!(depth_compare_op(GlsBits::DEPTHFUNC_ALWAYS | GlsBits::DEPTHMASK), vk::CompareOp::ALWAYS);
        assert_eq!(depth_compare_op(GlsBits::DEPTHFUNC_LESS), vk::CompareOp::LESS);
    }

    #[test]
    fn test_cull_modes() {
        assert_eq!(cull_mode(CullType::FrontSided), vk::CullModeFlags::BACK);
        assert_eq!(cull_mode(CullType::BackSided), vk::CullModeFlags::FRONT);
        assert_eq!(cull_mode(CullType::TwoSided), vk::CullModeFlags::NONE);
    }

    #[test]
    fn test_index_and_primitive_translation() {
        assert_eq!(vk_index_type(IndexType::U16), vk::IndexType::UINT16);
        assert_eq!(vk_index_type(IndexType::U32), vk::IndexType::UINT32);
        assert_eq!(topology(PrimitiveMode::Triangles), vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(topology(PrimitiveMode::TriangleFan), vk::PrimitiveTopology::TRIANGLE_FAN);
        assert_eq!(vk_filter(TextureFilter::Linear), vk::Filter::LINEAR);
    }

    #[test]
    fn test_index_offsets_are_word_aligned() {
        assert_eq!(align_index_offset(0), 0);
        assert_eq!(align_index_offset(6), 8);
        assert_eq!(align_index_offset(8), 8);
    }

    #[test]
    fn test_dynamic_state_list() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::CULL_MODE));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::STENCIL_WRITE_MASK));
    }

    // ========================================================================
    // Offscreen resources
    // ========================================================================

    #[test]
    fn test_renderbuffer_formats() {
        let fmt = Some(vk::Format::D32_SFLOAT_S8_UINT);
        assert_eq!(
            renderbuffer_format(RenderbufferFormat::Depth24Stencil8, fmt).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
        assert_eq!(renderbuffer_format(RenderbufferFormat::Depth16, None).unwrap(), vk::Format::D16_UNORM);
        assert!(matches!(
            renderbuffer_format(RenderbufferFormat::Stencil8, fmt),
            Err(RenderError::Unsupported(_))
        ));
        assert!(renderbuffer_format(RenderbufferFormat::Depth24Stencil8, None).is_err());
    }

    #[test]
    fn test_complete_with_shared_depth_stencil() {
        let rb = packed(3, 1024, 1024);
        assert_eq!(
            check_completeness(Some(extent(1024, 1024)), Some(rb), Some(rb)),
            FramebufferStatus::Complete
        );
    }

    #[test]
    fn test_incomplete_without_color() {
        assert!(matches!(
            check_completeness(None, None, None),
            FramebufferStatus::Incomplete(ref m) if m.contains("color")
        ));
    }

    #[test]
    fn test_incomplete_on_size_mismatch() {
        let rb = packed(3, 512, 512);
        assert!(matches!(
            check_completeness(Some(extent(1024, 1024)), Some(rb), None),
            FramebufferStatus::Incomplete(ref m) if m.contains("dimensions")
        ));
    }

    #[test]
    fn test_incomplete_on_split_depth_stencil() {
        assert!(matches!(
            check_completeness(Some(extent(64, 64)), Some(packed(3, 64, 64)), Some(packed(4, 64, 64))),
            FramebufferStatus::Incomplete(_)
        ));
    }

    #[test]
    fn test_incomplete_stencil_without_stencil_aspect() {
        let depth_only = AttachedBuffer { id: 5, extent: extent(64, 64), format: vk::Format::D16_UNORM };
        assert!(matches!(
            check_completeness(Some(extent(64, 64)), None, Some(depth_only)),
            FramebufferStatus::Incomplete(ref m) if m.contains("stencil")
        ));
    }

    #[test]
    fn test_barrier_masks() {
        let (src, dst, _, dst_stage) = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert!(barrier_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).is_some());
        assert!(barrier_masks(vk::ImageLayout::GENERAL, vk::ImageLayout::PRESENT_SRC_KHR).is_none());
    }
}
