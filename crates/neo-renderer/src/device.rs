// device.rs — hardware draw layer contract
//
// The back end only talks to the GPU through `RenderDevice`. The Vulkan
// implementation lives in `vulkan::device`; `recording::RecordingDevice` is a
// headless implementation that records the call stream.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::tr_local::{GlConfig, PixelRect};
use crate::RenderError;

bitflags! {
    /// Fixed-function render state. The empty set is the default state:
    /// depth writes on, depth func less-equal, no blending, all colour
    /// channels written. The `*MASK` bits disable writes to their buffer.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GlsBits: u32 {
        const SRCBLEND_ONE        = 0x0000_0001;
        const SRCBLEND_DST_COLOR  = 0x0000_0002;
        const SRCBLEND_SRC_ALPHA  = 0x0000_0004;
        const DSTBLEND_ONE        = 0x0000_0010;
        const DSTBLEND_SRC_COLOR  = 0x0000_0020;
        const DSTBLEND_ONE_MINUS_SRC_ALPHA = 0x0000_0040;
        const DEPTHMASK           = 0x0000_0100;
        const REDMASK             = 0x0000_0200;
        const GREENMASK           = 0x0000_0400;
        const BLUEMASK            = 0x0000_0800;
        const ALPHAMASK           = 0x0000_1000;
        const COLORMASK = Self::REDMASK.bits() | Self::GREENMASK.bits() | Self::BLUEMASK.bits();
        const DEPTHFUNC_ALWAYS    = 0x0001_0000;
        const DEPTHFUNC_EQUAL     = 0x0002_0000;
        const DEPTHFUNC_LESS      = 0x0004_0000;
    }
}

/// Default render state.
pub const GLS_DEFAULT: GlsBits = GlsBits::empty();

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullType {
    FrontSided,
    BackSided,
    TwoSided,
}

/// Fixed-function capabilities toggled with `set_enabled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    DepthTest,
    StencilTest,
    Blend,
    ScissorTest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveMode {
    Triangles,
    TriangleStrip,
    TriangleFan,
    Lines,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

/// Element indices handed to `draw_elements`. The slice length is the
/// element count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexData<'a> {
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl IndexData<'_> {
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(i) => i.len(),
            IndexData::U32(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            IndexData::U16(_) => IndexType::U16,
            IndexData::U32(_) => IndexType::U32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(i) => bytemuck::cast_slice(i),
            IndexData::U32(i) => bytemuck::cast_slice(i),
        }
    }
}

/// Which buffers `clear` touches. `None` leaves a buffer alone.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

// ============================================================
// Offscreen resources
// ============================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

impl TextureFilter {
    /// Map a `r_framebufferFilter` value: 0 = nearest, anything else = linear.
    pub fn from_cvar(value: i32) -> Self {
        if value == 0 {
            Self::Nearest
        } else {
            Self::Linear
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderbufferFormat {
    Depth24Stencil8,
    Depth16,
    Stencil8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color0,
    Depth,
    Stencil,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderbufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// One vertex of the offscreen-to-display blit.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BlitVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
}

/// Four-vertex triangle fan covering the display area of the blit.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlitQuad {
    pub vertices: [BlitVertex; 4],
}

// ============================================================
// RenderDevice
// ============================================================

/// The hardware draw layer.
pub trait RenderDevice {
    /// Capabilities and sizes of the active context.
    fn gl_config(&self) -> &GlConfig;

    fn viewport(&mut self, rect: PixelRect);
    fn scissor(&mut self, rect: PixelRect);
    fn set_state(&mut self, bits: GlsBits);
    fn cull(&mut self, cull: CullType);
    fn set_enabled(&mut self, cap: Capability, enabled: bool);
    fn stencil_mask(&mut self, mask: u32);
    fn clear(&mut self, values: ClearValues);
    fn draw_elements(&mut self, mode: PrimitiveMode, indices: IndexData<'_>);

    /// Unbind vertex and index buffers so client-side data can be drawn.
    fn unbind_geometry_buffers(&mut self);

    fn create_color_texture(
        &mut self,
        width: u32,
        height: u32,
        filter: TextureFilter,
    ) -> Result<TextureId, RenderError>;
    fn create_renderbuffer(
        &mut self,
        format: RenderbufferFormat,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferId, RenderError>;
    fn create_framebuffer(&mut self) -> Result<FramebufferId, RenderError>;
    fn create_blit_program(&mut self) -> Result<ProgramId, RenderError>;

    /// `None` binds the display.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    /// Attach to the currently bound framebuffer.
    fn attach_texture(&mut self, attachment: Attachment, texture: TextureId);
    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: RenderbufferId);
    fn framebuffer_status(&mut self) -> FramebufferStatus;

    /// Draw the quad as a triangle fan, sampling `texture` through `program`.
    fn draw_blit(&mut self, program: ProgramId, texture: TextureId, quad: &BlitQuad);

    fn delete_texture(&mut self, texture: TextureId);
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn delete_program(&mut self, program: ProgramId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_data_len_and_type() {
        let shorts = [0u16, 1, 2];
        let longs = [0u32, 1, 2, 3, 4, 5];
        assert_eq!(IndexData::U16(&shorts).len(), 3);
        assert_eq!(IndexData::U16(&shorts).index_type(), IndexType::U16);
        assert_eq!(IndexData::U32(&longs).len(), 6);
        assert_eq!(IndexData::U32(&longs).as_bytes().len(), 24);
        assert!(IndexData::U32(&[]).is_empty());
    }

    #[test]
    fn test_filter_from_cvar() {
        assert_eq!(TextureFilter::from_cvar(0), TextureFilter::Nearest);
        assert_eq!(TextureFilter::from_cvar(1), TextureFilter::Linear);
        assert_eq!(TextureFilter::from_cvar(7), TextureFilter::Linear);
    }

    #[test]
    fn test_default_state_is_empty() {
        assert!(GLS_DEFAULT.is_empty());
        assert!(!GLS_DEFAULT.contains(GlsBits::DEPTHMASK));
    }

    #[test]
    fn test_blit_vertex_layout() {
        assert_eq!(std::mem::size_of::<BlitVertex>(), 20);
        let quad = BlitQuad::default();
        let bytes: &[u8] = bytemuck::cast_slice(&quad.vertices);
        assert_eq!(bytes.len(), 80);
    }
}
