// recording.rs — headless RenderDevice that records the call stream
//
// Used for frame capture on machines without a GPU and by the tests, which
// assert on exact state sequences.

use crate::device::{
    Attachment, BlitQuad, Capability, ClearValues, CullType, FramebufferId, FramebufferStatus,
    GlsBits, IndexData, PrimitiveMode, ProgramId, RenderDevice, RenderbufferFormat,
    RenderbufferId, TextureFilter, TextureId,
};
use crate::tr_local::{GlConfig, PixelRect};
use crate::RenderError;

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    Viewport(PixelRect),
    Scissor(PixelRect),
    SetState(GlsBits),
    Cull(CullType),
    SetEnabled(Capability, bool),
    StencilMask(u32),
    Clear(ClearValues),
    DrawElementsU16 { mode: PrimitiveMode, indices: Vec<u16> },
    DrawElementsU32 { mode: PrimitiveMode, indices: Vec<u32> },
    UnbindGeometryBuffers,
    CreateColorTexture { id: TextureId, width: u32, height: u32, filter: TextureFilter },
    CreateRenderbuffer { id: RenderbufferId, format: RenderbufferFormat, width: u32, height: u32 },
    CreateFramebuffer(FramebufferId),
    CreateBlitProgram(ProgramId),
    BindFramebuffer(Option<FramebufferId>),
    AttachTexture(Attachment, TextureId),
    AttachRenderbuffer(Attachment, RenderbufferId),
    CheckFramebufferStatus,
    DrawBlit { program: ProgramId, texture: TextureId, quad: BlitQuad },
    DeleteTexture(TextureId),
    DeleteRenderbuffer(RenderbufferId),
    DeleteFramebuffer(FramebufferId),
    DeleteProgram(ProgramId),
}

pub struct RecordingDevice {
    pub config: GlConfig,
    pub calls: Vec<DeviceCall>,
    /// Status reported by `framebuffer_status`.
    pub status: FramebufferStatus,
    /// Make `create_blit_program` fail.
    pub fail_blit_program: bool,
    next_id: u32,
    live: usize,
}

impl RecordingDevice {
    pub fn new(config: GlConfig) -> Self {
        Self {
            config,
            calls: Vec::new(),
            status: FramebufferStatus::Complete,
            fail_blit_program: false,
            next_id: 1,
            live: 0,
        }
    }

    /// Remove and return everything recorded so far.
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of indexed draws recorded.
    pub fn draw_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    DeviceCall::DrawElementsU16 { .. } | DeviceCall::DrawElementsU32 { .. }
                )
            })
            .count()
    }

    /// Resources created and not yet deleted.
    pub fn live_resources(&self) -> usize {
        self.live
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.live += 1;
        id
    }

    fn release(&mut self) {
        self.live = self.live.saturating_sub(1);
    }
}

impl RenderDevice for RecordingDevice {
    fn gl_config(&self) -> &GlConfig {
        &self.config
    }

    fn viewport(&mut self, rect: PixelRect) {
        self.calls.push(DeviceCall::Viewport(rect));
    }

    fn scissor(&mut self, rect: PixelRect) {
        self.calls.push(DeviceCall::Scissor(rect));
    }

    fn set_state(&mut self, bits: GlsBits) {
        self.calls.push(DeviceCall::SetState(bits));
    }

    fn cull(&mut self, cull: CullType) {
        self.calls.push(DeviceCall::Cull(cull));
    }

    fn set_enabled(&mut self, cap: Capability, enabled: bool) {
        self.calls.push(DeviceCall::SetEnabled(cap, enabled));
    }

    fn stencil_mask(&mut self, mask: u32) {
        self.calls.push(DeviceCall::StencilMask(mask));
    }

    fn clear(&mut self, values: ClearValues) {
        self.calls.push(DeviceCall::Clear(values));
    }

    fn draw_elements(&mut self, mode: PrimitiveMode, indices: IndexData<'_>) {
        self.calls.push(match indices {
            IndexData::U16(i) => DeviceCall::DrawElementsU16 { mode, indices: i.to_vec() },
            IndexData::U32(i) => DeviceCall::DrawElementsU32 { mode, indices: i.to_vec() },
        });
    }

    fn unbind_geometry_buffers(&mut self) {
        self.calls.push(DeviceCall::UnbindGeometryBuffers);
    }

    fn create_color_texture(
        &mut self,
        width: u32,
        height: u32,
        filter: TextureFilter,
    ) -> Result<TextureId, RenderError> {
        let id = TextureId(self.alloc_id());
        self.calls.push(DeviceCall::CreateColorTexture { id, width, height, filter });
        Ok(id)
    }

    fn create_renderbuffer(
        &mut self,
        format: RenderbufferFormat,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferId, RenderError> {
        let id = RenderbufferId(self.alloc_id());
        self.calls.push(DeviceCall::CreateRenderbuffer { id, format, width, height });
        Ok(id)
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let id = FramebufferId(self.alloc_id());
        self.calls.push(DeviceCall::CreateFramebuffer(id));
        Ok(id)
    }

    fn create_blit_program(&mut self) -> Result<ProgramId, RenderError> {
        if self.fail_blit_program {
            return Err(RenderError::ShaderCompilation("blit program disabled".into()));
        }
        let id = ProgramId(self.alloc_id());
        self.calls.push(DeviceCall::CreateBlitProgram(id));
        Ok(id)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.calls.push(DeviceCall::BindFramebuffer(framebuffer));
    }

    fn attach_texture(&mut self, attachment: Attachment, texture: TextureId) {
        self.calls.push(DeviceCall::AttachTexture(attachment, texture));
    }

    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: RenderbufferId) {
        self.calls.push(DeviceCall::AttachRenderbuffer(attachment, renderbuffer));
    }

    fn framebuffer_status(&mut self) -> FramebufferStatus {
        self.calls.push(DeviceCall::CheckFramebufferStatus);
        self.status.clone()
    }

    fn draw_blit(&mut self, program: ProgramId, texture: TextureId, quad: &BlitQuad) {
        self.calls.push(DeviceCall::DrawBlit { program, texture, quad: *quad });
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.release();
        self.calls.push(DeviceCall::DeleteTexture(texture));
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.release();
        self.calls.push(DeviceCall::DeleteRenderbuffer(renderbuffer));
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.release();
        self.calls.push(DeviceCall::DeleteFramebuffer(framebuffer));
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.release();
        self.calls.push(DeviceCall::DeleteProgram(program));
    }
}
