// framebuffer.rs — offscreen render target and the end-of-frame blit
//
// When the logical render size differs from the display, the scene is drawn
// into an offscreen target and stretched onto the display at the end of the
// frame, optionally letterboxed to keep the render aspect.

use neo_common::common::{com_printf, com_warning};

use crate::config::BackendConfig;
use crate::device::{
    Attachment, BlitQuad, BlitVertex, Capability, ClearValues, FramebufferId, FramebufferStatus,
    ProgramId, RenderDevice, RenderbufferFormat, RenderbufferId, TextureId,
};
use crate::tr_local::{GlConfig, PixelRect};
use crate::RenderError;

/// Aspect ratios closer than this are treated as equal.
const ASPECT_EPSILON: f32 = 0.01;

/// Smallest power of two that is >= `v` (1 for 0).
pub fn fix_npot(v: u32) -> u32 {
    v.max(1).next_power_of_two()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferState {
    /// No offscreen target; start / end are no-ops.
    Uninitialized,
    Ready,
    Recording,
    /// The target was shown this frame. The next `start_frame` passes
    /// through `Ready` again.
    Blitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthStencilTarget {
    Combined(RenderbufferId),
    Separate { depth: RenderbufferId, stencil: RenderbufferId },
}

/// The offscreen target and the program that blits it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferTarget {
    pub framebuffer: FramebufferId,
    pub color: TextureId,
    pub depth_stencil: DepthStencilTarget,
    pub program: ProgramId,
    /// Power-of-two size actually allocated.
    pub width: u32,
    pub height: u32,
}

/// Resources created so far during `init`, released in reverse on failure.
enum Created {
    Texture(TextureId),
    Renderbuffer(RenderbufferId),
    Framebuffer(FramebufferId),
    Program(ProgramId),
}

impl Created {
    fn release<D: RenderDevice + ?Sized>(self, device: &mut D) {
        match self {
            Created::Texture(id) => device.delete_texture(id),
            Created::Renderbuffer(id) => device.delete_renderbuffer(id),
            Created::Framebuffer(id) => device.delete_framebuffer(id),
            Created::Program(id) => device.delete_program(id),
        }
    }
}

pub struct FrameBufferStage {
    state: FramebufferState,
    target: Option<FramebufferTarget>,
}

impl Default for FrameBufferStage {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBufferStage {
    pub fn new() -> Self {
        Self {
            state: FramebufferState::Uninitialized,
            target: None,
        }
    }

    pub fn state(&self) -> FramebufferState {
        self.state
    }

    pub fn target(&self) -> Option<&FramebufferTarget> {
        self.target.as_ref()
    }

    /// Create the offscreen target for the device's current sizes. Any
    /// previous target is released first.
    pub fn init<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        config: &BackendConfig,
    ) -> Result<(), RenderError> {
        self.shutdown(device);

        let gl = *device.gl_config();
        com_printf(&format!(
            "init framebuffer: real [{}, {}] -> framebuffer [{}, {}]\n",
            gl.vid_width_real, gl.vid_height_real, gl.vid_width, gl.vid_height
        ));

        if gl.vid_width_real == gl.vid_width && gl.vid_height_real == gl.vid_height {
            com_printf("Not using framebuffer\n");
            return Ok(());
        }

        // sampled through a quad, so pad to a power of two regardless of npot support
        let width = fix_npot(gl.vid_width);
        let height = fix_npot(gl.vid_height);
        com_printf(&format!("Framebuffer buffer size = [{}, {}]\n", width, height));

        let mut created = Vec::new();
        match Self::create_target(device, &gl, config, width, height, &mut created) {
            Ok(target) => {
                self.target = Some(target);
                self.state = FramebufferState::Ready;
                Ok(())
            }
            Err(err) => {
                com_warning(&format!("framebuffer creation failed: {}\n", err));
                for resource in created.into_iter().rev() {
                    resource.release(device);
                }
                Err(err)
            }
        }
    }

    fn create_target<D: RenderDevice + ?Sized>(
        device: &mut D,
        gl: &GlConfig,
        config: &BackendConfig,
        width: u32,
        height: u32,
        created: &mut Vec<Created>,
    ) -> Result<FramebufferTarget, RenderError> {
        let color = device.create_color_texture(width, height, config.framebuffer_filter)?;
        created.push(Created::Texture(color));

        let framebuffer = device.create_framebuffer()?;
        created.push(Created::Framebuffer(framebuffer));

        let depth_stencil = if gl.depth_stencil_available {
            let rb = device.create_renderbuffer(RenderbufferFormat::Depth24Stencil8, width, height)?;
            created.push(Created::Renderbuffer(rb));
            DepthStencilTarget::Combined(rb)
        } else {
            let depth = device.create_renderbuffer(RenderbufferFormat::Depth16, width, height)?;
            created.push(Created::Renderbuffer(depth));
            let stencil = device.create_renderbuffer(RenderbufferFormat::Stencil8, width, height)?;
            created.push(Created::Renderbuffer(stencil));
            DepthStencilTarget::Separate { depth, stencil }
        };

        let program = device.create_blit_program()?;
        created.push(Created::Program(program));

        Ok(FramebufferTarget {
            framebuffer,
            color,
            depth_stencil,
            program,
            width,
            height,
        })
    }

    /// Release the target. The stage returns to `Uninitialized`.
    pub fn shutdown<D: RenderDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(target) = self.target.take() {
            device.delete_program(target.program);
            match target.depth_stencil {
                DepthStencilTarget::Combined(rb) => device.delete_renderbuffer(rb),
                DepthStencilTarget::Separate { depth, stencil } => {
                    device.delete_renderbuffer(stencil);
                    device.delete_renderbuffer(depth);
                }
            }
            device.delete_framebuffer(target.framebuffer);
            device.delete_texture(target.color);
        }
        self.state = FramebufferState::Uninitialized;
    }

    /// Redirect rendering into the offscreen target.
    pub fn start_frame<D: RenderDevice + ?Sized>(&mut self, device: &mut D) -> Result<(), RenderError> {
        let Some(target) = self.target else {
            return Ok(());
        };
        match self.state {
            FramebufferState::Uninitialized | FramebufferState::Recording => return Ok(()),
            FramebufferState::Blitted => self.state = FramebufferState::Ready,
            FramebufferState::Ready => {}
        }

        device.bind_framebuffer(Some(target.framebuffer));
        device.attach_texture(Attachment::Color0, target.color);
        match target.depth_stencil {
            DepthStencilTarget::Combined(rb) => {
                device.attach_renderbuffer(Attachment::Depth, rb);
                device.attach_renderbuffer(Attachment::Stencil, rb);
            }
            DepthStencilTarget::Separate { depth, stencil } => {
                device.attach_renderbuffer(Attachment::Depth, depth);
                device.attach_renderbuffer(Attachment::Stencil, stencil);
            }
        }

        if let FramebufferStatus::Incomplete(reason) = device.framebuffer_status() {
            self.state = FramebufferState::Ready;
            return Err(RenderError::FramebufferIncomplete(reason));
        }
        self.state = FramebufferState::Recording;
        Ok(())
    }

    /// Blit the offscreen target to the display. Returns the quad drawn, or
    /// `None` when no frame is being recorded.
    pub fn end_frame<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        maintain_aspect: bool,
    ) -> Option<BlitQuad> {
        if self.state != FramebufferState::Recording {
            return None;
        }
        let target = self.target?;
        let gl = *device.gl_config();
        let (quad, letterbox) = blit_quad(&gl, target.width, target.height, maintain_aspect);

        device.bind_framebuffer(None);
        device.unbind_geometry_buffers();
        device.viewport(PixelRect::new(
            0,
            0,
            gl.vid_width_real as i32,
            gl.vid_height_real as i32,
        ));
        device.set_enabled(Capability::Blend, false);
        device.set_enabled(Capability::ScissorTest, false);
        device.set_enabled(Capability::DepthTest, false);

        if letterbox {
            device.clear(ClearValues {
                color: Some([0.0, 0.0, 0.0, 1.0]),
                ..Default::default()
            });
        }

        device.draw_blit(target.program, target.color, &quad);
        self.state = FramebufferState::Blitted;
        Some(quad)
    }
}

/// Whether the blit has to be letterboxed to keep the logical aspect.
pub fn needs_aspect_correction(gl: &GlConfig, maintain_aspect: bool) -> bool {
    if !maintain_aspect || gl.vid_height == 0 || gl.vid_height_real == 0 {
        return false;
    }
    let real_ratio = gl.vid_width_real as f32 / gl.vid_height_real as f32;
    let fb_ratio = gl.vid_width as f32 / gl.vid_height as f32;
    (real_ratio - fb_ratio).abs() >= ASPECT_EPSILON
}

/// Build the display quad for a target of `alloc_width` × `alloc_height`.
/// The flag is true when the quad was narrowed and the display should be
/// cleared first.
pub fn blit_quad(
    gl: &GlConfig,
    alloc_width: u32,
    alloc_height: u32,
    maintain_aspect: bool,
) -> (BlitQuad, bool) {
    let mut left = -1.0f32;
    let mut right = 1.0f32;
    let mut top = 1.0f32;
    let mut bottom = -1.0f32;

    let letterbox = needs_aspect_correction(gl, maintain_aspect);
    if letterbox {
        let real_ratio = gl.vid_width_real as f32 / gl.vid_height_real as f32;
        let fb_ratio = gl.vid_width as f32 / gl.vid_height as f32;
        let x_scale = fb_ratio / real_ratio;
        let y_scale = real_ratio / fb_ratio;
        if x_scale < 1.0 {
            left = -x_scale;
            right = x_scale;
        } else {
            top = y_scale;
            bottom = -y_scale;
        }
    }

    // only the logical part of the padded texture is shown
    let smax = gl.vid_width as f32 / alloc_width.max(1) as f32;
    let tmax = gl.vid_height as f32 / alloc_height.max(1) as f32;

    let quad = BlitQuad {
        vertices: [
            BlitVertex { position: [left, bottom, 0.0], texcoord: [0.0, 0.0] },
            BlitVertex { position: [left, top, 0.0], texcoord: [0.0, tmax] },
            BlitVertex { position: [right, top, 0.0], texcoord: [smax, tmax] },
            BlitVertex { position: [right, bottom, 0.0], texcoord: [smax, 0.0] },
        ],
    };
    (quad, letterbox)
}
