// backend.rs — back-end state shared by the draw, interaction and view stages

use neo_common::common::com_printf;

use crate::config::BackendConfig;
use crate::device::{CullType, GlsBits, RenderDevice};
use crate::draw::IndexStreamAdapter;
use crate::tr_local::{PerformanceCounters, ScreenRect, ViewParms};

/// Back-end state for one render thread.
pub struct BackEnd<D: RenderDevice> {
    pub device: D,
    pub(crate) adapter: IndexStreamAdapter,
    pub pc: PerformanceCounters,
    /// Toggles for the current frame.
    pub config: BackendConfig,
    /// Offset of the render area inside the window.
    pub viewport_offset: [i32; 2],
    pub current_scissor: ScreenRect,
    /// A screen copy for post-process materials has been made this view.
    pub current_render_copied: bool,
    /// Camera of the view being drawn. While surfaces are locked this is
    /// the real camera, not the one the surface lists were built from.
    pub view_parms: Option<ViewParms>,
    /// Camera the primary view is drawn from while surfaces are locked.
    pub lock_surfaces_real_view: Option<ViewParms>,
    face_culling: Option<CullType>,
    state_bits: Option<GlsBits>,
}

impl<D: RenderDevice> BackEnd<D> {
    pub fn new(device: D) -> Self {
        Self::with_adapter(device, IndexStreamAdapter::new())
    }

    pub fn with_adapter(device: D, adapter: IndexStreamAdapter) -> Self {
        Self {
            device,
            adapter,
            pc: PerformanceCounters::default(),
            config: BackendConfig::default(),
            viewport_offset: [0, 0],
            current_scissor: ScreenRect::default(),
            current_render_copied: false,
            view_parms: None,
            lock_surfaces_real_view: None,
            face_culling: None,
            state_bits: None,
        }
    }

    /// Start a frame with a fresh configuration snapshot.
    pub fn begin_frame(&mut self, config: BackendConfig) {
        self.config = config;
        self.pc.clear();
        self.view_parms = None;
    }

    /// Finish the frame. Returns the counters, which are also printed when
    /// `r_speeds` is set.
    pub fn end_frame(&mut self) -> PerformanceCounters {
        if self.config.speeds {
            com_printf(&self.pc.report());
        }
        self.pc
    }

    /// Record the player's real camera so a locked primary view can be
    /// drawn from it.
    pub fn set_lock_surfaces_real_view(&mut self, parms: Option<ViewParms>) {
        self.lock_surfaces_real_view = parms;
    }

    /// Apply fixed-function state, skipping the device call when unchanged.
    pub fn gl_state(&mut self, bits: GlsBits) {
        if self.state_bits == Some(bits) {
            return;
        }
        self.device.set_state(bits);
        self.state_bits = Some(bits);
    }

    /// Apply a cull mode, skipping the device call when unchanged.
    pub fn gl_cull(&mut self, cull: CullType) {
        if self.face_culling == Some(cull) {
            return;
        }
        self.device.cull(cull);
        self.face_culling = Some(cull);
    }

    /// Forget the cached cull mode so the next `gl_cull` always applies.
    pub fn force_cull_reset(&mut self) {
        self.face_culling = None;
    }

    /// Forget the cached state bits so the next `gl_state` always applies.
    pub fn force_state_reset(&mut self) {
        self.state_bits = None;
    }

    pub fn face_culling(&self) -> Option<CullType> {
        self.face_culling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GLS_DEFAULT;
    use crate::recording::{DeviceCall, RecordingDevice};
    use crate::tr_local::GlConfig;

    fn backend() -> BackEnd<RecordingDevice> {
        BackEnd::new(RecordingDevice::new(GlConfig::default()))
    }

    #[test]
    fn test_gl_cull_is_cached() {
        let mut be = backend();
        be.gl_cull(CullType::FrontSided);
        be.gl_cull(CullType::FrontSided);
        be.gl_cull(CullType::TwoSided);
        assert_eq!(
            be.device.calls,
            vec![
                DeviceCall::Cull(CullType::FrontSided),
                DeviceCall::Cull(CullType::TwoSided),
            ]
        );
        be.force_cull_reset();
        be.gl_cull(CullType::TwoSided);
        assert_eq!(be.device.calls.len(), 3);
    }

    #[test]
    fn test_gl_state_is_cached() {
        let mut be = backend();
        be.gl_state(GLS_DEFAULT);
        be.gl_state(GLS_DEFAULT);
        be.gl_state(GlsBits::DEPTHMASK);
        assert_eq!(be.device.calls.len(), 2);
        be.force_state_reset();
        be.gl_state(GlsBits::DEPTHMASK);
        assert_eq!(be.device.calls.len(), 3);
    }

    #[test]
    fn test_begin_frame_resets_counters() {
        let mut be = backend();
        be.pc.c_surfaces = 12;
        be.pc.c_vbo_indexes = 300;
        let config = BackendConfig { skip_bump: true, ..Default::default() };
        be.begin_frame(config);
        assert_eq!(be.pc, PerformanceCounters::default());
        assert!(be.config.skip_bump);
    }

    #[test]
    fn test_end_frame_returns_counters() {
        let mut be = backend();
        be.begin_frame(BackendConfig { speeds: true, ..Default::default() });
        be.pc.c_draw_elements = 4;
        assert_eq!(be.end_frame().c_draw_elements, 4);
    }
}
