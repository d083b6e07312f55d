// view.rs — per-view setup and dispatch
//
// A `RenderContext` is what the back end actually renders: normally the view
// as the front end built it, or, while surfaces are locked, the same surface
// lists seen from the player's real camera.

use std::borrow::Cow;
use std::sync::Arc;

use neo_common::common::DiagnosticSink;

use crate::backend::BackEnd;
use crate::device::{Capability, ClearValues, CullType, GlsBits, RenderDevice, GLS_DEFAULT};
use crate::tr_local::{
    my_gl_mult_matrix, DrawSurface, DrawSurfsCommand, PixelRect, RenderView, RenderWorldHandle,
    ViewDef, ViewEntity, ViewLight, ViewParms,
};
use crate::vertex_cache::VertexCache;
use crate::RenderError;

/// Borrowed view of what is being rendered.
#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    parms: &'a ViewParms,
    view: &'a ViewDef,
    view_entitys: Cow<'a, [ViewEntity]>,
}

impl<'a> RenderContext<'a> {
    /// Render `view` from its own camera.
    pub fn new(view: &'a ViewDef) -> Self {
        Self {
            parms: &view.parms,
            view,
            view_entitys: Cow::Borrowed(&view.view_entitys),
        }
    }

    pub fn parms(&self) -> &ViewParms {
        self.parms
    }

    pub fn render_view(&self) -> &RenderView {
        &self.parms.render_view
    }

    pub fn float_time(&self) -> f32 {
        self.view.float_time
    }

    pub fn render_world(&self) -> Option<RenderWorldHandle> {
        self.view.render_world
    }

    pub fn draw_surfs(&self) -> &[DrawSurface] {
        &self.view.draw_surfs
    }

    pub fn view_lights(&self) -> &[ViewLight] {
        &self.view.view_lights
    }

    pub fn view_entitys(&self) -> &[ViewEntity] {
        &self.view_entitys
    }

    pub fn connected_areas(&self) -> &[bool] {
        &self.view.connected_areas
    }

    pub fn has_entities(&self) -> bool {
        !self.view_entitys.is_empty()
    }

    /// Whether the camera was replaced by a locked real viewpoint.
    pub fn is_overridden(&self) -> bool {
        !std::ptr::eq(self.parms, &self.view.parms)
    }
}

/// Render `view`'s surfaces from the `real` camera. Every entity's
/// model-view matrix is recomputed against the real world space.
pub fn render_with_override<'a>(view: &'a ViewDef, real: &'a ViewParms) -> RenderContext<'a> {
    let view_entitys = view
        .view_entitys
        .iter()
        .map(|ent| ViewEntity {
            model_view_matrix: my_gl_mult_matrix(&ent.model_matrix, &real.world_space),
            ..ent.clone()
        })
        .collect::<Vec<_>>();
    RenderContext {
        parms: real,
        view,
        view_entitys: Cow::Owned(view_entitys),
    }
}

/// Hardware-specific scene renderer invoked once per view with surfaces.
pub trait ViewRenderer<D: RenderDevice> {
    fn render_view(
        &mut self,
        backend: &mut BackEnd<D>,
        ctx: &RenderContext<'_>,
    ) -> Result<(), RenderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewOutcome {
    NoSurfaces,
    /// `r_skipRender` dropped a 3D view.
    SkippedRender,
    Rendered { surfaces: usize },
}

impl<D: RenderDevice> BackEnd<D> {
    /// Set viewport, scissor and depth / stencil state for a new view.
    pub fn begin_drawing_view(&mut self, ctx: &RenderContext<'_>) {
        let parms = ctx.parms();
        let vp = parms.viewport;
        let sc = parms.scissor;
        let [ox, oy] = self.viewport_offset;

        self.device
            .viewport(PixelRect::new(ox + vp.x1, oy + vp.y1, vp.width(), vp.height()));
        // the scissor may be smaller than the viewport for subviews
        self.device.scissor(PixelRect::new(
            ox + vp.x1 + sc.x1,
            oy + vp.y1 + sc.y1,
            sc.width(),
            sc.height(),
        ));
        self.current_scissor = sc;

        // depth writes must be on for the clear
        self.gl_state(GLS_DEFAULT);

        if ctx.has_entities() {
            self.device.stencil_mask(0xff);
            let stencil = self.device.gl_config().stencil_mid_value();
            self.device.clear(ClearValues {
                color: None,
                depth: Some(1.0),
                stencil: Some(stencil),
            });
            self.device.set_enabled(Capability::DepthTest, true);
        } else {
            // 2D views need no depth or stencil
            self.device.set_enabled(Capability::DepthTest, false);
            self.device.set_enabled(Capability::StencilTest, false);
        }

        self.force_cull_reset();
        self.gl_cull(CullType::FrontSided);
    }

    /// Draw one view command.
    pub fn draw_view<R: ViewRenderer<D> + ?Sized>(
        &mut self,
        cmd: &DrawSurfsCommand,
        renderer: &mut R,
    ) -> Result<ViewOutcome, RenderError> {
        let view = Arc::clone(&cmd.view);
        let real = if self.config.lock_surfaces && cmd.primary {
            self.lock_surfaces_real_view.clone()
        } else {
            None
        };
        let ctx = match &real {
            Some(real) => render_with_override(&view, real),
            None => RenderContext::new(&view),
        };

        self.view_parms = Some(ctx.parms().clone());
        self.current_render_copied = false;

        if view.draw_surfs.is_empty() {
            return Ok(ViewOutcome::NoSurfaces);
        }

        // skip render bypasses 3D views but leaves 2D visible
        if self.config.skip_render && view.has_entities() {
            return Ok(ViewOutcome::SkippedRender);
        }

        let surfaces = view.draw_surfs.len();
        self.pc.c_surfaces += surfaces;
        renderer.render_view(self, &ctx)?;
        Ok(ViewOutcome::Rendered { surfaces })
    }
}

/// Lays down depth for every surface of a view. Surfaces that cannot be
/// drawn are reported to the diagnostic sink and skipped.
pub struct DepthPassRenderer<'a, V: VertexCache + ?Sized> {
    pub vertex_cache: &'a V,
    pub diagnostics: &'a dyn DiagnosticSink,
}

impl<D: RenderDevice, V: VertexCache + ?Sized> ViewRenderer<D> for DepthPassRenderer<'_, V> {
    fn render_view(
        &mut self,
        backend: &mut BackEnd<D>,
        ctx: &RenderContext<'_>,
    ) -> Result<(), RenderError> {
        backend.begin_drawing_view(ctx);
        backend.gl_state(GlsBits::COLORMASK | GlsBits::ALPHAMASK | GlsBits::DEPTHFUNC_LESS);
        for surf in ctx.draw_surfs() {
            if let Err(err) = backend.draw_surface(surf, self.vertex_cache) {
                err.report(self.diagnostics);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::recording::{DeviceCall, RecordingDevice};
    use crate::tr_local::{GlConfig, ScreenRect, IDENTITY_MATRIX};
    use crate::vertex_cache::FrameIndexCache;
    use neo_common::common::WarnOnce;

    fn backend() -> BackEnd<RecordingDevice> {
        BackEnd::new(RecordingDevice::new(GlConfig::default()))
    }

    fn view_3d(surfaces: usize) -> ViewDef {
        let mut view = ViewDef {
            view_entitys: vec![ViewEntity::default()],
            draw_surfs: vec![DrawSurface::default(); surfaces],
            float_time: 3.0,
            ..Default::default()
        };
        view.parms.viewport = ScreenRect::new(0, 0, 639, 479);
        view.parms.scissor = ScreenRect::new(0, 0, 639, 479);
        view
    }

    /// Counts invocations and remembers the camera it was given.
    #[derive(Default)]
    struct CountingRenderer {
        calls: usize,
        vieworg: Option<[f32; 3]>,
        overridden: bool,
        model_views: Vec<[f32; 16]>,
    }

    impl ViewRenderer<RecordingDevice> for CountingRenderer {
        fn render_view(
            &mut self,
            _backend: &mut BackEnd<RecordingDevice>,
            ctx: &RenderContext<'_>,
        ) -> Result<(), RenderError> {
            self.calls += 1;
            self.vieworg = Some(ctx.render_view().vieworg);
            self.overridden = ctx.is_overridden();
            self.model_views = ctx.view_entitys().iter().map(|e| e.model_view_matrix).collect();
            Ok(())
        }
    }

    // ============================================================
    // begin_drawing_view
    // ============================================================

    #[test]
    fn test_begin_drawing_view_3d() {
        let mut be = backend();
        be.viewport_offset = [10, 20];
        let mut view = view_3d(1);
        view.parms.viewport = ScreenRect::new(0, 0, 639, 479);
        view.parms.scissor = ScreenRect::new(100, 50, 199, 149);
        let ctx = RenderContext::new(&view);

        be.begin_drawing_view(&ctx);

        assert_eq!(
            be.device.calls,
            vec![
                DeviceCall::Viewport(PixelRect::new(10, 20, 640, 480)),
                DeviceCall::Scissor(PixelRect::new(110, 70, 100, 100)),
                DeviceCall::SetState(GLS_DEFAULT),
                DeviceCall::StencilMask(0xff),
                DeviceCall::Clear(ClearValues { color: None, depth: Some(1.0), stencil: Some(128) }),
                DeviceCall::SetEnabled(Capability::DepthTest, true),
                DeviceCall::Cull(CullType::FrontSided),
            ]
        );
        assert_eq!(be.current_scissor, ScreenRect::new(100, 50, 199, 149));
    }

    #[test]
    fn test_begin_drawing_view_2d() {
        let mut be = backend();
        let mut view = view_3d(1);
        view.view_entitys.clear();
        let ctx = RenderContext::new(&view);

        be.begin_drawing_view(&ctx);

        assert!(be.device.calls.contains(&DeviceCall::SetEnabled(Capability::DepthTest, false)));
        assert!(be.device.calls.contains(&DeviceCall::SetEnabled(Capability::StencilTest, false)));
        assert!(!be.device.calls.iter().any(|c| matches!(c, DeviceCall::Clear(_))));
    }

    #[test]
    fn test_begin_drawing_view_forces_cull() {
        let mut be = backend();
        be.gl_cull(CullType::FrontSided);
        be.device.take_calls();
        let view = view_3d(1);

        be.begin_drawing_view(&RenderContext::new(&view));

        assert_eq!(be.device.calls.last(), Some(&DeviceCall::Cull(CullType::FrontSided)));
    }

    #[test]
    fn test_seven_bit_stencil_clear() {
        let mut be = BackEnd::new(RecordingDevice::new(GlConfig { stencil_bits: 7, ..Default::default() }));
        let view = view_3d(1);
        be.begin_drawing_view(&RenderContext::new(&view));
        assert!(be.device.calls.contains(&DeviceCall::Clear(ClearValues {
            color: None,
            depth: Some(1.0),
            stencil: Some(64),
        })));
    }

    // ============================================================
    // draw_view
    // ============================================================

    #[test]
    fn test_draw_view_without_surfaces() {
        let mut be = backend();
        be.current_render_copied = true;
        let cmd = DrawSurfsCommand { view: Arc::new(view_3d(0)), primary: true };
        let mut renderer = CountingRenderer::default();

        assert_eq!(be.draw_view(&cmd, &mut renderer).unwrap(), ViewOutcome::NoSurfaces);
        assert_eq!(renderer.calls, 0);
        assert!(!be.current_render_copied);
        assert_eq!(be.view_parms.as_ref(), Some(&cmd.view.parms));
        assert_eq!(be.pc.c_surfaces, 0);
    }

    #[test]
    fn test_skip_render_drops_3d_keeps_2d() {
        let mut be = backend();
        be.begin_frame(BackendConfig { skip_render: true, ..Default::default() });
        let mut renderer = CountingRenderer::default();

        let cmd_3d = DrawSurfsCommand { view: Arc::new(view_3d(5)), primary: true };
        assert_eq!(be.draw_view(&cmd_3d, &mut renderer).unwrap(), ViewOutcome::SkippedRender);
        assert_eq!(be.pc.c_surfaces, 0);

        let mut view_2d = view_3d(2);
        view_2d.view_entitys.clear();
        let cmd_2d = DrawSurfsCommand { view: Arc::new(view_2d), primary: false };
        assert_eq!(
            be.draw_view(&cmd_2d, &mut renderer).unwrap(),
            ViewOutcome::Rendered { surfaces: 2 }
        );
        assert_eq!(be.pc.c_surfaces, 2);
        assert_eq!(renderer.calls, 1);
    }

    #[test]
    fn test_lock_surfaces_uses_real_camera() {
        let mut be = backend();
        be.begin_frame(BackendConfig { lock_surfaces: true, ..Default::default() });

        let mut view = view_3d(3);
        view.parms.render_view.vieworg = [1.0, 2.0, 3.0];
        view.view_entitys[0].model_matrix[12] = 5.0;

        let mut real = view.parms.clone();
        real.render_view.vieworg = [100.0, 0.0, 0.0];
        real.world_space = IDENTITY_MATRIX;
        real.world_space[13] = 7.0;
        be.set_lock_surfaces_real_view(Some(real));

        let cmd = DrawSurfsCommand { view: Arc::new(view), primary: true };
        let mut renderer = CountingRenderer::default();
        be.draw_view(&cmd, &mut renderer).unwrap();

        assert_eq!(renderer.vieworg, Some([100.0, 0.0, 0.0]));
        assert!(renderer.overridden);
        let mv = renderer.model_views[0];
        assert_eq!(mv[12], 5.0);
        assert_eq!(mv[13], 7.0);
        // the command's view itself is untouched
        assert_eq!(cmd.view.parms.render_view.vieworg, [1.0, 2.0, 3.0]);
        let active = be.view_parms.as_ref().unwrap();
        assert_eq!(active.render_view.vieworg, [100.0, 0.0, 0.0]);
        assert_eq!(active.world_space[13], 7.0);
    }

    #[test]
    fn test_lock_surfaces_ignores_non_primary_views() {
        let mut be = backend();
        be.begin_frame(BackendConfig { lock_surfaces: true, ..Default::default() });
        let mut real = ViewParms::default();
        real.render_view.vieworg = [100.0, 0.0, 0.0];
        be.set_lock_surfaces_real_view(Some(real));

        let cmd = DrawSurfsCommand { view: Arc::new(view_3d(1)), primary: false };
        let mut renderer = CountingRenderer::default();
        be.draw_view(&cmd, &mut renderer).unwrap();

        assert_eq!(renderer.vieworg, Some([0.0, 0.0, 0.0]));
        assert!(!renderer.overridden);
        assert_eq!(be.view_parms.as_ref().unwrap().render_view.vieworg, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_render_with_override_keeps_lists() {
        let mut view = view_3d(4);
        view.float_time = 9.5;
        view.render_world = Some(RenderWorldHandle(2));
        view.connected_areas = vec![true, false];
        view.view_lights = vec![ViewLight::default()];
        let real = ViewParms::default();

        let ctx = render_with_override(&view, &real);
        assert_eq!(ctx.float_time(), 9.5);
        assert_eq!(ctx.render_world(), Some(RenderWorldHandle(2)));
        assert_eq!(ctx.connected_areas(), &[true, false]);
        assert_eq!(ctx.draw_surfs().len(), 4);
        assert_eq!(ctx.view_lights().len(), 1);
        assert!(std::ptr::eq(ctx.parms(), &real));
    }

    // ============================================================
    // DepthPassRenderer
    // ============================================================

    #[test]
    fn test_depth_pass_draws_every_surface() {
        let mut cache = FrameIndexCache::new();
        let mut view = view_3d(0);
        for _ in 0..3 {
            view.draw_surfs.push(DrawSurface {
                index_cache: Some(cache.alloc(&[0, 1, 2])),
                num_indexes: 3,
                ..Default::default()
            });
        }
        // one surface without an index cache
        view.draw_surfs.push(DrawSurface { num_indexes: 3, ..Default::default() });

        let sink = WarnOnce::new();
        let mut be = backend();
        let mut renderer = DepthPassRenderer { vertex_cache: &cache, diagnostics: &sink };
        let cmd = DrawSurfsCommand { view: Arc::new(view), primary: true };

        assert_eq!(
            be.draw_view(&cmd, &mut renderer).unwrap(),
            ViewOutcome::Rendered { surfaces: 4 }
        );
        assert_eq!(be.device.draw_count(), 3);
        assert_eq!(be.pc.c_draw_elements, 4);
        assert_eq!(be.pc.c_vbo_indexes, 9);
        assert!(sink.has_reported("missing_index_cache"));
    }
}
