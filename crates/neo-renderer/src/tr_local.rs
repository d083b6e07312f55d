// tr_local.rs — data shared between the front end and the back end
//
// Everything here is produced by the front end (or the material system) and
// handed to the back end as a read-only snapshot for one frame.

use std::sync::Arc;

use crate::images::ImageHandle;
use crate::vertex_cache::IndexCacheHandle;

pub type Mat4 = [f32; 16];
pub type Vec4 = [f32; 4];

#[rustfmt::skip]
pub const IDENTITY_MATRIX: Mat4 = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Number of global shader parms carried by a render view.
pub const MAX_GLOBAL_SHADER_PARMS: usize = 12;

/// Global shader parm holding the cinematic time offset, in seconds.
pub const SHADERPARM_CINEMATIC_OFFSET: usize = 11;

/// `out = a * b` in the front end's matrix convention
/// (`out[i*4+j] = sum_k a[i*4+k] * b[k*4+j]`).
pub fn my_gl_mult_matrix(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0f32; 16];
    for i in 0..4 {
        for j in 0..4 {
            out[i * 4 + j] = a[i * 4] * b[j]
                + a[i * 4 + 1] * b[4 + j]
                + a[i * 4 + 2] * b[8 + j]
                + a[i * 4 + 3] * b[12 + j];
        }
    }
    out
}

// ============================================================
// Rectangles
// ============================================================

/// Inclusive screen rectangle, as produced by the front end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl ScreenRect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 + 1 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 + 1 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x1 > self.x2 || self.y1 > self.y2
    }
}

/// Origin + size rectangle in device pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

// ============================================================
// Shader registers and material stages
// ============================================================

/// Index into a shader register file.
pub type RegisterIndex = usize;

/// Evaluated material registers for one surface. Shared read-only across the
/// front-end and back-end threads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderRegisterFile(Arc<[f32]>);

impl ShaderRegisterFile {
    pub fn new(values: impl Into<Arc<[f32]>>) -> Self {
        Self(values.into())
    }

    pub fn get(&self, index: RegisterIndex) -> Option<f32> {
        self.0.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for ShaderRegisterFile {
    fn from(values: Vec<f32>) -> Self {
        Self(values.into())
    }
}

/// One image layer of a material stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TextureStage {
    /// Non-owning reference into the image cache.
    pub image: Option<ImageHandle>,
    /// Two rows of (s, t, translation) register indices.
    pub matrix: Option<[[RegisterIndex; 3]; 2]>,
    /// Time-varying source fed by the cinematic decoder.
    pub cinematic: bool,
}

/// Register indices of a stage's RGBA colour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColorBlock {
    pub registers: [RegisterIndex; 4],
}

/// How per-vertex colour combines with the stage colour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StageVertexColor {
    #[default]
    Ignore,
    Modulate,
    InverseModulate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShaderStage {
    pub texture: TextureStage,
    pub color: ColorBlock,
    pub vertex_color: StageVertexColor,
}

// ============================================================
// Surfaces, entities, lights
// ============================================================

/// Geometry batch with a single material.
#[derive(Clone, Debug, Default)]
pub struct DrawSurface {
    /// GPU-resident index range, owned by the vertex cache.
    pub index_cache: Option<IndexCacheHandle>,
    pub num_indexes: usize,
    /// Shadow volume index count with the caps left out.
    pub num_shadow_indexes_no_caps: Option<usize>,
    /// Index into the view's entity list.
    pub space: usize,
    pub shader_registers: ShaderRegisterFile,
}

impl DrawSurface {
    pub fn num_triangles(&self) -> usize {
        self.num_indexes / 3
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewEntity {
    pub entity_num: i32,
    pub model_matrix: Mat4,
    pub model_view_matrix: Mat4,
    pub scissor_rect: ScreenRect,
    pub weapon_depth_hack: bool,
}

impl Default for ViewEntity {
    fn default() -> Self {
        Self {
            entity_num: 0,
            model_matrix: IDENTITY_MATRIX,
            model_view_matrix: IDENTITY_MATRIX,
            scissor_rect: ScreenRect::default(),
            weapon_depth_hack: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewLight {
    pub light_def: i32,
    pub global_light_origin: [f32; 3],
    pub scissor_rect: ScreenRect,
    pub ambient: bool,
}

// ============================================================
// Views
// ============================================================

/// Camera description supplied by the game.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderView {
    pub view_id: i32,
    pub vieworg: [f32; 3],
    pub viewaxis: [[f32; 3]; 3],
    pub fov_x: f32,
    pub fov_y: f32,
    /// Game time in milliseconds.
    pub time: i32,
    pub shader_parms: [f32; MAX_GLOBAL_SHADER_PARMS],
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            view_id: 0,
            vieworg: [0.0; 3],
            viewaxis: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            fov_x: 90.0,
            fov_y: 90.0,
            time: 0,
            shader_parms: [0.0; MAX_GLOBAL_SHADER_PARMS],
        }
    }
}

/// Camera-derived part of a view definition.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewParms {
    pub render_view: RenderView,
    /// World-space model-view matrix.
    pub world_space: Mat4,
    pub projection_matrix: Mat4,
    /// Viewport in screen pixels, inclusive.
    pub viewport: ScreenRect,
    /// Scissor relative to the viewport; may be smaller for subviews.
    pub scissor: ScreenRect,
    pub is_subview: bool,
}

impl Default for ViewParms {
    fn default() -> Self {
        Self {
            render_view: RenderView::default(),
            world_space: IDENTITY_MATRIX,
            projection_matrix: IDENTITY_MATRIX,
            viewport: ScreenRect::default(),
            scissor: ScreenRect::default(),
            is_subview: false,
        }
    }
}

/// Handle of the render world a view was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderWorldHandle(pub u32);

/// One render pass as prepared by the front end.
#[derive(Clone, Debug, Default)]
pub struct ViewDef {
    pub parms: ViewParms,
    /// Seconds, for shader evaluation.
    pub float_time: f32,
    pub render_world: Option<RenderWorldHandle>,
    pub draw_surfs: Vec<DrawSurface>,
    pub view_lights: Vec<ViewLight>,
    /// Empty for pure 2D views.
    pub view_entitys: Vec<ViewEntity>,
    pub connected_areas: Vec<bool>,
}

impl ViewDef {
    pub fn has_entities(&self) -> bool {
        !self.view_entitys.is_empty()
    }
}

/// Back-end command: draw the surfaces of one view.
#[derive(Clone, Debug)]
pub struct DrawSurfsCommand {
    pub view: Arc<ViewDef>,
    /// The player's main view, as opposed to subviews, mirrors and 2D.
    pub primary: bool,
}

// ============================================================
// Context capabilities
// ============================================================

/// What the active graphics context can do, and the render / display sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlConfig {
    /// Only 16-bit element indices are accepted.
    pub use_short_index_elements: bool,
    pub npot_available: bool,
    /// A packed depth24 + stencil8 renderbuffer format exists.
    pub depth_stencil_available: bool,
    pub stencil_bits: u32,
    /// Logical render size.
    pub vid_width: u32,
    pub vid_height: u32,
    /// Real display size.
    pub vid_width_real: u32,
    pub vid_height_real: u32,
}

impl Default for GlConfig {
    fn default() -> Self {
        Self {
            use_short_index_elements: false,
            npot_available: true,
            depth_stencil_available: true,
            stencil_bits: 8,
            vid_width: 640,
            vid_height: 480,
            vid_width_real: 640,
            vid_height_real: 480,
        }
    }
}

impl GlConfig {
    /// Stencil clear value halfway through the stencil range, so increments
    /// and decrements have the same headroom.
    pub fn stencil_mid_value(&self) -> u32 {
        if self.stencil_bits == 0 {
            0
        } else {
            1 << (self.stencil_bits - 1)
        }
    }
}

// ============================================================
// Performance counters
// ============================================================

/// Per-frame back-end statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerformanceCounters {
    pub c_surfaces: usize,
    pub c_draw_elements: usize,
    pub c_shadow_elements: usize,
    pub c_vbo_indexes: usize,
    /// Draws dropped by the index adapter.
    pub c_skipped_draws: usize,
}

impl PerformanceCounters {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) -> String {
        format!(
            "{} surfs {} elements {} shadow {} indexes {} skipped",
            self.c_surfaces,
            self.c_draw_elements,
            self.c_shadow_elements,
            self.c_vbo_indexes,
            self.c_skipped_draws,
        )
    }
}
