// interaction.rs — per-stage interaction parameters and interaction submission
//
// A light interaction combines a bump, diffuse and specular stage of a surface
// material with one light. The assembler turns material stages into concrete
// images, texture matrices and colours; the submitter substitutes
// placeholders, drops interactions that would not contribute, and hands the
// rest to the hardware-specific draw routine.

use thiserror::Error;

use crate::backend::BackEnd;
use crate::config::BackendConfig;
use crate::device::RenderDevice;
use crate::images::{BindResult, GlobalImages, ImageCache, ImageHandle};
use crate::tr_local::{
    Mat4, RegisterIndex, ShaderRegisterFile, ShaderStage, StageVertexColor, TextureStage, Vec4,
    SHADERPARM_CINEMATIC_OFFSET,
};
use crate::view::RenderContext;

/// Two rows of (s, t, 0, translation).
pub type TextureMatrix = [Vec4; 2];

pub const IDENTITY_TEXTURE_MATRIX: TextureMatrix = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]];

/// Translations beyond this magnitude lose their integer part.
const TEXTURE_TRANSLATION_LIMIT: f32 = 40.0;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InteractionError {
    #[error("shader register {index} out of range ({len} registers)")]
    RegisterOutOfRange { index: RegisterIndex, len: usize },
}

fn reg(registers: &ShaderRegisterFile, index: RegisterIndex) -> Result<f32, InteractionError> {
    registers.get(index).ok_or(InteractionError::RegisterOutOfRange {
        index,
        len: registers.len(),
    })
}

/// Keep scrolling texture offsets from growing without bound. Only the
/// fractional part survives once the offset leaves [-40, 40].
pub fn wrap_translation(v: f32) -> f32 {
    if v < -TEXTURE_TRANSLATION_LIMIT || v > TEXTURE_TRANSLATION_LIMIT {
        v - v.trunc()
    } else {
        v
    }
}

// ============================================================
// Assembler
// ============================================================

pub fn resolve_texture_matrix(
    registers: &ShaderRegisterFile,
    texture: &TextureStage,
) -> Result<TextureMatrix, InteractionError> {
    let Some(m) = texture.matrix else {
        return Ok(IDENTITY_TEXTURE_MATRIX);
    };
    let mut matrix = [[0.0f32; 4]; 2];
    for (row, regs) in matrix.iter_mut().zip(m.iter()) {
        *row = [
            reg(registers, regs[0])?,
            reg(registers, regs[1])?,
            0.0,
            wrap_translation(reg(registers, regs[2])?),
        ];
    }
    Ok(matrix)
}

/// The stage transform as a column-major 4×4 texture matrix.
pub fn shader_texture_matrix(
    registers: &ShaderRegisterFile,
    texture: &TextureStage,
) -> Result<Mat4, InteractionError> {
    let [s, t] = resolve_texture_matrix(registers, texture)?;
    #[rustfmt::skip]
    let matrix = [
        s[0], t[0], 0.0, 0.0,
        s[1], t[1], 0.0, 0.0,
        0.0,  0.0,  1.0, 0.0,
        s[3], t[3], 0.0, 1.0,
    ];
    Ok(matrix)
}

/// Stage colour with every channel clamped to [0, 1].
pub fn resolve_color(
    registers: &ShaderRegisterFile,
    stage: &ShaderStage,
) -> Result<Vec4, InteractionError> {
    let mut color = [0.0f32; 4];
    for (c, &index) in color.iter_mut().zip(stage.color.registers.iter()) {
        *c = reg(registers, index)?.clamp(0.0, 1.0);
    }
    Ok(color)
}

/// Image, matrix and colour of one stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StageInteraction {
    pub image: Option<ImageHandle>,
    pub matrix: TextureMatrix,
    pub color: Vec4,
}

pub fn set_draw_interaction(
    stage: &ShaderStage,
    registers: &ShaderRegisterFile,
) -> Result<StageInteraction, InteractionError> {
    Ok(StageInteraction {
        image: stage.texture.image,
        matrix: resolve_texture_matrix(registers, &stage.texture)?,
        color: resolve_color(registers, stage)?,
    })
}

/// What `bind_variable_stage` bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageBinding {
    Nothing,
    Image(ImageHandle),
    DefaultImage,
    /// The cinematic had no frame yet.
    BlackPlaceholder,
}

impl<D: RenderDevice> BackEnd<D> {
    /// Bind a stage image, producing a cinematic frame when needed.
    pub fn bind_variable_stage<I: ImageCache + ?Sized>(
        &mut self,
        texture: &TextureStage,
        ctx: &RenderContext<'_>,
        images: &mut I,
        globals: &GlobalImages,
    ) -> StageBinding {
        if !texture.cinematic {
            return match texture.image {
                Some(image) => {
                    images.bind(image);
                    StageBinding::Image(image)
                }
                None => StageBinding::Nothing,
            };
        }

        if self.config.skip_dynamic_textures {
            images.bind(globals.default_image);
            return StageBinding::DefaultImage;
        }

        // cinematic frames run one frame behind the decoder
        let Some(image) = texture.image else {
            return StageBinding::Nothing;
        };
        let binding = match images.bind(image) {
            BindResult::Bound => StageBinding::Image(image),
            BindResult::NotYetReady => {
                images.bind(globals.black_image);
                StageBinding::BlackPlaceholder
            }
        };

        let offset = ctx.render_view().shader_parms[SHADERPARM_CINEMATIC_OFFSET];
        let next_time = (1000.0 * (ctx.float_time() + offset)) as i32;
        images.set_cinematic_next_time(image, next_time);
        images.register_for_deferred_update(image);
        binding
    }
}

// ============================================================
// Submitter
// ============================================================

/// Everything needed to draw one light / surface interaction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawInteraction {
    pub local_light_origin: Vec4,
    pub local_view_origin: Vec4,
    /// S, T, Q and falloff planes of the light projection.
    pub light_projection: [Vec4; 4],

    pub light_image: Option<ImageHandle>,
    pub light_falloff_image: Option<ImageHandle>,
    pub bump_image: Option<ImageHandle>,
    pub diffuse_image: Option<ImageHandle>,
    pub specular_image: Option<ImageHandle>,

    pub bump_matrix: TextureMatrix,
    pub diffuse_matrix: TextureMatrix,
    pub specular_matrix: TextureMatrix,

    pub diffuse_color: Vec4,
    pub specular_color: Vec4,
    pub vertex_color: StageVertexColor,
    pub ambient_light: bool,
}

impl Default for DrawInteraction {
    fn default() -> Self {
        Self {
            local_light_origin: [0.0, 0.0, 0.0, 1.0],
            local_view_origin: [0.0, 0.0, 0.0, 1.0],
            light_projection: [[0.0; 4]; 4],
            light_image: None,
            light_falloff_image: None,
            bump_image: None,
            diffuse_image: None,
            specular_image: None,
            bump_matrix: IDENTITY_TEXTURE_MATRIX,
            diffuse_matrix: IDENTITY_TEXTURE_MATRIX,
            specular_matrix: IDENTITY_TEXTURE_MATRIX,
            diffuse_color: [0.0; 4],
            specular_color: [0.0; 4],
            vertex_color: StageVertexColor::Ignore,
            ambient_light: false,
        }
    }
}

impl DrawInteraction {
    pub fn set_bump(&mut self, stage: StageInteraction) {
        self.bump_image = stage.image;
        self.bump_matrix = stage.matrix;
    }

    /// The diffuse colour is the stage colour modulated by the light colour.
    pub fn set_diffuse(&mut self, stage: StageInteraction, light_color: Vec4) {
        self.diffuse_image = stage.image;
        self.diffuse_matrix = stage.matrix;
        self.diffuse_color = modulate(stage.color, light_color);
    }

    pub fn set_specular(&mut self, stage: StageInteraction, light_color: Vec4) {
        self.specular_image = stage.image;
        self.specular_matrix = stage.matrix;
        self.specular_color = modulate(stage.color, light_color);
    }
}

fn modulate(a: Vec4, b: Vec4) -> Vec4 {
    [a[0] * b[0], a[1] * b[1], a[2] * b[2], a[3] * b[3]]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The surface has no bump stage; nothing is lit.
    NoBumpImage,
    /// Neither diffuse nor specular would contribute.
    Invisible,
    Drawn,
}

fn any_rgb_positive(color: &Vec4) -> bool {
    color[..3].iter().any(|&c| c > 0.0)
}

/// Substitute placeholder images and call `draw` if the interaction would
/// contribute light.
pub fn submit_interaction<F>(
    din: &mut DrawInteraction,
    config: &BackendConfig,
    globals: &GlobalImages,
    draw: F,
) -> SubmitOutcome
where
    F: FnOnce(&DrawInteraction),
{
    if din.bump_image.is_none() {
        return SubmitOutcome::NoBumpImage;
    }

    if din.diffuse_image.is_none() || config.skip_diffuse {
        din.diffuse_image = Some(globals.black_image);
    }
    if din.specular_image.is_none() || config.skip_specular || din.ambient_light {
        din.specular_image = Some(globals.black_image);
    }
    if config.skip_bump {
        din.bump_image = Some(globals.flat_normal_map);
    }

    let black = Some(globals.black_image);
    let diffuse_visible = any_rgb_positive(&din.diffuse_color) && din.diffuse_image != black;
    let specular_visible = any_rgb_positive(&din.specular_color) && din.specular_image != black;
    if !(diffuse_visible || specular_visible) {
        return SubmitOutcome::Invisible;
    }

    for c in &mut din.diffuse_color[..3] {
        *c *= config.overbright;
    }
    draw(din);
    SubmitOutcome::Drawn
}
