//! Back-end view renderer.
//!
//! Turns the draw-surface list prepared by the front end into device draw
//! calls, composites light interactions, narrows index streams for
//! short-index contexts, and optionally renders through an offscreen target
//! that is blitted to the display at the end of the frame.

// Shared data model and configuration
pub mod tr_local;
pub mod config;

// Collaborator contracts
pub mod device;
pub mod images;
pub mod vertex_cache;

// Back end
pub mod backend;
pub mod draw;
pub mod draw_surf;
pub mod interaction;
pub mod view;
pub mod framebuffer;

// Hardware layers
pub mod recording;
pub mod vulkan;

pub use backend::BackEnd;
pub use config::{r_register, BackendConfig};
pub use device::RenderDevice;
pub use framebuffer::{FrameBufferStage, FramebufferState};
pub use interaction::{submit_interaction, DrawInteraction, SubmitOutcome};
pub use view::{render_with_override, RenderContext, ViewOutcome, ViewRenderer};

use thiserror::Error;

/// Errors that stop rendering from proceeding.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The offscreen target failed its completeness check.
    #[error("Error binding Framebuffer: {0}")]
    FramebufferIncomplete(String),
    /// A device resource could not be created.
    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: &'static str, reason: String },
    /// Shader compilation or pipeline creation failed.
    #[error("shader compilation error: {0}")]
    ShaderCompilation(String),
    /// The device does not support the requested configuration.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),
}
