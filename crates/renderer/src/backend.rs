//! Contract between the render stage and a graphics implementation.

use crate::program::ProgramSpec;
use crate::types::SurfaceSize;
use crate::uniforms::{TargetId, UniformSet};

/// Linked program owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Target(TargetId),
    Screen,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to link program '{program}': {message}")]
pub struct LinkError {
    pub program: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrawError {
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramHandle),
    #[error("unknown render target {0:?}")]
    UnknownTarget(TargetId),
    /// The presentation surface was lost or is outdated; it has been
    /// reconfigured and the frame should be skipped.
    #[error("surface lost: {0}")]
    SurfaceLost(String),
    /// The device is gone. Nothing else will render.
    #[error("graphics context lost: {0}")]
    ContextLost(String),
}

impl DrawError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DrawError::ContextLost(_))
    }
}

/// Graphics context provider: program linking, offscreen targets and
/// full-screen draws with per-draw uniform upload by name.
pub trait GraphicsBackend {
    fn surface_size(&self) -> SurfaceSize;

    /// Resizes the drawing buffer.
    fn resize_surface(&mut self, size: SurfaceSize);

    fn link_program(&mut self, spec: &ProgramSpec) -> Result<ProgramHandle, LinkError>;

    fn create_target(&mut self, size: SurfaceSize) -> TargetId;

    fn resize_target(&mut self, target: TargetId, size: SurfaceSize) -> Result<(), DrawError>;

    /// Draws a full-screen triangle with `program`, uploading `uniforms` by
    /// name. Texture uniforms bound to a target sample its last contents.
    fn draw(
        &mut self,
        program: ProgramHandle,
        uniforms: &UniformSet,
        destination: Destination,
    ) -> Result<(), DrawError>;

    /// Shows everything drawn to `Destination::Screen` since the last call.
    fn present(&mut self) -> Result<(), DrawError>;
}
