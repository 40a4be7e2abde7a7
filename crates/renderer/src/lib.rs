//! Layered generative-art compositor.
//!
//! Effect modules own named uniforms and toggle themselves on and off. Every
//! frame the compositor copies those values into two shader programs and
//! draws them through the render stage:
//!
//! ```text
//!   EffectModule ──sync──▶ base program ──▶ offscreen target
//!   (Noise, Circle, ...)                          │ uTexture
//!                          post program (ASCII) ◀─┘──▶ screen
//! ```
//!
//! When the ASCII module is disabled, or the post program failed to link,
//! the base program draws straight to the screen instead. Drawing goes
//! through [`GraphicsBackend`]: [`GpuBackend`] renders with `wgpu` into a
//! winit window, [`CpuBackend`] evaluates the same stack on the CPU for
//! still renders and tests.

pub mod backend;
pub mod compositor;
pub mod control;
pub mod cpu;
pub mod effects;
pub mod gpu;
pub mod module;
pub mod program;
pub mod shaders;
pub mod stage;
pub mod types;
pub mod uniforms;
pub mod window;

pub use backend::{Destination, DrawError, GraphicsBackend, LinkError, ProgramHandle};
pub use compositor::{Compositor, FrameOutcome};
pub use control::{
    BindingId, BindingSpec, ControlDescriptor, ControlPanel, FolderId, HeadlessPanel, PanelCommand,
    PanelEvent,
};
pub use cpu::{CpuBackend, Frame};
pub use effects::{apply_override, standard_modules};
pub use gpu::GpuBackend;
pub use module::{EffectModule, ModuleError, ModuleExtension, UniformSpec};
pub use program::{ProgramError, ProgramSpec, ShaderProgram};
pub use stage::{LinkFailure, RenderStage, ScreenPass};
pub use types::{GpuPowerPreference, SurfaceSize, WindowConfig};
pub use uniforms::{TextureBinding, UniformCell, UniformKind, UniformSet, UniformValue};
pub use window::{run_window, KeyboardPanel, PanelKey};
