//! Two-pass render stage: base program into an offscreen target, then either
//! the post program or the base program again onto the screen.

use tracing::debug;

use crate::backend::{Destination, DrawError, GraphicsBackend};
use crate::module::EffectModule;
use crate::program::{ProgramError, ProgramSpec, ProgramStatus, ShaderProgram};
use crate::shaders::POST_INPUT;
use crate::types::SurfaceSize;
use crate::uniforms::{TargetId, TextureBinding, UniformSet, UniformValue};

/// Flag on the post program that selects the post pass.
pub const ASCII_ENABLED: &str = "uASCIIEnabled";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub aspect: f32,
}

impl Projection {
    pub fn for_size(size: SurfaceSize) -> Self {
        Self {
            aspect: size.aspect(),
        }
    }
}

/// Which program reached the screen in the last `render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenPass {
    Post,
    Base,
    Nothing,
}

/// Link failure that has not been reported yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    pub program: String,
    pub message: String,
}

pub struct RenderStage {
    target: TargetId,
    base: ShaderProgram,
    post: ShaderProgram,
    projection: Projection,
    size: SurfaceSize,
    unreported: Vec<LinkFailure>,
}

impl RenderStage {
    /// Builds both programs from the modules' current values, links them and
    /// allocates the offscreen target at the backend's surface size.
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        base: ProgramSpec,
        post: ProgramSpec,
        modules: &[EffectModule],
    ) -> Result<Self, ProgramError> {
        let size = backend.surface_size().at_least_one();
        let target = backend.create_target(size);

        let mut inputs = UniformSet::new();
        inputs.put(
            POST_INPUT,
            UniformValue::Texture(TextureBinding::Target(target)),
        );
        let base = ShaderProgram::build(base, modules, size)?;
        let post = ShaderProgram::build_with_inputs(post, &inputs, modules, size)?;

        let mut stage = Self {
            target,
            base,
            post,
            projection: Projection::for_size(size),
            size,
            unreported: Vec::new(),
        };
        stage.link(backend);
        Ok(stage)
    }

    fn link(&mut self, backend: &mut dyn GraphicsBackend) {
        for program in [&mut self.base, &mut self.post] {
            match backend.link_program(program.spec()) {
                Ok(handle) => {
                    debug!(program = program.name(), handle = handle.0, "program linked");
                    program.set_status(ProgramStatus::Linked(handle));
                }
                Err(err) => {
                    program.set_status(ProgramStatus::Failed(err.message.clone()));
                    self.unreported.push(LinkFailure {
                        program: err.program,
                        message: err.message,
                    });
                }
            }
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn base(&self) -> &ShaderProgram {
        &self.base
    }

    pub fn post(&self) -> &ShaderProgram {
        &self.post
    }

    pub fn programs(&self) -> [&ShaderProgram; 2] {
        [&self.base, &self.post]
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Link failures not yet handed out. Each failure is returned once.
    pub fn take_link_failures(&mut self) -> Vec<LinkFailure> {
        std::mem::take(&mut self.unreported)
    }

    fn ascii_enabled(&self) -> bool {
        self.post.uniforms().bool(ASCII_ENABLED).unwrap_or(false)
    }

    /// Runs both passes in order. Nothing is drawn unless the base program
    /// linked; the screen pass uses the post program only when ASCII is on
    /// and the post program linked.
    pub fn render(&self, backend: &mut dyn GraphicsBackend) -> Result<ScreenPass, DrawError> {
        let Some(base) = self.base.handle() else {
            return Ok(ScreenPass::Nothing);
        };
        backend.draw(base, self.base.uniforms(), Destination::Target(self.target))?;

        match (self.ascii_enabled(), self.post.handle()) {
            (true, Some(post)) => {
                backend.draw(post, self.post.uniforms(), Destination::Screen)?;
                Ok(ScreenPass::Post)
            }
            _ => {
                backend.draw(base, self.base.uniforms(), Destination::Screen)?;
                Ok(ScreenPass::Base)
            }
        }
    }

    /// Applies a new drawing-buffer size everywhere in one call.
    pub fn resize(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        size: SurfaceSize,
    ) -> Result<(), DrawError> {
        let size = size.at_least_one();
        backend.resize_surface(size);
        self.projection = Projection::for_size(size);
        backend.resize_target(self.target, size)?;
        self.base.set_resolution(size);
        self.post.set_resolution(size);
        self.size = size;
        debug!(%size, aspect = self.projection.aspect, "render stage resized");
        Ok(())
    }

    /// Sets `uTime` in both programs.
    pub fn set_time(&self, seconds: f32) {
        self.base.set_time(seconds);
        self.post.set_time(seconds);
    }

    /// Copies every module's values into both programs.
    pub fn sync(&self, modules: &[EffectModule]) {
        for module in modules {
            for program in self.programs() {
                program.sync_from(module);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::effects;
    use crate::shaders::{base_program_spec, post_program_spec};

    fn modules() -> Vec<EffectModule> {
        vec![effects::noise(), effects::circle(), effects::color(), effects::ascii()]
    }

    fn stage(backend: &mut CpuBackend, modules: &[EffectModule]) -> RenderStage {
        RenderStage::new(backend, base_program_spec(), post_program_spec(), modules).unwrap()
    }

    #[test]
    fn base_pass_always_hits_the_target() {
        let mut backend = CpuBackend::new(SurfaceSize::new(16, 16));
        let modules = modules();
        let stage = stage(&mut backend, &modules);
        assert_eq!(stage.render(&mut backend).unwrap(), ScreenPass::Base);
        let draws = backend.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].program, "base");
        assert_eq!(draws[0].destination, Destination::Target(stage.target()));
        assert_eq!(draws[1].program, "base");
        assert_eq!(draws[1].destination, Destination::Screen);
    }

    #[test]
    fn ascii_flag_selects_the_post_pass() {
        let mut backend = CpuBackend::new(SurfaceSize::new(16, 16));
        let mut modules = modules();
        modules[3].set_enabled(true);
        let stage = stage(&mut backend, &modules);
        assert_eq!(stage.render(&mut backend).unwrap(), ScreenPass::Post);
        assert_eq!(backend.draws()[1].program, "post");
    }

    #[test]
    fn post_input_samples_the_offscreen_target() {
        let mut backend = CpuBackend::new(SurfaceSize::new(4, 4));
        let stage = stage(&mut backend, &modules());
        assert_eq!(
            stage.post().uniforms().value(POST_INPUT),
            Some(UniformValue::Texture(TextureBinding::Target(stage.target())))
        );
    }

    #[test]
    fn failed_post_falls_back_to_base() {
        let mut backend = CpuBackend::new(SurfaceSize::new(8, 8));
        backend.reject_program("post");
        let mut modules = modules();
        modules[3].set_enabled(true);
        let mut stage = stage(&mut backend, &modules);

        let failures = stage.take_link_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].program, "post");
        assert!(stage.take_link_failures().is_empty());

        assert_eq!(stage.render(&mut backend).unwrap(), ScreenPass::Base);
        assert!(matches!(stage.post().status(), ProgramStatus::Failed(_)));
    }

    #[test]
    fn failed_base_skips_the_offscreen_pass() {
        let mut backend = CpuBackend::new(SurfaceSize::new(8, 8));
        backend.reject_program("base");
        let mut stage = stage(&mut backend, &modules());
        stage.take_link_failures();
        assert_eq!(stage.render(&mut backend).unwrap(), ScreenPass::Nothing);
        assert!(backend.draws().is_empty());
    }

    #[test]
    fn failed_base_skips_the_post_pass_too() {
        let mut backend = CpuBackend::new(SurfaceSize::new(8, 8));
        backend.reject_program("base");
        let mut modules = modules();
        modules[3].set_enabled(true);
        let mut stage = stage(&mut backend, &modules);
        assert_eq!(stage.take_link_failures().len(), 1);
        assert!(stage.post().handle().is_some());

        assert_eq!(stage.render(&mut backend).unwrap(), ScreenPass::Nothing);
        assert!(backend.draws().is_empty());
    }

    #[test]
    fn resize_updates_everything_at_once() {
        let mut backend = CpuBackend::new(SurfaceSize::new(800, 600));
        let mut stage = stage(&mut backend, &modules());
        assert_eq!(stage.base().resolution(), [800.0, 600.0]);

        stage
            .resize(&mut backend, SurfaceSize::new(1920, 1080))
            .unwrap();
        assert_eq!(backend.surface_size(), SurfaceSize::new(1920, 1080));
        assert_eq!(
            backend.target_frame(stage.target()).map(|frame| frame.size()),
            Some(SurfaceSize::new(1920, 1080))
        );
        assert_eq!(stage.base().resolution(), [1920.0, 1080.0]);
        assert_eq!(stage.post().resolution(), [1920.0, 1080.0]);
        assert!((stage.projection().aspect - 16.0 / 9.0).abs() < 1e-6);
    }
}
