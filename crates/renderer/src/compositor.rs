//! Per-frame orchestration: throttle, sync modules into programs, render.

use std::time::Instant;

use scheduler::{FrameDecision, FramePacing, FrameScheduler, FrameTick};
use tracing::{debug, error, trace, warn};

use crate::backend::{DrawError, GraphicsBackend};
use crate::control::{ControlPanel, PanelEvent};
use crate::module::{EffectModule, ModuleError};
use crate::program::ProgramError;
use crate::shaders::{base_program_spec, post_program_spec};
use crate::stage::{LinkFailure, RenderStage, ScreenPass};
use crate::types::SurfaceSize;

type ProgramErrorHook = Box<dyn FnMut(&LinkFailure)>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// The callback arrived too early; nothing was touched.
    Skipped,
    Rendered { tick: FrameTick, screen: ScreenPass },
}

/// Owns the module stack, the render stage and the backend they draw with.
pub struct Compositor<B: GraphicsBackend> {
    backend: B,
    modules: Vec<EffectModule>,
    stage: RenderStage,
    scheduler: FrameScheduler,
    pacing: FramePacing,
    on_program_error: ProgramErrorHook,
}

impl<B: GraphicsBackend> Compositor<B> {
    /// Activates every module, then builds and links the stock programs.
    pub fn new(
        mut backend: B,
        mut modules: Vec<EffectModule>,
        scheduler: FrameScheduler,
    ) -> Result<Self, ProgramError> {
        for module in &mut modules {
            module.activate();
        }
        let stage = RenderStage::new(&mut backend, base_program_spec(), post_program_spec(), &modules)?;
        debug!(modules = modules.len(), size = %stage.size(), "compositor ready");
        Ok(Self {
            backend,
            modules,
            stage,
            scheduler,
            pacing: FramePacing::default(),
            on_program_error: Box::new(|failure| {
                error!(program = %failure.program, "shader program failed to link: {}", failure.message);
            }),
        })
    }

    /// Replaces the link failure callback. Failures that have not been
    /// reported yet go to the new callback on the next tick.
    pub fn on_program_error(&mut self, hook: impl FnMut(&LinkFailure) + 'static) {
        self.on_program_error = Box::new(hook);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn modules(&self) -> &[EffectModule] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&EffectModule> {
        self.modules.iter().find(|module| module.name() == name)
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut EffectModule> {
        self.modules.iter_mut().find(|module| module.name() == name)
    }

    pub fn stage(&self) -> &RenderStage {
        &self.stage
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    fn report_link_failures(&mut self) {
        for failure in self.stage.take_link_failures() {
            (self.on_program_error)(&failure);
        }
    }

    /// One display callback. Only a fatal backend error is returned; a lost
    /// surface skips the frame.
    pub fn tick(&mut self, now: Instant) -> Result<FrameOutcome, DrawError> {
        self.report_link_failures();

        let tick = match self.scheduler.poll(now) {
            FrameDecision::Skip { remaining } => {
                trace!(?remaining, "frame skipped");
                return Ok(FrameOutcome::Skipped);
            }
            FrameDecision::Render(tick) => tick,
        };

        let screen = match self.draw(tick.seconds()) {
            Ok(screen) => screen,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("frame dropped: {err}");
                ScreenPass::Nothing
            }
        };
        self.pacing.record(now);
        Ok(FrameOutcome::Rendered { tick, screen })
    }

    /// Lets module attachments install finished work. Returns whether any
    /// uniform changed.
    pub fn poll_modules(&mut self) -> bool {
        let mut changed = false;
        for module in &mut self.modules {
            if module.poll() {
                debug!(module = module.name(), "attachment updated uniforms");
                changed = true;
            }
        }
        changed
    }

    /// Renders and presents one frame at `seconds`, bypassing the
    /// scheduler. Used for still renders.
    pub fn render_at(&mut self, seconds: f32) -> Result<ScreenPass, DrawError> {
        self.report_link_failures();
        self.draw(seconds)
    }

    fn draw(&mut self, seconds: f32) -> Result<ScreenPass, DrawError> {
        self.poll_modules();
        self.stage.set_time(seconds);
        self.stage.sync(&self.modules);
        let screen = self.stage.render(&mut self.backend)?;
        self.backend.present()?;
        Ok(screen)
    }

    pub fn resize(&mut self, size: SurfaceSize) -> Result<(), DrawError> {
        self.stage.resize(&mut self.backend, size)
    }

    /// Binds every module's controls, one folder per module.
    pub fn setup_controls(&mut self, panel: &mut dyn ControlPanel) -> Result<(), ModuleError> {
        for module in &mut self.modules {
            module.setup_controls(panel)?;
        }
        Ok(())
    }

    /// Routes a panel change to the module that owns the binding. Returns
    /// false when no module claims it.
    pub fn apply_panel_event(&mut self, event: &PanelEvent) -> Result<bool, ModuleError> {
        for module in &mut self.modules {
            if module.owns(event.binding) {
                return module.apply_control(event);
            }
        }
        Ok(false)
    }

    /// Pushes queued visibility and value changes to the panel.
    pub fn flush_panel(&mut self, panel: &mut dyn ControlPanel) {
        for module in &mut self.modules {
            module.flush_panel(panel);
        }
    }

    /// Adds a module after construction. Programs only read names they
    /// declare, so the new values flow in from the next sync.
    pub fn add_module(&mut self, mut module: EffectModule) {
        module.activate();
        self.modules.push(module);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::control::HeadlessPanel;
    use crate::cpu::CpuBackend;
    use crate::effects;
    use crate::uniforms::UniformValue;

    fn modules() -> Vec<EffectModule> {
        vec![effects::noise(), effects::circle(), effects::color(), effects::ascii()]
    }

    fn compositor(size: SurfaceSize, fps: Option<f32>) -> Compositor<CpuBackend> {
        Compositor::new(
            CpuBackend::new(size),
            modules(),
            FrameScheduler::new(fps).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn throttles_to_the_frame_rate() {
        let mut compositor = compositor(SurfaceSize::new(4, 4), Some(30.0));
        let start = Instant::now();
        let mut rendered = 0;
        let mut last = None;
        for millis in 0..1000 {
            let now = start + Duration::from_millis(millis);
            if let FrameOutcome::Rendered { .. } = compositor.tick(now).unwrap() {
                if let Some(last) = last {
                    assert!(millis - last >= 33, "frames {last}ms and {millis}ms too close");
                }
                last = Some(millis);
                rendered += 1;
            }
        }
        assert!((29..=30).contains(&rendered), "rendered {rendered}");
        assert_eq!(compositor.backend().presents(), rendered);
    }

    #[test]
    fn skipped_frames_touch_nothing() {
        let mut compositor = compositor(SurfaceSize::new(4, 4), Some(30.0));
        let start = Instant::now();
        compositor.tick(start).unwrap();
        compositor.backend_mut().clear_draws();
        let outcome = compositor.tick(start + Duration::from_millis(5)).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(compositor.backend().draws().is_empty());
    }

    #[test]
    fn time_is_wall_clock() {
        let mut compositor = compositor(SurfaceSize::new(2, 2), None);
        let start = Instant::now();
        compositor.tick(start).unwrap();
        compositor.tick(start + Duration::from_millis(2500)).unwrap();
        let time = compositor.stage().base().uniforms().f32("uTime").unwrap();
        assert!((time - 2.5).abs() < 1e-4);
        assert_eq!(compositor.stage().post().uniforms().f32("uTime"), Some(time));
    }

    #[test]
    fn sync_happens_before_render() {
        let mut compositor = compositor(SurfaceSize::new(8, 8), None);
        compositor
            .module_mut("Circle")
            .unwrap()
            .set_uniform("uRadius", 0.7)
            .unwrap();
        compositor.tick(Instant::now()).unwrap();
        assert_eq!(compositor.stage().base().uniforms().f32("uRadius"), Some(0.7));
    }

    #[test]
    fn still_render_ignores_the_scheduler() {
        let mut compositor = compositor(SurfaceSize::new(4, 4), Some(30.0));
        compositor.module_mut("Noise").unwrap().set_enabled(true);
        assert_eq!(compositor.render_at(1.25).unwrap(), ScreenPass::Base);
        assert_eq!(compositor.render_at(1.25).unwrap(), ScreenPass::Base);
        assert_eq!(compositor.stage().base().uniforms().f32("uTime"), Some(1.25));
        assert_eq!(compositor.backend().presents(), 2);
        assert_eq!(compositor.scheduler().frames(), 0);
    }

    #[test]
    fn sync_is_idempotent() {
        let compositor = compositor(SurfaceSize::new(2, 2), None);
        compositor.stage().sync(compositor.modules());
        let first = compositor.stage().base().uniforms().values();
        compositor.stage().sync(compositor.modules());
        assert_eq!(compositor.stage().base().uniforms().values(), first);
    }

    #[test]
    fn disabled_ascii_shows_the_base_pass() {
        let mut compositor = compositor(SurfaceSize::new(24, 16), None);
        compositor.module_mut("Noise").unwrap().set_enabled(true);
        let outcome = compositor.tick(Instant::now()).unwrap();
        assert!(matches!(outcome, FrameOutcome::Rendered { screen: ScreenPass::Base, .. }));

        let target = compositor.stage().target();
        let backend = compositor.backend();
        assert_eq!(Some(backend.screen()), backend.target_frame(target));
    }

    #[test]
    fn ascii_output_depends_on_its_uniforms() {
        let mut compositor = compositor(SurfaceSize::new(64, 64), None);
        compositor.module_mut("Noise").unwrap().set_enabled(true);
        let start = Instant::now();
        compositor.tick(start).unwrap();
        let plain = compositor.backend().screen().clone();

        compositor.module_mut("ASCII").unwrap().set_enabled(true);
        let outcome = compositor.tick(start).unwrap();
        assert!(matches!(outcome, FrameOutcome::Rendered { screen: ScreenPass::Post, .. }));
        let small = compositor.backend().screen().clone();
        assert_ne!(small, plain);

        compositor
            .module_mut("ASCII")
            .unwrap()
            .set_uniform("uCharSize", 32.0)
            .unwrap();
        compositor.tick(start).unwrap();
        let large = compositor.backend().screen().clone();
        assert_ne!(large, small);

        compositor
            .module_mut("ASCII")
            .unwrap()
            .set_uniform("uBrightness", 0.0)
            .unwrap();
        compositor.tick(start).unwrap();
        let dark = compositor.backend().screen();
        assert!(dark.to_rgba8().chunks(4).all(|pixel| pixel[..3] == [0, 0, 0]));
    }

    #[test]
    fn resize_reaches_every_program() {
        let mut compositor = compositor(SurfaceSize::new(800, 600), None);
        compositor.resize(SurfaceSize::new(1920, 1080)).unwrap();
        for program in compositor.stage().programs() {
            assert_eq!(program.resolution(), [1920.0, 1080.0]);
        }
        assert_eq!(compositor.backend().surface_size(), SurfaceSize::new(1920, 1080));
    }

    #[test]
    fn link_failure_is_reported_once_and_never_draws() {
        let mut backend = CpuBackend::new(SurfaceSize::new(4, 4));
        backend.reject_program("base");
        let mut compositor =
            Compositor::new(backend, modules(), FrameScheduler::new(None).unwrap()).unwrap();
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reported);
        compositor.on_program_error(move |failure| sink.borrow_mut().push(failure.program.clone()));

        let start = Instant::now();
        compositor.tick(start).unwrap();
        compositor.tick(start + Duration::from_secs(1)).unwrap();
        assert_eq!(*reported.borrow(), vec!["base".to_string()]);
        assert!(compositor.backend().draws().is_empty());
    }

    #[test]
    fn panel_events_reach_the_owning_module() {
        let mut compositor = compositor(SurfaceSize::new(4, 4), None);
        let mut panel = HeadlessPanel::new();
        compositor.setup_controls(&mut panel).unwrap();
        compositor.flush_panel(&mut panel);

        let radius = panel.find("Circle", "uRadius").unwrap();
        let event = panel.change(radius, 0.5).unwrap();
        assert!(compositor.apply_panel_event(&event).unwrap());
        assert_eq!(
            compositor.module("Circle").unwrap().uniforms().value("uRadius"),
            Some(UniformValue::Float(0.5))
        );

        let enable = panel.find("ASCII", "enabled").unwrap();
        let event = panel.change(enable, true).unwrap();
        compositor.apply_panel_event(&event).unwrap();
        assert!(compositor.module("ASCII").unwrap().is_enabled());
    }
}
