//! Preview window: winit event loop, `wgpu` backend and a keyboard-driven
//! control panel whose state is shown in the window title.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use scheduler::FrameScheduler;
use tracing::{error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::compositor::{Compositor, FrameOutcome};
use crate::control::{
    BindingId, BindingSpec, ControlDescriptor, ControlPanel, FolderId, HeadlessPanel, PanelEvent,
};
use crate::gpu::GpuBackend;
use crate::module::EffectModule;
use crate::types::{SurfaceSize, WindowConfig};
use crate::uniforms::UniformValue;

/// Panel navigation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKey {
    Next,
    Previous,
    Increase,
    Decrease,
    Toggle,
}

impl PanelKey {
    fn from_winit(key: &Key) -> Option<Self> {
        match key {
            Key::Named(NamedKey::ArrowDown) | Key::Named(NamedKey::Tab) => Some(PanelKey::Next),
            Key::Named(NamedKey::ArrowUp) => Some(PanelKey::Previous),
            Key::Named(NamedKey::ArrowRight) => Some(PanelKey::Increase),
            Key::Named(NamedKey::ArrowLeft) => Some(PanelKey::Decrease),
            Key::Named(NamedKey::Space) => Some(PanelKey::Toggle),
            Key::Character(value) if value.as_str() == " " => Some(PanelKey::Toggle),
            _ => None,
        }
    }
}

/// Control panel driven from the keyboard. Up and down move the selection
/// across visible bindings, left and right step the selected value, space
/// flips toggles.
#[derive(Debug, Clone)]
pub struct KeyboardPanel {
    inner: HeadlessPanel,
    selected: Option<BindingId>,
    title: String,
}

impl KeyboardPanel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            inner: HeadlessPanel::new(),
            selected: None,
            title: title.into(),
        }
    }

    pub fn panel(&self) -> &HeadlessPanel {
        &self.inner
    }

    pub fn selected(&self) -> Option<BindingId> {
        self.selected.filter(|id| !self.inner.is_hidden(*id))
    }

    fn visible(&self) -> Vec<BindingId> {
        self.inner
            .bindings()
            .filter(|(_, binding)| !binding.hidden)
            .map(|(id, _)| id)
            .collect()
    }

    fn move_selection(&mut self, offset: isize) {
        let visible = self.visible();
        if visible.is_empty() {
            self.selected = None;
            return;
        }
        let count = visible.len() as isize;
        let position = self
            .selected
            .and_then(|current| visible.iter().position(|id| *id == current))
            .map_or(if offset > 0 { -1 } else { 0 }, |index| index as isize);
        let next = (position + offset).rem_euclid(count) as usize;
        self.selected = Some(visible[next]);
    }

    /// Applies a key. Returns the edit to route to the owning module.
    pub fn handle_key(&mut self, key: PanelKey) -> Option<PanelEvent> {
        match key {
            PanelKey::Next => {
                self.move_selection(1);
                None
            }
            PanelKey::Previous => {
                self.move_selection(-1);
                None
            }
            PanelKey::Increase | PanelKey::Decrease | PanelKey::Toggle => {
                let id = self.selected()?;
                let binding = self.inner.binding(id)?;
                let spec = &binding.spec;
                let value = match (key, &spec.control) {
                    (PanelKey::Toggle, ControlDescriptor::Toggle) => {
                        spec.control.step_value(spec.kind, &spec.value, 1)
                    }
                    (PanelKey::Toggle, _) => return None,
                    (PanelKey::Increase, _) => spec.control.step_value(spec.kind, &spec.value, 1),
                    _ => spec.control.step_value(spec.kind, &spec.value, -1),
                };
                self.inner.change(id, value)
            }
        }
    }

    /// `<title> | <folder> / <label>: <value>` for the selected binding.
    pub fn title(&self) -> String {
        let Some(binding) = self.selected().and_then(|id| self.inner.binding(id)) else {
            return self.title.clone();
        };
        let folder = self
            .inner
            .folders()
            .get(binding.folder.0)
            .map_or("", |folder| folder.title.as_str());
        format!(
            "{} | {} / {}: {}",
            self.title,
            folder,
            binding.spec.label,
            binding.spec.control.describe(&binding.spec.value)
        )
    }
}

impl ControlPanel for KeyboardPanel {
    fn add_folder(&mut self, title: &str) -> FolderId {
        self.inner.add_folder(title)
    }

    fn add_binding(&mut self, folder: FolderId, spec: BindingSpec) -> BindingId {
        let id = self.inner.add_binding(folder, spec);
        self.selected.get_or_insert(id);
        id
    }

    fn set_hidden(&mut self, binding: BindingId, hidden: bool) {
        self.inner.set_hidden(binding, hidden);
    }

    fn set_value(&mut self, binding: BindingId, value: UniformValue) {
        self.inner.set_value(binding, value);
    }
}

/// Opens the preview window and runs the compositor until it is closed.
pub fn run_window(
    config: WindowConfig,
    modules: Vec<EffectModule>,
    scheduler: FrameScheduler,
) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(
            config.surface_size.width,
            config.surface_size.height,
        ))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let inner = window.inner_size();
    let config = WindowConfig {
        surface_size: SurfaceSize::new(inner.width, inner.height).at_least_one(),
        ..config
    };
    let backend = GpuBackend::new(window.as_ref(), &config).context("failed to initialise GPU backend")?;
    let mut compositor =
        Compositor::new(backend, modules, scheduler).context("failed to build shader programs")?;
    let mut panel = KeyboardPanel::new(config.title.clone());
    compositor
        .setup_controls(&mut panel)
        .context("failed to bind controls")?;
    window.set_title(&panel.title());
    info!(size = %config.surface_size, "preview window ready");

    let mut result = Ok(());
    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed {
                    return;
                }
                if matches!(event.logical_key, Key::Named(NamedKey::Escape)) {
                    elwt.exit();
                    return;
                }
                let Some(key) = PanelKey::from_winit(&event.logical_key) else {
                    return;
                };
                if let Some(change) = panel.handle_key(key) {
                    if let Err(err) = compositor.apply_panel_event(&change) {
                        warn!("control change rejected: {err}");
                    }
                    compositor.flush_panel(&mut panel);
                }
                window.set_title(&panel.title());
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = compositor.resize(SurfaceSize::new(size.width, size.height)) {
                    error!("resize failed: {err}");
                }
            }
            WindowEvent::RedrawRequested => match compositor.tick(Instant::now()) {
                Ok(FrameOutcome::Rendered { .. }) => {
                    compositor.flush_panel(&mut panel);
                }
                Ok(FrameOutcome::Skipped) => {}
                Err(err) => {
                    error!("graphics context lost: {err}");
                    result = Err(anyhow!("graphics context lost: {err}"));
                    elwt.exit();
                }
            },
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            match compositor.next_deadline() {
                Some(deadline) if deadline > now => {
                    elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
                }
                _ => {
                    window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Wait);
                }
            }
        }
        _ => {}
    });

    if let Err(err) = run_result {
        result = Err(anyhow!("window event loop error: {err}"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects;

    fn panel() -> (KeyboardPanel, Vec<EffectModule>) {
        let mut panel = KeyboardPanel::new("test");
        let mut modules = vec![effects::circle(), effects::ascii()];
        for module in &mut modules {
            module.setup_controls(&mut panel).unwrap();
        }
        (panel, modules)
    }

    #[test]
    fn first_binding_is_selected() {
        let (panel, _) = panel();
        let first = panel.panel().find("Circle", "enabled").unwrap();
        assert_eq!(panel.selected(), Some(first));
        assert_eq!(panel.title(), "test | Circle / Enable: off");
    }

    #[test]
    fn space_toggles_and_arrows_step() {
        let (mut panel, mut modules) = panel();
        let event = panel.handle_key(PanelKey::Toggle).unwrap();
        assert_eq!(event.value, UniformValue::Bool(true));
        assert!(modules[0].apply_control(&event).unwrap());
        assert!(modules[0].is_enabled());
        modules[0].flush_panel(&mut panel);

        panel.handle_key(PanelKey::Next);
        assert_eq!(panel.selected(), panel.panel().find("Circle", "uRadius"));
        assert_eq!(panel.handle_key(PanelKey::Toggle), None);
        let event = panel.handle_key(PanelKey::Increase).unwrap();
        let radius = event.value.as_f32().unwrap();
        assert!((radius - 0.335).abs() < 1e-5, "{radius}");
    }

    #[test]
    fn selection_skips_hidden_bindings() {
        let (mut panel, _) = panel();
        // Disabled modules hide their dependent controls, leaving the toggles.
        panel.handle_key(PanelKey::Next);
        assert_eq!(panel.selected(), panel.panel().find("ASCII", "enabled"));
        panel.handle_key(PanelKey::Next);
        assert_eq!(panel.selected(), panel.panel().find("Circle", "enabled"));
        panel.handle_key(PanelKey::Previous);
        assert_eq!(panel.selected(), panel.panel().find("ASCII", "enabled"));
    }
}
