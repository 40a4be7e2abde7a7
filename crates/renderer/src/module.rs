//! Effect modules: a named bundle of uniforms with an enable flag, a control
//! panel description and a pipeline of behavior extensions.
//!
//! The bookkeeping `enabled` flag and the `u<Name>Enabled` uniform that
//! shaders branch on are only ever written together, by
//! [`EffectModule::set_enabled`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::debug;

use crate::control::{
    BindingId, BindingSpec, ControlDescriptor, ControlPanel, FolderId, PanelCommand, PanelEvent,
};
use crate::uniforms::{UniformCell, UniformError, UniformKind, UniformSet, UniformValue};

/// Binding key of the module's enable toggle.
pub const ENABLE_KEY: &str = "enabled";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModuleError {
    #[error("controls for module '{0}' are already bound to a panel")]
    ControlsAlreadyBound(String),
    #[error("module '{module}' has no uniform '{name}'")]
    UnknownUniform { module: String, name: String },
    #[error("module '{module}': '{name}' only changes through the enable toggle")]
    EnableFlagReadOnly { module: String, name: String },
    #[error("module '{module}': cannot use {value} for '{name}'")]
    InvalidValue {
        module: String,
        name: String,
        value: String,
    },
    #[error(transparent)]
    Uniform(#[from] UniformError),
}

/// Declaration of one module uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSpec {
    pub value: UniformValue,
    pub label: Option<String>,
    pub control: Option<ControlDescriptor>,
}

impl UniformSpec {
    pub fn new(value: impl Into<UniformValue>) -> Self {
        Self {
            value: value.into(),
            label: None,
            control: None,
        }
    }

    /// Float slider over `[min, max]`.
    pub fn range(value: f32, min: f32, max: f32) -> Self {
        Self::new(value).control(ControlDescriptor::range(min, max))
    }

    pub fn stepped(value: f32, min: f32, max: f32, step: f32) -> Self {
        Self::new(value).control(ControlDescriptor::stepped(min, max, step))
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn control(mut self, control: ControlDescriptor) -> Self {
        self.control = Some(control);
        self
    }
}

/// `uFrequencyX` -> `Frequency X`.
fn default_label(name: &str) -> String {
    let trimmed = name.strip_prefix('u').unwrap_or(name);
    let mut label = String::with_capacity(trimmed.len() + 4);
    let mut previous: Option<char> = None;
    for ch in trimmed.chars() {
        if let Some(prev) = previous {
            if ch.is_uppercase() && prev.is_lowercase() {
                label.push(' ');
            }
        }
        label.push(ch);
        previous = Some(ch);
    }
    label
}

/// View handed to extension hooks. Uniform cells are shared, so writes go
/// straight into the module's live values.
pub struct ExtensionContext<'a> {
    pub module: &'a str,
    pub uniforms: &'a UniformSet,
    pub enabled: bool,
    enabled_uniform: &'a str,
    bindings: &'a BTreeMap<String, BindingId>,
    commands: &'a mut Vec<PanelCommand>,
}

impl ExtensionContext<'_> {
    /// Panel binding for `key`, once controls are bound.
    pub fn binding(&self, key: &str) -> Option<BindingId> {
        self.bindings.get(key).copied()
    }

    /// Every bound control except the enable toggle.
    pub fn dependent_bindings(&self) -> impl Iterator<Item = BindingId> + '_ {
        self.bindings
            .iter()
            .filter(|(key, _)| key.as_str() != ENABLE_KEY)
            .map(|(_, id)| *id)
    }

    pub fn set_hidden(&mut self, binding: BindingId, hidden: bool) {
        self.commands.push(PanelCommand::SetHidden(binding, hidden));
    }

    /// Writes a uniform in place and refreshes its control, if bound. The
    /// enabled uniform is off limits; it follows the module's flag.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<(), ModuleError> {
        if name == self.enabled_uniform {
            return Err(ModuleError::EnableFlagReadOnly {
                module: self.module.to_string(),
                name: name.to_string(),
            });
        }
        self.uniforms.set(name, value)?;
        if let (Some(binding), Some(value)) = (self.binding(name), self.uniforms.value(name)) {
            self.commands.push(PanelCommand::SetValue(binding, value));
        }
        Ok(())
    }
}

/// Behavior layered onto a module. Hooks run in insertion order, after the
/// module's own handling of the same event.
pub trait ModuleExtension {
    fn name(&self) -> &'static str;

    /// The module joined a running compositor.
    fn on_activate(&mut self, _ctx: &mut ExtensionContext<'_>) {}

    /// Controls were just bound to a panel.
    fn on_setup(&mut self, _ctx: &mut ExtensionContext<'_>) {}

    fn on_enabled(&mut self, _ctx: &mut ExtensionContext<'_>, _enabled: bool) {}

    fn on_uniform_changed(&mut self, _ctx: &mut ExtensionContext<'_>, _name: &str) {}

    /// Called once per accepted frame before uniforms are synced. Returns
    /// whether any uniform changed.
    fn poll(&mut self, _ctx: &mut ExtensionContext<'_>) -> bool {
        false
    }
}

/// Hides a module's controls while it is disabled.
#[derive(Debug, Default)]
pub struct DependentVisibility;

impl DependentVisibility {
    fn apply(ctx: &mut ExtensionContext<'_>) {
        let hidden = !ctx.enabled;
        let bindings: Vec<BindingId> = ctx.dependent_bindings().collect();
        for binding in bindings {
            ctx.set_hidden(binding, hidden);
        }
    }
}

impl ModuleExtension for DependentVisibility {
    fn name(&self) -> &'static str {
        "dependent-visibility"
    }

    fn on_setup(&mut self, ctx: &mut ExtensionContext<'_>) {
        Self::apply(ctx);
    }

    fn on_enabled(&mut self, ctx: &mut ExtensionContext<'_>, _enabled: bool) {
        Self::apply(ctx);
    }
}

pub struct ModuleBuilder {
    name: String,
    specs: Vec<(String, UniformSpec)>,
    extensions: Vec<Box<dyn ModuleExtension>>,
}

impl ModuleBuilder {
    /// Declares a uniform. Redeclaring a name replaces the earlier spec.
    pub fn uniform(mut self, name: impl Into<String>, spec: UniformSpec) -> Self {
        let name = name.into();
        if let Some(existing) = self.specs.iter_mut().find(|(known, _)| *known == name) {
            existing.1 = spec;
        } else {
            self.specs.push((name, spec));
        }
        self
    }

    pub fn extend(mut self, extension: impl ModuleExtension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub fn build(self) -> EffectModule {
        let enabled_name = format!("u{}Enabled", self.name);
        let mut uniforms = UniformSet::new();
        let enabled_uniform = uniforms.put(enabled_name.clone(), UniformValue::Bool(false));
        let mut specs = Vec::with_capacity(self.specs.len());
        for (name, spec) in self.specs {
            if name == enabled_name {
                continue;
            }
            uniforms.put(name.clone(), spec.value.clone());
            specs.push((name, spec));
        }

        let mut extensions: Vec<Box<dyn ModuleExtension>> = vec![Box::new(DependentVisibility)];
        extensions.extend(self.extensions);

        EffectModule {
            name: self.name,
            enabled: false,
            enabled_uniform,
            uniforms,
            specs,
            extensions,
            bindings: BTreeMap::new(),
            keys: HashMap::new(),
            folder: None,
            pending: Vec::new(),
        }
    }
}

pub struct EffectModule {
    name: String,
    enabled: bool,
    enabled_uniform: UniformCell,
    uniforms: UniformSet,
    specs: Vec<(String, UniformSpec)>,
    extensions: Vec<Box<dyn ModuleExtension>>,
    bindings: BTreeMap<String, BindingId>,
    keys: HashMap<BindingId, String>,
    folder: Option<FolderId>,
    pending: Vec<PanelCommand>,
}

impl fmt::Debug for EffectModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extensions: Vec<&str> = self.extensions.iter().map(|ext| ext.name()).collect();
        f.debug_struct("EffectModule")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("uniforms", &self.uniforms.names().collect::<Vec<_>>())
            .field("extensions", &extensions)
            .finish()
    }
}

impl EffectModule {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            specs: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled_uniform_name(&self) -> &str {
        self.enabled_uniform.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Live uniform cells. Values may be written in place; the mapping
    /// itself is fixed once the module is built.
    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    /// Detached copy of the current values, for seeding a program.
    pub fn get_uniforms(&self) -> UniformSet {
        self.uniforms.snapshot()
    }

    pub fn spec(&self, name: &str) -> Option<&UniformSpec> {
        self.specs
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, spec)| spec)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        // A bool always fits the bool cell.
        let _ = self.enabled_uniform.set(UniformValue::Bool(enabled));
        if let Some(binding) = self.bindings.get(ENABLE_KEY) {
            self.pending
                .push(PanelCommand::SetValue(*binding, UniformValue::Bool(enabled)));
        }
        debug!(module = %self.name, enabled, "module toggled");

        let mut ctx = ExtensionContext {
            module: &self.name,
            enabled_uniform: self.enabled_uniform.name(),
            uniforms: &self.uniforms,
            enabled: self.enabled,
            bindings: &self.bindings,
            commands: &mut self.pending,
        };
        for extension in self.extensions.iter_mut() {
            extension.on_enabled(&mut ctx, enabled);
        }
    }

    /// Programmatic write. Values are clamped to the uniform's control and
    /// extensions are notified. Writing the enabled uniform toggles the
    /// module.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<(), ModuleError> {
        let value = value.into();
        if name == self.enabled_uniform.name() {
            let enabled = value.as_bool().ok_or_else(|| UniformError::KindMismatch {
                name: name.to_string(),
                expected: UniformKind::Bool,
                found: value.kind(),
            })?;
            self.set_enabled(enabled);
            return Ok(());
        }
        let cell = self
            .uniforms
            .get(name)
            .ok_or_else(|| ModuleError::UnknownUniform {
                module: self.name.clone(),
                name: name.to_string(),
            })?;
        let value = match self.spec(name).and_then(|spec| spec.control.as_ref()) {
            Some(control) => control.clamp(cell.kind(), value),
            None => value,
        };
        cell.set(value)?;
        if let Some(binding) = self.bindings.get(name) {
            self.pending.push(PanelCommand::SetValue(*binding, cell.get()));
        }
        self.notify_changed(name);
        Ok(())
    }

    fn notify_changed(&mut self, name: &str) {
        let mut ctx = ExtensionContext {
            module: &self.name,
            enabled_uniform: self.enabled_uniform.name(),
            uniforms: &self.uniforms,
            enabled: self.enabled,
            bindings: &self.bindings,
            commands: &mut self.pending,
        };
        for extension in self.extensions.iter_mut() {
            extension.on_uniform_changed(&mut ctx, name);
        }
    }

    /// Creates this module's folder: an enable toggle followed by one binding
    /// per uniform that declares a control. A module binds to one panel,
    /// once.
    pub fn setup_controls(&mut self, panel: &mut dyn ControlPanel) -> Result<FolderId, ModuleError> {
        if self.folder.is_some() {
            return Err(ModuleError::ControlsAlreadyBound(self.name.clone()));
        }
        let folder = panel.add_folder(&self.name);
        let toggle = panel.add_binding(
            folder,
            BindingSpec {
                key: ENABLE_KEY.to_string(),
                label: "Enable".to_string(),
                control: ControlDescriptor::Toggle,
                kind: UniformKind::Bool,
                value: UniformValue::Bool(self.enabled),
            },
        );
        self.bindings.insert(ENABLE_KEY.to_string(), toggle);
        self.keys.insert(toggle, ENABLE_KEY.to_string());

        for (name, spec) in &self.specs {
            let Some(control) = &spec.control else {
                continue;
            };
            let Some(cell) = self.uniforms.get(name) else {
                continue;
            };
            let binding = panel.add_binding(
                folder,
                BindingSpec {
                    key: name.clone(),
                    label: spec.label.clone().unwrap_or_else(|| default_label(name)),
                    control: control.clone(),
                    kind: cell.kind(),
                    value: cell.get(),
                },
            );
            self.bindings.insert(name.clone(), binding);
            self.keys.insert(binding, name.clone());
        }
        self.folder = Some(folder);

        let mut ctx = ExtensionContext {
            module: &self.name,
            enabled_uniform: self.enabled_uniform.name(),
            uniforms: &self.uniforms,
            enabled: self.enabled,
            bindings: &self.bindings,
            commands: &mut self.pending,
        };
        for extension in self.extensions.iter_mut() {
            extension.on_setup(&mut ctx);
        }
        self.flush_panel(panel);
        Ok(folder)
    }

    pub fn owns(&self, binding: BindingId) -> bool {
        self.keys.contains_key(&binding)
    }

    pub fn binding_for(&self, key: &str) -> Option<BindingId> {
        self.bindings.get(key).copied()
    }

    /// Routes a panel edit into the module. Returns `Ok(false)` when the
    /// binding belongs to another module.
    pub fn apply_control(&mut self, event: &PanelEvent) -> Result<bool, ModuleError> {
        let Some(key) = self.keys.get(&event.binding).cloned() else {
            return Ok(false);
        };
        if key == ENABLE_KEY {
            let enabled = event.value.as_bool().ok_or_else(|| UniformError::KindMismatch {
                name: self.enabled_uniform.name().to_string(),
                expected: UniformKind::Bool,
                found: event.value.kind(),
            })?;
            self.set_enabled(enabled);
        } else {
            self.set_uniform(&key, event.value.clone())?;
        }
        Ok(true)
    }

    /// Notifies extensions that the module joined a compositor.
    pub fn activate(&mut self) {
        let mut ctx = ExtensionContext {
            module: &self.name,
            enabled_uniform: self.enabled_uniform.name(),
            uniforms: &self.uniforms,
            enabled: self.enabled,
            bindings: &self.bindings,
            commands: &mut self.pending,
        };
        for extension in self.extensions.iter_mut() {
            extension.on_activate(&mut ctx);
        }
    }

    /// Lets asynchronous attachments install finished work. Returns whether
    /// any uniform changed.
    pub fn poll(&mut self) -> bool {
        let mut ctx = ExtensionContext {
            module: &self.name,
            enabled_uniform: self.enabled_uniform.name(),
            uniforms: &self.uniforms,
            enabled: self.enabled,
            bindings: &self.bindings,
            commands: &mut self.pending,
        };
        let mut changed = false;
        for extension in self.extensions.iter_mut() {
            changed |= extension.poll(&mut ctx);
        }
        changed
    }

    /// Applies queued view updates to the panel.
    pub fn flush_panel(&mut self, panel: &mut dyn ControlPanel) {
        for command in self.pending.drain(..) {
            panel.apply(command);
        }
    }
}
