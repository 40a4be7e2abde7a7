//! Control panel contract: folders of bindings that tune uniforms.

use crate::uniforms::{UniformKind, UniformValue};

/// How a binding is edited.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlDescriptor {
    /// Slider over `[min, max]`; `step` of zero means continuous.
    Range { min: f32, max: f32, step: f32 },
    /// Named integer choices.
    Options(Vec<(String, i32)>),
    Toggle,
}

impl ControlDescriptor {
    pub fn range(min: f32, max: f32) -> Self {
        ControlDescriptor::Range { min, max, step: 0.0 }
    }

    pub fn stepped(min: f32, max: f32, step: f32) -> Self {
        ControlDescriptor::Range { min, max, step }
    }

    pub fn options<S: Into<String>>(options: impl IntoIterator<Item = (S, i32)>) -> Self {
        ControlDescriptor::Options(
            options
                .into_iter()
                .map(|(label, value)| (label.into(), value))
                .collect(),
        )
    }

    /// Brings `value` into the control's domain, keeping the uniform's kind.
    pub fn clamp(&self, kind: UniformKind, value: UniformValue) -> UniformValue {
        match self {
            ControlDescriptor::Range { min, max, step } => {
                let Some(raw) = value.as_f32() else {
                    return value;
                };
                let mut clamped = raw.clamp(*min, *max);
                if *step > 0.0 {
                    clamped = (min + ((clamped - min) / step).round() * step).clamp(*min, *max);
                }
                match kind {
                    UniformKind::Int => UniformValue::Int(clamped.round() as i32),
                    _ => UniformValue::Float(clamped),
                }
            }
            ControlDescriptor::Options(options) => {
                let Some(raw) = value.as_i32() else {
                    return value;
                };
                if options.iter().any(|(_, option)| *option == raw) {
                    UniformValue::Int(raw)
                } else {
                    options
                        .first()
                        .map_or(value, |(_, first)| UniformValue::Int(*first))
                }
            }
            ControlDescriptor::Toggle => value,
        }
    }

    /// Moves `current` by `direction` notches: one step (or a twentieth of
    /// the range), the neighbouring option, or a flip.
    pub fn step_value(&self, kind: UniformKind, current: &UniformValue, direction: i32) -> UniformValue {
        match self {
            ControlDescriptor::Range { min, max, step } => {
                let notch = if *step > 0.0 { *step } else { (max - min) / 20.0 };
                let raw = current.as_f32().unwrap_or(*min);
                self.clamp(kind, UniformValue::Float(raw + notch * direction as f32))
            }
            ControlDescriptor::Options(options) => {
                if options.is_empty() {
                    return current.clone();
                }
                let raw = current.as_i32().unwrap_or(options[0].1);
                let index = options
                    .iter()
                    .position(|(_, value)| *value == raw)
                    .unwrap_or(0) as i32;
                let len = options.len() as i32;
                let next = (index + direction).rem_euclid(len) as usize;
                UniformValue::Int(options[next].1)
            }
            ControlDescriptor::Toggle => {
                UniformValue::Bool(!current.as_bool().unwrap_or(false))
            }
        }
    }

    /// Display label for a value, using option names where present.
    pub fn describe(&self, value: &UniformValue) -> String {
        if let ControlDescriptor::Options(options) = self {
            if let Some(raw) = value.as_i32() {
                if let Some((label, _)) = options.iter().find(|(_, option)| *option == raw) {
                    return label.clone();
                }
            }
        }
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub usize);

/// One control inside a folder.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSpec {
    /// Uniform name, or `enabled` for the module toggle.
    pub key: String,
    pub label: String,
    pub control: ControlDescriptor,
    pub kind: UniformKind,
    pub value: UniformValue,
}

/// A user edit reported by a panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelEvent {
    pub binding: BindingId,
    pub value: UniformValue,
}

/// Deferred view update queued by modules and extensions, applied to the
/// panel by `EffectModule::flush_panel`.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelCommand {
    SetHidden(BindingId, bool),
    SetValue(BindingId, UniformValue),
}

pub trait ControlPanel {
    fn add_folder(&mut self, title: &str) -> FolderId;
    fn add_binding(&mut self, folder: FolderId, spec: BindingSpec) -> BindingId;
    fn set_hidden(&mut self, binding: BindingId, hidden: bool);
    /// Refreshes the displayed value without emitting a change event.
    fn set_value(&mut self, binding: BindingId, value: UniformValue);

    fn apply(&mut self, command: PanelCommand) {
        match command {
            PanelCommand::SetHidden(binding, hidden) => self.set_hidden(binding, hidden),
            PanelCommand::SetValue(binding, value) => self.set_value(binding, value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PanelFolder {
    pub title: String,
    pub bindings: Vec<BindingId>,
}

#[derive(Debug, Clone)]
pub struct PanelBinding {
    pub folder: FolderId,
    pub spec: BindingSpec,
    pub hidden: bool,
}

/// Panel without a view. Records structure and state so it can be inspected
/// and driven programmatically.
#[derive(Debug, Clone, Default)]
pub struct HeadlessPanel {
    folders: Vec<PanelFolder>,
    bindings: Vec<PanelBinding>,
}

impl HeadlessPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folders(&self) -> &[PanelFolder] {
        &self.folders
    }

    pub fn binding(&self, id: BindingId) -> Option<&PanelBinding> {
        self.bindings.get(id.0)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (BindingId, &PanelBinding)> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| (BindingId(index), binding))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding with `key` inside the folder titled `folder`.
    pub fn find(&self, folder: &str, key: &str) -> Option<BindingId> {
        let folder = self.folders.iter().find(|entry| entry.title == folder)?;
        folder
            .bindings
            .iter()
            .copied()
            .find(|id| self.bindings[id.0].spec.key == key)
    }

    pub fn is_hidden(&self, id: BindingId) -> bool {
        self.bindings.get(id.0).is_some_and(|binding| binding.hidden)
    }

    pub fn value(&self, id: BindingId) -> Option<&UniformValue> {
        self.bindings.get(id.0).map(|binding| &binding.spec.value)
    }

    /// Simulates a user edit: clamps to the control, updates the view and
    /// returns the event to route back to the owning module.
    pub fn change(&mut self, id: BindingId, value: impl Into<UniformValue>) -> Option<PanelEvent> {
        let binding = self.bindings.get_mut(id.0)?;
        let value = binding.spec.control.clamp(binding.spec.kind, value.into());
        binding.spec.value = value.clone();
        Some(PanelEvent { binding: id, value })
    }
}

impl ControlPanel for HeadlessPanel {
    fn add_folder(&mut self, title: &str) -> FolderId {
        self.folders.push(PanelFolder {
            title: title.to_string(),
            bindings: Vec::new(),
        });
        FolderId(self.folders.len() - 1)
    }

    fn add_binding(&mut self, folder: FolderId, spec: BindingSpec) -> BindingId {
        let id = BindingId(self.bindings.len());
        self.bindings.push(PanelBinding {
            folder,
            spec,
            hidden: false,
        });
        if let Some(entry) = self.folders.get_mut(folder.0) {
            entry.bindings.push(id);
        }
        id
    }

    fn set_hidden(&mut self, binding: BindingId, hidden: bool) {
        if let Some(entry) = self.bindings.get_mut(binding.0) {
            entry.hidden = hidden;
        }
    }

    fn set_value(&mut self, binding: BindingId, value: UniformValue) {
        if let Some(entry) = self.bindings.get_mut(binding.0) {
            entry.spec.value = value;
        }
    }
}
