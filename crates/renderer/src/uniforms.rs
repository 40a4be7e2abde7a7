//! Named, typed uniform values shared between modules, programs and passes.
//!
//! A `UniformCell` is a shared mutable box: clones alias the same value, and
//! every write happens in place. The kind of a cell is fixed when it is
//! created, so a texture slot can never silently become a float.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use curves::TextureHandle;

/// Offscreen render target owned by a graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

/// What a texture uniform samples from.
#[derive(Debug, Clone, Default)]
pub enum TextureBinding {
    /// No texture yet; samples as transparent black.
    #[default]
    Empty,
    Image(TextureHandle),
    Target(TargetId),
}

impl PartialEq for TextureBinding {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TextureBinding::Empty, TextureBinding::Empty) => true,
            (TextureBinding::Image(a), TextureBinding::Image(b)) => Arc::ptr_eq(a, b),
            (TextureBinding::Target(a), TextureBinding::Target(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    Texture,
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniformKind::Float => "float",
            UniformKind::Int => "int",
            UniformKind::Bool => "bool",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
            UniformKind::Texture => "texture",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Texture(TextureBinding),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Bool(_) => UniformKind::Bool,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Texture(_) => UniformKind::Texture,
        }
    }

    /// Zero, false, or an empty texture.
    pub fn neutral(kind: UniformKind) -> Self {
        match kind {
            UniformKind::Float => UniformValue::Float(0.0),
            UniformKind::Int => UniformValue::Int(0),
            UniformKind::Bool => UniformValue::Bool(false),
            UniformKind::Vec2 => UniformValue::Vec2([0.0; 2]),
            UniformKind::Vec3 => UniformValue::Vec3([0.0; 3]),
            UniformKind::Vec4 => UniformValue::Vec4([0.0; 4]),
            UniformKind::Texture => UniformValue::Texture(TextureBinding::Empty),
        }
    }

    /// Scalar view used by controls and kernels; booleans read as 0/1.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            UniformValue::Float(value) => Some(*value),
            UniformValue::Int(value) => Some(*value as f32),
            UniformValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            UniformValue::Int(value) => Some(*value),
            UniformValue::Float(value) => Some(value.round() as i32),
            UniformValue::Bool(value) => Some(i32::from(*value)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            UniformValue::Bool(value) => Some(*value),
            UniformValue::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match self {
            UniformValue::Vec2(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureBinding> {
        match self {
            UniformValue::Texture(binding) => Some(binding),
            _ => None,
        }
    }

    /// Converts a value of a compatible kind into `kind`: numbers convert
    /// between float, int and bool; everything else must match exactly.
    pub fn coerce(self, kind: UniformKind) -> Option<Self> {
        if self.kind() == kind {
            return Some(self);
        }
        match kind {
            UniformKind::Float => self.as_f32().map(UniformValue::Float),
            UniformKind::Int => match self {
                UniformValue::Float(value) if value.fract() == 0.0 => {
                    Some(UniformValue::Int(value as i32))
                }
                UniformValue::Bool(value) => Some(UniformValue::Int(i32::from(value))),
                _ => None,
            },
            UniformKind::Bool => match self {
                UniformValue::Int(value) => Some(UniformValue::Bool(value != 0)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for UniformValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformValue::Float(value) => write!(f, "{value:.2}"),
            UniformValue::Int(value) => write!(f, "{value}"),
            UniformValue::Bool(value) => f.write_str(if *value { "on" } else { "off" }),
            UniformValue::Vec2([x, y]) => write!(f, "({x:.2}, {y:.2})"),
            UniformValue::Vec3([x, y, z]) => write!(f, "({x:.2}, {y:.2}, {z:.2})"),
            UniformValue::Vec4([x, y, z, w]) => write!(f, "({x:.2}, {y:.2}, {z:.2}, {w:.2})"),
            UniformValue::Texture(TextureBinding::Empty) => f.write_str("none"),
            UniformValue::Texture(TextureBinding::Image(image)) => f.write_str(&image.label),
            UniformValue::Texture(TextureBinding::Target(id)) => write!(f, "target {}", id.0),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<f64> for UniformValue {
    fn from(value: f64) -> Self {
        UniformValue::Float(value as f32)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(value: [f32; 3]) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(value: [f32; 4]) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<TextureBinding> for UniformValue {
    fn from(value: TextureBinding) -> Self {
        UniformValue::Texture(value)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniformError {
    #[error("uniform '{name}' is a {expected}; cannot assign a {found}")]
    KindMismatch {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
    #[error("unknown uniform '{0}'")]
    Unknown(String),
    #[error("uniform '{0}' is already declared")]
    Duplicate(String),
}

struct CellInner {
    name: String,
    kind: UniformKind,
    value: RefCell<UniformValue>,
}

/// Shared, kind-stable uniform box.
#[derive(Clone)]
pub struct UniformCell {
    inner: Rc<CellInner>,
}

impl fmt::Debug for UniformCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformCell")
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl UniformCell {
    pub fn new(name: impl Into<String>, value: UniformValue) -> Self {
        Self {
            inner: Rc::new(CellInner {
                name: name.into(),
                kind: value.kind(),
                value: RefCell::new(value),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> UniformKind {
        self.inner.kind
    }

    pub fn get(&self) -> UniformValue {
        self.inner.value.borrow().clone()
    }

    /// Reads the value without cloning it.
    pub fn with<R>(&self, read: impl FnOnce(&UniformValue) -> R) -> R {
        read(&self.inner.value.borrow())
    }

    /// Replaces the value in place. Values that can be coerced to the cell's
    /// kind are accepted; anything else is a kind mismatch.
    pub fn set(&self, value: UniformValue) -> Result<(), UniformError> {
        let found = value.kind();
        let value = value
            .coerce(self.inner.kind)
            .ok_or_else(|| UniformError::KindMismatch {
                name: self.inner.name.clone(),
                expected: self.inner.kind,
                found,
            })?;
        *self.inner.value.borrow_mut() = value;
        Ok(())
    }

    /// Whether both handles alias the same box.
    pub fn ptr_eq(&self, other: &UniformCell) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Ordered mapping from uniform name to cell.
#[derive(Debug, Clone, Default)]
pub struct UniformSet {
    cells: BTreeMap<String, UniformCell>,
}

impl UniformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a new uniform. Names are unique within a set.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: UniformValue,
    ) -> Result<UniformCell, UniformError> {
        let name = name.into();
        if self.cells.contains_key(&name) {
            return Err(UniformError::Duplicate(name));
        }
        let cell = UniformCell::new(name.clone(), value);
        self.cells.insert(name, cell.clone());
        Ok(cell)
    }

    /// Declares `name`, replacing any previous cell under that name. Only
    /// used while a set is being assembled, before anything aliases it.
    pub(crate) fn put(&mut self, name: impl Into<String>, value: UniformValue) -> UniformCell {
        let name = name.into();
        let cell = UniformCell::new(name.clone(), value);
        self.cells.insert(name, cell.clone());
        cell
    }

    /// Adds `cell` under its own name, replacing any previous cell.
    pub(crate) fn put_cell(&mut self, cell: UniformCell) {
        self.cells.insert(cell.name().to_string(), cell);
    }

    /// Adds an existing cell, aliasing its box.
    pub fn share(&mut self, cell: UniformCell) -> Result<(), UniformError> {
        if self.cells.contains_key(cell.name()) {
            return Err(UniformError::Duplicate(cell.name().to_string()));
        }
        self.cells.insert(cell.name().to_string(), cell);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&UniformCell> {
        self.cells.get(name)
    }

    pub fn value(&self, name: &str) -> Option<UniformValue> {
        self.cells.get(name).map(UniformCell::get)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    pub fn set(&self, name: &str, value: impl Into<UniformValue>) -> Result<(), UniformError> {
        self.cells
            .get(name)
            .ok_or_else(|| UniformError::Unknown(name.to_string()))?
            .set(value.into())
    }

    pub fn f32(&self, name: &str) -> Option<f32> {
        self.cells.get(name)?.with(UniformValue::as_f32)
    }

    pub fn i32(&self, name: &str) -> Option<i32> {
        self.cells.get(name)?.with(UniformValue::as_i32)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.cells.get(name)?.with(UniformValue::as_bool)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformCell)> {
        self.cells.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    /// Current values by name.
    pub fn values(&self) -> BTreeMap<String, UniformValue> {
        self.cells
            .iter()
            .map(|(name, cell)| (name.clone(), cell.get()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Deep copy: same names and values, fresh boxes.
    pub fn snapshot(&self) -> UniformSet {
        UniformSet {
            cells: self
                .cells
                .iter()
                .map(|(name, cell)| (name.clone(), UniformCell::new(name.clone(), cell.get())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_alias_the_same_box() {
        let cell = UniformCell::new("uRadius", UniformValue::Float(0.3));
        let alias = cell.clone();
        alias.set(UniformValue::Float(0.5)).unwrap();
        assert_eq!(cell.get(), UniformValue::Float(0.5));
        assert!(cell.ptr_eq(&alias));
    }

    #[test]
    fn kind_never_changes() {
        let cell = UniformCell::new("uCurveTexture", TextureBinding::Empty.into());
        let err = cell.set(UniformValue::Float(1.0)).unwrap_err();
        assert_eq!(
            err,
            UniformError::KindMismatch {
                name: "uCurveTexture".into(),
                expected: UniformKind::Texture,
                found: UniformKind::Float,
            }
        );
        assert_eq!(cell.kind(), UniformKind::Texture);
    }

    #[test]
    fn numeric_values_coerce() {
        let cell = UniformCell::new("uCurveId", UniformValue::Int(1));
        cell.set(UniformValue::Float(12.0)).unwrap();
        assert_eq!(cell.get(), UniformValue::Int(12));
        assert!(cell.set(UniformValue::Float(1.5)).is_err());

        let flag = UniformCell::new("uNoiseEnabled", UniformValue::Bool(false));
        flag.set(UniformValue::Int(1)).unwrap();
        assert_eq!(flag.get(), UniformValue::Bool(true));
    }

    #[test]
    fn snapshot_is_detached() {
        let mut set = UniformSet::new();
        set.insert("uSpeed", UniformValue::Float(0.75)).unwrap();
        let copy = set.snapshot();
        copy.set("uSpeed", 2.0).unwrap();
        assert_eq!(set.f32("uSpeed"), Some(0.75));
        assert_eq!(copy.f32("uSpeed"), Some(2.0));
    }

    #[test]
    fn declare_rejects_duplicates() {
        let mut set = UniformSet::new();
        set.insert("uTime", UniformValue::Float(0.0)).unwrap();
        assert_eq!(
            set.insert("uTime", UniformValue::Float(1.0)).unwrap_err(),
            UniformError::Duplicate("uTime".into())
        );
    }

    #[test]
    fn set_unknown_is_an_error() {
        let set = UniformSet::new();
        assert_eq!(
            set.set("uMissing", 1.0).unwrap_err(),
            UniformError::Unknown("uMissing".into())
        );
    }

    #[test]
    fn texture_bindings_compare_by_identity() {
        let image = Arc::new(curves::TextureImage::from_rgba(1, 1, vec![0; 4], "a"));
        let same = TextureBinding::Image(Arc::clone(&image));
        assert_eq!(same, TextureBinding::Image(image));
        let other = Arc::new(curves::TextureImage::from_rgba(1, 1, vec![0; 4], "a"));
        assert_ne!(same, TextureBinding::Image(other));
        assert_eq!(TextureBinding::Target(TargetId(1)), TextureBinding::Target(TargetId(1)));
    }
}
