//! Shader programs assembled from a typed uniform schema.
//!
//! A [`ProgramSpec`] lists every uniform name the shader source reads, with
//! its kind and whether some module must provide it. Building a
//! [`ShaderProgram`] folds the base uniforms and detached copies of every
//! module's values into one set, checked against that schema.

use std::fmt;

use tracing::{debug, trace};

use crate::backend::ProgramHandle;
use crate::module::EffectModule;
use crate::types::SurfaceSize;
use crate::uniforms::{UniformCell, UniformKind, UniformSet, UniformValue};

pub const TIME: &str = "uTime";
pub const RESOLUTION: &str = "uResolution";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Building fails unless a module or input provides it.
    Required,
    /// Seeded with the kind's neutral value when nobody provides it.
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
    pub presence: Presence,
}

/// CPU reference implementation of a program's effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Composite,
    Ascii,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: String,
    /// Complete vertex shader.
    pub vertex: String,
    /// Fragment body defining `vec4 stackEffect(vec2 fragCoord)`; the
    /// backend supplies declarations and `main`.
    pub fragment: String,
    pub kernel: Kernel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub name: String,
    pub source: ShaderSource,
    pub uniforms: Vec<UniformDecl>,
}

impl ProgramSpec {
    /// A schema holding only the base uniforms.
    pub fn new(name: impl Into<String>, source: ShaderSource) -> Self {
        Self {
            name: name.into(),
            source,
            uniforms: vec![
                UniformDecl {
                    name: TIME.to_string(),
                    kind: UniformKind::Float,
                    presence: Presence::Required,
                },
                UniformDecl {
                    name: RESOLUTION.to_string(),
                    kind: UniformKind::Vec2,
                    presence: Presence::Required,
                },
            ],
        }
    }

    pub fn require(self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.declare(name.into(), kind, Presence::Required)
    }

    pub fn optional(self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.declare(name.into(), kind, Presence::Optional)
    }

    fn declare(mut self, name: String, kind: UniformKind, presence: Presence) -> Self {
        let decl = UniformDecl { name, kind, presence };
        match self.uniforms.iter_mut().find(|known| known.name == decl.name) {
            Some(existing) => *existing = decl,
            None => self.uniforms.push(decl),
        }
        self
    }

    pub fn decl(&self, name: &str) -> Option<&UniformDecl> {
        self.uniforms.iter().find(|decl| decl.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.decl(name).is_some()
    }

    /// Texture declarations in schema order.
    pub fn textures(&self) -> impl Iterator<Item = &UniformDecl> {
        self.uniforms
            .iter()
            .filter(|decl| decl.kind == UniformKind::Texture)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgramError {
    #[error("program '{program}' requires uniform '{name}' but nothing provides it")]
    MissingUniform { program: String, name: String },
    #[error("program '{program}' declares '{name}' as {expected} but it is provided as {found}")]
    KindMismatch {
        program: String,
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramStatus {
    Unlinked,
    Linked(ProgramHandle),
    /// Link failed; the program never draws.
    Failed(String),
}

pub struct ShaderProgram {
    spec: ProgramSpec,
    uniforms: UniformSet,
    time: UniformCell,
    resolution: UniformCell,
    status: ProgramStatus,
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("name", &self.spec.name)
            .field("uniforms", &self.uniforms.names().collect::<Vec<_>>())
            .field("status", &self.status)
            .finish()
    }
}

impl ShaderProgram {
    pub fn build(
        spec: ProgramSpec,
        modules: &[EffectModule],
        size: SurfaceSize,
    ) -> Result<Self, ProgramError> {
        Self::build_with_inputs(spec, &UniformSet::new(), modules, size)
    }

    /// Like [`ShaderProgram::build`], with extra uniforms supplied by the
    /// caller rather than by a module (a pass input texture, for example).
    /// Inputs alias the caller's cells; module values are copied. When two
    /// modules provide the same name the later one wins.
    pub fn build_with_inputs(
        spec: ProgramSpec,
        inputs: &UniformSet,
        modules: &[EffectModule],
        size: SurfaceSize,
    ) -> Result<Self, ProgramError> {
        let mut uniforms = UniformSet::new();
        let time = uniforms.put(TIME, UniformValue::Float(0.0));
        let resolution = uniforms.put(RESOLUTION, UniformValue::Vec2(size.as_vec2()));
        for base in [&time, &resolution] {
            if let Some(decl) = spec.decl(base.name()) {
                check_kind(&spec, decl, base.kind())?;
            }
        }

        for module in modules {
            let copy = module.get_uniforms();
            for (name, cell) in copy.iter() {
                if name == TIME || name == RESOLUTION {
                    continue;
                }
                let Some(decl) = spec.decl(name) else {
                    trace!(program = %spec.name, module = module.name(), uniform = name, "not declared; skipped");
                    continue;
                };
                check_kind(&spec, decl, cell.kind())?;
                uniforms.put(name, cell.get());
            }
        }

        for (name, cell) in inputs.iter() {
            if name == TIME || name == RESOLUTION {
                continue;
            }
            if let Some(decl) = spec.decl(name) {
                check_kind(&spec, decl, cell.kind())?;
                uniforms.put_cell(cell.clone());
            }
        }

        for decl in &spec.uniforms {
            if uniforms.contains(&decl.name) {
                continue;
            }
            match decl.presence {
                Presence::Required => {
                    return Err(ProgramError::MissingUniform {
                        program: spec.name.clone(),
                        name: decl.name.clone(),
                    })
                }
                Presence::Optional => {
                    debug!(program = %spec.name, uniform = %decl.name, "optional uniform seeded neutral");
                    uniforms.put(decl.name.clone(), UniformValue::neutral(decl.kind));
                }
            }
        }

        Ok(Self {
            spec,
            uniforms,
            time,
            resolution,
            status: ProgramStatus::Unlinked,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    /// Copies the module's current values into same-named uniforms. Names
    /// this program does not declare are skipped. Returns how many values
    /// were copied.
    pub fn sync_from(&self, module: &EffectModule) -> usize {
        let mut copied = 0;
        for (name, source) in module.uniforms().iter() {
            let Some(target) = self.uniforms.get(name) else {
                continue;
            };
            if target.kind() != source.kind() {
                continue;
            }
            if target.set(source.get()).is_ok() {
                copied += 1;
            }
        }
        copied
    }

    pub fn set_time(&self, seconds: f32) {
        let _ = self.time.set(UniformValue::Float(seconds));
    }

    pub fn set_resolution(&self, size: SurfaceSize) {
        let _ = self.resolution.set(UniformValue::Vec2(size.as_vec2()));
    }

    pub fn resolution(&self) -> [f32; 2] {
        self.resolution.with(|value| value.as_vec2().unwrap_or_default())
    }

    pub fn status(&self) -> &ProgramStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: ProgramStatus) {
        self.status = status;
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        match self.status {
            ProgramStatus::Linked(handle) => Some(handle),
            _ => None,
        }
    }
}

fn check_kind(spec: &ProgramSpec, decl: &UniformDecl, found: UniformKind) -> Result<(), ProgramError> {
    if decl.kind == found {
        Ok(())
    } else {
        Err(ProgramError::KindMismatch {
            program: spec.name.clone(),
            name: decl.name.clone(),
            expected: decl.kind,
            found,
        })
    }
}
