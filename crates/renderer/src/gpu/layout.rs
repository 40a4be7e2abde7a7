//! std140 uniform block and texture bindings generated from a program spec.
//!
//! Every non-texture uniform becomes a member `_<name>` of one block at
//! set 0, binding 0, and a `#define` maps the plain name onto it. Booleans
//! are stored as `int` because naga rejects `bool` in uniform buffers.
//! Texture uniform `i` (schema order) uses set 1, bindings `2i` (texture)
//! and `2i + 1` (sampler).

use std::fmt::Write as _;

use crate::program::ProgramSpec;
use crate::shaders::{FOOTER_GLSL, PRELUDE_GLSL};
use crate::uniforms::{UniformKind, UniformSet, UniformValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockField {
    pub name: String,
    pub kind: UniformKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UniformLayout {
    fields: Vec<BlockField>,
    textures: Vec<String>,
    size: usize,
}

/// (alignment, size) in bytes.
fn std140(kind: UniformKind) -> (usize, usize) {
    match kind {
        UniformKind::Float | UniformKind::Int | UniformKind::Bool => (4, 4),
        UniformKind::Vec2 => (8, 8),
        UniformKind::Vec3 => (16, 12),
        UniformKind::Vec4 => (16, 16),
        UniformKind::Texture => (0, 0),
    }
}

fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

fn glsl_type(kind: UniformKind) -> &'static str {
    match kind {
        UniformKind::Float => "float",
        UniformKind::Int | UniformKind::Bool => "int",
        UniformKind::Vec2 => "vec2",
        UniformKind::Vec3 => "vec3",
        UniformKind::Vec4 => "vec4",
        UniformKind::Texture => "texture2D",
    }
}

impl UniformLayout {
    pub fn new(spec: &ProgramSpec) -> Self {
        let mut fields = Vec::new();
        let mut textures = Vec::new();
        let mut cursor = 0;
        for decl in &spec.uniforms {
            if decl.kind == UniformKind::Texture {
                textures.push(decl.name.clone());
                continue;
            }
            let (alignment, size) = std140(decl.kind);
            let offset = align_to(cursor, alignment);
            fields.push(BlockField {
                name: decl.name.clone(),
                kind: decl.kind,
                offset,
            });
            cursor = offset + size;
        }
        Self {
            fields,
            textures,
            size: align_to(cursor.max(16), 16),
        }
    }

    pub fn fields(&self) -> &[BlockField] {
        &self.fields
    }

    pub fn textures(&self) -> &[String] {
        &self.textures
    }

    /// Uniform buffer size in bytes, a multiple of 16.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn header(&self) -> String {
        let mut header = String::from(
            "#version 450\nlayout(location = 0) in vec2 v_uv;\nlayout(location = 0) out vec4 outColor;\n\n",
        );
        header.push_str("layout(std140, set = 0, binding = 0) uniform StackParams {\n");
        for field in &self.fields {
            let _ = writeln!(header, "    {} _{};", glsl_type(field.kind), field.name);
        }
        header.push_str("} params;\n\n");
        for field in &self.fields {
            let _ = match field.kind {
                UniformKind::Bool => writeln!(header, "#define {0} (params._{0} != 0)", field.name),
                _ => writeln!(header, "#define {0} params._{0}", field.name),
            };
        }
        for (index, name) in self.textures.iter().enumerate() {
            let texture = index * 2;
            let _ = writeln!(
                header,
                "\nlayout(set = 1, binding = {texture}) uniform texture2D stack_texture{index};\n\
                 layout(set = 1, binding = {sampler}) uniform sampler stack_sampler{index};\n\
                 #define {name} sampler2D(stack_texture{index}, stack_sampler{index})",
                sampler = texture + 1,
            );
        }
        header
    }

    /// Complete fragment shader around `body`.
    pub fn wrap(&self, body: &str) -> String {
        format!(
            "{header}{PRELUDE_GLSL}\n#line 1\n{body}{FOOTER_GLSL}",
            header = self.header()
        )
    }

    /// Packs the current values into `out` (at least `size()` bytes).
    /// Missing names are left zeroed.
    pub fn write(&self, uniforms: &UniformSet, out: &mut [u8]) {
        out.fill(0);
        for field in &self.fields {
            let Some(value) = uniforms.value(&field.name) else {
                continue;
            };
            let offset = field.offset;
            let mut put = |bytes: &[u8]| {
                if let Some(slot) = out.get_mut(offset..offset + bytes.len()) {
                    slot.copy_from_slice(bytes);
                }
            };
            match value {
                UniformValue::Float(v) => put(bytemuck::bytes_of(&v)),
                UniformValue::Int(v) => put(bytemuck::bytes_of(&v)),
                UniformValue::Bool(v) => put(bytemuck::bytes_of(&i32::from(v))),
                UniformValue::Vec2(v) => put(bytemuck::cast_slice(v.as_slice())),
                UniformValue::Vec3(v) => put(bytemuck::cast_slice(v.as_slice())),
                UniformValue::Vec4(v) => put(bytemuck::cast_slice(v.as_slice())),
                UniformValue::Texture(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Kernel, ShaderSource};
    use crate::shaders::{base_program_spec, post_program_spec};

    fn spec() -> ProgramSpec {
        let source = ShaderSource {
            label: "test".to_string(),
            vertex: String::new(),
            fragment: String::new(),
            kernel: Kernel::Composite,
        };
        ProgramSpec::new("test", source)
            .require("uFlag", UniformKind::Bool)
            .require("uTint", UniformKind::Vec3)
            .require("uGain", UniformKind::Float)
            .optional("uImage", UniformKind::Texture)
            .require("uMode", UniformKind::Int)
    }

    #[test]
    fn offsets_follow_std140() {
        let layout = UniformLayout::new(&spec());
        let offsets: Vec<(&str, usize)> = layout
            .fields()
            .iter()
            .map(|field| (field.name.as_str(), field.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("uTime", 0),
                ("uResolution", 8),
                ("uFlag", 16),
                ("uTint", 32),
                ("uGain", 44),
                ("uMode", 48),
            ]
        );
        assert_eq!(layout.size(), 64);
        assert_eq!(layout.textures(), &["uImage".to_string()]);
    }

    #[test]
    fn header_maps_names_onto_the_block() {
        let header = UniformLayout::new(&spec()).header();
        assert!(header.contains("    int _uFlag;"));
        assert!(header.contains("#define uFlag (params._uFlag != 0)"));
        assert!(header.contains("#define uTint params._uTint"));
        assert!(header.contains("layout(set = 1, binding = 0) uniform texture2D stack_texture0;"));
        assert!(header.contains("layout(set = 1, binding = 1) uniform sampler stack_sampler0;"));
        assert!(header.contains("#define uImage sampler2D(stack_texture0, stack_sampler0)"));
        assert!(!header.contains("bool"));
    }

    #[test]
    fn packs_values_at_their_offsets() {
        let layout = UniformLayout::new(&spec());
        let mut uniforms = UniformSet::new();
        uniforms.insert("uTime", UniformValue::Float(1.5)).unwrap();
        uniforms
            .insert("uResolution", UniformValue::Vec2([640.0, 480.0]))
            .unwrap();
        uniforms.insert("uFlag", UniformValue::Bool(true)).unwrap();
        uniforms.insert("uMode", UniformValue::Int(-2)).unwrap();

        let mut bytes = vec![0xAA; layout.size()];
        layout.write(&uniforms, &mut bytes);
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        assert_eq!(f32::from_bits(words[0]), 1.5);
        assert_eq!(f32::from_bits(words[2]), 640.0);
        assert_eq!(f32::from_bits(words[3]), 480.0);
        assert_eq!(words[4], 1);
        assert_eq!(words[8..11], [0, 0, 0]);
        assert_eq!(words[12] as i32, -2);
    }

    #[test]
    fn stock_programs_wrap_cleanly() {
        for spec in [base_program_spec(), post_program_spec()] {
            let layout = UniformLayout::new(&spec);
            let source = layout.wrap(&spec.source.fragment);
            assert!(source.starts_with("#version 450"));
            assert!(source.contains("#line 1"));
            assert!(source.contains("outColor = stackEffect(fragCoord);"));
            assert_eq!(layout.textures().len(), spec.textures().count());
        }
    }
}
