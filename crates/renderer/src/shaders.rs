//! GLSL sources for the two stock programs and their uniform schemas.
//!
//! Fragment bodies see every declared uniform under its plain name (the
//! backend maps names onto its uniform block with macros), receive
//! `fragCoord` with a bottom-left origin, and sample textures through
//! `stackFlip` so that `uv.y` grows upwards like `fragCoord`.

use crate::effects::{CURVE_TEXTURE, IMAGE_TEXTURE};
use crate::program::{Kernel, ProgramSpec, ShaderSource};
use crate::uniforms::UniformKind;

/// Input texture of the post program: the offscreen base pass.
pub const POST_INPUT: &str = "uTexture";

/// Full-screen triangle; no vertex buffers.
pub const VERTEX_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Shared helpers placed ahead of every fragment body.
pub const PRELUDE_GLSL: &str = r"
vec2 stackFlip(vec2 uv) {
    return vec2(uv.x, 1.0 - uv.y);
}
";

/// Calls the body's effect with a bottom-left origin.
pub const FOOTER_GLSL: &str = r"
void main() {
    vec2 fragCoord = vec2(gl_FragCoord.x, uResolution.y - gl_FragCoord.y);
    outColor = stackEffect(fragCoord);
}
";

const COMPOSITE_GLSL: &str = r"
// Classic Perlin noise (Gustavson) and 2D simplex noise (McEwan, Ashima Arts).
vec3 mod289(vec3 x) { return x - floor(x * (1.0 / 289.0)) * 289.0; }
vec4 mod289(vec4 x) { return x - floor(x * (1.0 / 289.0)) * 289.0; }
vec3 permute(vec3 x) { return mod289(((x * 34.0) + 1.0) * x); }
vec4 permute(vec4 x) { return mod289(((x * 34.0) + 1.0) * x); }
vec4 taylorInvSqrt(vec4 r) { return 1.79284291400159 - 0.85373472095314 * r; }
vec3 fade(vec3 t) { return t * t * t * (t * (t * 6.0 - 15.0) + 10.0); }

float cnoise(vec3 P) {
    vec3 Pi0 = floor(P);
    vec3 Pi1 = Pi0 + vec3(1.0);
    Pi0 = mod289(Pi0);
    Pi1 = mod289(Pi1);
    vec3 Pf0 = fract(P);
    vec3 Pf1 = Pf0 - vec3(1.0);
    vec4 ix = vec4(Pi0.x, Pi1.x, Pi0.x, Pi1.x);
    vec4 iy = vec4(Pi0.yy, Pi1.yy);
    vec4 iz0 = Pi0.zzzz;
    vec4 iz1 = Pi1.zzzz;

    vec4 ixy = permute(permute(ix) + iy);
    vec4 ixy0 = permute(ixy + iz0);
    vec4 ixy1 = permute(ixy + iz1);

    vec4 gx0 = ixy0 * (1.0 / 7.0);
    vec4 gy0 = fract(floor(gx0) * (1.0 / 7.0)) - 0.5;
    gx0 = fract(gx0);
    vec4 gz0 = vec4(0.5) - abs(gx0) - abs(gy0);
    vec4 sz0 = step(gz0, vec4(0.0));
    gx0 -= sz0 * (step(0.0, gx0) - 0.5);
    gy0 -= sz0 * (step(0.0, gy0) - 0.5);

    vec4 gx1 = ixy1 * (1.0 / 7.0);
    vec4 gy1 = fract(floor(gx1) * (1.0 / 7.0)) - 0.5;
    gx1 = fract(gx1);
    vec4 gz1 = vec4(0.5) - abs(gx1) - abs(gy1);
    vec4 sz1 = step(gz1, vec4(0.0));
    gx1 -= sz1 * (step(0.0, gx1) - 0.5);
    gy1 -= sz1 * (step(0.0, gy1) - 0.5);

    vec3 g000 = vec3(gx0.x, gy0.x, gz0.x);
    vec3 g100 = vec3(gx0.y, gy0.y, gz0.y);
    vec3 g010 = vec3(gx0.z, gy0.z, gz0.z);
    vec3 g110 = vec3(gx0.w, gy0.w, gz0.w);
    vec3 g001 = vec3(gx1.x, gy1.x, gz1.x);
    vec3 g101 = vec3(gx1.y, gy1.y, gz1.y);
    vec3 g011 = vec3(gx1.z, gy1.z, gz1.z);
    vec3 g111 = vec3(gx1.w, gy1.w, gz1.w);

    vec4 norm0 = taylorInvSqrt(vec4(dot(g000, g000), dot(g010, g010), dot(g100, g100), dot(g110, g110)));
    g000 *= norm0.x;
    g010 *= norm0.y;
    g100 *= norm0.z;
    g110 *= norm0.w;
    vec4 norm1 = taylorInvSqrt(vec4(dot(g001, g001), dot(g011, g011), dot(g101, g101), dot(g111, g111)));
    g001 *= norm1.x;
    g011 *= norm1.y;
    g101 *= norm1.z;
    g111 *= norm1.w;

    float n000 = dot(g000, Pf0);
    float n100 = dot(g100, vec3(Pf1.x, Pf0.yz));
    float n010 = dot(g010, vec3(Pf0.x, Pf1.y, Pf0.z));
    float n110 = dot(g110, vec3(Pf1.xy, Pf0.z));
    float n001 = dot(g001, vec3(Pf0.xy, Pf1.z));
    float n101 = dot(g101, vec3(Pf1.x, Pf0.y, Pf1.z));
    float n011 = dot(g011, vec3(Pf0.x, Pf1.yz));
    float n111 = dot(g111, Pf1);

    vec3 fade_xyz = fade(Pf0);
    vec4 n_z = mix(vec4(n000, n100, n010, n110), vec4(n001, n101, n011, n111), fade_xyz.z);
    vec2 n_yz = mix(n_z.xy, n_z.zw, fade_xyz.y);
    float n_xyz = mix(n_yz.x, n_yz.y, fade_xyz.x);
    return 2.2 * n_xyz;
}

float snoise(vec2 v) {
    const vec4 C = vec4(0.211324865405187, 0.366025403784439, -0.577350269189626, 0.024390243902439);
    vec2 i = floor(v + dot(v, C.yy));
    vec2 x0 = v - i + dot(i, C.xx);
    vec2 i1 = (x0.x > x0.y) ? vec2(1.0, 0.0) : vec2(0.0, 1.0);
    vec4 x12 = x0.xyxy + C.xxzz;
    x12.xy -= i1;
    i = mod289(vec3(i, 0.0)).xy;
    vec3 p = permute(permute(i.y + vec3(0.0, i1.y, 1.0)) + i.x + vec3(0.0, i1.x, 1.0));
    vec3 m = max(0.5 - vec3(dot(x0, x0), dot(x12.xy, x12.xy), dot(x12.zw, x12.zw)), 0.0);
    m = m * m;
    m = m * m;
    vec3 x = 2.0 * fract(p * C.www) - 1.0;
    vec3 h = abs(x) - 0.5;
    vec3 ox = floor(x + 0.5);
    vec3 a0 = x - ox;
    m *= 1.79284291400159 - 0.85373472095314 * (a0 * a0 + h * h);
    vec3 g;
    g.x = a0.x * x0.x + h.x * x0.y;
    g.yz = a0.yz * x12.xz + h.yz * x12.yw;
    return 130.0 * dot(m, g);
}

vec3 rgb2hsv(vec3 c) {
    vec4 K = vec4(0.0, -1.0 / 3.0, 2.0 / 3.0, -1.0);
    vec4 p = mix(vec4(c.bg, K.wz), vec4(c.gb, K.xy), step(c.b, c.g));
    vec4 q = mix(vec4(p.xyw, c.r), vec4(c.r, p.yzx), step(p.x, c.r));
    float d = q.x - min(q.w, q.y);
    float e = 1.0e-10;
    return vec3(abs(q.z + (q.w - q.y) / (6.0 * d + e)), d / (q.x + e), q.x);
}

vec3 hsv2rgb(vec3 c) {
    vec4 K = vec4(1.0, 2.0 / 3.0, 1.0 / 3.0, 3.0);
    vec3 p = abs(fract(c.xxx + K.xyz) * 6.0 - K.www);
    return c.z * mix(K.xxx, clamp(p - K.xxx, 0.0, 1.0), c.y);
}

vec4 stackEffect(vec2 fragCoord) {
    vec2 uv = fragCoord / uResolution;
    float field = uv.x;

    if (uNoiseEnabled) {
        vec2 p = vec2(uv.x * uFrequencyX, uv.y * uFrequencyY);
        float t = uTime * uSpeed;
        float n = (uNoiseType == 1)
            ? snoise(p + vec2(t, t * 0.5))
            : cnoise(vec3(p, t));
        field = n * 0.5 + 0.5;
    }
    field = clamp(field, 0.0, 1.0);

    if (uSDFEnabled) {
        float band = (uFilterMax > uFilterMin)
            ? smoothstep(uFilterMin, uFilterMax, field)
            : step(uFilterMin, field);
        field = clamp(band * uColorScale + uColorOffset, 0.0, 1.0);
    }
    vec3 color = vec3(field);

    if (uCurveEnabled) {
        vec4 curve = texture(uCurveTexture, stackFlip(vec2(field, 0.5)));
        color = mix(color, curve.rgb, curve.a);
    }

    if (uColorEnabled) {
        vec3 hsv = rgb2hsv(color);
        if (hsv.y < 1.0e-4) {
            hsv.x = field;
            hsv.y = 1.0;
        }
        hsv.x = fract(hsv.x + uHueOffset);
        hsv.y = clamp(hsv.y * uSaturation, 0.0, 1.0);
        hsv.z = clamp(hsv.z * uValue * 2.0, 0.0, 1.0);
        color = hsv2rgb(hsv);
    }

    if (uTextureEnabled) {
        vec2 tuv = (uv - 0.5) / uTextureScale + 0.5;
        if (tuv.x >= 0.0 && tuv.x <= 1.0 && tuv.y >= 0.0 && tuv.y <= 1.0) {
            vec4 overlay = texture(uImageTexture, stackFlip(tuv));
            color = mix(color, overlay.rgb, overlay.a * uTextureOpacity);
        }
    }

    if (uCircleEnabled) {
        vec2 centered = (uv - 0.5) * vec2(uResolution.x / uResolution.y, 1.0);
        float d = length(centered);
        float aa = 1.5 / uResolution.y;
        float inside = 1.0 - smoothstep(uRadius - aa, uRadius + aa, d);
        color *= inside;
        if (uStroke > 0.0) {
            float half_stroke = uStroke * 0.5;
            float ring = 1.0 - smoothstep(half_stroke - aa, half_stroke + aa, abs(d - uRadius));
            color = mix(color, vec3(1.0), ring);
        }
    }

    return vec4(color, 1.0);
}
";

const ASCII_GLSL: &str = r"
// 5x5 glyph bitmaps, row 0 at the top, bit = row * 5 + column.
int stackGlyph(int level) {
    if (level == 0) return 0;
    if (level == 1) return 4194304;
    if (level == 2) return 131200;
    if (level == 3) return 4357252;
    return 11512810;
}

vec4 stackEffect(vec2 fragCoord) {
    vec2 uv = fragCoord / uResolution;
    vec4 source = texture(uTexture, stackFlip(uv));
    if (!uASCIIEnabled) {
        return source;
    }

    float cell = max(uCharSize, 1.0);
    vec2 origin = floor(fragCoord / cell) * cell;
    vec2 center = (origin + vec2(0.5 * cell)) / uResolution;
    vec4 sampled = texture(uTexture, stackFlip(center));
    float luma = dot(sampled.rgb, vec3(0.299, 0.587, 0.114)) * uBrightness;
    int level = int(clamp(floor(luma * 5.0), 0.0, 4.0));

    vec2 local = (fragCoord - origin) / cell;
    int gx = int(clamp(floor(local.x * 5.0), 0.0, 4.0));
    int gy = int(clamp(floor((1.0 - local.y) * 5.0), 0.0, 4.0));
    int bit = gy * 5 + gx;
    float on = float((stackGlyph(level) >> bit) & 1);
    return vec4(sampled.rgb * on, 1.0);
}
";

/// Noise, SDF band, curve, color, texture and circle composited in one pass.
pub fn base_program_spec() -> ProgramSpec {
    let source = ShaderSource {
        label: "base".to_string(),
        vertex: VERTEX_GLSL.to_string(),
        fragment: COMPOSITE_GLSL.to_string(),
        kernel: Kernel::Composite,
    };
    ProgramSpec::new("base", source)
        .require("uNoiseEnabled", UniformKind::Bool)
        .require("uFrequencyX", UniformKind::Float)
        .require("uFrequencyY", UniformKind::Float)
        .require("uSpeed", UniformKind::Float)
        .require("uNoiseType", UniformKind::Int)
        .require("uCircleEnabled", UniformKind::Bool)
        .require("uRadius", UniformKind::Float)
        .require("uStroke", UniformKind::Float)
        .require("uColorEnabled", UniformKind::Bool)
        .require("uHueOffset", UniformKind::Float)
        .require("uSaturation", UniformKind::Float)
        .require("uValue", UniformKind::Float)
        .optional("uSDFEnabled", UniformKind::Bool)
        .optional("uFilterMin", UniformKind::Float)
        .optional("uFilterMax", UniformKind::Float)
        .optional("uColorScale", UniformKind::Float)
        .optional("uColorOffset", UniformKind::Float)
        .optional("uCurveEnabled", UniformKind::Bool)
        .optional(CURVE_TEXTURE, UniformKind::Texture)
        .optional("uTextureEnabled", UniformKind::Bool)
        .optional(IMAGE_TEXTURE, UniformKind::Texture)
        .optional("uTextureOpacity", UniformKind::Float)
        .optional("uTextureScale", UniformKind::Float)
}

/// ASCII posterization of the offscreen base pass.
pub fn post_program_spec() -> ProgramSpec {
    let source = ShaderSource {
        label: "post".to_string(),
        vertex: VERTEX_GLSL.to_string(),
        fragment: ASCII_GLSL.to_string(),
        kernel: Kernel::Ascii,
    };
    ProgramSpec::new("post", source)
        .require(POST_INPUT, UniformKind::Texture)
        .require("uASCIIEnabled", UniformKind::Bool)
        .require("uCharSize", UniformKind::Float)
        .require("uBrightness", UniformKind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_reference_every_declared_uniform() {
        for spec in [base_program_spec(), post_program_spec()] {
            for decl in &spec.uniforms {
                assert!(
                    spec.source.fragment.contains(&decl.name),
                    "{} never reads {}",
                    spec.name,
                    decl.name
                );
            }
            assert!(spec.source.fragment.contains("vec4 stackEffect(vec2 fragCoord)"));
        }
    }

    #[test]
    fn glyph_table_matches_kernel() {
        for glyph in crate::cpu::kernels::GLYPHS {
            assert!(ASCII_GLSL.contains(&glyph.to_string()));
        }
    }
}
