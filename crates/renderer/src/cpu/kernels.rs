//! Per-pixel evaluation of the stock programs.

use curves::TextureImage;

use super::noise::{cnoise, hsv_to_rgb, rgb_to_hsv, smoothstep, snoise};
use super::Frame;
use crate::program::RESOLUTION;
use crate::uniforms::UniformSet;

/// 5x5 glyph bitmaps from darkest to brightest, row 0 at the top,
/// bit = row * 5 + column.
pub const GLYPHS: [u32; 5] = [0, 4_194_304, 131_200, 4_357_252, 11_512_810];

/// A bound texture as seen by a kernel. Samples use bottom-left uv.
pub(crate) enum Sampler<'a> {
    Empty,
    Image(&'a TextureImage),
    Frame(&'a Frame),
}

impl Sampler<'_> {
    pub(crate) fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let (u, v) = (uv[0], 1.0 - uv[1]);
        match self {
            Sampler::Empty => [0.0; 4],
            Sampler::Image(image) => image.sample(u, v),
            Sampler::Frame(frame) => frame.sample(u, v),
        }
    }
}

fn resolution(uniforms: &UniformSet) -> [f32; 2] {
    uniforms
        .get(RESOLUTION)
        .and_then(|cell| cell.with(|value| value.as_vec2()))
        .unwrap_or([1.0, 1.0])
}

fn flag(uniforms: &UniformSet, name: &str) -> bool {
    uniforms.bool(name).unwrap_or(false)
}

fn float(uniforms: &UniformSet, name: &str) -> f32 {
    uniforms.f32(name).unwrap_or(0.0)
}

fn mix3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] * (1.0 - t) + b[0] * t,
        a[1] * (1.0 - t) + b[1] * t,
        a[2] * (1.0 - t) + b[2] * t,
    ]
}

/// Uniform values read once per draw.
pub(crate) struct CompositeParams {
    resolution: [f32; 2],
    time: f32,
    noise: bool,
    frequency: [f32; 2],
    speed: f32,
    simplex: bool,
    sdf: bool,
    filter: [f32; 2],
    color_scale: f32,
    color_offset: f32,
    curve: bool,
    color: bool,
    hue_offset: f32,
    saturation: f32,
    value: f32,
    texture: bool,
    opacity: f32,
    scale: f32,
    circle: bool,
    radius: f32,
    stroke: f32,
}

impl CompositeParams {
    pub(crate) fn read(uniforms: &UniformSet) -> Self {
        Self {
            resolution: resolution(uniforms),
            time: float(uniforms, "uTime"),
            noise: flag(uniforms, "uNoiseEnabled"),
            frequency: [float(uniforms, "uFrequencyX"), float(uniforms, "uFrequencyY")],
            speed: float(uniforms, "uSpeed"),
            simplex: uniforms.i32("uNoiseType") == Some(1),
            sdf: flag(uniforms, "uSDFEnabled"),
            filter: [float(uniforms, "uFilterMin"), float(uniforms, "uFilterMax")],
            color_scale: uniforms.f32("uColorScale").unwrap_or(1.0),
            color_offset: float(uniforms, "uColorOffset"),
            curve: flag(uniforms, "uCurveEnabled"),
            color: flag(uniforms, "uColorEnabled"),
            hue_offset: float(uniforms, "uHueOffset"),
            saturation: float(uniforms, "uSaturation"),
            value: float(uniforms, "uValue"),
            texture: flag(uniforms, "uTextureEnabled"),
            opacity: float(uniforms, "uTextureOpacity"),
            scale: uniforms.f32("uTextureScale").unwrap_or(1.0),
            circle: flag(uniforms, "uCircleEnabled"),
            radius: float(uniforms, "uRadius"),
            stroke: float(uniforms, "uStroke"),
        }
    }
}

pub(crate) fn composite(
    params: &CompositeParams,
    curve: &Sampler<'_>,
    image: &Sampler<'_>,
    frag: [f32; 2],
) -> [f32; 4] {
    let [width, height] = params.resolution;
    let uv = [frag[0] / width, frag[1] / height];
    let mut field = uv[0];

    if params.noise {
        let p = [uv[0] * params.frequency[0], uv[1] * params.frequency[1]];
        let t = params.time * params.speed;
        let n = if params.simplex {
            snoise([p[0] + t, p[1] + t * 0.5])
        } else {
            cnoise([p[0], p[1], t])
        };
        field = n * 0.5 + 0.5;
    }
    let mut field = field.clamp(0.0, 1.0);

    if params.sdf {
        let [low, high] = params.filter;
        let band = if high > low {
            smoothstep(low, high, field)
        } else if field >= low {
            1.0
        } else {
            0.0
        };
        field = (band * params.color_scale + params.color_offset).clamp(0.0, 1.0);
    }
    let mut color = [field; 3];

    if params.curve {
        let texel = curve.sample([field, 0.5]);
        color = mix3(color, [texel[0], texel[1], texel[2]], texel[3]);
    }

    if params.color {
        let mut hsv = rgb_to_hsv(color);
        if hsv[1] < 1.0e-4 {
            hsv[0] = field;
            hsv[1] = 1.0;
        }
        hsv[0] = (hsv[0] + params.hue_offset).rem_euclid(1.0);
        hsv[1] = (hsv[1] * params.saturation).clamp(0.0, 1.0);
        hsv[2] = (hsv[2] * params.value * 2.0).clamp(0.0, 1.0);
        color = hsv_to_rgb(hsv);
    }

    if params.texture {
        let tuv = [
            (uv[0] - 0.5) / params.scale + 0.5,
            (uv[1] - 0.5) / params.scale + 0.5,
        ];
        if (0.0..=1.0).contains(&tuv[0]) && (0.0..=1.0).contains(&tuv[1]) {
            let texel = image.sample(tuv);
            color = mix3(color, [texel[0], texel[1], texel[2]], texel[3] * params.opacity);
        }
    }

    if params.circle {
        let centered = [(uv[0] - 0.5) * (width / height), uv[1] - 0.5];
        let d = (centered[0] * centered[0] + centered[1] * centered[1]).sqrt();
        let aa = 1.5 / height;
        let inside = 1.0 - smoothstep(params.radius - aa, params.radius + aa, d);
        color = color.map(|channel| channel * inside);
        if params.stroke > 0.0 {
            let half = params.stroke * 0.5;
            let ring = 1.0 - smoothstep(half - aa, half + aa, (d - params.radius).abs());
            color = mix3(color, [1.0; 3], ring);
        }
    }

    [color[0], color[1], color[2], 1.0]
}

pub(crate) struct AsciiParams {
    resolution: [f32; 2],
    enabled: bool,
    char_size: f32,
    brightness: f32,
}

impl AsciiParams {
    pub(crate) fn read(uniforms: &UniformSet) -> Self {
        Self {
            resolution: resolution(uniforms),
            enabled: flag(uniforms, "uASCIIEnabled"),
            char_size: float(uniforms, "uCharSize"),
            brightness: float(uniforms, "uBrightness"),
        }
    }
}

pub(crate) fn ascii(params: &AsciiParams, source: &Sampler<'_>, frag: [f32; 2]) -> [f32; 4] {
    let [width, height] = params.resolution;
    let uv = [frag[0] / width, frag[1] / height];
    if !params.enabled {
        return source.sample(uv);
    }

    let cell = params.char_size.max(1.0);
    let origin = [(frag[0] / cell).floor() * cell, (frag[1] / cell).floor() * cell];
    let center = [(origin[0] + 0.5 * cell) / width, (origin[1] + 0.5 * cell) / height];
    let sampled = source.sample(center);
    let luma = (sampled[0] * 0.299 + sampled[1] * 0.587 + sampled[2] * 0.114) * params.brightness;
    let level = (luma * 5.0).floor().clamp(0.0, 4.0) as usize;

    let local = [(frag[0] - origin[0]) / cell, (frag[1] - origin[1]) / cell];
    let gx = (local[0] * 5.0).floor().clamp(0.0, 4.0) as u32;
    let gy = ((1.0 - local[1]) * 5.0).floor().clamp(0.0, 4.0) as u32;
    let on = ((GLYPHS[level] >> (gy * 5 + gx)) & 1) as f32;
    [sampled[0] * on, sampled[1] * on, sampled[2] * on, 1.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::UniformValue;

    fn set(values: &[(&str, UniformValue)]) -> UniformSet {
        let mut uniforms = UniformSet::new();
        for (name, value) in values {
            uniforms.insert(*name, value.clone()).unwrap();
        }
        uniforms
    }

    #[test]
    fn glyph_levels_grow_denser() {
        let counts: Vec<u32> = GLYPHS.iter().map(|glyph| glyph.count_ones()).collect();
        assert!(counts.windows(2).all(|pair| pair[0] < pair[1]), "{counts:?}");
        assert!(GLYPHS.iter().all(|glyph| *glyph < 1 << 25));
    }

    #[test]
    fn composite_without_effects_is_a_horizontal_ramp() {
        let uniforms = set(&[("uResolution", UniformValue::Vec2([100.0, 10.0]))]);
        let params = CompositeParams::read(&uniforms);
        let left = composite(&params, &Sampler::Empty, &Sampler::Empty, [0.5, 5.0]);
        let right = composite(&params, &Sampler::Empty, &Sampler::Empty, [99.5, 5.0]);
        assert!((left[0] - 0.005).abs() < 1e-5);
        assert!((right[0] - 0.995).abs() < 1e-5);
        assert_eq!(left[3], 1.0);
    }

    #[test]
    fn circle_masks_outside() {
        let uniforms = set(&[
            ("uResolution", UniformValue::Vec2([100.0, 100.0])),
            ("uCircleEnabled", UniformValue::Bool(true)),
            ("uRadius", UniformValue::Float(0.3)),
            ("uStroke", UniformValue::Float(0.0)),
        ]);
        let params = CompositeParams::read(&uniforms);
        let corner = composite(&params, &Sampler::Empty, &Sampler::Empty, [1.0, 1.0]);
        let center = composite(&params, &Sampler::Empty, &Sampler::Empty, [60.0, 50.0]);
        assert_eq!(&corner[..3], &[0.0, 0.0, 0.0]);
        assert!(center[0] > 0.5);
    }

    fn sdf_set(min: f32, max: f32, scale: f32, offset: f32) -> UniformSet {
        set(&[
            ("uResolution", UniformValue::Vec2([100.0, 10.0])),
            ("uSDFEnabled", UniformValue::Bool(true)),
            ("uFilterMin", UniformValue::Float(min)),
            ("uFilterMax", UniformValue::Float(max)),
            ("uColorScale", UniformValue::Float(scale)),
            ("uColorOffset", UniformValue::Float(offset)),
        ])
    }

    #[test]
    fn sdf_band_passes_the_field() {
        let params = CompositeParams::read(&sdf_set(0.3, 0.7, 1.0, 0.0));
        let below = composite(&params, &Sampler::Empty, &Sampler::Empty, [20.0, 5.0]);
        let middle = composite(&params, &Sampler::Empty, &Sampler::Empty, [50.0, 5.0]);
        let above = composite(&params, &Sampler::Empty, &Sampler::Empty, [80.0, 5.0]);
        assert_eq!(below[0], 0.0);
        assert!((middle[0] - 0.5).abs() < 0.02, "{middle:?}");
        assert_eq!(above[0], 1.0);
    }

    #[test]
    fn sdf_scale_and_offset_remap_the_band() {
        let params = CompositeParams::read(&sdf_set(0.3, 0.7, 0.5, 0.25));
        let below = composite(&params, &Sampler::Empty, &Sampler::Empty, [20.0, 5.0]);
        let above = composite(&params, &Sampler::Empty, &Sampler::Empty, [80.0, 5.0]);
        assert!((below[0] - 0.25).abs() < 1e-6);
        assert!((above[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn collapsed_sdf_band_is_a_hard_threshold() {
        let params = CompositeParams::read(&sdf_set(0.5, 0.5, 1.0, 0.0));
        let left = composite(&params, &Sampler::Empty, &Sampler::Empty, [40.0, 5.0]);
        let right = composite(&params, &Sampler::Empty, &Sampler::Empty, [60.0, 5.0]);
        assert_eq!(left[0], 0.0);
        assert_eq!(right[0], 1.0);
    }

    #[test]
    fn empty_curve_is_neutral() {
        let base = set(&[("uResolution", UniformValue::Vec2([64.0, 64.0]))]);
        let with_curve = set(&[
            ("uResolution", UniformValue::Vec2([64.0, 64.0])),
            ("uCurveEnabled", UniformValue::Bool(true)),
        ]);
        let frag = [20.0, 20.0];
        assert_eq!(
            composite(&CompositeParams::read(&base), &Sampler::Empty, &Sampler::Empty, frag),
            composite(&CompositeParams::read(&with_curve), &Sampler::Empty, &Sampler::Empty, frag)
        );
    }

    #[test]
    fn curve_lookup_replaces_the_ramp() {
        let red = TextureImage::from_rgba(2, 1, vec![255, 0, 0, 255, 255, 0, 0, 255], "red");
        let uniforms = set(&[
            ("uResolution", UniformValue::Vec2([64.0, 64.0])),
            ("uCurveEnabled", UniformValue::Bool(true)),
        ]);
        let params = CompositeParams::read(&uniforms);
        let pixel = composite(&params, &Sampler::Image(&red), &Sampler::Empty, [10.0, 10.0]);
        assert_eq!(pixel, [1.0, 0.0, 0.0, 1.0]);
    }
}
