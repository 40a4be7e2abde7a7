//! Scalar ports of the GLSL noise and color helpers used by the composite
//! program, so both backends produce the same picture.

fn mod289(x: f32) -> f32 {
    x - (x * (1.0 / 289.0)).floor() * 289.0
}

fn permute(x: f32) -> f32 {
    mod289((x * 34.0 + 1.0) * x)
}

fn fract(x: f32) -> f32 {
    x - x.floor()
}

/// GLSL `step(edge, x)`.
fn step(edge: f32, x: f32) -> f32 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

fn taylor_inv_sqrt(r: f32) -> f32 {
    1.792_842_9 - 0.853_734_7 * r
}

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn dot3(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Gradient for one lattice corner hash.
fn gradient(hash: f32) -> [f32; 3] {
    let gx = hash * (1.0 / 7.0);
    let mut gy = fract(gx.floor() * (1.0 / 7.0)) - 0.5;
    let mut gx = fract(gx);
    let gz = 0.5 - gx.abs() - gy.abs();
    let sz = step(gz, 0.0);
    gx -= sz * (step(0.0, gx) - 0.5);
    gy -= sz * (step(0.0, gy) - 0.5);
    let g = [gx, gy, gz];
    let norm = taylor_inv_sqrt(dot3(g, g));
    [g[0] * norm, g[1] * norm, g[2] * norm]
}

/// Classic 3D Perlin noise, roughly in `[-1, 1]`.
pub fn cnoise(p: [f32; 3]) -> f32 {
    let pi0 = [p[0].floor(), p[1].floor(), p[2].floor()];
    let pi1 = [mod289(pi0[0] + 1.0), mod289(pi0[1] + 1.0), mod289(pi0[2] + 1.0)];
    let pi0 = [mod289(pi0[0]), mod289(pi0[1]), mod289(pi0[2])];
    let pf0 = [fract(p[0]), fract(p[1]), fract(p[2])];
    let pf1 = [pf0[0] - 1.0, pf0[1] - 1.0, pf0[2] - 1.0];

    // Corner k: bit 0 picks x, bit 1 picks y; z selects the layer.
    let mut layers = [[0.0f32; 4]; 2];
    for (layer, values) in layers.iter_mut().enumerate() {
        let iz = if layer == 0 { pi0[2] } else { pi1[2] };
        let fz = if layer == 0 { pf0[2] } else { pf1[2] };
        for (corner, value) in values.iter_mut().enumerate() {
            let use_x1 = corner & 1 == 1;
            let use_y1 = corner & 2 == 2;
            let ix = if use_x1 { pi1[0] } else { pi0[0] };
            let iy = if use_y1 { pi1[1] } else { pi0[1] };
            let ixy = permute(permute(ix) + iy);
            let g = gradient(permute(ixy + iz));
            let offset = [
                if use_x1 { pf1[0] } else { pf0[0] },
                if use_y1 { pf1[1] } else { pf0[1] },
                fz,
            ];
            *value = dot3(g, offset);
        }
    }

    let fade_xyz = [fade(pf0[0]), fade(pf0[1]), fade(pf0[2])];
    let n_z: Vec<f32> = (0..4)
        .map(|corner| mix(layers[0][corner], layers[1][corner], fade_xyz[2]))
        .collect();
    let n_yz = [mix(n_z[0], n_z[2], fade_xyz[1]), mix(n_z[1], n_z[3], fade_xyz[1])];
    2.2 * mix(n_yz[0], n_yz[1], fade_xyz[0])
}

/// 2D simplex noise, roughly in `[-1, 1]`.
pub fn snoise(v: [f32; 2]) -> f32 {
    const C: [f32; 4] = [0.211_324_87, 0.366_025_4, -0.577_350_26, 0.024_390_243];
    let s = (v[0] + v[1]) * C[1];
    let mut i = [(v[0] + s).floor(), (v[1] + s).floor()];
    let t = (i[0] + i[1]) * C[0];
    let x0 = [v[0] - i[0] + t, v[1] - i[1] + t];
    let i1 = if x0[0] > x0[1] { [1.0, 0.0] } else { [0.0, 1.0] };
    let x12 = [x0[0] + C[0] - i1[0], x0[1] + C[0] - i1[1], x0[0] + C[2], x0[1] + C[2]];
    i = [mod289(i[0]), mod289(i[1])];

    let ys = [0.0, i1[1], 1.0];
    let xs = [0.0, i1[0], 1.0];
    let p: Vec<f32> = (0..3)
        .map(|k| permute(permute(i[1] + ys[k]) + i[0] + xs[k]))
        .collect();

    let offsets = [[x0[0], x0[1]], [x12[0], x12[1]], [x12[2], x12[3]]];
    let mut total = 0.0;
    for k in 0..3 {
        let [ox, oy] = offsets[k];
        let mut m = (0.5 - (ox * ox + oy * oy)).max(0.0);
        m *= m;
        m *= m;
        let x = 2.0 * fract(p[k] * C[3]) - 1.0;
        let h = x.abs() - 0.5;
        let a0 = x - (x + 0.5).floor();
        m *= 1.792_842_9 - 0.853_734_7 * (a0 * a0 + h * h);
        total += m * (a0 * ox + h * oy);
    }
    130.0 * total
}

pub fn rgb_to_hsv(c: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = c;
    let k = [0.0, -1.0 / 3.0, 2.0 / 3.0, -1.0];
    let sel = step(b, g);
    let p = [
        mix(b, g, sel),
        mix(g, b, sel),
        mix(k[3], k[0], sel),
        mix(k[2], k[1], sel),
    ];
    let sel = step(p[0], r);
    let q = [
        mix(p[0], r, sel),
        mix(p[1], p[1], sel),
        mix(p[3], p[2], sel),
        mix(r, p[0], sel),
    ];
    let d = q[0] - q[3].min(q[1]);
    let e = 1.0e-10;
    [
        (q[2] + (q[3] - q[1]) / (6.0 * d + e)).abs(),
        d / (q[0] + e),
        q[0],
    ]
}

pub fn hsv_to_rgb(c: [f32; 3]) -> [f32; 3] {
    let k = [1.0, 2.0 / 3.0, 1.0 / 3.0, 3.0];
    let channel = |offset: f32| {
        let p = (fract(c[0] + offset) * 6.0 - k[3]).abs();
        c[2] * mix(k[0], (p - k[0]).clamp(0.0, 1.0), c[1])
    };
    [channel(k[0]), channel(k[1]), channel(k[2])]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perlin_is_zero_on_lattice_points() {
        assert!(cnoise([0.0, 0.0, 0.0]).abs() < 1e-6);
        assert!(cnoise([3.0, 7.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn noise_stays_in_range_and_varies() {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for step in 0..400 {
            let x = step as f32 * 0.173;
            let y = step as f32 * 0.091;
            for value in [cnoise([x, y, 0.5]), snoise([x, y])] {
                assert!(value.is_finite());
                assert!((-1.2..=1.2).contains(&value), "{value}");
                min = min.min(value);
                max = max.max(value);
            }
        }
        assert!(max - min > 0.5);
    }

    #[test]
    fn hsv_round_trips_primaries() {
        for color in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.2, 0.4, 0.6]] {
            let back = hsv_to_rgb(rgb_to_hsv(color));
            for channel in 0..3 {
                assert!((back[channel] - color[channel]).abs() < 1e-4, "{color:?} -> {back:?}");
            }
        }
        let red = rgb_to_hsv([1.0, 0.0, 0.0]);
        assert!(red[0].abs() < 1e-6 && (red[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn smoothstep_matches_glsl() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
    }
}
