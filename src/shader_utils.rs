//! WGSL building blocks for the field shader.
//!
//! # Available Functions
//!
//! ## Hash & Noise
//! - `hash(n: u32) -> u32` - 32-bit integer hash
//! - `hash3i(p: vec3<i32>) -> u32` - hash of a lattice point
//! - `rand01(n: u32) -> f32` - uniform float in [0, 1)
//! - `value_noise(p: vec3<f32>) -> f32` - trilinear value noise in [0, 1)
//! - `fbm(p: vec3<f32>, octaves: i32) -> f32` - normalized fractal sum
//! - `grain(px: vec2<u32>, frame: u32) -> f32` - per-pixel grain in [-0.5, 0.5)
//!
//! ## Field
//! - `kernel_eval(x: f32, kind: u32) -> f32` - Gaussian (0) or Wyvill (1)
//! - `smin(a: f32, b: f32, k: f32) -> f32` - polynomial smooth minimum
//!
//! ## Color
//! - `palette_sample(t: f32) -> vec3<f32>` - samples `uniforms.palette`
//!
//! Each block matches its CPU counterpart in [`noise`](crate::noise),
//! [`field`](crate::field) and [`visuals`](crate::visuals).

/// WGSL code for hash and noise functions.
pub const NOISE_WGSL: &str = r#"
fn hash(n: u32) -> u32 {
    var x = n;
    x = x ^ (x >> 17u);
    x = x * 0xed5ad4bbu;
    x = x ^ (x >> 11u);
    x = x * 0xac4c1b51u;
    x = x ^ (x >> 15u);
    x = x * 0x31848babu;
    x = x ^ (x >> 14u);
    return x;
}

fn hash3i(p: vec3<i32>) -> u32 {
    return hash(bitcast<u32>(p.x) ^ hash(bitcast<u32>(p.y) ^ hash(bitcast<u32>(p.z))));
}

fn rand01(n: u32) -> f32 {
    return f32(hash(n) >> 8u) / 16777216.0;
}

fn lattice(p: vec3<i32>) -> f32 {
    return f32(hash3i(p) >> 8u) / 16777216.0;
}

fn value_noise(p: vec3<f32>) -> f32 {
    let cell = floor(p);
    let f = p - cell;
    let u = f * f * (3.0 - 2.0 * f);
    let i = vec3<i32>(cell);

    let x00 = mix(lattice(i), lattice(i + vec3<i32>(1, 0, 0)), u.x);
    let x10 = mix(lattice(i + vec3<i32>(0, 1, 0)), lattice(i + vec3<i32>(1, 1, 0)), u.x);
    let x01 = mix(lattice(i + vec3<i32>(0, 0, 1)), lattice(i + vec3<i32>(1, 0, 1)), u.x);
    let x11 = mix(lattice(i + vec3<i32>(0, 1, 1)), lattice(i + vec3<i32>(1, 1, 1)), u.x);
    return mix(mix(x00, x10, u.y), mix(x01, x11, u.y), u.z);
}

fn fbm(p: vec3<f32>, octaves: i32) -> f32 {
    var value = 0.0;
    var amplitude = 0.5;
    var norm = 0.0;
    var pos = p;
    for (var i = 0; i < max(octaves, 1); i++) {
        value += amplitude * value_noise(pos);
        norm += amplitude;
        pos *= 2.0;
        amplitude *= 0.5;
    }
    return value / norm;
}

fn grain(px: vec2<u32>, frame: u32) -> f32 {
    return rand01(hash(px.x ^ hash(px.y ^ hash(frame)))) - 0.5;
}
"#;

/// WGSL code for field kernels and the smooth minimum.
pub const FIELD_WGSL: &str = r#"
fn kernel_eval(x: f32, kind: u32) -> f32 {
    if kind == 1u {
        let c = clamp(x, 0.0, 1.0);
        let t = 1.0 - c * c;
        return t * t;
    }
    return exp(-x * x);
}

fn kernel_cutoff(kind: u32) -> f32 {
    if kind == 1u {
        return 1.0;
    }
    return 3.0;
}

fn smin(a: f32, b: f32, k: f32) -> f32 {
    let kk = max(k, 1e-6);
    let h = clamp(kk - abs(a - b), 0.0, kk);
    return min(a, b) - h * h / (4.0 * kk);
}
"#;

/// WGSL code for palette sampling. Expects `uniforms.palette: array<vec4<f32>, 5>`.
pub const COLOR_WGSL: &str = r#"
fn palette_sample(t: f32) -> vec3<f32> {
    let x = clamp(t, 0.0, 1.0) * 4.0;
    let i = min(u32(floor(x)), 3u);
    return mix(uniforms.palette[i].rgb, uniforms.palette[i + 1u].rgb, x - f32(i));
}
"#;

/// All utility blocks combined.
pub fn all_utils_wgsl() -> String {
    format!(
        "// Built-in utility functions\n{}\n{}\n{}\n",
        NOISE_WGSL, FIELD_WGSL, COLOR_WGSL
    )
}
