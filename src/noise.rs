//! Hash and value noise on the CPU.
//!
//! Mirrors the WGSL in [`shader_utils`](crate::shader_utils) so the CPU
//! backends and the GPU backend produce the same background texture and grain.

use glam::Vec3;

/// 32-bit integer hash.
pub fn hash(n: u32) -> u32 {
    let mut x = n;
    x ^= x >> 17;
    x = x.wrapping_mul(0xed5a_d4bb);
    x ^= x >> 11;
    x = x.wrapping_mul(0xac4c_1b51);
    x ^= x >> 15;
    x = x.wrapping_mul(0x3184_8bab);
    x ^= x >> 14;
    x
}

/// Hash of an integer lattice point.
pub fn hash3(x: i32, y: i32, z: i32) -> u32 {
    hash(x as u32 ^ hash(y as u32 ^ hash(z as u32)))
}

/// Uniform float in `[0, 1)` from a hash input.
pub fn rand01(n: u32) -> f32 {
    (hash(n) >> 8) as f32 / 16_777_216.0
}

/// Trilinear value noise in `[0, 1)`.
pub fn value_noise(p: Vec3) -> f32 {
    let cell = p.floor();
    let f = p - cell;
    let u = f * f * (Vec3::splat(3.0) - 2.0 * f);
    let (ix, iy, iz) = (cell.x as i32, cell.y as i32, cell.z as i32);
    let corner = |dx: i32, dy: i32, dz: i32| (hash3(ix + dx, iy + dy, iz + dz) >> 8) as f32 / 16_777_216.0;

    let x00 = lerp(corner(0, 0, 0), corner(1, 0, 0), u.x);
    let x10 = lerp(corner(0, 1, 0), corner(1, 1, 0), u.x);
    let x01 = lerp(corner(0, 0, 1), corner(1, 0, 1), u.x);
    let x11 = lerp(corner(0, 1, 1), corner(1, 1, 1), u.x);
    lerp(lerp(x00, x10, u.y), lerp(x01, x11, u.y), u.z)
}

/// Fractal sum of value noise, normalized back to `[0, 1)`.
pub fn fbm(p: Vec3, octaves: u32) -> f32 {
    let mut value = 0.0;
    let mut amplitude = 0.5;
    let mut norm = 0.0;
    let mut pos = p;
    for _ in 0..octaves.max(1) {
        value += amplitude * value_noise(pos);
        norm += amplitude;
        pos *= 2.0;
        amplitude *= 0.5;
    }
    value / norm
}

/// Per-pixel film grain in `[-0.5, 0.5)`, varying per frame.
pub fn grain(x: u32, y: u32, frame: u32) -> f32 {
    rand01(hash(x ^ hash(y ^ hash(frame)))) - 0.5
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
