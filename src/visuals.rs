//! Colour palettes and small shading helpers shared by the CPU backends.
//!
//! The GPU backend receives the same palette stops through its uniform
//! buffer (see [`Palette::uniform_stops`]), so both paths tint blobs alike.
//!
//! # Usage
//!
//! ```ignore
//! let config = RenderConfig::new().with_palette(Palette::Ocean);
//! let tint = Palette::Ocean.sample(0.75);
//! ```

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Pre-defined colour ramps used to tint the field.
///
/// Stop 0 is the background tone, stop 4 the brightest core tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    /// Soft cool-to-warm pastel (default).
    #[default]
    Mochi,

    /// Sunset - warm oranges and pinks.
    Sunset,

    /// Ocean - cool blues and teals.
    Ocean,

    /// Ice - deep blue up to white.
    Ice,

    /// Neon - vibrant pink, cyan and purple.
    Neon,

    /// Grayscale - black to white.
    Grayscale,
}

impl Palette {
    /// Every palette, in declaration order.
    pub const ALL: [Palette; 6] = [
        Palette::Mochi,
        Palette::Sunset,
        Palette::Ocean,
        Palette::Ice,
        Palette::Neon,
        Palette::Grayscale,
    ];

    /// The five colour stops of this palette.
    pub fn colors(&self) -> [Vec3; 5] {
        match self {
            Palette::Mochi => [
                Vec3::new(0.10, 0.11, 0.16),
                Vec3::new(0.20, 0.40, 0.90),
                Vec3::new(0.55, 0.62, 0.95),
                Vec3::new(1.00, 0.75, 0.45),
                Vec3::new(1.00, 0.97, 0.93),
            ],
            Palette::Sunset => [
                Vec3::new(0.1, 0.0, 0.2),
                Vec3::new(0.5, 0.0, 0.5),
                Vec3::new(1.0, 0.2, 0.4),
                Vec3::new(1.0, 0.5, 0.2),
                Vec3::new(1.0, 0.9, 0.4),
            ],
            Palette::Ocean => [
                Vec3::new(0.0, 0.05, 0.15),
                Vec3::new(0.0, 0.2, 0.4),
                Vec3::new(0.0, 0.4, 0.6),
                Vec3::new(0.2, 0.6, 0.8),
                Vec3::new(0.6, 0.9, 1.0),
            ],
            Palette::Ice => [
                Vec3::new(0.0, 0.1, 0.4),
                Vec3::new(0.1, 0.4, 0.8),
                Vec3::new(0.4, 0.7, 1.0),
                Vec3::new(0.8, 0.9, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
            ],
            Palette::Neon => [
                Vec3::new(0.05, 0.0, 0.1),
                Vec3::new(0.5, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 0.5),
                Vec3::new(0.0, 0.5, 1.0),
                Vec3::new(0.0, 1.0, 1.0),
            ],
            Palette::Grayscale => [
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.25, 0.25, 0.25),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(0.75, 0.75, 0.75),
                Vec3::new(1.0, 1.0, 1.0),
            ],
        }
    }

    /// Piecewise-linear sample at `t` in `[0, 1]`.
    pub fn sample(&self, t: f32) -> Vec3 {
        let stops = self.colors();
        let x = t.clamp(0.0, 1.0) * (stops.len() - 1) as f32;
        let i = (x.floor() as usize).min(stops.len() - 2);
        stops[i].lerp(stops[i + 1], x - i as f32)
    }

    /// Background tone.
    pub fn background(&self) -> Vec3 {
        self.colors()[0]
    }

    /// Stops padded to `vec4` for a uniform buffer.
    pub fn uniform_stops(&self) -> [[f32; 4]; 5] {
        self.colors().map(|c| c.extend(1.0).to_array())
    }
}

/// Hermite step between `edge0` and `edge1`, as in WGSL.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Rec. 709 luminance.
#[cfg(test)]
pub(crate) fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Convert a linear `[0, 1]` colour and alpha into RGBA8.
pub fn to_rgba8(c: Vec3, alpha: f32) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    [q(c.x), q(c.y), q(c.z), q(alpha)]
}
