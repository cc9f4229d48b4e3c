//! Scalar field over the committed source positions.
//!
//! Two formulations are available, chosen once per deployment through
//! [`FieldModel`]:
//!
//! - **Kernel sum**: every source contributes
//!   `weight * kernel(|p - pos| / (radius * sigma))` and the surface is the
//!   iso-contour `F = iso`. `F >= iso` is inside.
//! - **Smooth union**: every source is a sphere SDF `|p - pos| - radius` and
//!   the spheres are folded with a polynomial smooth-min. `d < 0` is inside.
//!
//! Sources live in 2D scene space and are lifted onto a fixed Z plane, so the
//! same evaluator serves the flat screen-space pass and the 3D tracer.
//!
//! # Example
//!
//! ```ignore
//! let field = FieldEvaluator::new(
//!     FieldConfig::new().with_model(FieldModel::SmoothUnion).with_blend(0.2),
//!     snapshot.field_sources(0.0),
//! );
//! let d = field.signed_distance(Vec3::new(0.1, 0.0, 0.0));
//! let n = field.normal(Vec3::new(0.1, 0.0, 0.0));
//! ```

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::source::Source;

/// Distance reported when there is nothing to be near.
pub const FAR_DISTANCE: f32 = 1.0e3;

/// Falloff applied to normalized distance in the kernel-sum model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// `exp(-x²)`, smooth with infinite support.
    #[default]
    Gaussian,
    /// `(1 - clamp(x, 0, 1)²)²`, compact support.
    Wyvill,
}

impl Kernel {
    pub fn eval(self, x: f32) -> f32 {
        match self {
            Kernel::Gaussian => (-x * x).exp(),
            Kernel::Wyvill => {
                let c = x.clamp(0.0, 1.0);
                let t = 1.0 - c * c;
                t * t
            }
        }
    }

    /// Normalized distance beyond which the kernel is negligible.
    pub fn cutoff(self) -> f32 {
        match self {
            // exp(-9) ≈ 1.2e-4
            Kernel::Gaussian => 3.0,
            Kernel::Wyvill => 1.0,
        }
    }
}

/// Which field formulation the deployment uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldModel {
    #[default]
    KernelSum,
    SmoothUnion,
}

/// Field parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldConfig {
    pub model: FieldModel,
    pub kernel: Kernel,
    /// Kernel width multiplier (0.6-2.5).
    pub sigma: f32,
    /// Iso threshold of the kernel sum (0.4-1.0).
    pub iso: f32,
    /// Smooth-min blend radius (0.01-0.6).
    pub blend: f32,
    /// Central-difference step for gradients.
    pub gradient_epsilon: f32,
    /// Z plane the 2D sources are lifted onto.
    pub z_plane: f32,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            model: FieldModel::KernelSum,
            kernel: Kernel::Gaussian,
            sigma: 1.0,
            iso: 0.5,
            blend: 0.12,
            gradient_epsilon: 0.003,
            z_plane: 0.0,
        }
    }
}

impl FieldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: FieldModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Set kernel width (clamped to 0.6-2.5).
    pub fn with_sigma(mut self, sigma: f32) -> Self {
        self.sigma = sigma.clamp(0.6, 2.5);
        self
    }

    /// Set iso threshold (clamped to 0.4-1.0).
    pub fn with_iso(mut self, iso: f32) -> Self {
        self.iso = iso.clamp(0.4, 1.0);
        self
    }

    /// Set smooth-min blend radius (clamped to 0.01-0.6).
    pub fn with_blend(mut self, k: f32) -> Self {
        self.blend = k.clamp(0.01, 0.6);
        self
    }

    pub fn with_gradient_epsilon(mut self, eps: f32) -> Self {
        self.gradient_epsilon = eps.clamp(1.0e-5, 0.1);
        self
    }

    pub fn with_z_plane(mut self, z: f32) -> Self {
        self.z_plane = z;
        self
    }

    pub fn clamped(&self) -> Self {
        Self::new()
            .with_model(self.model)
            .with_kernel(self.kernel)
            .with_sigma(self.sigma)
            .with_iso(self.iso)
            .with_blend(self.blend)
            .with_gradient_epsilon(self.gradient_epsilon)
            .with_z_plane(self.z_plane)
    }
}

/// A source lifted into 3D for evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSource {
    pub position: Vec3,
    pub radius: f32,
    pub weight: f32,
}

impl FieldSource {
    pub fn new(position: Vec3, radius: f32, weight: f32) -> Self {
        Self { position, radius, weight }
    }

    /// Lift a tree source onto the `z` plane.
    pub fn from_source(source: &Source, position: Vec2, z: f32) -> Self {
        Self::new(position.extend(z), source.radius, source.weight)
    }

    fn is_valid(&self) -> bool {
        self.position.is_finite() && self.radius.is_finite() && self.radius > 0.0 && self.weight.is_finite() && self.weight > 0.0
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn around(center: Vec3, half: f32) -> Self {
        Self::new(center - Vec3::splat(half), center + Vec3::splat(half))
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn expand(&self, by: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(by), self.max + Vec3::splat(by))
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Slab test. Returns the entry/exit distances along the ray, with entry
    /// clamped to zero when the origin is inside.
    pub fn intersect_ray(&self, origin: Vec3, dir: Vec3) -> Option<(f32, f32)> {
        let inv = dir.recip();
        let t0 = (self.min - origin) * inv;
        let t1 = (self.max - origin) * inv;
        let near = t0.min(t1);
        let far = t0.max(t1);
        // NaN from 0 * inf on an axis-parallel ray lands in max/min and is ignored.
        let t_enter = near.max_element().max(0.0);
        let t_exit = far.min_element();
        (t_exit >= t_enter).then_some((t_enter, t_exit))
    }
}

/// Polynomial smooth minimum of two distances.
///
/// Equals `min(a, b)` once `|a - b| >= k`, and never exceeds it.
pub fn smin(a: f32, b: f32, k: f32) -> f32 {
    let k = k.max(1.0e-6);
    let h = (k - (a - b).abs()).clamp(0.0, k);
    a.min(b) - h * h / (4.0 * k)
}

/// Evaluates the combined field of a fixed set of sources.
#[derive(Clone, Debug, Default)]
pub struct FieldEvaluator {
    config: FieldConfig,
    sources: Vec<FieldSource>,
}

impl FieldEvaluator {
    /// Build an evaluator. Sources with non-positive radius or weight, or
    /// non-finite values, are dropped.
    pub fn new(config: FieldConfig, sources: impl IntoIterator<Item = FieldSource>) -> Self {
        Self {
            config: config.clamped(),
            sources: sources.into_iter().filter(FieldSource::is_valid).collect(),
        }
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn sources(&self) -> &[FieldSource] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Kernel sum `F(p)`. Zero with no sources.
    pub fn field(&self, p: Vec3) -> f32 {
        let kernel = self.config.kernel;
        let cutoff = kernel.cutoff();
        self.sources
            .iter()
            .map(|s| {
                let x = p.distance(s.position) / (s.radius * self.config.sigma).max(1.0e-6);
                if x >= cutoff {
                    0.0
                } else {
                    s.weight * kernel.eval(x)
                }
            })
            .sum()
    }

    /// Smooth union of sphere distances.
    pub fn smooth_union(&self, p: Vec3) -> f32 {
        self.sources
            .iter()
            .map(|s| p.distance(s.position) - s.radius)
            .fold(FAR_DISTANCE, |d, di| smin(d, di, self.config.blend))
    }

    /// Signed distance to the surface, negative inside.
    ///
    /// Exact (up to the smooth-min) for the smooth-union model; a first-order
    /// estimate `(iso - F) / |∇F|` for the kernel sum.
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        match self.config.model {
            FieldModel::SmoothUnion => self.smooth_union(p),
            FieldModel::KernelSum => {
                if self.sources.is_empty() {
                    return FAR_DISTANCE;
                }
                let f = self.field(p);
                let g = self.field_gradient(p).length().max(1.0e-4);
                ((self.config.iso - f) / g).clamp(-FAR_DISTANCE, FAR_DISTANCE)
            }
        }
    }

    /// Central-difference gradient of the kernel sum.
    pub fn field_gradient(&self, p: Vec3) -> Vec3 {
        self.central_difference(p, |q| self.field(q))
    }

    /// Outward-pointing gradient of the active model's scalar.
    pub fn gradient(&self, p: Vec3) -> Vec3 {
        match self.config.model {
            FieldModel::SmoothUnion => self.central_difference(p, |q| self.smooth_union(q)),
            FieldModel::KernelSum => -self.field_gradient(p),
        }
    }

    /// Unit surface normal, or zero where the gradient vanishes.
    pub fn normal(&self, p: Vec3) -> Vec3 {
        self.gradient(p).normalize_or_zero()
    }

    /// Density for volumetric compositing. Zero far away, around one at the
    /// surface, larger inside.
    pub fn density(&self, p: Vec3) -> f32 {
        match self.config.model {
            FieldModel::KernelSum => self.field(p) / self.config.iso,
            FieldModel::SmoothUnion => {
                if self.sources.is_empty() {
                    return 0.0;
                }
                (1.0 - self.smooth_union(p) / self.config.blend).max(0.0)
            }
        }
    }

    /// Whether `p` is inside the surface.
    pub fn inside(&self, p: Vec3) -> bool {
        match self.config.model {
            FieldModel::KernelSum => self.field(p) >= self.config.iso,
            FieldModel::SmoothUnion => self.smooth_union(p) < 0.0,
        }
    }

    /// Radius around a source beyond which it contributes nothing.
    pub fn cutoff_radius(&self, source: &FieldSource) -> f32 {
        match self.config.model {
            FieldModel::KernelSum => source.radius * self.config.sigma * self.config.kernel.cutoff(),
            FieldModel::SmoothUnion => source.radius + self.config.blend,
        }
    }

    /// Box enclosing every source's cutoff sphere. `None` with no sources.
    pub fn bounds(&self) -> Option<Aabb> {
        self.sources
            .iter()
            .map(|s| Aabb::around(s.position, self.cutoff_radius(s)))
            .reduce(|a, b| a.union(&b))
    }

    fn central_difference(&self, p: Vec3, f: impl Fn(Vec3) -> f32) -> Vec3 {
        let e = self.config.gradient_epsilon;
        let inv = 1.0 / (2.0 * e);
        Vec3::new(
            f(p + Vec3::X * e) - f(p - Vec3::X * e),
            f(p + Vec3::Y * e) - f(p - Vec3::Y * e),
            f(p + Vec3::Z * e) - f(p - Vec3::Z * e),
        ) * inv
    }
}
