//! Sphere tracing and volume compositing on the CPU.

use glam::{Vec2, Vec3};
use tracing::debug;

use super::{background, pixel_to_scene, FrameContext, RenderBackend, RenderConfig, SourceSnapshot, Surface, TraceMode};
use crate::error::RenderError;
use crate::field::{Aabb, FieldConfig, FieldEvaluator};
use crate::noise;
use crate::visuals::{smoothstep, to_rgba8};

/// Converts normalized density into extinction per unit length.
const EXTINCTION_SCALE: f32 = 10.0;

/// 3D view of the field through a [`Camera`](super::Camera).
///
/// Rays are clipped to the box around every source's cutoff sphere, so empty
/// space costs one slab test per pixel.
#[derive(Debug)]
pub struct SphereTraceBackend {
    config: RenderConfig,
    field_config: FieldConfig,
    field: FieldEvaluator,
    bounds: Option<Aabb>,
    revision: Option<u64>,
    surface: Surface,
}

/// Result of marching one ray towards the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TraceHit {
    Hit { t: f32, steps: u32 },
    Miss,
}

impl SphereTraceBackend {
    pub fn new(config: RenderConfig, field_config: FieldConfig) -> Self {
        let field_config = field_config.clamped();
        Self {
            config: config.clamped(),
            field: FieldEvaluator::new(field_config.clone(), []),
            field_config,
            bounds: None,
            revision: None,
            surface: Surface::default(),
        }
    }

    pub fn frame(&self) -> &super::Frame {
        &self.surface.frame
    }

    pub fn mode(&self) -> TraceMode {
        self.config.trace_mode
    }

    pub fn set_mode(&mut self, mode: TraceMode) {
        self.config.trace_mode = mode;
    }

    /// March from `origin` along `dir` between `t0` and `t1`.
    ///
    /// The kernel-sum distance is only an estimate and can step past the
    /// surface; a step that lands inside is refined by bisection against the
    /// last sample outside.
    pub fn trace(&self, origin: Vec3, dir: Vec3, t0: f32, t1: f32) -> TraceHit {
        let c = &self.config;
        let mut t = t0;
        let mut outside = t0;
        for step in 0..c.max_steps {
            let d = self.field.signed_distance(origin + dir * t);
            if d.abs() < c.hit_epsilon {
                return TraceHit::Hit { t, steps: step };
            }
            if d < 0.0 {
                return TraceHit::Hit {
                    t: self.bisect(origin, dir, outside, t),
                    steps: step,
                };
            }
            outside = t;
            t += d.clamp(c.min_step, c.max_step);
            if t > t1 {
                break;
            }
        }
        TraceHit::Miss
    }

    fn bisect(&self, origin: Vec3, dir: Vec3, mut lo: f32, mut hi: f32) -> f32 {
        for _ in 0..16 {
            let mid = 0.5 * (lo + hi);
            if self.field.signed_distance(origin + dir * mid) < 0.0 {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        0.5 * (lo + hi)
    }

    fn shade_surface(&self, p: Vec3, dir: Vec3, bg: Vec3) -> Vec3 {
        let c = &self.config;
        let n = self.field.normal(p);
        let lambert = n.dot(c.light_dir.normalize_or_zero()).max(0.0);
        let base = c.palette.sample(0.65) * c.albedo;
        let lit = base * (c.ambient + (1.0 - c.ambient) * lambert) * c.gain;
        let facing = n.dot(-dir).clamp(0.0, 1.0);
        let fresnel = (1.0 - facing).powi(3) * c.fresnel;
        let grain = (noise::value_noise(p * 40.0) - 0.5) * c.grain;
        bg.lerp(lit, 1.0 - fresnel) + Vec3::splat(grain)
    }

    /// Three zones: nothing below the glow threshold, a smooth ramp up to the
    /// core threshold, saturated above it.
    fn density_curve(&self, density: f32) -> f32 {
        let c = &self.config;
        if density < c.glow_threshold {
            0.0
        } else {
            smoothstep(c.glow_threshold, c.core_threshold, density)
        }
    }

    /// Front-to-back Beer-Lambert compositing. Returns `(colour, opacity)`.
    pub fn composite(&self, origin: Vec3, dir: Vec3, t0: f32, t1: f32) -> (Vec3, f32) {
        let c = &self.config;
        let mut color = Vec3::ZERO;
        let mut transmittance = 1.0;
        let mut t = t0;
        let mut steps = 0;
        while t < t1 && steps < c.max_steps {
            let zone = self.density_curve(self.field.density(origin + dir * t));
            if zone > 0.0 {
                let alpha = 1.0 - (-c.absorption * EXTINCTION_SCALE * zone * c.volume_step).exp();
                let emit = c.palette.sample(0.3 + 0.7 * zone) * c.gain;
                color += transmittance * alpha * emit;
                transmittance *= 1.0 - alpha;
                if 1.0 - transmittance > c.opacity_cutoff {
                    break;
                }
            }
            t += c.volume_step;
            steps += 1;
        }
        (color, 1.0 - transmittance)
    }
}

impl RenderBackend for SphereTraceBackend {
    fn name(&self) -> &'static str {
        match self.config.trace_mode {
            TraceMode::Surface => "sphere-trace",
            TraceMode::Volume => "volume",
        }
    }

    fn upload_sources(&mut self, snapshot: &SourceSnapshot) {
        self.field = FieldEvaluator::new(self.field_config.clone(), snapshot.field_sources(self.field_config.z_plane));
        self.bounds = self.field.bounds().map(|b| b.expand(self.config.hit_epsilon));
        self.revision = Some(snapshot.revision);
        debug!(revision = snapshot.revision, sources = snapshot.len(), bounds = ?self.bounds, "trace upload");
    }

    fn uploaded_revision(&self) -> Option<u64> {
        self.revision
    }

    fn draw_frame(&mut self, ctx: &FrameContext<'_>) -> Result<(), RenderError> {
        let (width, height) = {
            let frame = self.surface.acquire()?;
            (frame.width, frame.height)
        };
        let aspect = width as f32 / height as f32;
        let short = width.min(height) as f32;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);

        for y in 0..height {
            for x in 0..width {
                let uv = pixel_to_scene(x, y, width, height);
                let bg = background(uv, ctx.time, self.config.palette);
                let ndc = Vec2::new(uv.x * short / width as f32, uv.y * short / height as f32);
                let (origin, dir) = ctx.camera.ray(ndc, aspect);

                let mut color = bg;
                if let Some((t0, t1)) = self.bounds.and_then(|b| b.intersect_ray(origin, dir)) {
                    color = match self.config.trace_mode {
                        TraceMode::Surface => match self.trace(origin, dir, t0, t1) {
                            TraceHit::Hit { t, .. } => self.shade_surface(origin + dir * t, dir, bg),
                            TraceHit::Miss => bg,
                        },
                        TraceMode::Volume => {
                            let (c, opacity) = self.composite(origin, dir, t0, t1);
                            c + bg * (1.0 - opacity)
                        }
                    };
                }
                color += Vec3::splat(self.config.grain * noise::grain(x, y, ctx.frame as u32) * 0.5);
                pixels.push(to_rgba8(color, 1.0));
            }
        }

        let frame = self.surface.acquire()?;
        for (i, px) in pixels.into_iter().enumerate() {
            frame.put(i as u32 % width, i as u32 / width, px);
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }

    fn dispose(&mut self) {
        self.surface.dispose();
        self.field = FieldEvaluator::new(self.field_config.clone(), []);
        self.bounds = None;
        self.revision = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldModel;
    use crate::render::{Camera, SnapshotSource};
    use crate::source::SourceId;
    use crate::visuals::luminance;

    fn single(radius: f32) -> SourceSnapshot {
        SourceSnapshot {
            revision: 1,
            sources: vec![SnapshotSource {
                id: SourceId(0),
                position: Vec2::ZERO,
                radius,
                weight: 1.0,
                anchored: false,
            }],
        }
    }

    fn backend(mode: TraceMode, model: FieldModel) -> SphereTraceBackend {
        SphereTraceBackend::new(
            RenderConfig::new().with_trace_mode(mode).with_grain(0.0),
            FieldConfig::new().with_model(model),
        )
    }

    #[test]
    fn test_trace_hits_sphere_surface() {
        let mut backend = backend(TraceMode::Surface, FieldModel::SmoothUnion);
        backend.upload_sources(&single(0.4));
        let origin = Vec3::new(0.0, 0.0, 2.5);
        let (t0, t1) = backend.bounds.unwrap().intersect_ray(origin, Vec3::NEG_Z).unwrap();
        match backend.trace(origin, Vec3::NEG_Z, t0, t1) {
            TraceHit::Hit { t, steps } => {
                assert!((t - 2.1).abs() < 0.01, "hit at {t}");
                assert!(steps < 256);
            }
            TraceHit::Miss => panic!("expected a hit"),
        }
        let miss = backend.trace(Vec3::new(0.9, 0.9, 2.5), Vec3::NEG_Z, 0.0, 5.0);
        assert_eq!(miss, TraceHit::Miss);
    }

    #[test]
    fn test_kernel_field_is_traceable() {
        let mut backend = backend(TraceMode::Surface, FieldModel::KernelSum);
        backend.upload_sources(&single(0.4));
        let origin = Vec3::new(0.0, 0.0, 2.5);
        let (t0, t1) = backend.bounds.unwrap().intersect_ray(origin, Vec3::NEG_Z).unwrap();
        assert!(matches!(backend.trace(origin, Vec3::NEG_Z, t0, t1), TraceHit::Hit { .. }));
    }

    #[test]
    fn test_volume_opacity_is_bounded() {
        let mut backend = backend(TraceMode::Volume, FieldModel::KernelSum);
        backend.upload_sources(&single(0.4));
        let origin = Vec3::new(0.0, 0.0, 2.5);
        let (t0, t1) = backend.bounds.unwrap().intersect_ray(origin, Vec3::NEG_Z).unwrap();
        let (color, opacity) = backend.composite(origin, Vec3::NEG_Z, t0, t1);
        assert!(opacity > 0.5 && opacity <= 1.0, "opacity {opacity}");
        assert!(color.is_finite());

        // A ray that stays outside the glow zone composites nothing.
        let (_, none) = backend.composite(Vec3::new(0.95, 0.95, 2.5), Vec3::NEG_Z, 0.0, 5.0);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_density_curve_zones() {
        let backend = backend(TraceMode::Volume, FieldModel::KernelSum);
        assert_eq!(backend.density_curve(0.1), 0.0);
        assert_eq!(backend.density_curve(5.0), 1.0);
        let mid = backend.density_curve(0.7);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_frames_render_in_both_modes() {
        for mode in [TraceMode::Surface, TraceMode::Volume] {
            let mut backend = backend(mode, FieldModel::KernelSum);
            backend.resize(24, 24);
            let snap = single(0.45);
            backend.upload_sources(&snap);
            backend.draw_frame(&FrameContext::new(&snap, Camera::default(), 0.0, 0)).unwrap();

            let px = |x, y| {
                let p = backend.frame().pixel(x, y).unwrap();
                luminance(Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32) / 255.0)
            };
            assert!(px(12, 12) > px(0, 0), "{mode:?}");
        }
    }

    #[test]
    fn test_empty_and_zero_sized() {
        let mut backend = backend(TraceMode::Surface, FieldModel::KernelSum);
        let snap = SourceSnapshot::default();
        backend.upload_sources(&snap);
        let ctx = FrameContext::new(&snap, Camera::default(), 0.0, 0);
        assert!(matches!(backend.draw_frame(&ctx), Err(RenderError::SurfaceUnavailable(_))));
        backend.resize(8, 8);
        backend.draw_frame(&ctx).unwrap();
    }
}
