//! Rendering of the committed source snapshot.
//!
//! Every backend implements [`RenderBackend`]. The engine uploads a
//! [`SourceSnapshot`] whenever its revision moves past what the backend last
//! saw, then asks for one frame per tick through a [`FrameContext`].
//!
//! Backends in this crate:
//!
//! - [`ScreenSpaceBackend`]: flat 2D pass on the CPU, one field evaluation
//!   per pixel with an antialiased iso edge.
//! - [`SphereTraceBackend`]: 3D on the CPU, either a sphere-traced surface or
//!   Beer-Lambert volume compositing.
//! - [`GpuBackend`](crate::gpu::GpuBackend): the screen-space pass as a WGSL
//!   fragment shader.
//!
//! # Example
//!
//! ```ignore
//! let mut backend = ScreenSpaceBackend::new(RenderConfig::default(), FieldConfig::default());
//! backend.resize(320, 240);
//! backend.upload_sources(&snapshot);
//! backend.draw_frame(&FrameContext::new(&snapshot, Camera::default(), 0.0, 0))?;
//! backend.frame().save_png("frame.png")?;
//! ```

pub mod camera;
mod screen;
mod trace;

use std::path::Path;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::field::FieldSource;
use crate::noise;
use crate::source::SourceId;
use crate::tree::SourceTree;
use crate::visuals::Palette;

pub use camera::Camera;
pub use screen::ScreenSpaceBackend;
pub use trace::{SphereTraceBackend, TraceHit};

/// A drawing target fed with source snapshots.
pub trait RenderBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Replace the source set drawn by subsequent frames.
    fn upload_sources(&mut self, snapshot: &SourceSnapshot);

    /// Revision of the last uploaded snapshot.
    fn uploaded_revision(&self) -> Option<u64>;

    /// Draw one frame.
    ///
    /// Returns [`RenderError::SurfaceUnavailable`] when there is nothing to
    /// draw into (zero-sized, lost or disposed). Callers retry next frame.
    fn draw_frame(&mut self, ctx: &FrameContext<'_>) -> Result<(), RenderError>;

    /// Resize the drawing surface. Zero sizes are accepted and make
    /// `draw_frame` report an unavailable surface until resized again.
    fn resize(&mut self, width: u32, height: u32);

    /// Release resources. Later frames report an unavailable surface.
    fn dispose(&mut self);
}

/// One source as committed for rendering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapshotSource {
    pub id: SourceId,
    pub position: Vec2,
    pub radius: f32,
    pub weight: f32,
    pub anchored: bool,
}

/// Immutable, versioned copy of the committed source positions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceSnapshot {
    /// Bumped on every committed change.
    pub revision: u64,
    pub sources: Vec<SnapshotSource>,
}

impl SourceSnapshot {
    /// Snapshot of a tree's committed positions. Anchors win over positions.
    pub fn from_tree(tree: &SourceTree, revision: u64) -> Self {
        let sources = tree
            .iter()
            .map(|s| SnapshotSource {
                id: s.id,
                position: s.anchor.unwrap_or(s.position),
                radius: s.radius,
                weight: s.weight,
                anchored: s.is_anchored(),
            })
            .collect();
        Self { revision, sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Sources lifted onto the `z` plane for field evaluation.
    pub fn field_sources(&self, z: f32) -> Vec<FieldSource> {
        self.sources
            .iter()
            .map(|s| FieldSource::new(s.position.extend(z), s.radius, s.weight))
            .collect()
    }

    /// Source whose disk contains `p`, preferring the closest centre.
    pub fn pick(&self, p: Vec2) -> Option<SourceId> {
        self.sources
            .iter()
            .filter(|s| s.position.distance(p) <= s.radius)
            .min_by(|a, b| a.position.distance(p).total_cmp(&b.position.distance(p)))
            .map(|s| s.id)
    }

    /// Closest other source to `id`.
    pub fn nearest_to(&self, id: SourceId) -> Option<SourceId> {
        let from = self.sources.iter().find(|s| s.id == id)?.position;
        self.sources
            .iter()
            .filter(|s| s.id != id)
            .min_by(|a, b| a.position.distance(from).total_cmp(&b.position.distance(from)))
            .map(|s| s.id)
    }
}

/// Everything a backend needs to draw one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext<'a> {
    pub snapshot: &'a SourceSnapshot,
    pub camera: Camera,
    /// Seconds since the engine started.
    pub time: f32,
    pub frame: u64,
}

impl<'a> FrameContext<'a> {
    pub fn new(snapshot: &'a SourceSnapshot, camera: Camera, time: f32, frame: u64) -> Self {
        Self {
            snapshot,
            camera,
            time,
            frame,
        }
    }
}

/// How [`SphereTraceBackend`] draws the field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Opaque shaded surface.
    #[default]
    Surface,
    /// Translucent volume.
    Volume,
}

/// Shading knobs shared by all backends. Every setter clamps.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub palette: Palette,
    /// Edge width in pixels (0.25-4).
    pub edge_softness: f32,
    /// Brightness multiplier (0.2-3).
    pub gain: f32,
    /// Direction towards the light.
    pub light_dir: Vec3,
    pub albedo: f32,
    pub ambient: f32,
    /// Edge transparency strength (0-1).
    pub fresnel: f32,
    /// Film grain amplitude (0-0.2).
    pub grain: f32,
    /// Sphere-trace step budget (8-1024).
    pub max_steps: u32,
    pub min_step: f32,
    pub max_step: f32,
    pub hit_epsilon: f32,
    /// Volume sample spacing.
    pub volume_step: f32,
    /// Volume extinction (0.1-4).
    pub absorption: f32,
    /// Normalized density where the glow begins.
    pub glow_threshold: f32,
    /// Normalized density where the core saturates.
    pub core_threshold: f32,
    /// Accumulated opacity that ends a volume ray.
    pub opacity_cutoff: f32,
    pub trace_mode: TraceMode,
    pub camera: Camera,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            palette: Palette::Mochi,
            edge_softness: 1.5,
            gain: 1.0,
            light_dir: Vec3::new(0.8, 0.9, 0.6),
            albedo: 0.9,
            ambient: 0.22,
            fresnel: 0.35,
            grain: 0.06,
            max_steps: 256,
            min_step: 0.002,
            max_step: 0.25,
            hit_epsilon: 0.001,
            volume_step: 0.02,
            absorption: 1.2,
            glow_threshold: 0.35,
            core_threshold: 1.0,
            opacity_cutoff: 0.95,
            trace_mode: TraceMode::Surface,
            camera: Camera::default(),
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    /// Set edge softness in pixels (clamped to 0.25-4).
    pub fn with_edge_softness(mut self, px: f32) -> Self {
        self.edge_softness = px.clamp(0.25, 4.0);
        self
    }

    /// Set brightness gain (clamped to 0.2-3).
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.clamp(0.2, 3.0);
        self
    }

    /// Set the light direction. Degenerate vectors fall back to the default.
    pub fn with_light_dir(mut self, dir: Vec3) -> Self {
        self.light_dir = dir.normalize_or(Vec3::new(0.8, 0.9, 0.6).normalize());
        self
    }

    pub fn with_albedo(mut self, albedo: f32) -> Self {
        self.albedo = albedo.clamp(0.0, 1.0);
        self
    }

    pub fn with_ambient(mut self, ambient: f32) -> Self {
        self.ambient = ambient.clamp(0.0, 1.0);
        self
    }

    pub fn with_fresnel(mut self, strength: f32) -> Self {
        self.fresnel = strength.clamp(0.0, 1.0);
        self
    }

    /// Set grain amplitude (clamped to 0-0.2).
    pub fn with_grain(mut self, grain: f32) -> Self {
        self.grain = grain.clamp(0.0, 0.2);
        self
    }

    /// Set the sphere-trace step budget (clamped to 8-1024).
    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps.clamp(8, 1024);
        self
    }

    /// Set the step range. `max` is raised to at least `min`.
    pub fn with_step_range(mut self, min: f32, max: f32) -> Self {
        self.min_step = min.clamp(1.0e-4, 0.05);
        self.max_step = max.clamp(0.01, 1.0).max(self.min_step);
        self
    }

    pub fn with_hit_epsilon(mut self, eps: f32) -> Self {
        self.hit_epsilon = eps.clamp(1.0e-5, 0.01);
        self
    }

    pub fn with_volume_step(mut self, step: f32) -> Self {
        self.volume_step = step.clamp(0.005, 0.2);
        self
    }

    /// Set volume extinction (clamped to 0.1-4).
    pub fn with_absorption(mut self, absorption: f32) -> Self {
        self.absorption = absorption.clamp(0.1, 4.0);
        self
    }

    /// Set the glow and core thresholds. The core is kept above the glow.
    pub fn with_density_thresholds(mut self, glow: f32, core: f32) -> Self {
        self.glow_threshold = glow.clamp(0.0, 2.0);
        self.core_threshold = core.clamp(self.glow_threshold + 0.01, 4.0);
        self
    }

    /// Set the opacity that ends a volume ray (clamped to 0.5-0.999).
    pub fn with_opacity_cutoff(mut self, cutoff: f32) -> Self {
        self.opacity_cutoff = cutoff.clamp(0.5, 0.999);
        self
    }

    pub fn with_trace_mode(mut self, mode: TraceMode) -> Self {
        self.trace_mode = mode;
        self
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }

    pub fn clamped(&self) -> Self {
        Self::new()
            .with_palette(self.palette)
            .with_edge_softness(self.edge_softness)
            .with_gain(self.gain)
            .with_light_dir(self.light_dir)
            .with_albedo(self.albedo)
            .with_ambient(self.ambient)
            .with_fresnel(self.fresnel)
            .with_grain(self.grain)
            .with_max_steps(self.max_steps)
            .with_step_range(self.min_step, self.max_step)
            .with_hit_epsilon(self.hit_epsilon)
            .with_volume_step(self.volume_step)
            .with_absorption(self.absorption)
            .with_density_thresholds(self.glow_threshold, self.core_threshold)
            .with_opacity_cutoff(self.opacity_cutoff)
            .with_trace_mode(self.trace_mode)
            .with_camera(self.camera)
    }
}

/// An RGBA8 image produced by a CPU backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, top row first.
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels.get(i..i + 4).and_then(|p| p.try_into().ok())
    }

    pub(crate) fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        if let Some(px) = self.pixels.get_mut(i..i + 4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Copy into an `image` buffer.
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        let img = self.to_image().ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;
        img.save_with_format(path, image::ImageFormat::Png)
    }
}

/// Map pixel centre `(x, y)` to scene coordinates, the short side spanning
/// `[-1, 1]`. Y points up.
pub(crate) fn pixel_to_scene(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    let short = width.min(height).max(1) as f32;
    Vec2::new(
        (2.0 * (x as f32 + 0.5) - width as f32) / short,
        (height as f32 - 2.0 * (y as f32 + 0.5)) / short,
    )
}

/// Slowly drifting fbm backdrop in palette tones.
pub(crate) fn background(uv: Vec2, time: f32, palette: Palette) -> Vec3 {
    let base = palette.background();
    let n = noise::fbm(uv.extend(time * 0.2) * Vec3::new(2.6, 2.6, 1.0), 4);
    let g = ((uv.y + 0.9) / 2.0).clamp(0.0, 1.0);
    let shade = base + Vec3::splat(0.02) - Vec3::splat(0.05) * g;
    shade * (0.85 + 0.3 * n)
}

/// Shared viewport bookkeeping for the CPU backends.
#[derive(Debug, Default)]
pub(crate) struct Surface {
    pub frame: Frame,
    pub disposed: bool,
}

impl Surface {
    pub fn resize(&mut self, width: u32, height: u32) {
        if width != self.frame.width || height != self.frame.height {
            self.frame = Frame::new(width, height);
        }
    }

    pub fn acquire(&mut self) -> Result<&mut Frame, RenderError> {
        if self.disposed {
            return Err(RenderError::SurfaceUnavailable("backend disposed".into()));
        }
        if self.frame.is_empty() {
            return Err(RenderError::SurfaceUnavailable(format!(
                "zero-sized surface {}x{}",
                self.frame.width, self.frame.height
            )));
        }
        Ok(&mut self.frame)
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
        self.frame = Frame::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_to_scene_is_centred() {
        let tl = pixel_to_scene(0, 0, 100, 100);
        let br = pixel_to_scene(99, 99, 100, 100);
        assert!((tl - Vec2::new(-0.99, 0.99)).length() < 1e-5);
        assert!((br - Vec2::new(0.99, -0.99)).length() < 1e-5);
        // Wide frames extend past ±1 horizontally.
        assert!(pixel_to_scene(0, 0, 200, 100).x < -1.9);
    }

    #[test]
    fn test_config_clamps() {
        let c = RenderConfig::new()
            .with_max_steps(1)
            .with_grain(1.0)
            .with_density_thresholds(0.8, 0.2)
            .with_step_range(0.04, 0.001);
        assert_eq!(c.max_steps, 8);
        assert_eq!(c.grain, 0.2);
        assert!(c.core_threshold > c.glow_threshold);
        assert!(c.max_step >= c.min_step);
    }

    #[test]
    fn test_snapshot_pick_and_nearest() {
        let snapshot = SourceSnapshot {
            revision: 1,
            sources: vec![
                SnapshotSource {
                    id: SourceId(0),
                    position: Vec2::ZERO,
                    radius: 0.3,
                    weight: 1.0,
                    anchored: false,
                },
                SnapshotSource {
                    id: SourceId(1),
                    position: Vec2::new(0.5, 0.0),
                    radius: 0.2,
                    weight: 1.0,
                    anchored: false,
                },
                SnapshotSource {
                    id: SourceId(2),
                    position: Vec2::new(-0.9, 0.0),
                    radius: 0.2,
                    weight: 1.0,
                    anchored: true,
                },
            ],
        };
        assert_eq!(snapshot.pick(Vec2::new(0.45, 0.05)), Some(SourceId(1)));
        assert_eq!(snapshot.pick(Vec2::new(0.0, 0.9)), None);
        assert_eq!(snapshot.nearest_to(SourceId(0)), Some(SourceId(1)));
        assert_eq!(snapshot.field_sources(0.5)[2].position, Vec3::new(-0.9, 0.0, 0.5));
    }

    #[test]
    fn test_zero_surface_is_unavailable() {
        let mut surface = Surface::default();
        assert!(matches!(surface.acquire(), Err(RenderError::SurfaceUnavailable(_))));
        surface.resize(4, 4);
        assert!(surface.acquire().is_ok());
        surface.dispose();
        assert!(surface.acquire().is_err());
    }

    #[test]
    fn test_frame_pixels() {
        let mut frame = Frame::new(3, 2);
        frame.put(2, 1, [1, 2, 3, 4]);
        assert_eq!(frame.pixel(2, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(3, 0), None);
        let img = frame.to_image().unwrap();
        assert_eq!(img.get_pixel(2, 1).0, [1, 2, 3, 4]);
    }
}
