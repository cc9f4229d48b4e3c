//! Flat screen-space pass on the CPU.

use glam::Vec3;
use tracing::debug;

use super::{background, pixel_to_scene, FrameContext, RenderBackend, RenderConfig, SourceSnapshot, Surface};
use crate::error::RenderError;
use crate::field::{FieldConfig, FieldEvaluator};
use crate::noise;
use crate::visuals::{smoothstep, to_rgba8};

/// Depth below the iso edge at which the core tint is fully lifted.
const CORE_DEPTH: f32 = 0.15;

/// One field evaluation per pixel, no stepping.
///
/// The iso edge is antialiased over `edge_softness` pixels using the
/// signed-distance estimate, so edges stay one or two pixels wide at any
/// resolution.
#[derive(Debug)]
pub struct ScreenSpaceBackend {
    config: RenderConfig,
    field_config: FieldConfig,
    field: FieldEvaluator,
    revision: Option<u64>,
    surface: Surface,
}

impl ScreenSpaceBackend {
    pub fn new(config: RenderConfig, field_config: FieldConfig) -> Self {
        let field_config = field_config.clamped();
        Self {
            config: config.clamped(),
            field: FieldEvaluator::new(field_config.clone(), []),
            field_config,
            revision: None,
            surface: Surface::default(),
        }
    }

    /// Last drawn frame.
    pub fn frame(&self) -> &super::Frame {
        &self.surface.frame
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}

impl RenderBackend for ScreenSpaceBackend {
    fn name(&self) -> &'static str {
        "screen-space"
    }

    fn upload_sources(&mut self, snapshot: &SourceSnapshot) {
        self.field = FieldEvaluator::new(self.field_config.clone(), snapshot.field_sources(self.field_config.z_plane));
        self.revision = Some(snapshot.revision);
        debug!(revision = snapshot.revision, sources = snapshot.len(), "screen-space upload");
    }

    fn uploaded_revision(&self) -> Option<u64> {
        self.revision
    }

    fn draw_frame(&mut self, ctx: &FrameContext<'_>) -> Result<(), RenderError> {
        let config = &self.config;
        let field = &self.field;
        let frame = self.surface.acquire()?;
        let (width, height) = (frame.width, frame.height);
        let pixel = 2.0 / width.min(height) as f32;
        let edge = config.edge_softness * pixel;
        let z = field.config().z_plane;

        for y in 0..height {
            for x in 0..width {
                let uv = pixel_to_scene(x, y, width, height);
                let bg = background(uv, ctx.time, config.palette);
                let mut color = bg;

                if !field.is_empty() {
                    let sd = field.signed_distance(uv.extend(z));
                    let mask = smoothstep(-edge, edge, -sd);
                    if mask > 0.0 {
                        let depth = (-sd / CORE_DEPTH).clamp(0.0, 1.0);
                        let tint = config.palette.sample(0.45 + 0.5 * depth) * config.gain;
                        let lifted = tint + (Vec3::ONE - tint) * 0.15 * depth;
                        let texture = noise::fbm((uv * 2.0).extend(ctx.time * 0.15), 3);
                        let interior = bg.lerp(lifted, 0.55 + 0.35 * depth + 0.1 * texture);
                        color = bg.lerp(interior, mask);
                    }
                }

                color += Vec3::splat(config.grain * noise::grain(x, y, ctx.frame as u32));
                frame.put(x, y, to_rgba8(color, 1.0));
            }
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }

    fn dispose(&mut self) {
        self.surface.dispose();
        self.field = FieldEvaluator::new(self.field_config.clone(), []);
        self.revision = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Camera, SnapshotSource};
    use crate::source::SourceId;
    use crate::visuals::luminance;
    use glam::Vec2;

    fn snapshot(sources: &[(Vec2, f32)]) -> SourceSnapshot {
        SourceSnapshot {
            revision: 3,
            sources: sources
                .iter()
                .enumerate()
                .map(|(i, (p, r))| SnapshotSource {
                    id: SourceId(i as u32),
                    position: *p,
                    radius: *r,
                    weight: 1.0,
                    anchored: false,
                })
                .collect(),
        }
    }

    fn backend() -> ScreenSpaceBackend {
        ScreenSpaceBackend::new(RenderConfig::new().with_grain(0.0), FieldConfig::default())
    }

    fn rgb(px: [u8; 4]) -> Vec3 {
        Vec3::new(px[0] as f32, px[1] as f32, px[2] as f32) / 255.0
    }

    #[test]
    fn test_empty_snapshot_draws_background() {
        let mut backend = backend();
        backend.resize(16, 16);
        let snap = SourceSnapshot::default();
        backend.upload_sources(&snap);
        backend.draw_frame(&FrameContext::new(&snap, Camera::default(), 0.0, 0)).unwrap();
        assert!(backend.frame().pixels.chunks(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_zero_size_is_unavailable() {
        let mut backend = backend();
        let snap = SourceSnapshot::default();
        let err = backend.draw_frame(&FrameContext::new(&snap, Camera::default(), 0.0, 0));
        assert!(matches!(err, Err(RenderError::SurfaceUnavailable(_))));
    }

    #[test]
    fn test_blob_is_brighter_than_background() {
        let mut backend = backend();
        backend.resize(32, 32);
        let snap = snapshot(&[(Vec2::ZERO, 0.4)]);
        backend.upload_sources(&snap);
        assert_eq!(backend.uploaded_revision(), Some(3));
        backend.draw_frame(&FrameContext::new(&snap, Camera::default(), 0.0, 0)).unwrap();

        let centre = rgb(backend.frame().pixel(16, 16).unwrap());
        let corner = rgb(backend.frame().pixel(0, 0).unwrap());
        assert!(luminance(centre) > luminance(corner) + 0.1);
    }

    #[test]
    fn test_edge_is_antialiased() {
        let mut backend = backend();
        backend.resize(64, 64);
        let snap = snapshot(&[(Vec2::ZERO, 0.5)]);
        backend.upload_sources(&snap);
        backend.draw_frame(&FrameContext::new(&snap, Camera::default(), 0.0, 0)).unwrap();

        // Walk the middle row outward; luminance must not jump in one pixel
        // from blob to background.
        let row: Vec<f32> = (32..64)
            .map(|x| luminance(rgb(backend.frame().pixel(x, 32).unwrap())))
            .collect();
        let inside = row[0];
        let outside = row[row.len() - 1];
        let largest_jump = row.windows(2).map(|w| (w[0] - w[1]).abs()).fold(0.0, f32::max);
        assert!(largest_jump < (inside - outside).abs() * 0.9);
    }

    #[test]
    fn test_dispose_makes_surface_unavailable() {
        let mut backend = backend();
        backend.resize(8, 8);
        backend.dispose();
        let snap = SourceSnapshot::default();
        assert!(backend.draw_frame(&FrameContext::new(&snap, Camera::default(), 0.0, 0)).is_err());
        assert_eq!(backend.uploaded_revision(), None);
    }
}
