//! Camera for the sphere-traced view.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Orbit camera looking at the source plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    /// Horizontal rotation angle in radians.
    pub yaw: f32,
    /// Vertical rotation angle in radians.
    pub pitch: f32,
    /// Distance from the target point.
    pub distance: f32,
    /// Point the camera orbits around.
    pub target: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
}

impl Camera {
    /// Head-on view that frames the `[-1, 1]` scene square.
    pub fn new() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            distance: 2.5,
            target: Vec3::ZERO,
            fov_y: 45f32.to_radians(),
        }
    }

    /// Calculate the camera's world position.
    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.pitch.cos() * self.yaw.sin();
        let y = self.distance * self.pitch.sin();
        let z = self.distance * self.pitch.cos() * self.yaw.cos();
        self.target + Vec3::new(x, y, z)
    }

    /// World-space ray through `ndc` (x right, y up, both in `[-1, 1]`).
    ///
    /// Returns `(origin, unit direction)`.
    pub fn ray(&self, ndc: Vec2, aspect: f32) -> (Vec3, Vec3) {
        let origin = self.position();
        let forward = (self.target - origin).normalize_or(Vec3::NEG_Z);
        let right = forward.cross(Vec3::Y).normalize_or(Vec3::X);
        let up = right.cross(forward);
        let half_h = (self.fov_y * 0.5).tan();
        let dir = forward + right * ndc.x * half_h * aspect + up * ndc.y * half_h;
        (origin, dir.normalize())
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera_faces_the_plane() {
        let camera = Camera::new();
        assert!((camera.position() - Vec3::new(0.0, 0.0, 2.5)).length() < 1e-5);
        let (origin, dir) = camera.ray(Vec2::ZERO, 1.0);
        assert_eq!(origin, camera.position());
        assert!((dir - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn test_corner_rays_cover_the_scene() {
        let camera = Camera::new();
        let (origin, dir) = camera.ray(Vec2::ONE, 1.0);
        // Intersect with z = 0.
        let t = -origin.z / dir.z;
        let hit = origin + dir * t;
        assert!(hit.x >= 1.0 && hit.y >= 1.0);
        assert!(dir.x > 0.0 && dir.y > 0.0);
    }
}
