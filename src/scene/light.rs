use glam::{Mat4, Vec3};

use crate::config::LightConfig;

/// Perspective parameters shared by all six faces of a light's shadow cube.
///
/// The aspect ratio is always 1 because cube faces are square, and the field
/// of view is always [`CUBE_FACE_FOV`](Self::CUBE_FACE_FOV) so the six faces
/// tile every direction exactly once.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightProjection {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl LightProjection {
    pub const CUBE_FACE_FOV: f32 = std::f32::consts::FRAC_PI_2;
    pub const CUBE_FACE_FOV_DEGREES: f32 = 90.0;

    /// True when the six faces built from this projection cover the sphere
    /// without gaps or overlap.
    pub fn tiles_cube(&self) -> bool {
        (self.fov_y - Self::CUBE_FACE_FOV).abs() <= 1e-4
    }
}

impl Default for LightProjection {
    fn default() -> Self {
        Self::from(&LightConfig::default())
    }
}

impl From<&LightConfig> for LightProjection {
    fn from(config: &LightConfig) -> Self {
        Self {
            fov_y: config.fov_degrees.to_radians(),
            near: config.near,
            far: config.far,
        }
    }
}

/// An omnidirectional point light.
///
/// World placement comes from the node that carries the light. The far plane
/// of the projection is the distance used to normalize shadow depth, both when
/// writing the cube map and when comparing against it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub ambient: Vec3,
    projection: LightProjection,
}

impl Default for Light {
    fn default() -> Self {
        Self::new(Vec3::ONE, Vec3::splat(0.05))
    }
}

impl Light {
    pub fn new(color: Vec3, ambient: Vec3) -> Self {
        Self {
            color,
            ambient,
            projection: LightProjection::default(),
        }
    }

    pub fn with_projection(mut self, projection: LightProjection) -> Self {
        self.set_projection(projection);
        self
    }

    /// Replaces the projection. Planes that cannot form a frustum, or a field
    /// of view other than 90 degrees, are rejected with a warning and the old
    /// projection is kept.
    pub fn set_projection(&mut self, projection: LightProjection) {
        if projection.near <= 0.0 || projection.far <= projection.near {
            log::warn!("ignoring degenerate light projection {projection:?}");
            return;
        }
        if !projection.tiles_cube() {
            log::warn!(
                "ignoring light projection with fov {:.1} degrees, cube faces need 90",
                projection.fov_y.to_degrees()
            );
            return;
        }
        self.projection = projection;
    }

    pub fn projection(&self) -> LightProjection {
        self.projection
    }

    /// The perspective matrix used for every cube face.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.projection.fov_y,
            1.0,
            self.projection.near,
            self.projection.far,
        )
    }

    pub fn near_plane(&self) -> f32 {
        self.projection.near
    }

    pub fn far_plane(&self) -> f32 {
        self.projection.far
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_projection_matches_config() {
        let light = Light::default();
        assert_eq!(light.far_plane(), 125.0);
        assert_eq!(light.near_plane(), 1.0);
        approx::assert_abs_diff_eq!(light.projection().fov_y, std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn degenerate_projection_is_ignored() {
        let mut light = Light::default();
        light.set_projection(LightProjection {
            fov_y: 1.0,
            near: 5.0,
            far: 2.0,
        });
        assert_eq!(light.projection(), LightProjection::default());
    }

    #[test]
    fn narrow_fov_is_rejected() {
        let mut light = Light::default();
        light.set_projection(LightProjection {
            fov_y: 60f32.to_radians(),
            near: 1.0,
            far: 300.0,
        });
        assert_eq!(light.projection(), LightProjection::default());
        assert!(light.projection().tiles_cube());

        // A direction 40 degrees above the +X axis must still land on a face.
        let faces = crate::pipeline::cube_face_views(Vec3::ZERO);
        let projection = light.projection_matrix();
        let point = glam::Vec4::new(10.0, 10.0 * 40f32.to_radians().tan(), 0.0, 1.0);
        let covered = faces.iter().any(|view| {
            let clip = projection * *view * point;
            clip.w > 0.0 && clip.x.abs() <= clip.w && clip.y.abs() <= clip.w
        });
        assert!(covered);
    }

    #[test]
    fn far_plane_maps_to_depth_one() {
        let light = Light::default().with_projection(LightProjection {
            fov_y: std::f32::consts::FRAC_PI_2,
            near: 1.0,
            far: 200.0,
        });
        let clip = light.projection_matrix() * glam::Vec4::new(0.0, 0.0, -200.0, 1.0);
        approx::assert_abs_diff_eq!(clip.z / clip.w, 1.0, epsilon = 1e-5);
    }
}
