use glam::{Mat4, Vec3};

use crate::config::CameraConfig;

/// A perspective viewer.
///
/// The pose is the camera's world matrix; the view matrix handed to the
/// pipelines is its inverse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub pose: Mat4,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

impl Camera {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            pose: Mat4::IDENTITY,
            fov_y: config.fov_degrees.to_radians(),
            near: config.near,
            far: config.far,
        }
    }

    /// Places the camera at `eye` facing `target`.
    pub fn looking_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.pose = Mat4::look_at_rh(eye, target, up).inverse();
        self
    }

    pub fn position(&self) -> Vec3 {
        self.pose.w_axis.truncate()
    }

    pub fn view(&self) -> Mat4 {
        self.pose.inverse()
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far)
    }
}
