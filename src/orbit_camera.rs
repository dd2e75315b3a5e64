use glam::{Mat4, Vec3};
use winit::event::MouseButton;

use crate::camera::Camera;
use crate::input::Input;

/// Keeps the eye off the poles, where the up vector degenerates.
const POLAR_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum OrbitMode {
    /// Left drag rotates, the wheel zooms.
    #[default]
    Interactive,
    /// Spins around the target at `speed` radians per second; input is ignored.
    AutoRotate { speed: f32 },
}

/// Turntable controller circling a target point.
///
/// The eye sits on a sphere around `target`; `azimuth` turns it about the
/// world Y axis and `polar` lifts it above the horizon.
///
/// ```
/// use penumbra::{Camera, OrbitCamera, Vec3};
///
/// let orbit = OrbitCamera::new(Camera::default()).target(Vec3::ZERO).distance(20.0);
/// let camera = orbit.camera();
/// assert!((camera.position().length() - 20.0).abs() < 1e-4);
/// ```
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    /// Projection settings carried into every produced [`Camera`].
    pub lens: Camera,
    pub target: Vec3,
    pub distance: f32,
    pub azimuth: f32,
    pub polar: f32,
    pub mode: OrbitMode,
    /// Radians per pixel of drag.
    pub drag_speed: f32,
    /// Distance per wheel line.
    pub zoom_speed: f32,
    pub zoom_range: (f32, f32),
}

impl OrbitCamera {
    pub fn new(lens: Camera) -> Self {
        Self {
            lens,
            target: Vec3::ZERO,
            distance: 30.0,
            azimuth: 0.0,
            polar: 0.4,
            mode: OrbitMode::default(),
            drag_speed: 0.005,
            zoom_speed: 1.5,
            zoom_range: (2.0, 400.0),
        }
    }

    pub fn target(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    pub fn distance(mut self, distance: f32) -> Self {
        let (near, far) = self.zoom_range;
        self.distance = distance.clamp(near, far);
        self
    }

    pub fn polar(mut self, polar: f32) -> Self {
        self.polar = polar.clamp(-POLAR_LIMIT, POLAR_LIMIT);
        self
    }

    pub fn mode(mut self, mode: OrbitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Turns the eye by the given angles, clamping short of the poles.
    pub fn rotate(&mut self, azimuth: f32, polar: f32) {
        self.azimuth += azimuth;
        self.polar = (self.polar + polar).clamp(-POLAR_LIMIT, POLAR_LIMIT);
    }

    /// Moves toward the target by `amount`, within `zoom_range`.
    pub fn zoom(&mut self, amount: f32) {
        let (near, far) = self.zoom_range;
        self.distance = (self.distance - amount).clamp(near, far);
    }

    pub fn update(&mut self, input: &Input, dt: f32) {
        match self.mode {
            OrbitMode::Interactive => {
                if input.mouse_down(MouseButton::Left) {
                    let drag = input.mouse_delta() * self.drag_speed;
                    self.rotate(-drag.x, drag.y);
                }
                let lines = input.scroll_delta().y;
                if lines != 0.0 {
                    self.zoom(lines * self.zoom_speed);
                }
            }
            OrbitMode::AutoRotate { speed } => self.rotate(speed * dt, 0.0),
        }
    }

    /// World position of the eye.
    pub fn eye(&self) -> Vec3 {
        let (sin_polar, cos_polar) = self.polar.sin_cos();
        let (sin_azimuth, cos_azimuth) = self.azimuth.sin_cos();
        let direction = Vec3::new(cos_polar * sin_azimuth, sin_polar, cos_polar * cos_azimuth);
        self.target + self.distance * direction
    }

    /// The lens placed at [`eye`](Self::eye), facing the target.
    pub fn camera(&self) -> Camera {
        Camera {
            pose: Mat4::look_at_rh(self.eye(), self.target, Vec3::Y).inverse(),
            ..self.lens
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_rotate_advances_azimuth() {
        let mut orbit =
            OrbitCamera::new(Camera::default()).mode(OrbitMode::AutoRotate { speed: 2.0 });
        orbit.update(&Input::new(), 0.5);
        assert!((orbit.azimuth - 1.0).abs() < 1e-6);
    }

    #[test]
    fn camera_faces_target() {
        let orbit = OrbitCamera::new(Camera::default())
            .target(Vec3::new(1.0, 2.0, 3.0))
            .distance(10.0)
            .polar(10.0);
        assert!(orbit.polar < std::f32::consts::FRAC_PI_2);

        let camera = orbit.camera();
        let target = camera.view().transform_point3(orbit.target);
        assert!(target.truncate().length() < 1e-3);
        assert!((target.z + 10.0).abs() < 1e-3);
    }

    #[test]
    fn drag_rotates_and_scroll_zooms() {
        let mut input = Input::new();
        input.press_mouse(MouseButton::Left);
        input.move_mouse(glam::Vec2::new(100.0, 0.0));
        input.scroll(glam::Vec2::new(0.0, 2.0));

        let mut orbit = OrbitCamera::new(Camera::default()).distance(20.0);
        orbit.update(&input, 0.016);
        assert!((orbit.azimuth + 0.5).abs() < 1e-5);
        assert!((orbit.distance - 17.0).abs() < 1e-5);
    }

    #[test]
    fn zoom_stays_in_range() {
        let mut orbit = OrbitCamera::new(Camera::default());
        orbit.zoom(1e6);
        assert_eq!(orbit.distance, 2.0);
        orbit.zoom(-1e6);
        assert_eq!(orbit.distance, 400.0);
    }
}
