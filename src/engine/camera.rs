use std::f32::consts::FRAC_PI_2;

use cgmath::{Angle, Deg, Matrix4, Point3, Rad, Vector3};
use winit::{
    dpi::PhysicalPosition,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
};

#[rustfmt::skip]
const OPENGL_TO_WGPU_MATRIX: cgmath::Matrix4<f32> = cgmath::Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.5,
    0.0, 0.0, 0.0, 1.0,
);

const DEFAULT_YAW: f32 = -FRAC_PI_2 / 2.0;
const DEFAULT_PITCH: f32 = FRAC_PI_2 / 3.0;
const DEFAULT_DISTANCE: f32 = 2.0;

const MIN_DISTANCE: f32 = 0.05;
const MAX_DISTANCE: f32 = 50.0;
const MAX_PITCH: f32 = FRAC_PI_2 - 0.01;

/// Radians per pixel of mouse drag.
const DRAG_SPEED: f32 = 0.005;
/// Radians per arrow key press.
const KEY_STEP: f32 = 0.05;
const ZOOM_STEP: f32 = 0.9;

/// Orbit camera around a target with z up.
pub struct Camera {
    target: Point3<f32>,
    yaw: f32,
    pitch: f32,
    distance: f32,
    aspect: f32,
    fovy: f32,
    znear: f32,
    zfar: f32,

    is_dragging: bool,
    last_cursor: Option<PhysicalPosition<f64>>,
}

impl Camera {
    pub fn new(aspect: f32, fovy: f32) -> Self {
        Self {
            target: Point3::new(0.0, 0.0, 0.0),
            yaw: DEFAULT_YAW,
            pitch: DEFAULT_PITCH,
            distance: DEFAULT_DISTANCE,
            aspect,
            fovy,
            znear: 0.01,
            zfar: 100.0,
            is_dragging: false,
            last_cursor: None,
        }
    }

    /// Returns true when the event moved the camera or changed drag state.
    pub fn process_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => self.is_dragging = *state == ElementState::Pressed,
            WindowEvent::CursorMoved { position, .. } => {
                let last = self.last_cursor.replace(*position);
                match last {
                    Some(last) if self.is_dragging => self.rotate(
                        (position.x - last.x) as f32 * DRAG_SPEED,
                        (position.y - last.y) as f32 * DRAG_SPEED,
                    ),
                    _ => return false,
                }
            }
            WindowEvent::MouseWheel { delta, .. } => match delta {
                MouseScrollDelta::LineDelta(_, y) => self.zoom(*y),
                MouseScrollDelta::PixelDelta(position) => self.zoom(position.y as f32 / 50.0),
            },
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(keycode),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match keycode {
                KeyCode::ArrowLeft => self.rotate(-KEY_STEP, 0.0),
                KeyCode::ArrowRight => self.rotate(KEY_STEP, 0.0),
                KeyCode::ArrowUp => self.rotate(0.0, KEY_STEP),
                KeyCode::ArrowDown => self.rotate(0.0, -KEY_STEP),
                KeyCode::KeyR => self.reset(),
                _ => return false,
            },
            _ => return false,
        }

        true
    }

    pub fn get_view_proj(&self) -> [[f32; 4]; 4] {
        self.build_view_projection_matrix().into()
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn reset(&mut self) {
        self.target = Point3::new(0.0, 0.0, 0.0);
        self.yaw = DEFAULT_YAW;
        self.pitch = DEFAULT_PITCH;
        self.distance = DEFAULT_DISTANCE;
    }

    pub fn eye(&self) -> Point3<f32> {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();

        self.target
            + Vector3::new(cos_pitch * cos_yaw, cos_pitch * sin_yaw, sin_pitch) * self.distance
    }

    fn build_view_projection_matrix(&self) -> Matrix4<f32> {
        let view = Matrix4::look_at_rh(self.eye(), self.target, Vector3::unit_z());
        let proj = cgmath::perspective(Deg(self.fovy), self.aspect, self.znear, self.zfar);

        OPENGL_TO_WGPU_MATRIX * proj * view
    }

    fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = Rad(self.yaw - delta_yaw).normalize().0;
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    fn zoom(&mut self, lines: f32) {
        self.distance = (self.distance * ZOOM_STEP.powf(lines)).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{MetricSpace, Vector4};

    #[test]
    fn eye_sits_at_distance_from_target() {
        let camera = Camera::new(16.0 / 9.0, 45.0);

        assert_relative_eq!(
            camera.eye().distance(camera.target),
            DEFAULT_DISTANCE,
            epsilon = 1e-5
        );
        assert!(camera.eye().z > 0.0);
    }

    #[test]
    fn target_projects_to_screen_center() {
        let camera = Camera::new(1.0, 45.0);
        let m = Matrix4::from(camera.get_view_proj());

        let clip = m * Vector4::new(0.0, 0.0, 0.0, 1.0);

        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn pitch_is_clamped_short_of_the_poles() {
        let mut camera = Camera::new(1.0, 45.0);

        camera.rotate(0.0, 10.0);
        assert_relative_eq!(camera.pitch, MAX_PITCH);

        camera.rotate(0.0, -20.0);
        assert_relative_eq!(camera.pitch, -MAX_PITCH);
    }

    #[test]
    fn zoom_stays_within_limits() {
        let mut camera = Camera::new(1.0, 45.0);

        camera.zoom(1.0);
        assert_relative_eq!(camera.distance, DEFAULT_DISTANCE * ZOOM_STEP);

        camera.zoom(1000.0);
        assert_relative_eq!(camera.distance, MIN_DISTANCE);

        camera.zoom(-1000.0);
        assert_relative_eq!(camera.distance, MAX_DISTANCE);
    }

    #[test]
    fn reset_restores_default_view() {
        let mut camera = Camera::new(1.0, 45.0);
        camera.rotate(1.0, 0.5);
        camera.zoom(3.0);

        camera.reset();

        assert_relative_eq!(camera.yaw, DEFAULT_YAW);
        assert_relative_eq!(camera.pitch, DEFAULT_PITCH);
        assert_relative_eq!(camera.distance, DEFAULT_DISTANCE);
    }
}
