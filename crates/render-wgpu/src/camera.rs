use glam::{Mat4, Vec3};

const MIN_DISTANCE: f32 = 0.5;
const MAX_DISTANCE: f32 = 80.0;

/// Camera orbiting a target point, driven by mouse drag, wheel and arrows.
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub sensitivity: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::from_look_at(Vec3::new(0.0, 3.0, 6.0), Vec3::ZERO)
    }
}

impl OrbitCamera {
    /// Camera at `eye` looking at `target`.
    pub fn from_look_at(eye: Vec3, target: Vec3) -> Self {
        let offset = eye - target;
        let distance = offset.length().clamp(MIN_DISTANCE, MAX_DISTANCE);
        let dir = offset.try_normalize().unwrap_or(Vec3::Z);
        Self {
            target,
            distance,
            yaw: dir.z.atan2(dir.x),
            pitch: dir.y.asin(),
            fov: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
            sensitivity: 0.005,
        }
    }

    /// Eye position derived from the orbit parameters.
    pub fn position(&self) -> Vec3 {
        let dir = Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        );
        self.target + dir * self.distance
    }

    /// Rotate around the target by a mouse delta in pixels.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch += dy * self.sensitivity;
        self.pitch = self
            .pitch
            .clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
    }

    /// Positive `delta` moves the eye closer.
    pub fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance - delta).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    /// Slide the target on the XZ plane, relative to the view direction.
    pub fn pan(&mut self, dx: f32, dz: f32) {
        let forward = Vec3::new(-self.yaw.cos(), 0.0, -self.yaw.sin());
        let right = forward.cross(Vec3::Y);
        self.target += right * dx + forward * dz;
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_round_trips_eye() {
        let eye = Vec3::new(2.0, 3.0, 4.0);
        let cam = OrbitCamera::from_look_at(eye, Vec3::ZERO);
        assert!((cam.position() - eye).length() < 1e-4);
        assert_eq!(cam.near, 0.1);
        assert_eq!(cam.far, 100.0);
    }

    #[test]
    fn target_projects_to_screen_center() {
        let cam = OrbitCamera::default();
        let p = cam.view_projection().project_point3(cam.target);
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut cam = OrbitCamera::default();
        cam.orbit(0.0, 1.0e6);
        assert!(cam.pitch <= 89.0_f32.to_radians() + 1e-6);
        cam.orbit(0.0, -1.0e6);
        assert!(cam.pitch >= -89.0_f32.to_radians() - 1e-6);
        assert!(!cam.view_matrix().col(0).x.is_nan());
    }

    #[test]
    fn zoom_is_clamped() {
        let mut cam = OrbitCamera::default();
        cam.zoom(1000.0);
        assert_eq!(cam.distance, MIN_DISTANCE);
        cam.zoom(-1000.0);
        assert_eq!(cam.distance, MAX_DISTANCE);
    }

    #[test]
    fn pan_keeps_height() {
        let mut cam = OrbitCamera::default();
        let y = cam.target.y;
        cam.pan(1.0, 2.0);
        assert_eq!(cam.target.y, y);
        assert!(cam.target.length() > 0.0);
    }

    #[test]
    fn aspect_from_size() {
        let mut cam = OrbitCamera::default();
        cam.set_aspect(800, 400);
        assert_eq!(cam.aspect, 2.0);
        cam.set_aspect(800, 0);
        assert!(cam.aspect.is_finite());
    }
}
