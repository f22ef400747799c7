use bytemuck::{Pod, Zeroable};
use glam::{dvec3, vec3, DVec3, Mat4, Vec3};

/// Camera as seen by the renderer.
///
/// Fixed-size and plain-old-data, so that it can be persisted verbatim in
/// test cases; see: [`crate::TestCases`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraState {
    /// Global position; kept in double precision, since everything the GPU
    /// sees is made relative to it.
    pub position: [f64; 3],

    /// Yaw and pitch, in radians.
    pub rotation: [f32; 2],

    /// Vertical field of view, in radians.
    pub fov: f32,

    pub near: f32,

    /// Half-height of the view volume for orthographic projection; zero
    /// means perspective.
    pub ortho_range: f32,

    pub _padding: u32,
}

impl CameraState {
    /// Far plane of orthographic projections (perspective ones use an
    /// infinite far plane).
    pub const ORTHO_FAR: f32 = 10_000.0;

    pub fn new(position: DVec3, yaw: f32, pitch: f32) -> Self {
        Self {
            position: position.to_array(),
            rotation: [yaw, pitch],
            ..Default::default()
        }
    }

    pub fn with_fov(mut self, fov: f32) -> Self {
        self.fov = fov;
        self
    }

    pub fn with_ortho_range(mut self, ortho_range: f32) -> Self {
        self.ortho_range = ortho_range;
        self
    }

    pub fn position(&self) -> DVec3 {
        DVec3::from_array(self.position)
    }

    pub fn yaw(&self) -> f32 {
        self.rotation[0]
    }

    pub fn pitch(&self) -> f32 {
        self.rotation[1]
    }

    pub fn is_ortho(&self) -> bool {
        self.ortho_range > 0.0
    }

    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw(), self.pitch());

        vec3(
            -yaw.sin() * pitch.cos(),
            pitch.sin(),
            -yaw.cos() * pitch.cos(),
        )
    }

    pub fn right(&self) -> Vec3 {
        vec3(self.yaw().cos(), 0.0, -self.yaw().sin())
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.forward())
    }

    /// Returns the view matrix in a space whose origin lies at `origin`
    /// (usually the current camera's position).
    pub fn world_to_view(&self, origin: DVec3) -> Mat4 {
        Mat4::look_to_rh(
            (self.position() - origin).as_vec3(),
            self.forward(),
            self.up(),
        )
    }

    pub fn view_to_clip(&self, aspect_ratio: f32) -> Mat4 {
        if self.is_ortho() {
            let y = self.ortho_range;
            let x = y * aspect_ratio;

            Mat4::orthographic_rh(-x, x, -y, y, self.near, Self::ORTHO_FAR)
        } else {
            Mat4::perspective_infinite_reverse_rh(
                self.fov,
                aspect_ratio,
                self.near,
            )
        }
    }

    /// Returns a point `distance` units in front of the camera.
    pub fn ahead(&self, distance: f64) -> DVec3 {
        self.position() + self.forward().as_dvec3() * distance
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: dvec3(0.0, 0.0, 0.0).to_array(),
            rotation: [0.0, 0.0],
            fov: 60f32.to_radians(),
            near: 0.1,
            ortho_range: 0.0,
            _padding: 0,
        }
    }
}
