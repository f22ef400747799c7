use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec4};

/// Per-frame constants, uploaded once at the beginning of each frame and
/// bound as a constant buffer by every pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GlobalConstants {
    pub world_to_view: Mat4,
    pub view_to_clip: Mat4,
    pub world_to_clip: Mat4,
    pub world_to_view_prev: Mat4,
    pub view_to_clip_prev: Mat4,
    pub world_to_clip_prev: Mat4,

    /// Camera's movement since the previous frame, in the previous frame's
    /// camera-relative space; `w` is unused.
    pub camera_delta: Vec4,

    /// Direction towards the sun; `w` is the sun's angular diameter.
    pub sun_direction: Vec4,

    /// x = exposure, y = emission intensity, z = sharpness, w = split-screen
    pub post: Vec4,

    pub jitter: Vec2,
    pub jitter_prev: Vec2,
    pub render_size: Vec2,
    pub render_size_prev: Vec2,
    pub output_size: Vec2,
    pub inv_render_size: Vec2,

    /// See: `glint::FrameState::reset_factor()`.
    pub reset_factor: f32,
    pub resolution_scale: f32,
    pub ortho: f32,
    pub _padding: f32,

    pub frame_index: u32,
    pub flags: u32,
    pub denoiser: u32,
    pub seed: u32,
}

impl GlobalConstants {
    pub const FLAG_SH: u32 = 1 << 0;
    pub const FLAG_REFERENCE: u32 = 1 << 1;
    pub const FLAG_UPSCALER: u32 = 1 << 2;
    pub const FLAG_OMM: u32 = 1 << 3;

    pub fn render_size(&self) -> UVec2 {
        self.render_size.as_uvec2()
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }
}
