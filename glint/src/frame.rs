use glam::{vec2, vec3, vec4, UVec2, Vec2, Vec3};
use glint_gpu::GlobalConstants;

use crate::utils::{halton, smoothstep};
use crate::{CameraState, Settings, Upscaler};

/// Number of distinct sub-pixel offsets the camera cycles through.
const JITTER_PERIOD: u32 = 32;

/// Sun's angular diameter, in radians.
const SUN_ANGULAR_DIAMETER: f32 = 0.0093;

/// Per-frame state: what the current frame renders, what the previous one
/// rendered, and how much of the accumulated history is still valid.
#[derive(Clone, Debug)]
pub struct FrameState {
    index: u32,
    camera: CameraState,
    camera_prev: CameraState,
    settings: Settings,
    settings_prev: Settings,
    reset_factor: f32,
    force_history_reset: bool,
    jitter: Vec2,
    jitter_prev: Vec2,
    render_size: UVec2,
    render_size_prev: UVec2,
    output_size: UVec2,
}

impl FrameState {
    pub fn new(output_size: UVec2) -> Self {
        Self {
            index: 0,
            camera: Default::default(),
            camera_prev: Default::default(),
            settings: Default::default(),
            settings_prev: Default::default(),
            reset_factor: 0.0,
            force_history_reset: true,
            jitter: Vec2::ZERO,
            jitter_prev: Vec2::ZERO,
            render_size: output_size,
            render_size_prev: output_size,
            output_size,
        }
    }

    pub fn set_output_size(&mut self, output_size: UVec2) {
        self.output_size = output_size;
    }

    /// Starts a new frame.
    ///
    /// Previous-frame fields are snapshotted before anything else, so that
    /// everything computed afterwards can diff against them; on the very
    /// first frame the previous state equals the current one.
    ///
    /// `pending_reset` forces a history reset for reasons the frame state
    /// can't see on its own (resize, pipeline reload, explicit requests).
    pub fn prepare(
        &mut self,
        settings: Settings,
        camera: CameraState,
        pending_reset: bool,
    ) {
        self.camera_prev = self.camera;
        self.settings_prev = self.settings;
        self.jitter_prev = self.jitter;
        self.render_size_prev = self.render_size;

        self.camera = camera;
        self.settings = settings;
        self.render_size = settings.render_size(self.output_size);

        if self.index == 0 {
            self.camera_prev = self.camera;
            self.settings_prev = self.settings;
            self.render_size_prev = self.render_size;
        }

        let curr = &self.settings;
        let prev = &self.settings_prev;

        self.force_history_reset = self.index == 0
            || pending_reset
            || curr.reset_history
            || curr.denoiser != prev.denoiser
            || curr.sh != prev.sh
            || curr.effective_upscaler() != prev.effective_upscaler()
            || self.camera.is_ortho() != self.camera_prev.is_ortho();

        self.reset_factor = if self.force_history_reset {
            0.0
        } else {
            reset_factor(curr, prev)
        };

        self.jitter = jitter(self.index, curr);

        if self.index == 0 {
            self.jitter_prev = self.jitter;
        }
    }

    /// Finishes the current frame.
    pub fn retire(&mut self) {
        self.index = self.index.wrapping_add(1);
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Selects the current half of every ping-pong resource pair.
    pub fn parity(&self) -> u32 {
        self.index % 2
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn camera_prev(&self) -> &CameraState {
        &self.camera_prev
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_prev(&self) -> &Settings {
        &self.settings_prev
    }

    /// How much of the accumulated history survives into this frame, in
    /// `[0, 1]`; zero means everything gets dropped.
    pub fn reset_factor(&self) -> f32 {
        self.reset_factor
    }

    /// Whether this is a transition frame that drops all history.
    pub fn force_history_reset(&self) -> bool {
        self.force_history_reset
    }

    pub fn jitter(&self) -> Vec2 {
        self.jitter
    }

    pub fn jitter_prev(&self) -> Vec2 {
        self.jitter_prev
    }

    pub fn render_size(&self) -> UVec2 {
        self.render_size
    }

    pub fn render_size_prev(&self) -> UVec2 {
        self.render_size_prev
    }

    pub fn output_size(&self) -> UVec2 {
        self.output_size
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.output_size.x as f32 / self.output_size.y.max(1) as f32
    }

    /// Builds the constant buffer for this frame.
    ///
    /// All matrices live in a space centered at the current camera, so the
    /// previous frame's view matrix is expressed relative to it too.
    pub fn constants(&self, seed: u32) -> GlobalConstants {
        let origin = self.camera.position();
        let aspect_ratio = self.aspect_ratio();

        let world_to_view = self.camera.world_to_view(origin);
        let view_to_clip = self.camera.view_to_clip(aspect_ratio);
        let world_to_view_prev = self.camera_prev.world_to_view(origin);
        let view_to_clip_prev = self.camera_prev.view_to_clip(aspect_ratio);

        let camera_delta =
            (self.camera.position() - self.camera_prev.position()).as_vec3();

        let settings = &self.settings;
        let mut flags = 0;

        if settings.sh {
            flags |= GlobalConstants::FLAG_SH;
        }

        if settings.is_reference() {
            flags |= GlobalConstants::FLAG_REFERENCE;
        }

        if settings.effective_upscaler() != Upscaler::None {
            flags |= GlobalConstants::FLAG_UPSCALER;
        }

        if settings.omm {
            flags |= GlobalConstants::FLAG_OMM;
        }

        GlobalConstants {
            world_to_view,
            view_to_clip,
            world_to_clip: view_to_clip * world_to_view,
            world_to_view_prev,
            view_to_clip_prev,
            world_to_clip_prev: view_to_clip_prev * world_to_view_prev,
            camera_delta: camera_delta.extend(0.0),
            sun_direction: sun_direction(settings)
                .extend(SUN_ANGULAR_DIAMETER),
            post: vec4(
                settings.exposure,
                settings.emission_intensity,
                settings.sharpness,
                settings.split_screen,
            ),
            jitter: self.jitter,
            jitter_prev: self.jitter_prev,
            render_size: self.render_size.as_vec2(),
            render_size_prev: self.render_size_prev.as_vec2(),
            output_size: self.output_size.as_vec2(),
            inv_render_size: 1.0 / self.render_size.as_vec2(),
            reset_factor: self.reset_factor,
            resolution_scale: settings.effective_resolution_scale(),
            ortho: if self.camera.is_ortho() { 1.0 } else { 0.0 },
            _padding: 0.0,
            frame_index: self.index,
            flags,
            denoiser: settings.denoiser.to_u32(),
            seed,
        }
    }
}

/// Returns the fraction of history that survives a change of lighting
/// conditions between `prev` and `curr`.
pub fn reset_factor(curr: &Settings, prev: &Settings) -> f32 {
    fn sun(settings: &Settings) -> f32 {
        smoothstep(-0.9, 0.05, settings.sun_elevation.to_radians().sin())
    }

    let f_sun = 1.0 - smoothstep(0.0, 0.2, (sun(curr) - sun(prev)).abs());

    let emission_curr = curr.emission_intensity;
    let emission_prev = prev.emission_intensity;

    let f_emission = 1.0
        - smoothstep(
            0.0,
            0.2,
            (emission_curr - emission_prev).abs()
                / emission_curr.max(emission_prev).max(1e-6),
        );

    f_sun * f_emission
}

pub fn sun_direction(settings: &Settings) -> Vec3 {
    let elevation = settings.sun_elevation.to_radians();
    let azimuth = settings.sun_azimuth.to_radians();

    vec3(
        elevation.cos() * azimuth.sin(),
        elevation.sin(),
        elevation.cos() * azimuth.cos(),
    )
}

/// Sub-pixel camera offset, in pixels; temporal filters need it, the
/// reference accumulation doesn't.
fn jitter(index: u32, settings: &Settings) -> Vec2 {
    let is_temporal =
        settings.taa || settings.effective_upscaler() != Upscaler::None;

    if settings.is_reference() || !is_temporal {
        return Vec2::ZERO;
    }

    let idx = index % JITTER_PERIOD + 1;

    vec2(halton(idx, 2) - 0.5, halton(idx, 3) - 0.5)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{dvec3, uvec2};

    use super::*;
    use crate::Denoiser;

    fn target() -> FrameState {
        FrameState::new(uvec2(1280, 720))
    }

    #[test]
    fn first_frame_forces_reset() {
        let mut target = target();

        target.prepare(Settings::default(), CameraState::default(), false);

        assert!(target.force_history_reset());
        assert_eq!(0.0, target.reset_factor());

        target.retire();
        target.prepare(Settings::default(), CameraState::default(), false);

        assert!(!target.force_history_reset());
        assert_eq!(1.0, target.reset_factor());
    }

    #[test]
    fn denoiser_switch_forces_reset_once() {
        let mut target = target();
        let reblur = Settings::default();

        let relax = Settings {
            denoiser: Denoiser::Relax,
            ..reblur
        };

        let frames = [
            (reblur, false),
            (reblur, false),
            (relax, true),
            (relax, false),
            (relax, false),
        ];

        for (idx, (settings, expected)) in frames.into_iter().enumerate() {
            target.prepare(settings, CameraState::default(), false);

            if idx > 0 {
                assert_eq!(expected, target.force_history_reset(), "frame {idx}");
            }

            target.retire();
        }
    }

    #[test]
    fn pending_reset_and_projection_changes() {
        let mut target = target();

        target.prepare(Settings::default(), CameraState::default(), false);
        target.retire();
        target.prepare(Settings::default(), CameraState::default(), true);

        assert!(target.force_history_reset());

        target.retire();
        target.prepare(
            Settings::default(),
            CameraState::default().with_ortho_range(10.0),
            false,
        );

        assert!(target.force_history_reset());
    }

    #[test]
    fn lighting_changes_scale_history() {
        let settings = Settings::default();

        assert_relative_eq!(reset_factor(&settings, &settings), 1.0);

        let brighter = Settings {
            emission_intensity: 1.05,
            ..settings
        };

        let factor = reset_factor(&brighter, &settings);

        assert!(factor > 0.0 && factor < 1.0, "factor = {factor}");

        let much_brighter = Settings {
            emission_intensity: 4.0,
            ..settings
        };

        assert_relative_eq!(reset_factor(&much_brighter, &settings), 0.0);

        let night = Settings {
            sun_elevation: -90.0,
            ..settings
        };

        assert_relative_eq!(reset_factor(&night, &settings), 0.0);
    }

    #[test]
    fn snapshots_previous_camera() {
        let mut target = target();
        let a = CameraState::new(dvec3(1.0, 0.0, 0.0), 0.0, 0.0);
        let b = CameraState::new(dvec3(2.0, 0.0, 0.0), 0.0, 0.0);

        target.prepare(Settings::default(), a, false);

        assert_eq!(&a, target.camera_prev());

        target.retire();
        target.prepare(Settings::default(), b, false);

        assert_eq!(&a, target.camera_prev());
        assert_eq!(&b, target.camera());

        let constants = target.constants(0);

        assert_relative_eq!(constants.camera_delta.x, 1.0);
    }

    #[test]
    fn jitter_follows_halton_sequence() {
        let mut target = target();

        target.prepare(Settings::default(), CameraState::default(), false);

        assert_relative_eq!(target.jitter().x, 0.0);
        assert_relative_eq!(target.jitter().y, 1.0 / 3.0 - 0.5);

        target.retire();
        target.prepare(Settings::default(), CameraState::default(), false);

        assert_relative_eq!(target.jitter().x, -0.25);
        assert_relative_eq!(target.jitter_prev().x, 0.0);

        let reference = Settings {
            denoiser: Denoiser::Reference,
            ..Default::default()
        };

        target.retire();
        target.prepare(reference, CameraState::default(), false);

        assert_eq!(Vec2::ZERO, target.jitter());
    }

    #[test]
    fn constants_carry_settings() {
        let mut target = target();

        target.prepare(
            Settings {
                sh: true,
                exposure: 2.0,
                ..Default::default()
            },
            CameraState::default(),
            false,
        );

        let constants = target.constants(1234);

        assert!(constants.has_flag(GlobalConstants::FLAG_SH));
        assert!(!constants.has_flag(GlobalConstants::FLAG_REFERENCE));
        assert_eq!(1234, constants.seed);
        assert_eq!(uvec2(1280, 720), constants.render_size());
        assert_relative_eq!(constants.post.x, 2.0);
        assert_relative_eq!(constants.sun_direction.truncate().length(), 1.0, epsilon = 1e-6);
    }
}
