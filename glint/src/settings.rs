use bytemuck::{Pod, Zeroable};
use glam::{uvec2, UVec2};
use thiserror::Error;

/// Snapshot of user-facing settings.
///
/// The engine receives a fresh copy each frame and keeps the previous one
/// around to figure out what changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settings {
    pub denoiser: Denoiser,

    /// Whether radiance is traced and denoised as spherical harmonics.
    pub sh: bool,

    pub upscaler: Upscaler,
    pub taa: bool,

    /// Render resolution relative to output resolution, in `(0, 1]`.
    pub resolution_scale: f32,

    /// Degrees.
    pub sun_elevation: f32,

    /// Degrees.
    pub sun_azimuth: f32,

    pub emission_intensity: f32,

    pub max_accumulated_frames: u32,
    pub max_fast_accumulated_frames: u32,

    /// Fraction of the screen (from the left) showing non-denoised output.
    pub split_screen: f32,

    pub sharpness: f32,
    pub exposure: f32,

    pub animate_objects: bool,
    pub animation_speed: f32,
    pub nine_brothers: bool,

    /// Frame rate cap; zero means unlimited.
    pub max_fps: u32,

    pub omm: bool,

    /// Drops all accumulated history on the next frame.
    pub reset_history: bool,
}

impl Settings {
    /// Whether the path-traced reference is accumulated instead of running
    /// real-time denoisers.
    pub fn is_reference(&self) -> bool {
        self.denoiser == Denoiser::Reference
    }

    /// Returns the upscaler actually used; reference mode always renders at
    /// full resolution without one.
    pub fn effective_upscaler(&self) -> Upscaler {
        if self.is_reference() {
            Upscaler::None
        } else {
            self.upscaler
        }
    }

    pub fn effective_resolution_scale(&self) -> f32 {
        if self.is_reference() {
            1.0
        } else {
            self.resolution_scale.clamp(0.25, 1.0)
        }
    }

    /// Returns the internal render size for given output size.
    pub fn render_size(&self, output_size: UVec2) -> UVec2 {
        let scale = self.effective_resolution_scale();

        uvec2(
            ((output_size.x as f32 * scale).round() as u32).max(1),
            ((output_size.y as f32 * scale).round() as u32).max(1),
        )
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            denoiser: Denoiser::Reblur,
            sh: false,
            upscaler: Upscaler::None,
            taa: true,
            resolution_scale: 1.0,
            sun_elevation: 45.0,
            sun_azimuth: -147.0,
            emission_intensity: 1.0,
            max_accumulated_frames: 31,
            max_fast_accumulated_frames: 7,
            split_screen: 0.0,
            sharpness: 0.15,
            exposure: 1.0,
            animate_objects: false,
            animation_speed: 1.0,
            nine_brothers: false,
            max_fps: 0,
            omm: true,
            reset_history: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Denoiser {
    #[default]
    Reblur,
    Relax,
    Reference,
}

impl Denoiser {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            Self::Reblur => 0,
            Self::Relax => 1,
            Self::Reference => 2,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Reblur),
            1 => Some(Self::Relax),
            2 => Some(Self::Reference),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Upscaler {
    #[default]
    None,
    Dlss,
    Fsr,
}

impl Upscaler {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Dlss => 1,
            Self::Fsr => 2,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Dlss),
            2 => Some(Self::Fsr),
            _ => None,
        }
    }
}

/// Plain-old-data mirror of [`Settings`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SettingsRecord {
    pub denoiser: u32,
    pub sh: u32,
    pub upscaler: u32,
    pub taa: u32,
    pub resolution_scale: f32,
    pub sun_elevation: f32,
    pub sun_azimuth: f32,
    pub emission_intensity: f32,
    pub max_accumulated_frames: u32,
    pub max_fast_accumulated_frames: u32,
    pub split_screen: f32,
    pub sharpness: f32,
    pub exposure: f32,
    pub animate_objects: u32,
    pub animation_speed: f32,
    pub nine_brothers: u32,
    pub max_fps: u32,
    pub omm: u32,
    pub reset_history: u32,
    pub _padding: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("invalid value for `{field}`: {value}")]
    InvalidDiscriminant { field: &'static str, value: u32 },
}

impl From<Settings> for SettingsRecord {
    fn from(settings: Settings) -> Self {
        Self {
            denoiser: settings.denoiser.to_u32(),
            sh: settings.sh as u32,
            upscaler: settings.upscaler.to_u32(),
            taa: settings.taa as u32,
            resolution_scale: settings.resolution_scale,
            sun_elevation: settings.sun_elevation,
            sun_azimuth: settings.sun_azimuth,
            emission_intensity: settings.emission_intensity,
            max_accumulated_frames: settings.max_accumulated_frames,
            max_fast_accumulated_frames: settings.max_fast_accumulated_frames,
            split_screen: settings.split_screen,
            sharpness: settings.sharpness,
            exposure: settings.exposure,
            animate_objects: settings.animate_objects as u32,
            animation_speed: settings.animation_speed,
            nine_brothers: settings.nine_brothers as u32,
            max_fps: settings.max_fps,
            omm: settings.omm as u32,
            reset_history: settings.reset_history as u32,
            _padding: 0,
        }
    }
}

impl TryFrom<SettingsRecord> for Settings {
    type Error = SettingsError;

    fn try_from(record: SettingsRecord) -> Result<Self, Self::Error> {
        fn flag(field: &'static str, value: u32) -> Result<bool, SettingsError> {
            match value {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(SettingsError::InvalidDiscriminant { field, value }),
            }
        }

        let denoiser = Denoiser::from_u32(record.denoiser).ok_or(
            SettingsError::InvalidDiscriminant {
                field: "denoiser",
                value: record.denoiser,
            },
        )?;

        let upscaler = Upscaler::from_u32(record.upscaler).ok_or(
            SettingsError::InvalidDiscriminant {
                field: "upscaler",
                value: record.upscaler,
            },
        )?;

        Ok(Self {
            denoiser,
            sh: flag("sh", record.sh)?,
            upscaler,
            taa: flag("taa", record.taa)?,
            resolution_scale: record.resolution_scale,
            sun_elevation: record.sun_elevation,
            sun_azimuth: record.sun_azimuth,
            emission_intensity: record.emission_intensity,
            max_accumulated_frames: record.max_accumulated_frames,
            max_fast_accumulated_frames: record.max_fast_accumulated_frames,
            split_screen: record.split_screen,
            sharpness: record.sharpness,
            exposure: record.exposure,
            animate_objects: flag("animate_objects", record.animate_objects)?,
            animation_speed: record.animation_speed,
            nine_brothers: flag("nine_brothers", record.nine_brothers)?,
            max_fps: record.max_fps,
            omm: flag("omm", record.omm)?,
            reset_history: flag("reset_history", record.reset_history)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    #[test]
    fn layout() {
        assert_eq!(80, mem::size_of::<SettingsRecord>());
    }

    #[test]
    fn record_conversion() {
        let settings = Settings {
            denoiser: Denoiser::Relax,
            upscaler: Upscaler::Fsr,
            sh: true,
            max_fps: 60,
            ..Default::default()
        };

        let record = SettingsRecord::from(settings);

        assert_eq!(1, record.denoiser);
        assert_eq!(2, record.upscaler);
        assert_eq!(Ok(settings), Settings::try_from(record));
    }

    #[test]
    fn invalid_discriminants() {
        let record = SettingsRecord {
            denoiser: 7,
            ..SettingsRecord::from(Settings::default())
        };

        assert_eq!(
            Err(SettingsError::InvalidDiscriminant {
                field: "denoiser",
                value: 7
            }),
            Settings::try_from(record)
        );

        let record = SettingsRecord {
            omm: 2,
            ..SettingsRecord::from(Settings::default())
        };

        assert!(Settings::try_from(record).is_err());
    }

    #[test]
    fn reference_mode_renders_at_full_resolution() {
        let target = Settings {
            denoiser: Denoiser::Reference,
            upscaler: Upscaler::Dlss,
            resolution_scale: 0.5,
            ..Default::default()
        };

        assert_eq!(Upscaler::None, target.effective_upscaler());
        assert_eq!(uvec2(1280, 720), target.render_size(uvec2(1280, 720)));
    }

    #[test]
    fn render_size_rounds() {
        let target = Settings {
            resolution_scale: 0.5,
            ..Default::default()
        };

        assert_eq!(uvec2(641, 360), target.render_size(uvec2(1281, 720)));
        assert_eq!(uvec2(1, 1), target.render_size(uvec2(1, 1)));
    }
}
