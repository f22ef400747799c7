use glint_gpu::PassParams;

use crate::{Access, AccelStructId, BufferId, StateRequest, TextureId};

/// Color texture a post-processing pass reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSource {
    Composed,
    ReferenceAccumulation,

    /// Current half of the TAA history pair.
    TaaOutput,

    Upscaled,
    PostAa,
}

impl ColorSource {
    pub fn texture(self, parity: u32) -> TextureId {
        match self {
            Self::Composed => TextureId::Composed,
            Self::ReferenceAccumulation => TextureId::ReferenceAccumulation,
            Self::TaaOutput => taa_textures(parity).0,
            Self::Upscaled => TextureId::Upscaled,
            Self::PostAa => TextureId::PostAa,
        }
    }
}

/// Returns `(current, history)` halves of the TAA pair; the current frame
/// writes what the next frame reads.
pub fn taa_textures(parity: u32) -> (TextureId, TextureId) {
    if parity == 0 {
        (TextureId::TaaPing, TextureId::TaaPong)
    } else {
        (TextureId::TaaPong, TextureId::TaaPing)
    }
}

/// Returns `(current, previous)` radiance cache voxel buffers.
pub fn sharc_voxel_buffers(parity: u32) -> (BufferId, BufferId) {
    if parity == 0 {
        (BufferId::SharcVoxelData, BufferId::SharcVoxelDataPrev)
    } else {
        (BufferId::SharcVoxelDataPrev, BufferId::SharcVoxelData)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassResolution {
    /// Radiance cache grid, render size divided by
    /// [`glint_gpu::SHARC_DOWNSCALE`].
    RadianceCache,

    Render,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    RadianceCacheUpdate,
    TraceOpaque { sh: bool },
    ShadowDenoise,
    OpaqueDenoise { sh: bool },
    Composition { denoised: bool, sh: bool },
    TraceTransparent,
    ReferenceAccumulate,
    PreUpscalePrep { input: ColorSource },
    Upscale,
    PostUpscale,
    Taa { input: ColorSource, upsample: bool },
    Upsample { input: ColorSource },
    Sharpen { input: ColorSource },
    Final,
    CopyToSwapchain,
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RadianceCacheUpdate => "radiance_cache_update",
            Self::TraceOpaque { .. } => "trace_opaque",
            Self::ShadowDenoise => "shadow_denoise",
            Self::OpaqueDenoise { .. } => "opaque_denoise",
            Self::Composition { .. } => "composition",
            Self::TraceTransparent => "trace_transparent",
            Self::ReferenceAccumulate => "reference_accumulate",
            Self::PreUpscalePrep { .. } => "pre_upscale_prep",
            Self::Upscale => "upscale",
            Self::PostUpscale => "post_upscale",
            Self::Taa { .. } => "taa",
            Self::Upsample { .. } => "upsample",
            Self::Sharpen { .. } => "sharpen",
            Self::Final => "final",
            Self::CopyToSwapchain => "copy_to_swapchain",
        }
    }

    /// Returns the shader this pass dispatches; passes recorded by external
    /// libraries (or by plain copies) don't have one.
    pub fn shader(&self) -> Option<&'static str> {
        match self {
            Self::ShadowDenoise
            | Self::OpaqueDenoise { .. }
            | Self::ReferenceAccumulate
            | Self::Upscale
            | Self::CopyToSwapchain => None,

            Self::RadianceCacheUpdate => Some("sharc_update"),
            Self::TraceOpaque { .. } => Some("trace_opaque"),
            Self::Composition { .. } => Some("composition"),
            Self::TraceTransparent => Some("trace_transparent"),
            Self::PreUpscalePrep { .. } => Some("pre_upscale_prep"),
            Self::PostUpscale => Some("post_upscale"),
            Self::Taa { .. } => Some("taa"),
            Self::Upsample { .. } => Some("upsample"),
            Self::Sharpen { .. } => Some("sharpen"),
            Self::Final => Some("final"),
        }
    }

    pub fn resolution(&self) -> PassResolution {
        match self {
            Self::RadianceCacheUpdate => PassResolution::RadianceCache,

            Self::TraceOpaque { .. }
            | Self::ShadowDenoise
            | Self::OpaqueDenoise { .. }
            | Self::Composition { .. }
            | Self::TraceTransparent
            | Self::ReferenceAccumulate
            | Self::PreUpscalePrep { .. }
            | Self::Taa { .. } => PassResolution::Render,

            Self::Upscale
            | Self::PostUpscale
            | Self::Upsample { .. }
            | Self::Sharpen { .. }
            | Self::Final
            | Self::CopyToSwapchain => PassResolution::Output,
        }
    }

    pub fn flags(&self) -> u32 {
        let mut flags = 0;

        match *self {
            Self::TraceOpaque { sh } => {
                if sh {
                    flags |= PassParams::FLAG_SH;
                }
            }

            Self::Composition { denoised, sh } => {
                if denoised {
                    flags |= PassParams::FLAG_DENOISED;
                }

                if sh {
                    flags |= PassParams::FLAG_SH;
                }
            }

            Self::Taa { upsample, .. } => {
                if upsample {
                    flags |= PassParams::FLAG_UPSAMPLE;
                }
            }

            _ => (),
        }

        flags
    }

    /// Returns states this pass needs its resources in, in binding order.
    ///
    /// Passes recorded by external libraries request their own states, so
    /// they return nothing here.
    pub fn requests(&self, parity: u32) -> Vec<StateRequest> {
        use self::TextureId::*;

        let constants =
            StateRequest::new(BufferId::Constants, Access::ConstantBuffer);

        let instances = StateRequest::read(BufferId::InstanceData);

        let tlas = |id: AccelStructId| {
            StateRequest::new(id, Access::AccelStructRead)
        };

        let (sharc_curr, sharc_prev) = sharc_voxel_buffers(parity);

        match *self {
            Self::RadianceCacheUpdate => vec![
                constants,
                instances,
                tlas(AccelStructId::TlasWorld),
                tlas(AccelStructId::TlasEmissive),
                StateRequest::write(BufferId::SharcHashEntries),
                StateRequest::write(sharc_curr),
                StateRequest::read(sharc_prev),
            ],

            Self::TraceOpaque { sh } => {
                let mut requests = vec![
                    constants,
                    instances,
                    tlas(AccelStructId::TlasWorld),
                    tlas(AccelStructId::TlasEmissive),
                    StateRequest::read(BufferId::SharcHashEntries),
                    StateRequest::read(sharc_curr),
                    StateRequest::write(ViewZ),
                    StateRequest::write(Mv),
                    StateRequest::write(NormalRoughness),
                    StateRequest::write(BaseColorMetalness),
                    StateRequest::write(DirectLighting),
                    StateRequest::write(DirectEmission),
                    StateRequest::write(Penumbra),
                    StateRequest::write(UnfilteredDiff),
                    StateRequest::write(UnfilteredSpec),
                ];

                if sh {
                    requests.push(StateRequest::write(UnfilteredDiffSh));
                    requests.push(StateRequest::write(UnfilteredSpecSh));
                }

                requests
            }

            Self::Composition { denoised, sh } => {
                let mut requests = vec![
                    constants,
                    StateRequest::read(ViewZ),
                    StateRequest::read(NormalRoughness),
                    StateRequest::read(BaseColorMetalness),
                    StateRequest::read(DirectLighting),
                    StateRequest::read(DirectEmission),
                ];

                let signals: &[TextureId] = match (denoised, sh) {
                    (true, false) => &[Shadow, Diff, Spec],
                    (true, true) => &[Shadow, Diff, Spec, DiffSh, SpecSh],
                    (false, false) => &[Penumbra, UnfilteredDiff, UnfilteredSpec],
                    (false, true) => &[
                        Penumbra,
                        UnfilteredDiff,
                        UnfilteredSpec,
                        UnfilteredDiffSh,
                        UnfilteredSpecSh,
                    ],
                };

                requests.extend(signals.iter().map(|&id| StateRequest::read(id)));
                requests.push(StateRequest::write(Composed));
                requests
            }

            Self::TraceTransparent => vec![
                constants,
                instances,
                tlas(AccelStructId::TlasWorld),
                tlas(AccelStructId::TlasEmissive),
                StateRequest::read(ViewZ),
                StateRequest::write(Composed),
            ],

            Self::PreUpscalePrep { input } => vec![
                constants,
                StateRequest::read(input.texture(parity)),
                StateRequest::read(ViewZ),
                StateRequest::write(UpscalerInput),
            ],

            Self::PostUpscale => vec![
                constants,
                StateRequest::read(Upscaled),
                StateRequest::write(PostAa),
            ],

            Self::Taa { input, .. } => {
                let (curr, history) = taa_textures(parity);

                vec![
                    constants,
                    StateRequest::read(input.texture(parity)),
                    StateRequest::read(Mv),
                    StateRequest::read(history),
                    StateRequest::write(curr),
                ]
            }

            Self::Upsample { input } => vec![
                constants,
                StateRequest::read(input.texture(parity)),
                StateRequest::write(PostAa),
            ],

            Self::Sharpen { input } => vec![
                constants,
                StateRequest::read(input.texture(parity)),
                StateRequest::write(PreFinal),
            ],

            Self::Final => vec![
                constants,
                StateRequest::read(PreFinal),
                StateRequest::write(Final),
            ],

            Self::CopyToSwapchain => {
                vec![StateRequest::new(Final, Access::CopySrc)]
            }

            Self::ShadowDenoise
            | Self::OpaqueDenoise { .. }
            | Self::ReferenceAccumulate
            | Self::Upscale => Vec::new(),
        }
    }
}
