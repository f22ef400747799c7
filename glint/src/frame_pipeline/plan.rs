use fxhash::FxHashSet;

use super::{ColorSource, Pass};
use crate::{Denoiser, Settings, Upscaler};

/// Ordered list of passes a frame runs, resolved from the frame's settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassPlan {
    passes: Vec<Pass>,
}

impl PassPlan {
    pub fn resolve(settings: &Settings) -> Self {
        let reference = settings.is_reference();
        let sh = settings.sh;

        let mut passes =
            vec![Pass::RadianceCacheUpdate, Pass::TraceOpaque { sh }];

        if !reference {
            passes.push(Pass::ShadowDenoise);
            passes.push(Pass::OpaqueDenoise { sh });
        }

        passes.push(Pass::Composition {
            denoised: !reference,
            sh,
        });

        passes.push(Pass::TraceTransparent);

        let mut color = ColorSource::Composed;

        if reference {
            passes.push(Pass::ReferenceAccumulate);
            color = ColorSource::ReferenceAccumulation;
        }

        if settings.effective_upscaler() == Upscaler::None {
            let upsample = settings.effective_resolution_scale() < 1.0;

            if settings.taa {
                passes.push(Pass::Taa {
                    input: color,
                    upsample,
                });

                color = ColorSource::TaaOutput;
            }

            if upsample {
                passes.push(Pass::Upsample { input: color });
                color = ColorSource::PostAa;
            }
        } else {
            passes.push(Pass::PreUpscalePrep { input: color });
            passes.push(Pass::Upscale);
            passes.push(Pass::PostUpscale);

            color = ColorSource::PostAa;
        }

        passes.push(Pass::Sharpen { input: color });
        passes.push(Pass::Final);
        passes.push(Pass::CopyToSwapchain);

        Self { passes }
    }

    /// Returns every pass any plan can contain, each one once.
    pub fn all_passes() -> Vec<Pass> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();

        for denoiser in [Denoiser::Reblur, Denoiser::Relax, Denoiser::Reference]
        {
            for upscaler in [Upscaler::None, Upscaler::Dlss, Upscaler::Fsr] {
                for (sh, taa) in
                    [(false, false), (false, true), (true, false), (true, true)]
                {
                    for resolution_scale in [1.0, 0.5] {
                        let settings = Settings {
                            denoiser,
                            sh,
                            upscaler,
                            taa,
                            resolution_scale,
                            ..Default::default()
                        };

                        for pass in Self::resolve(&settings).passes {
                            if seen.insert(pass) {
                                out.push(pass);
                            }
                        }
                    }
                }
            }
        }

        out
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn iter(&self) -> impl Iterator<Item = Pass> + '_ {
        self.passes.iter().copied()
    }

    pub fn contains(&self, pass: Pass) -> bool {
        self.passes.contains(&pass)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}
