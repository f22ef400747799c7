//! Bridge between glint and an external denoising library.
//!
//! The library is driven through [`DenoiserLibrary`]: glint feeds it
//! settings, asks for the work required by a set of jobs and records that
//! work itself, so every resource the library touches goes through the
//! transition optimizer like any other pass.

use derivative::Derivative;
use glam::{Mat4, UVec2, UVec3, Vec2, Vec3};
use log::debug;

use crate::backend::OrFatal;
use crate::utils::dispatch_size;
use crate::{
    record_transitions, Access, Backend, Command, CommandList, Denoiser,
    Descriptors, FrameState, NativeObject, NativePipeline, PipelineDesc,
    ResourceRegistry, StateRequest, TextureDesc, TextureId,
};

/// Named unit of denoising work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DenoiserJob {
    /// Shadow penumbra (SIGMA).
    Shadow,

    /// Diffuse and specular radiance (REBLUR or RELAX).
    DiffuseSpecular,

    /// Like [`Self::DiffuseSpecular`], for spherical-harmonics signals.
    DiffuseSpecularSh,

    /// Path-traced reference accumulation.
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Technique {
    Sigma,
    Reblur,
    Relax,
    Reference,
}

/// Resource as seen by the library; the adapter maps it onto a registry
/// texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DenoiserSlot {
    ViewZ,
    Mv,
    NormalRoughness,
    Penumbra,
    InDiff,
    InSpec,
    InDiffSh,
    InSpecSh,
    InRadiance,
    OutShadow,
    OutDiff,
    OutSpec,
    OutDiffSh,
    OutSpecSh,
    OutRadiance,

    /// Library's own intermediate texture.
    Transient(u16),
}

impl DenoiserSlot {
    pub fn texture(self) -> TextureId {
        match self {
            Self::ViewZ => TextureId::ViewZ,
            Self::Mv => TextureId::Mv,
            Self::NormalRoughness => TextureId::NormalRoughness,
            Self::Penumbra => TextureId::Penumbra,
            Self::InDiff => TextureId::UnfilteredDiff,
            Self::InSpec => TextureId::UnfilteredSpec,
            Self::InDiffSh => TextureId::UnfilteredDiffSh,
            Self::InSpecSh => TextureId::UnfilteredSpecSh,
            Self::InRadiance => TextureId::Composed,
            Self::OutShadow => TextureId::Shadow,
            Self::OutDiff => TextureId::Diff,
            Self::OutSpec => TextureId::Spec,
            Self::OutDiffSh => TextureId::DiffSh,
            Self::OutSpecSh => TextureId::SpecSh,
            Self::OutRadiance => TextureId::ReferenceAccumulation,
            Self::Transient(idx) => TextureId::DenoiserTransient(idx),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccumulationMode {
    #[default]
    Continue,

    /// Drop history, but don't bother clearing it.
    Restart,

    /// Drop history and clear it; used on transition frames, when history
    /// may contain garbage.
    ClearAndRestart,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CommonSettings {
    pub view_to_clip: Mat4,
    pub view_to_clip_prev: Mat4,
    pub world_to_view: Mat4,
    pub world_to_view_prev: Mat4,
    pub jitter: Vec2,
    pub jitter_prev: Vec2,
    pub resource_size: UVec2,
    pub resource_size_prev: UVec2,
    pub rect_size: UVec2,
    pub rect_size_prev: UVec2,
    pub motion_vector_scale: Vec3,
    pub split_screen: f32,
    pub frame_index: u32,
    pub accumulation_mode: AccumulationMode,
}

impl CommonSettings {
    pub fn new(frame: &FrameState) -> Self {
        let constants = frame.constants(0);
        let rect_size = frame.render_size();

        let accumulation_mode = if frame.force_history_reset() {
            AccumulationMode::ClearAndRestart
        } else if frame.reset_factor() == 0.0 {
            AccumulationMode::Restart
        } else {
            AccumulationMode::Continue
        };

        Self {
            view_to_clip: constants.view_to_clip,
            view_to_clip_prev: constants.view_to_clip_prev,
            world_to_view: constants.world_to_view,
            world_to_view_prev: constants.world_to_view_prev,
            jitter: frame.jitter(),
            jitter_prev: frame.jitter_prev(),

            // Render-sized textures are allocated at output size, rendering
            // happens into their top-left corner
            resource_size: frame.output_size(),
            resource_size_prev: frame.output_size(),
            rect_size,
            rect_size_prev: frame.render_size_prev(),

            motion_vector_scale: Vec3::new(
                1.0 / rect_size.x.max(1) as f32,
                1.0 / rect_size.y.max(1) as f32,
                1.0,
            ),
            split_screen: frame.settings().split_screen,
            frame_index: frame.index(),
            accumulation_mode,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TechniqueSettings {
    pub max_accumulated_frames: u32,
    pub max_fast_accumulated_frames: u32,
}

/// Single compute dispatch requested by the library.
#[derive(Clone, Debug, PartialEq)]
pub struct DenoiserDispatch {
    pub label: String,

    /// Index into [`DenoiserLibrary::pipelines()`].
    pub pipeline: usize,

    pub groups: UVec3,
    pub resources: Vec<(DenoiserSlot, Access)>,
    pub constants: Vec<u8>,
}

pub trait DenoiserLibrary {
    fn pipelines(&self) -> Vec<PipelineDesc>;

    /// Number of intermediate textures the library needs; they are
    /// allocated by glint at render size.
    fn transient_count(&self) -> u16;

    fn set_common_settings(&mut self, settings: &CommonSettings);

    fn set_technique_settings(
        &mut self,
        technique: Technique,
        settings: &TechniqueSettings,
    );

    fn dispatches(&mut self, jobs: &[DenoiserJob]) -> Vec<DenoiserDispatch>;
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct DenoiserAdapter {
    #[derivative(Debug = "ignore")]
    library: Box<dyn DenoiserLibrary>,
    pipelines: Vec<NativePipeline>,
    common: Option<CommonSettings>,
}

impl DenoiserAdapter {
    pub fn new(
        backend: &mut impl Backend,
        library: Box<dyn DenoiserLibrary>,
    ) -> Self {
        let mut this = Self {
            library,
            pipelines: Default::default(),
            common: None,
        };

        this.create_pipelines(backend);
        this
    }

    fn create_pipelines(&mut self, backend: &mut impl Backend) {
        self.pipelines = self
            .library
            .pipelines()
            .iter()
            .map(|desc| {
                debug!("Creating denoiser pipeline `{}`", desc.label);

                backend.create_pipeline(desc).or_fatal(format_args!(
                    "couldn't create denoiser pipeline `{}`",
                    desc.label
                ))
            })
            .collect();
    }

    pub fn destroy_pipelines(&mut self, backend: &mut impl Backend) {
        for pipeline in self.pipelines.drain(..) {
            backend.destroy(NativeObject::Pipeline(pipeline));
        }
    }

    pub fn reload(&mut self, backend: &mut impl Backend) {
        self.destroy_pipelines(backend);
        self.create_pipelines(backend);
    }

    /// (Re)creates the library's intermediate textures.
    pub fn create_transients(
        &self,
        backend: &mut impl Backend,
        registry: &mut ResourceRegistry,
        size: UVec2,
    ) {
        for idx in 0..self.library.transient_count() {
            let id = TextureId::DenoiserTransient(idx);

            registry.create_texture(
                backend,
                id,
                TextureDesc {
                    label: format!("glint_denoiser_transient_{idx}"),
                    width: size.x,
                    height: size.y,
                    format: id.format(),
                    usage: wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::TEXTURE_BINDING,
                },
            );
        }
    }

    pub fn set_common_settings(&mut self, frame: &FrameState) {
        let settings = CommonSettings::new(frame);

        self.library.set_common_settings(&settings);
        self.common = Some(settings);
    }

    /// Forwards per-technique settings; history lengths get shortened by
    /// the frame's reset factor.
    pub fn set_technique_settings(&mut self, frame: &FrameState) {
        let settings = frame.settings();
        let reset_factor = frame.reset_factor();
        let scale = |frames: u32| (frames as f32 * reset_factor).round() as u32;

        let technique_settings = TechniqueSettings {
            max_accumulated_frames: scale(settings.max_accumulated_frames),
            max_fast_accumulated_frames: scale(
                settings.max_fast_accumulated_frames,
            ),
        };

        let technique = match settings.denoiser {
            Denoiser::Reblur => Technique::Reblur,
            Denoiser::Relax => Technique::Relax,
            Denoiser::Reference => Technique::Reference,
        };

        self.library
            .set_technique_settings(Technique::Sigma, &technique_settings);

        self.library
            .set_technique_settings(technique, &technique_settings);
    }

    /// Returns the settings most recently sent to the library.
    pub fn common_settings(&self) -> Option<&CommonSettings> {
        self.common.as_ref()
    }

    /// Records work of given jobs; returns the number of dispatches.
    pub fn denoise(
        &mut self,
        registry: &mut ResourceRegistry,
        commands: &mut CommandList,
        jobs: &[DenoiserJob],
    ) -> usize {
        let dispatches = self.library.dispatches(jobs);
        let count = dispatches.len();

        for dispatch in dispatches {
            let requests: Vec<_> = dispatch
                .resources
                .iter()
                .map(|(slot, access)| StateRequest::new(slot.texture(), *access))
                .collect();

            record_transitions(registry, commands, &requests);

            let resources = dispatch
                .resources
                .iter()
                .map(|(slot, _)| registry.get(slot.texture()))
                .collect();

            let pipeline = *self.pipelines.get(dispatch.pipeline).unwrap_or_else(
                || panic!("unknown denoiser pipeline: {}", dispatch.pipeline),
            );

            commands.push(Command::Dispatch {
                label: dispatch.label,
                pipeline,
                descriptors: Descriptors::Push(resources),
                push_constants: dispatch.constants,
                groups: dispatch.groups,
            });
        }

        count
    }
}

/// Denoiser that dispatches the same sequence of (empty) passes a real one
/// would; used for tests and dry runs.
#[derive(Clone, Debug, Default)]
pub struct HeadlessDenoiser {
    rect_size: UVec2,
    technique: Option<Technique>,
}

impl HeadlessDenoiser {
    const PIPELINES: [&'static str; 10] = [
        "sigma_classify_tiles",
        "sigma_blur",
        "reblur_prepass",
        "reblur_temporal_accumulation",
        "reblur_blur",
        "relax_prepass",
        "relax_temporal_accumulation",
        "relax_blur",
        "reference_accumulate",
        "copy",
    ];

    fn dispatch(
        &self,
        name: &str,
        resources: Vec<(DenoiserSlot, Access)>,
    ) -> DenoiserDispatch {
        let pipeline = Self::PIPELINES
            .iter()
            .position(|pipeline| *pipeline == name)
            .unwrap_or_else(|| panic!("unknown pipeline: {name}"));

        DenoiserDispatch {
            label: name.into(),
            pipeline,
            groups: dispatch_size(self.rect_size, 16),
            resources,
            constants: Vec::new(),
        }
    }
}

impl DenoiserLibrary for HeadlessDenoiser {
    fn pipelines(&self) -> Vec<PipelineDesc> {
        Self::PIPELINES
            .iter()
            .map(|name| PipelineDesc {
                label: format!("denoiser_{name}"),
                shader: format!("denoiser::{name}"),
                push_constants_size: 0,
            })
            .collect()
    }

    fn transient_count(&self) -> u16 {
        3
    }

    fn set_common_settings(&mut self, settings: &CommonSettings) {
        self.rect_size = settings.rect_size;
    }

    fn set_technique_settings(
        &mut self,
        technique: Technique,
        _: &TechniqueSettings,
    ) {
        if technique != Technique::Sigma {
            self.technique = Some(technique);
        }
    }

    fn dispatches(&mut self, jobs: &[DenoiserJob]) -> Vec<DenoiserDispatch> {
        use self::Access::*;
        use self::DenoiserSlot::*;

        let mut out = Vec::new();

        let prefix = match self.technique {
            Some(Technique::Relax) => "relax",
            _ => "reblur",
        };

        for job in jobs {
            match job {
                DenoiserJob::Shadow => {
                    out.push(self.dispatch(
                        "sigma_classify_tiles",
                        vec![
                            (Penumbra, ShaderRead),
                            (ViewZ, ShaderRead),
                            (NormalRoughness, ShaderRead),
                            (Transient(0), StorageWrite),
                        ],
                    ));

                    out.push(self.dispatch(
                        "sigma_blur",
                        vec![(Transient(0), ShaderRead), (OutShadow, StorageWrite)],
                    ));
                }

                DenoiserJob::DiffuseSpecular | DenoiserJob::DiffuseSpecularSh => {
                    let sh = *job == DenoiserJob::DiffuseSpecularSh;

                    let mut inputs = vec![
                        (InDiff, ShaderRead),
                        (InSpec, ShaderRead),
                        (ViewZ, ShaderRead),
                        (Mv, ShaderRead),
                        (NormalRoughness, ShaderRead),
                    ];

                    let mut outputs =
                        vec![(OutDiff, StorageWrite), (OutSpec, StorageWrite)];

                    if sh {
                        inputs.push((InDiffSh, ShaderRead));
                        inputs.push((InSpecSh, ShaderRead));
                        outputs.push((OutDiffSh, StorageWrite));
                        outputs.push((OutSpecSh, StorageWrite));
                    }

                    inputs.push((Transient(1), StorageWrite));

                    out.push(self.dispatch(&format!("{prefix}_prepass"), inputs));

                    out.push(self.dispatch(
                        &format!("{prefix}_temporal_accumulation"),
                        vec![
                            (Transient(1), ShaderRead),
                            (Mv, ShaderRead),
                            (Transient(2), StorageWrite),
                        ],
                    ));

                    let mut blur = vec![(Transient(2), ShaderRead)];

                    blur.extend(outputs);

                    out.push(self.dispatch(&format!("{prefix}_blur"), blur));
                }

                DenoiserJob::Reference => {
                    out.push(self.dispatch(
                        "reference_accumulate",
                        vec![
                            (InRadiance, ShaderRead),
                            (OutRadiance, StorageWrite),
                        ],
                    ));
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use glam::uvec2;

    use super::*;
    use crate::{CameraState, HeadlessBackend, Settings};

    fn setup() -> (HeadlessBackend, ResourceRegistry, DenoiserAdapter) {
        let mut backend = HeadlessBackend::default();
        let mut registry = ResourceRegistry::default();

        for id in TextureId::ALL {
            registry.create_texture(
                &mut backend,
                id,
                TextureDesc {
                    label: format!("{id:?}"),
                    width: 64,
                    height: 64,
                    format: id.format(),
                    usage: wgpu::TextureUsages::STORAGE_BINDING,
                },
            );
        }

        let adapter =
            DenoiserAdapter::new(&mut backend, Box::new(HeadlessDenoiser::default()));

        adapter.create_transients(&mut backend, &mut registry, uvec2(64, 64));

        (backend, registry, adapter)
    }

    fn frame(settings: Settings) -> FrameState {
        let mut frame = FrameState::new(uvec2(64, 64));

        frame.prepare(settings, CameraState::default(), false);
        frame
    }

    #[test]
    fn dispatches_go_through_transitions() {
        let (_, mut registry, mut target) = setup();
        let frame = frame(Settings::default());
        let mut commands = CommandList::new("frame");

        target.set_common_settings(&frame);
        target.set_technique_settings(&frame);

        let dispatches = target.denoise(
            &mut registry,
            &mut commands,
            &[DenoiserJob::Shadow, DenoiserJob::DiffuseSpecular],
        );

        assert_eq!(5, dispatches);

        assert_eq!(
            vec![
                "sigma_classify_tiles",
                "sigma_blur",
                "reblur_prepass",
                "reblur_temporal_accumulation",
                "reblur_blur",
            ],
            commands.dispatches().collect::<Vec<_>>()
        );

        assert_eq!(
            Access::StorageWrite,
            registry.state_of(TextureId::Shadow).access
        );

        assert_eq!(
            Access::StorageWrite,
            registry.state_of(TextureId::Diff).access
        );

        for command in commands.iter() {
            if let Command::Dispatch { descriptors, .. } = command {
                assert!(matches!(descriptors, Descriptors::Push(_)));
            }
        }
    }

    #[test]
    fn relax_and_sh() {
        let (_, mut registry, mut target) = setup();
        let mut commands = CommandList::new("frame");

        let frame = frame(Settings {
            denoiser: Denoiser::Relax,
            sh: true,
            ..Default::default()
        });

        target.set_common_settings(&frame);
        target.set_technique_settings(&frame);
        target.denoise(
            &mut registry,
            &mut commands,
            &[DenoiserJob::DiffuseSpecularSh],
        );

        assert_eq!(
            Some("relax_prepass"),
            commands.dispatches().next()
        );

        assert_eq!(
            Access::StorageWrite,
            registry.state_of(TextureId::SpecSh).access
        );
    }

    #[test]
    fn transition_frames_clear_history() {
        let (_, _, mut target) = setup();
        let mut frame = frame(Settings::default());

        target.set_common_settings(&frame);

        assert_eq!(
            AccumulationMode::ClearAndRestart,
            target.common_settings().unwrap().accumulation_mode
        );

        frame.retire();
        frame.prepare(Settings::default(), CameraState::default(), false);
        target.set_common_settings(&frame);

        let common = target.common_settings().unwrap();

        assert_eq!(AccumulationMode::Continue, common.accumulation_mode);
        assert_eq!(1, common.frame_index);
        assert_eq!(uvec2(64, 64), common.rect_size);
    }
}
