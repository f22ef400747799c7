use std::mem;
use std::time::Duration;

use derivative::Derivative;
use glam::UVec2;
use log::{info, warn};

use crate::frame_pipeline::{create_buffers, create_textures, import_swapchain};
use crate::{
    bake_omms, gather_instances, AccelStructs, Animator, Backend,
    CameraState, DenoiserAdapter, DenoiserLibrary, EngineConfig,
    FrameContext, FramePipeline, FrameReport, FrameState, HeadlessDenoiser,
    HeadlessOmmBaker, HeadlessUpscaler, OmmBaker, OmmCache, Overlay,
    ResourceRegistry, Scene, Settings, Upscaler, UpscalerAdapter,
    UpscalerLibrary,
};

/// External libraries the engine drives.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Integrations {
    #[derivative(Debug = "ignore")]
    pub denoiser: Box<dyn DenoiserLibrary>,

    #[derivative(Debug = "ignore")]
    pub upscaler: Box<dyn UpscalerLibrary>,

    /// When missing, alpha-tested geometry is traced without micromaps.
    #[derivative(Debug = "ignore")]
    pub omm_baker: Option<Box<dyn OmmBaker>>,

    #[derivative(Debug = "ignore")]
    pub overlay: Option<Box<dyn Overlay>>,
}

impl Integrations {
    /// Integrations that record their work without doing any; used for
    /// tests and dry runs.
    pub fn headless() -> Self {
        Self {
            denoiser: Box::<HeadlessDenoiser>::default(),
            upscaler: Box::<HeadlessUpscaler>::default(),
            omm_baker: Some(Box::<HeadlessOmmBaker>::default()),
            overlay: None,
        }
    }

    pub fn with_upscaler(
        mut self,
        upscaler: Box<dyn UpscalerLibrary>,
    ) -> Self {
        self.upscaler = upscaler;
        self
    }

    pub fn with_omm_baker(
        mut self,
        omm_baker: Option<Box<dyn OmmBaker>>,
    ) -> Self {
        self.omm_baker = omm_baker;
        self
    }

    pub fn with_overlay(mut self, overlay: Box<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Engine<B>
where
    B: Backend,
{
    #[derivative(Debug = "ignore")]
    backend: B,
    config: EngineConfig,
    registry: ResourceRegistry,
    omm: OmmCache,
    accel: AccelStructs,
    frame: FrameState,
    pipeline: FramePipeline,
    denoiser: DenoiserAdapter,
    upscaler: UpscalerAdapter,
    #[derivative(Debug = "ignore")]
    overlay: Option<Box<dyn Overlay>>,
    animator: Animator,
    pending_reset: bool,
}

impl<B> Engine<B>
where
    B: Backend,
{
    /// Bakes micromaps, builds acceleration structures and creates all
    /// resources and pipelines.
    pub fn new(
        mut backend: B,
        config: EngineConfig,
        scene: &mut Scene,
        integrations: Integrations,
    ) -> Self {
        let size = config.output_size;

        info!(
            "Initializing; output={}x{}, format={:?}, frames_in_flight={}",
            size.x, size.y, config.swapchain_format, config.frames_in_flight,
        );

        let Integrations {
            denoiser,
            upscaler,
            omm_baker,
            overlay,
        } = integrations;

        let mut registry = ResourceRegistry::default();

        let omm = match omm_baker {
            Some(mut baker) => {
                bake_omms(&mut backend, &mut registry, baker.as_mut(), scene)
            }
            None => OmmCache::default(),
        };

        let accel = AccelStructs::build(
            &mut backend,
            &mut registry,
            scene,
            &omm,
            config.max_instances,
            config.scratch_alignment,
        );

        create_buffers(&mut backend, &mut registry, config.max_instances);
        create_textures(&mut backend, &mut registry, size);
        import_swapchain(&mut backend, &mut registry);

        let denoiser = DenoiserAdapter::new(&mut backend, denoiser);

        denoiser.create_transients(&mut backend, &mut registry, size);

        let pipeline = FramePipeline::new(&mut backend, &registry, &config);

        info!("Initialized; resources={}", registry.len());

        Self {
            backend,
            registry,
            omm,
            accel,
            frame: FrameState::new(size),
            pipeline,
            denoiser,
            upscaler: UpscalerAdapter::new(upscaler),
            overlay,
            animator: Default::default(),
            pending_reset: false,
            config,
        }
    }

    /// Renders and presents a single frame.
    ///
    /// `elapsed` is the wall-clock time since the previous frame; it only
    /// drives animations.
    pub fn render_frame(
        &mut self,
        scene: &mut Scene,
        mut settings: Settings,
        camera: CameraState,
        elapsed: Duration,
    ) -> FrameReport {
        if !self.upscaler.supports(settings.effective_upscaler()) {
            warn!(
                "Upscaler {:?} is not available; falling back to TAA",
                settings.upscaler
            );

            settings.upscaler = Upscaler::None;
        }

        self.animator.update(scene, elapsed, &settings);

        self.frame
            .prepare(settings, camera, mem::take(&mut self.pending_reset));

        let gathered = gather_instances(
            scene,
            &self.accel,
            self.frame.settings(),
            self.frame.camera(),
            self.frame.camera_prev(),
        );

        assert!(
            gathered.instance_data.len() <= self.config.max_instances as usize,
            "too many instances: {} > {}",
            gathered.instance_data.len(),
            self.config.max_instances
        );

        let report = self.pipeline.render(
            FrameContext {
                backend: &mut self.backend,
                registry: &mut self.registry,
                tlases: &self.accel.tlases,
                denoiser: &mut self.denoiser,
                upscaler: &mut self.upscaler,
                overlay: self.overlay.as_deref_mut(),
            },
            &self.frame,
            &gathered,
        );

        self.frame.retire();

        report
    }

    /// Recreates all output-dependent resources; the next frame drops its
    /// history.
    pub fn resize(&mut self, size: UVec2) {
        assert!(size.x > 0 && size.y > 0, "invalid output size: {size}");

        info!("Resizing; output={}x{}", size.x, size.y);

        self.pipeline.wait_idle(&mut self.backend);

        create_textures(&mut self.backend, &mut self.registry, size);
        import_swapchain(&mut self.backend, &mut self.registry);

        self.denoiser.create_transients(
            &mut self.backend,
            &mut self.registry,
            size,
        );

        self.pipeline
            .create_descriptor_sets(&mut self.backend, &self.registry);

        self.config.output_size = size;
        self.frame.set_output_size(size);
        self.pending_reset = true;
    }

    /// Recreates all pipelines (ours and the denoiser's); the next frame
    /// drops its history.
    pub fn reload_pipelines(&mut self) {
        self.pipeline.wait_idle(&mut self.backend);
        self.pipeline.reload(&mut self.backend, &self.registry);
        self.denoiser.reload(&mut self.backend);
        self.pending_reset = true;
    }

    pub fn request_history_reset(&mut self) {
        self.pending_reset = true;
    }

    /// Waits for the GPU, releases everything and gives the backend back.
    pub fn shutdown(mut self) -> B {
        info!("Shutting down");

        self.pipeline.wait_idle(&mut self.backend);
        self.pipeline.destroy(&mut self.backend);
        self.denoiser.destroy_pipelines(&mut self.backend);
        self.registry.clear(&mut self.backend);

        self.backend
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn accel(&self) -> &AccelStructs {
        &self.accel
    }

    pub fn omm(&self) -> &OmmCache {
        &self.omm
    }

    pub fn frame(&self) -> &FrameState {
        &self.frame
    }

    pub fn animator_mut(&mut self) -> &mut Animator {
        &mut self.animator
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use glam::{dvec2, dvec3, uvec2, vec3, vec4, DAffine3, DVec3, Vec3};

    use super::*;
    use crate::{
        Access, AlphaMask, AlphaMode, AnimatedInstance, Command, CommandList,
        Denoiser, HeadlessBackend, Instance, Material, NativeResource,
        NativeTexture, Pass, ResourceId, TextureId,
    };

    fn scene() -> Scene {
        let mut scene = Scene::default();

        let quad = scene.add_mesh(
            &[Vec3::ZERO, Vec3::X, Vec3::Y, vec3(1.0, 1.0, 0.0)],
            &[0, 1, 2, 2, 1, 3],
        );

        let tri = scene.add_mesh(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]);
        let quad_mi = scene.add_mesh_instance(quad);
        let tri_mi = scene.add_mesh_instance(tri);

        let opaque = scene.add_material(Default::default());

        let glass = scene.add_material(
            Material::default()
                .with_base_color(vec4(1.0, 1.0, 1.0, 0.5))
                .with_alpha_mode(AlphaMode::Blend),
        );

        let lamp = scene.add_material(
            Material::default().with_emission(vec3(4.0, 4.0, 4.0)),
        );

        let leaves = scene.add_material(
            Material::default()
                .with_alpha_mode(AlphaMode::Mask)
                .with_alpha_mask(AlphaMask {
                    width: 2,
                    height: 1,
                    texels: vec![255, 0],
                }),
        );

        let xform = |x: f64| DAffine3::from_translation(dvec3(x, 0.0, -5.0));

        scene.add_instance(Instance::new(quad_mi, opaque, xform(0.0)));
        scene.add_instance(Instance::new(quad_mi, glass, xform(1.0)));
        scene.add_instance(Instance::new(tri_mi, lamp, xform(2.0)));
        scene.add_instance(Instance::new(tri_mi, leaves, xform(3.0)));

        scene.add_instance(
            Instance::new(tri_mi, opaque, xform(4.0)).with_allow_update(true),
        );

        scene
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_output_size(uvec2(64, 32))
            .with_max_instances(64)
    }

    fn engine(scene: &mut Scene) -> Engine<HeadlessBackend> {
        Engine::new(
            HeadlessBackend::default(),
            config(),
            scene,
            Integrations::headless(),
        )
    }

    fn render(
        engine: &mut Engine<HeadlessBackend>,
        scene: &mut Scene,
        settings: Settings,
    ) -> FrameReport {
        engine.render_frame(
            scene,
            settings,
            CameraState::new(DVec3::ZERO, 0.0, 0.0),
            Duration::from_millis(16),
        )
    }

    fn last_frame(engine: &Engine<HeadlessBackend>) -> &CommandList {
        engine.backend().last_submission().unwrap()
    }

    fn storage_writes(commands: &CommandList) -> Vec<ResourceId> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::Barriers(batch) => Some(batch.iter()),
                _ => None,
            })
            .flatten()
            .filter(|barrier| barrier.after.access == Access::StorageWrite)
            .map(|barrier| barrier.id)
            .collect()
    }

    #[test]
    fn setup() {
        let mut scene = scene();
        let target = engine(&mut scene);

        assert_eq!(1, target.omm().len());
        assert_eq!(1, target.accel().blases.dynamic_count());
        assert!(target.registry().contains(TextureId::Swapchain(2)));
        assert!(target.registry().contains(TextureId::DenoiserTransient(0)));
    }

    #[test]
    fn without_omm_baker() {
        let mut scene = scene();

        let mut target = Engine::new(
            HeadlessBackend::default(),
            config(),
            &mut scene,
            Integrations::headless().with_omm_baker(None),
        );

        assert!(target.omm().is_empty());
        assert!(render(&mut target, &mut scene, Settings::default()).presented);
    }

    #[test]
    fn radiance_cache_is_cleared_once() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        for _ in 0..3 {
            render(&mut target, &mut scene, Settings::default());
        }

        assert_eq!(3, target.backend().clears().len());

        let first_frame = &target.backend().submissions()
            [target.backend().submissions().len() - 3];

        let clears = first_frame
            .iter()
            .filter(|command| matches!(command, Command::ClearBuffer { .. }))
            .count();

        assert_eq!(3, clears);
    }

    #[test]
    fn denoiser_switch_resets_history_once() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        let reblur = Settings::default();

        let relax = Settings {
            denoiser: Denoiser::Relax,
            ..Default::default()
        };

        let report = render(&mut target, &mut scene, reblur);

        assert!(report.force_history_reset);
        assert_eq!(0.0, report.reset_factor);

        let report = render(&mut target, &mut scene, reblur);

        assert!(!report.force_history_reset);
        assert_eq!(1.0, report.reset_factor);

        let report = render(&mut target, &mut scene, relax);

        assert!(report.force_history_reset);
        assert_eq!(0.0, report.reset_factor);

        let report = render(&mut target, &mut scene, relax);

        assert!(!report.force_history_reset);

        assert!(last_frame(&target)
            .dispatches()
            .any(|label| label == "relax_prepass"));
    }

    #[test]
    fn reference_mode() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        let report = render(
            &mut target,
            &mut scene,
            Settings {
                denoiser: Denoiser::Reference,
                upscaler: Upscaler::Dlss,
                ..Default::default()
            },
        );

        assert!(!report.passes.contains(&Pass::ShadowDenoise));
        assert!(!report.passes.contains(&Pass::Upscale));
        assert!(report.passes.contains(&Pass::ReferenceAccumulate));

        let commands = last_frame(&target);

        assert!(commands.dispatches().any(|label| label == "reference_accumulate"));
        assert!(!commands.dispatches().any(|label| label == "sigma_blur"));

        assert!(!commands
            .iter()
            .any(|command| matches!(command, Command::External { .. })));
    }

    #[test]
    fn taa_history_ping_pongs() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        render(&mut target, &mut scene, Settings::default());

        let writes = storage_writes(last_frame(&target));

        assert!(writes.contains(&TextureId::TaaPing.into()));
        assert!(!writes.contains(&TextureId::TaaPong.into()));

        render(&mut target, &mut scene, Settings::default());

        let writes = storage_writes(last_frame(&target));

        assert!(writes.contains(&TextureId::TaaPong.into()));
        assert!(!writes.contains(&TextureId::TaaPing.into()));
    }

    #[test]
    fn stage_order() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        let report = render(&mut target, &mut scene, Settings::default());
        let commands = last_frame(&target);

        let names: Vec<_> = report.passes.iter().map(|pass| pass.name()).collect();
        let regions: Vec<_> = commands.regions().collect();

        assert_eq!(names, regions);

        let position = |predicate: fn(&Command) -> bool| {
            commands.iter().position(predicate).unwrap()
        };

        let upload = position(|cmd| matches!(cmd, Command::WriteBuffer { .. }));
        let tlas = position(|cmd| matches!(cmd, Command::BuildTlas { .. }));
        let clear = position(|cmd| matches!(cmd, Command::ClearBuffer { .. }));
        let first_pass = position(|cmd| matches!(cmd, Command::BeginRegion(_)));
        let copy = position(|cmd| matches!(cmd, Command::CopyTexture { .. }));

        assert!(upload < tlas);
        assert!(tlas < clear);
        assert!(clear < first_pass);
        assert!(first_pass < copy);

        // Swapchain ends up presentable
        let Some(Command::Barriers(batch)) = commands.iter().last() else {
            panic!("frame doesn't end with a barrier");
        };

        assert_eq!(Access::Present, batch.textures[0].after.access);
        assert!(report.presented);
        assert_eq!(1, target.backend().presents());
    }

    #[test]
    fn frame_slots_are_recycled() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        for _ in 0..4 {
            render(&mut target, &mut scene, Settings::default());
        }

        assert_eq!(&[0, 1, 0, 1], target.backend().allocator_resets());
    }

    #[test]
    fn out_of_date_swapchain_is_ignored() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        target.backend_mut().mark_out_of_date();

        let report = render(&mut target, &mut scene, Settings::default());

        assert!(!report.presented);

        assert!(!last_frame(&target)
            .iter()
            .any(|command| matches!(command, Command::CopyTexture { .. })));

        let report = render(&mut target, &mut scene, Settings::default());

        assert!(report.presented);
    }

    #[test]
    fn missing_upscaler_falls_back_to_taa() {
        let mut scene = scene();

        let mut target = Engine::new(
            HeadlessBackend::default(),
            config(),
            &mut scene,
            Integrations::headless().with_upscaler(Box::new(
                HeadlessUpscaler::default().without(Upscaler::Dlss),
            )),
        );

        let report = render(
            &mut target,
            &mut scene,
            Settings {
                upscaler: Upscaler::Dlss,
                ..Default::default()
            },
        );

        assert!(!report.passes.contains(&Pass::Upscale));

        let report = render(
            &mut target,
            &mut scene,
            Settings {
                upscaler: Upscaler::Fsr,
                resolution_scale: 0.5,
                ..Default::default()
            },
        );

        assert!(report.passes.contains(&Pass::Upscale));
        assert!(report.force_history_reset);
    }

    #[test]
    fn resize() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        render(&mut target, &mut scene, Settings::default());

        let alive = target.backend().alive_objects();

        target.resize(uvec2(32, 16));

        assert_eq!(alive, target.backend().alive_objects());

        let report = render(&mut target, &mut scene, Settings::default());

        assert!(report.force_history_reset);
        assert_eq!(uvec2(32, 16), target.frame().output_size());

        let report = render(&mut target, &mut scene, Settings::default());

        assert!(!report.force_history_reset);
    }

    #[test]
    fn reload_pipelines() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        render(&mut target, &mut scene, Settings::default());

        let alive = target.backend().alive_objects();

        target.reload_pipelines();

        assert_eq!(alive, target.backend().alive_objects());

        let report = render(&mut target, &mut scene, Settings::default());

        assert!(report.force_history_reset);
    }

    #[test]
    fn explicit_history_reset() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        render(&mut target, &mut scene, Settings::default());
        target.request_history_reset();

        assert!(render(&mut target, &mut scene, Settings::default()).force_history_reset);
        assert!(!render(&mut target, &mut scene, Settings::default()).force_history_reset);
    }

    #[test]
    fn overlay() {
        struct TestOverlay;

        impl Overlay for TestOverlay {
            fn record(
                &mut self,
                target: NativeTexture,
                commands: &mut CommandList,
            ) {
                commands.push(Command::External {
                    label: "overlay".into(),
                    resources: vec![NativeResource::Texture(target)],
                });
            }
        }

        let mut scene = scene();

        let mut target = Engine::new(
            HeadlessBackend::default(),
            config(),
            &mut scene,
            Integrations::headless().with_overlay(Box::new(TestOverlay)),
        );

        render(&mut target, &mut scene, Settings::default());

        let commands: Vec<_> = last_frame(&target).iter().collect();

        let overlay = commands
            .iter()
            .position(|command| {
                matches!(command, Command::External { label, .. } if label == "overlay")
            })
            .unwrap();

        let Command::Barriers(batch) = commands[overlay - 1] else {
            panic!("overlay isn't preceded by a barrier");
        };

        assert_eq!(Access::ColorAttachment, batch.textures[0].after.access);
    }

    #[test]
    fn animation_moves_dynamic_instances() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        target.animator_mut().add(
            &scene,
            AnimatedInstance::new(4, dvec3(0.0, 0.0, -5.0), dvec2(2.0, 2.0))
                .with_angular_speed(FRAC_PI_2),
        );

        let settings = Settings {
            animate_objects: true,
            ..Default::default()
        };

        render(&mut target, &mut scene, settings);

        let position = scene.instances[4].transform.translation;

        assert!(position.distance(dvec3(0.0, 0.0, -5.0)) > 1.9);

        // Motion got committed after gathering
        assert_eq!(scene.instances[4].transform, scene.instances[4].prev_transform);
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut scene = scene();
        let mut target = engine(&mut scene);

        render(&mut target, &mut scene, Settings::default());

        let backend = target.shutdown();

        assert_eq!(0, backend.alive_objects());
    }
}
