//! Per-frame stage machine.
//!
//! A frame always goes through the same stages: wait until the GPU is done
//! with the frame slot, stream uploads, rebuild top-level structures, run
//! the resolved pass plan, copy the result into the swapchain, draw the
//! overlay, submit and present. Settings only decide which passes the plan
//! contains.

mod limiter;
mod passes;
mod plan;
mod resources;

use std::mem;
use std::time::Instant;

use derivative::Derivative;
use fxhash::FxHashMap;
use glam::UVec2;
use glint_gpu::{PassParams, SHARC_DOWNSCALE, TILE_SIZE};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use self::limiter::*;
pub use self::passes::*;
pub use self::plan::*;
pub(crate) use self::resources::*;
use crate::backend::OrFatal;
use crate::utils::{dispatch_size, metric};
use crate::{
    record_transitions, Access, Backend, BackendError, BufferId, Command,
    CommandList, DenoiserAdapter, DenoiserJob, DescriptorSetDesc,
    Descriptors, EngineConfig, FenceValue, FrameState, GatheredInstances,
    NativeDescriptorSet, NativeObject, NativePipeline, NativeTexture,
    PipelineDesc, ResourceRegistry, StateRequest, TextureId, TlasSet,
    UpscalerAdapter,
};

/// UI drawn on top of the final image, straight into the swapchain.
pub trait Overlay {
    fn record(&mut self, target: NativeTexture, commands: &mut CommandList);
}

/// Everything a frame touches besides the pipeline itself.
pub struct FrameContext<'a, B> {
    pub backend: &'a mut B,
    pub registry: &'a mut ResourceRegistry,
    pub tlases: &'a TlasSet,
    pub denoiser: &'a mut DenoiserAdapter,
    pub upscaler: &'a mut UpscalerAdapter,
    pub overlay: Option<&'a mut (dyn Overlay + 'static)>,
}

/// Summary of a rendered frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub index: u32,
    pub passes: Vec<Pass>,
    pub barriers: usize,
    pub reset_factor: f32,
    pub force_history_reset: bool,

    /// Whether the frame made it to the screen; it doesn't when the
    /// swapchain is out of date.
    pub presented: bool,

    pub fence: FenceValue,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct FramePipeline {
    pipelines: FxHashMap<&'static str, NativePipeline>,
    descriptor_sets: FxHashMap<(Pass, u32), NativeDescriptorSet>,
    fences: Vec<Option<FenceValue>>,
    limiter: FpsLimiter,
    debug_labels: bool,

    #[derivative(Debug = "ignore")]
    rng: StdRng,
}

impl FramePipeline {
    pub fn new(
        backend: &mut impl Backend,
        registry: &ResourceRegistry,
        config: &EngineConfig,
    ) -> Self {
        assert!(config.frames_in_flight > 0, "need at least one frame slot");

        let mut this = Self {
            pipelines: Default::default(),
            descriptor_sets: Default::default(),
            fences: vec![None; config.frames_in_flight],
            limiter: Default::default(),
            debug_labels: config.debug_labels,
            rng: StdRng::seed_from_u64(config.seed),
        };

        this.create_pipelines(backend);
        this.create_descriptor_sets(backend, registry);
        this
    }

    fn create_pipelines(&mut self, backend: &mut impl Backend) {
        let passes = PassPlan::all_passes();

        info!("Creating pipelines");

        for shader in passes.iter().filter_map(|pass| pass.shader()) {
            if self.pipelines.contains_key(shader) {
                continue;
            }

            debug!("Creating pipeline `{shader}`");

            let pipeline = backend
                .create_pipeline(&PipelineDesc {
                    label: format!("glint_{shader}"),
                    shader: shader.into(),
                    push_constants_size: mem::size_of::<PassParams>() as u32,
                })
                .or_fatal(format_args!("couldn't create pipeline `{shader}`"));

            self.pipelines.insert(shader, pipeline);
        }
    }

    fn destroy_pipelines(&mut self, backend: &mut impl Backend) {
        for (_, pipeline) in self.pipelines.drain() {
            backend.destroy(NativeObject::Pipeline(pipeline));
        }
    }

    /// Creates descriptor sets of all passes, for both frame parities.
    ///
    /// Sets bind native resources directly, so they have to be recreated
    /// whenever any of the resources they bind is.
    pub fn create_descriptor_sets(
        &mut self,
        backend: &mut impl Backend,
        registry: &ResourceRegistry,
    ) {
        self.destroy_descriptor_sets(backend);

        for pass in PassPlan::all_passes() {
            let Some(shader) = pass.shader() else {
                continue;
            };

            let pipeline = self.pipeline(shader);

            for parity in 0..2 {
                let bindings = pass
                    .requests(parity)
                    .iter()
                    .map(|request| registry.get(request.id))
                    .collect();

                let label = format!("glint_{}_ds{parity}", pass.name());

                let set = backend
                    .create_descriptor_set(&DescriptorSetDesc {
                        label,
                        pipeline,
                        bindings,
                    })
                    .or_fatal(format_args!(
                        "couldn't create descriptor set for `{}`",
                        pass.name()
                    ));

                self.descriptor_sets.insert((pass, parity), set);
            }
        }

        debug!("Created {} descriptor sets", self.descriptor_sets.len());
    }

    fn destroy_descriptor_sets(&mut self, backend: &mut impl Backend) {
        for (_, set) in self.descriptor_sets.drain() {
            backend.destroy(NativeObject::DescriptorSet(set));
        }
    }

    /// Recreates all pipelines (e.g. after shaders got recompiled).
    pub fn reload(
        &mut self,
        backend: &mut impl Backend,
        registry: &ResourceRegistry,
    ) {
        info!("Reloading pipelines");

        self.destroy_descriptor_sets(backend);
        self.destroy_pipelines(backend);
        self.create_pipelines(backend);
        self.create_descriptor_sets(backend, registry);
    }

    pub fn destroy(&mut self, backend: &mut impl Backend) {
        self.destroy_descriptor_sets(backend);
        self.destroy_pipelines(backend);
    }

    /// Blocks until the GPU is done with every submitted frame.
    pub fn wait_idle(&mut self, backend: &mut impl Backend) {
        for fence in self.fences.iter_mut() {
            if let Some(fence) = fence.take() {
                backend.wait(fence).or_fatal("couldn't wait for frame");
            }
        }
    }

    pub fn pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn render<B>(
        &mut self,
        ctx: FrameContext<'_, B>,
        frame: &FrameState,
        gathered: &GatheredInstances,
    ) -> FrameReport
    where
        B: Backend,
    {
        let tt = Instant::now();

        let FrameContext {
            backend,
            registry,
            tlases,
            denoiser,
            upscaler,
            overlay,
        } = ctx;

        let slot = frame.index() as usize % self.fences.len();

        if let Some(fence) = self.fences[slot].take() {
            backend.wait(fence).or_fatal("couldn't wait for frame slot");
        }

        backend
            .reset_command_allocator(slot)
            .or_fatal("couldn't reset command allocator");

        let swapchain_idx = match backend.acquire_swapchain_texture() {
            Ok(idx) => Some(idx),

            Err(BackendError::OutOfDate) => {
                warn!("Swapchain is out of date; frame won't be presented");
                None
            }

            Err(err) => {
                let idx = Err::<u32, _>(err)
                    .or_fatal("couldn't acquire swapchain texture");

                Some(idx)
            }
        };

        let plan = PassPlan::resolve(frame.settings());
        let seed = self.rng.gen();
        let mut commands =
            CommandList::new(format!("glint_frame_{}", frame.index()));

        self.record_uploads(registry, &mut commands, frame, gathered, seed);

        tlases.record_builds(
            registry,
            &mut commands,
            gathered.world_tlas.len() as u32,
            gathered.emissive_tlas.len() as u32,
        );

        if frame.index() == 0 {
            clear_radiance_cache(registry, &mut commands);
        }

        denoiser.set_common_settings(frame);
        denoiser.set_technique_settings(frame);

        for pass in plan.iter() {
            if self.debug_labels {
                commands.begin_region(pass.name());
            }

            match pass {
                Pass::ShadowDenoise => {
                    denoiser.denoise(
                        registry,
                        &mut commands,
                        &[DenoiserJob::Shadow],
                    );
                }

                Pass::OpaqueDenoise { sh } => {
                    let job = if sh {
                        DenoiserJob::DiffuseSpecularSh
                    } else {
                        DenoiserJob::DiffuseSpecular
                    };

                    denoiser.denoise(registry, &mut commands, &[job]);
                }

                Pass::ReferenceAccumulate => {
                    denoiser.denoise(
                        registry,
                        &mut commands,
                        &[DenoiserJob::Reference],
                    );
                }

                Pass::Upscale => {
                    upscaler.upscale(registry, &mut commands, frame);
                }

                Pass::CopyToSwapchain => {
                    if let Some(idx) = swapchain_idx {
                        record_transitions(
                            registry,
                            &mut commands,
                            &[
                                StateRequest::new(
                                    TextureId::Final,
                                    Access::CopySrc,
                                ),
                                StateRequest::new(
                                    TextureId::Swapchain(idx),
                                    Access::CopyDst,
                                ),
                            ],
                        );

                        commands.push(Command::CopyTexture {
                            src: registry.texture(TextureId::Final),
                            dst: registry.texture(TextureId::Swapchain(idx)),
                        });
                    }
                }

                pass => {
                    self.dispatch(registry, &mut commands, frame, pass, seed);
                }
            }

            if self.debug_labels {
                commands.end_region();
            }
        }

        if let Some(idx) = swapchain_idx {
            let swapchain = TextureId::Swapchain(idx);

            if let Some(overlay) = overlay {
                record_transitions(
                    registry,
                    &mut commands,
                    &[StateRequest::new(swapchain, Access::ColorAttachment)],
                );

                overlay.record(registry.texture(swapchain), &mut commands);
            }

            record_transitions(
                registry,
                &mut commands,
                &[StateRequest::new(swapchain, Access::Present)],
            );
        }

        let barriers = commands.barrier_count();

        let fence = backend
            .submit(commands)
            .or_fatal("couldn't submit frame");

        self.fences[slot] = Some(fence);

        let presented = swapchain_idx.is_some()
            && match backend.present() {
                Ok(()) => true,

                Err(BackendError::OutOfDate) => {
                    warn!("Swapchain is out of date; frame wasn't presented");
                    false
                }

                Err(err) => {
                    Err::<(), _>(err).or_fatal("couldn't present frame");
                    false
                }
            };

        metric("frame", tt);

        self.limiter.wait(frame.settings().max_fps);

        FrameReport {
            index: frame.index(),
            passes: plan.passes().to_vec(),
            barriers,
            reset_factor: frame.reset_factor(),
            force_history_reset: frame.force_history_reset(),
            presented,
            fence,
        }
    }

    fn record_uploads(
        &self,
        registry: &mut ResourceRegistry,
        commands: &mut CommandList,
        frame: &FrameState,
        gathered: &GatheredInstances,
        seed: u32,
    ) {
        let constants = frame.constants(seed);

        let uploads = [
            (BufferId::Constants, bytemuck::bytes_of(&constants)),
            (
                BufferId::InstanceData,
                bytemuck::cast_slice(&gathered.instance_data),
            ),
            (
                BufferId::TlasWorldInstances,
                bytemuck::cast_slice(&gathered.world_tlas),
            ),
            (
                BufferId::TlasEmissiveInstances,
                bytemuck::cast_slice(&gathered.emissive_tlas),
            ),
        ];

        let requests: Vec<_> = uploads
            .iter()
            .map(|(id, _)| StateRequest::new(*id, Access::CopyDst))
            .collect();

        record_transitions(registry, commands, &requests);

        for (id, data) in uploads {
            if data.is_empty() {
                continue;
            }

            commands.push(Command::WriteBuffer {
                buffer: registry.buffer(id),
                offset: 0,
                data: data.to_vec(),
            });
        }

        record_transitions(
            registry,
            commands,
            &[
                StateRequest::new(BufferId::Constants, Access::ConstantBuffer),
                StateRequest::read(BufferId::InstanceData),
            ],
        );
    }

    fn dispatch(
        &self,
        registry: &mut ResourceRegistry,
        commands: &mut CommandList,
        frame: &FrameState,
        pass: Pass,
        seed: u32,
    ) {
        let parity = frame.parity();
        let shader = pass.shader().unwrap_or_else(|| {
            panic!("pass `{}` doesn't have a shader", pass.name())
        });

        record_transitions(registry, commands, &pass.requests(parity));

        let set = *self
            .descriptor_sets
            .get(&(pass, parity))
            .unwrap_or_else(|| panic!("no descriptor set for {pass:?}"));

        let size = match pass.resolution() {
            PassResolution::RadianceCache => {
                (frame.render_size() / SHARC_DOWNSCALE).max(UVec2::ONE)
            }
            PassResolution::Render => frame.render_size(),
            PassResolution::Output => frame.output_size(),
        };

        let params = PassParams {
            frame_index: frame.index(),
            parity,
            flags: pass.flags(),
            seed,
        };

        commands.push(Command::Dispatch {
            label: pass.name().into(),
            pipeline: self.pipeline(shader),
            descriptors: Descriptors::Set(set),
            push_constants: bytemuck::bytes_of(&params).to_vec(),
            groups: dispatch_size(size, TILE_SIZE),
        });
    }

    fn pipeline(&self, shader: &str) -> NativePipeline {
        *self
            .pipelines
            .get(shader)
            .unwrap_or_else(|| panic!("pipeline not known: {shader}"))
    }
}

/// Radiance cache starts with garbage; it's cleared once, before the very
/// first frame uses it.
fn clear_radiance_cache(
    registry: &mut ResourceRegistry,
    commands: &mut CommandList,
) {
    let buffers = [
        BufferId::SharcHashEntries,
        BufferId::SharcVoxelData,
        BufferId::SharcVoxelDataPrev,
    ];

    let requests: Vec<_> = buffers
        .iter()
        .map(|id| StateRequest::new(*id, Access::CopyDst))
        .collect();

    record_transitions(registry, commands, &requests);

    for id in buffers {
        commands.push(Command::ClearBuffer {
            buffer: registry.buffer(id),
            value: 0,
        });
    }
}
