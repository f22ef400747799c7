//! Opacity micromaps for alpha-tested geometry.
//!
//! Baking itself is done by an external library ([`OmmBaker`]); glint only
//! provides it with buffers, runs its work through the usual transition
//! machinery and then hands the results over to BLAS builds.

use fxhash::{FxHashMap, FxHashSet};
use log::{debug, info};

use crate::backend::OrFatal;
use crate::{
    record_transitions, Access, AlphaMask, Backend, BufferDesc, BufferId,
    Command, CommandList, MicromapBinding, NativeResource, ResourceRegistry,
    Scene, StateRequest,
};

/// Alpha-tested geometry to bake.
#[derive(Clone, Copy, Debug)]
pub struct OmmBakeInput<'a> {
    pub mesh: u32,
    pub material: u32,
    pub positions: &'a [glam::Vec3],
    pub indices: &'a [u32],
    pub alpha_mask: &'a AlphaMask,
    pub alpha_cutoff: f32,
}

/// Memory requirements and work of a single bake.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OmmBakeDesc {
    pub array_size: u64,
    pub indices_size: u64,
    pub scratch_size: u64,
    pub passes: Vec<String>,
}

pub trait OmmBaker {
    /// Returns what baking given geometry requires; `None` if the geometry
    /// doesn't benefit from a micromap (e.g. it's fully opaque).
    fn prepare(&mut self, input: &OmmBakeInput<'_>) -> Option<OmmBakeDesc>;
}

/// Identifies a micromap: the same mesh can be cut out by different alpha
/// masks, so micromaps are baked per mesh-material pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OmmKey {
    pub mesh: u32,
    pub material: u32,
}

/// Baked micromaps, per mesh-material pair.
#[derive(Clone, Debug, Default)]
pub struct OmmCache {
    bindings: FxHashMap<OmmKey, MicromapBinding>,
}

impl OmmCache {
    pub fn get(&self, key: OmmKey) -> Option<MicromapBinding> {
        self.bindings.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Bakes micromaps of every mesh-material pair used by an alpha-tested
/// instance.
pub fn bake_omms(
    backend: &mut impl Backend,
    registry: &mut ResourceRegistry,
    baker: &mut dyn OmmBaker,
    scene: &Scene,
) -> OmmCache {
    let mut cache = OmmCache::default();

    if !backend.caps().supports_micromaps {
        info!("Opacity micromaps are not supported, skipping bake");
        return cache;
    }

    let mut seen = FxHashSet::default();
    let mut bakes = Vec::new();

    for instance in &scene.instances {
        let material = scene.material_of(instance);

        if material.off || !material.is_alpha_tested() {
            continue;
        }

        let Some(alpha_mask) = &material.alpha_mask else {
            continue;
        };

        let key = OmmKey {
            mesh: scene.mesh_instance_of(instance).mesh,
            material: instance.material,
        };

        if !seen.insert(key) {
            continue;
        }

        let mesh = &scene.meshes[key.mesh as usize];

        let input = OmmBakeInput {
            mesh: key.mesh,
            material: key.material,
            positions: scene.mesh_positions(mesh),
            indices: scene.mesh_indices(mesh),
            alpha_mask,
            alpha_cutoff: material.alpha_cutoff,
        };

        if let Some(desc) = baker.prepare(&input) {
            bakes.push((key, desc));
        }
    }

    if bakes.is_empty() {
        return cache;
    }

    info!("Baking opacity micromaps; count={}", bakes.len());

    let scratch_size = bakes
        .iter()
        .map(|(_, desc)| desc.scratch_size)
        .max()
        .unwrap_or_default();

    let scratch = registry.create_buffer(
        backend,
        BufferId::OmmScratch,
        BufferDesc {
            label: "glint_omm_scratch".into(),
            size: scratch_size.max(4),
            usage: wgpu::BufferUsages::STORAGE,
            host_visible: false,
        },
    );

    let mut commands = CommandList::new("glint_omm_bake");

    for (slot, (key, desc)) in bakes.iter().enumerate() {
        let slot = slot as u32;

        debug!(
            "Baking mesh #{} with material #{}; array={}, indices={}",
            key.mesh, key.material, desc.array_size, desc.indices_size
        );

        let array = registry.create_buffer(
            backend,
            BufferId::OmmArray(slot),
            BufferDesc {
                label: format!("glint_omm_array_{slot}"),
                size: desc.array_size,
                usage: wgpu::BufferUsages::STORAGE,
                host_visible: false,
            },
        );

        let indices = registry.create_buffer(
            backend,
            BufferId::OmmIndices(slot),
            BufferDesc {
                label: format!("glint_omm_indices_{slot}"),
                size: desc.indices_size,
                usage: wgpu::BufferUsages::STORAGE,
                host_visible: false,
            },
        );

        // Bakes share the scratch buffer, so each one waits for the
        // previous one through a write-after-write barrier
        record_transitions(
            registry,
            &mut commands,
            &[
                StateRequest::write(BufferId::OmmScratch),
                StateRequest::write(BufferId::OmmArray(slot)),
                StateRequest::write(BufferId::OmmIndices(slot)),
            ],
        );

        for pass in &desc.passes {
            commands.push(Command::External {
                label: pass.clone(),
                resources: vec![
                    NativeResource::Buffer(scratch),
                    NativeResource::Buffer(array),
                    NativeResource::Buffer(indices),
                ],
            });
        }

        cache
            .bindings
            .insert(*key, MicromapBinding { array, indices });
    }

    let requests: Vec<_> = (0..bakes.len() as u32)
        .flat_map(|slot| {
            [
                StateRequest::new(
                    BufferId::OmmArray(slot),
                    Access::AccelStructBuildInput,
                ),
                StateRequest::new(
                    BufferId::OmmIndices(slot),
                    Access::AccelStructBuildInput,
                ),
            ]
        })
        .collect();

    record_transitions(registry, &mut commands, &requests);

    let fence = backend
        .submit(commands)
        .or_fatal("couldn't bake opacity micromaps");

    backend.wait(fence).or_fatal("couldn't bake opacity micromaps");
    registry.remove(backend, BufferId::OmmScratch);

    cache
}

/// Baker that sizes micromaps at a fixed subdivision level without running
/// any actual work; used for tests and dry runs.
#[derive(Clone, Debug)]
pub struct HeadlessOmmBaker {
    subdivision_level: u32,
}

impl HeadlessOmmBaker {
    pub fn new(subdivision_level: u32) -> Self {
        Self { subdivision_level }
    }
}

impl Default for HeadlessOmmBaker {
    fn default() -> Self {
        Self::new(4)
    }
}

impl OmmBaker for HeadlessOmmBaker {
    fn prepare(&mut self, input: &OmmBakeInput<'_>) -> Option<OmmBakeDesc> {
        let triangles = (input.indices.len() / 3) as u64;

        let is_opaque = input
            .alpha_mask
            .texels
            .iter()
            .all(|&texel| texel as f32 / 255.0 >= input.alpha_cutoff);

        if triangles == 0 || is_opaque {
            return None;
        }

        // Two bits per micro-triangle (4-state format)
        let micro_triangles = 4u64.pow(self.subdivision_level);
        let array_size = triangles * ((micro_triangles * 2 + 7) / 8);

        Some(OmmBakeDesc {
            array_size,
            indices_size: triangles * 4,
            scratch_size: array_size * 2,
            passes: vec![
                format!("omm_bake_{}_{}_raster", input.mesh, input.material),
                format!("omm_bake_{}_{}_compress", input.mesh, input.material),
            ],
        })
    }
}
