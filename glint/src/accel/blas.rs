use bytemuck::cast_slice;
use fxhash::FxHashMap;
use glam::Vec3;
use glint_gpu::encode_affine;
use log::{debug, info};

use crate::backend::OrFatal;
use crate::utils::{align_up, to_affine3a};
use crate::{
    record_transitions, Access, AccelStructDesc, AccelStructId,
    AccelStructInputs, AccelStructKind, AccelStructSizes, Backend,
    BlasGeometry, BufferDesc, BufferId, Classification, Command, CommandList,
    NativeAccelStruct, NativeBuffer, NativeObject, OmmCache, OmmKey,
    ResourceRegistry, Scene, StateRequest, StaticBucket,
};

/// Size of a row-major 3x4 transform, as consumed by BLAS builds.
const TRANSFORM_SIZE: u64 = 48;

/// Compacted bottom-level structures.
#[derive(Clone, Debug, Default)]
pub struct BlasSet {
    statics: [Option<NativeAccelStruct>; 4],
    dynamics: Vec<NativeAccelStruct>,

    /// Material whose micromap got attached to given dynamic BLAS; other
    /// instances sharing that BLAS must not use it.
    dynamic_micromaps: Vec<Option<u32>>,
}

impl BlasSet {
    pub fn static_blas(&self, bucket: StaticBucket) -> Option<NativeAccelStruct> {
        self.statics[bucket.index()]
    }

    pub fn dynamic_blas(&self, blas_index: u32) -> NativeAccelStruct {
        self.dynamics
            .get(blas_index as usize)
            .copied()
            .unwrap_or_else(|| panic!("dynamic BLAS not built: {blas_index}"))
    }

    pub fn dynamic_micromap(&self, blas_index: u32) -> Option<u32> {
        self.dynamic_micromaps
            .get(blas_index as usize)
            .copied()
            .flatten()
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamics.len()
    }
}

/// Geometry data of all BLASes, packed into a single upload:
/// transforms of static instances first, then the scene's vertices and then
/// its indices.
struct Staging {
    bytes: Vec<u8>,

    /// Instance index -> offset of its baked transform.
    transforms: FxHashMap<usize, u64>,

    positions_offset: u64,
    indices_offset: u64,
}

impl Staging {
    fn new(scene: &Scene, classification: &Classification) -> Self {
        let mut bytes = Vec::new();
        let mut transforms = FxHashMap::default();

        for bucket in StaticBucket::ORDER {
            for &instance_idx in classification.bucket(bucket) {
                let xform = to_affine3a(scene.instances[instance_idx].transform);

                transforms.insert(instance_idx, bytes.len() as u64);
                bytes.extend_from_slice(cast_slice(&encode_affine(xform)));
            }
        }

        let positions_offset = align_up(bytes.len() as u64, 256);

        bytes.resize(positions_offset as usize, 0);
        bytes.extend_from_slice(cast_slice::<Vec3, u8>(&scene.positions));

        let indices_offset = align_up(bytes.len() as u64, 256);

        bytes.resize(indices_offset as usize, 0);
        bytes.extend_from_slice(cast_slice(&scene.indices));

        Self {
            bytes,
            transforms,
            positions_offset,
            indices_offset,
        }
    }

    fn static_geometry(
        &self,
        buffer: NativeBuffer,
        scene: &Scene,
        omm: &OmmCache,
        instance_idx: usize,
    ) -> BlasGeometry {
        let instance = &scene.instances[instance_idx];
        let material = scene.material_of(instance);
        let mesh_idx = scene.mesh_instance_of(instance).mesh;

        let micromap = if material.is_alpha_tested() {
            omm.get(OmmKey {
                mesh: mesh_idx,
                material: instance.material,
            })
        } else {
            None
        };

        BlasGeometry {
            transform_offset: Some(self.transforms[&instance_idx]),
            opaque: material.is_opaque(),
            micromap,
            ..self.mesh_geometry(buffer, scene, mesh_idx)
        }
    }

    /// Geometry of a dynamic mesh instance, shared by all of its instances.
    ///
    /// It's opaque only if every instance using it is; the micromap (if any)
    /// comes from the first alpha-tested instance that has one baked.
    fn shared_geometry(
        &self,
        buffer: NativeBuffer,
        scene: &Scene,
        omm: &OmmCache,
        instances: &[usize],
    ) -> (BlasGeometry, Option<u32>) {
        let mesh_idx = scene
            .mesh_instance_of(&scene.instances[instances[0]])
            .mesh;

        let opaque = instances
            .iter()
            .all(|&idx| scene.material_of(&scene.instances[idx]).is_opaque());

        let micromap = instances
            .iter()
            .map(|&idx| &scene.instances[idx])
            .filter(|instance| scene.material_of(instance).is_alpha_tested())
            .find_map(|instance| {
                let binding = omm.get(OmmKey {
                    mesh: mesh_idx,
                    material: instance.material,
                })?;

                Some((binding, instance.material))
            });

        let geometry = BlasGeometry {
            transform_offset: None,
            opaque,
            micromap: micromap.map(|(binding, _)| binding),
            ..self.mesh_geometry(buffer, scene, mesh_idx)
        };

        (geometry, micromap.map(|(_, material)| material))
    }

    fn mesh_geometry(
        &self,
        buffer: NativeBuffer,
        scene: &Scene,
        mesh_idx: u32,
    ) -> BlasGeometry {
        let mesh = scene.meshes[mesh_idx as usize];

        BlasGeometry {
            buffer,
            vertex_offset: self.positions_offset
                + mesh.vertex_offset as u64 * 12,
            vertex_count: mesh.vertex_count,
            vertex_stride: 12,
            index_offset: self.indices_offset + mesh.index_offset as u64 * 4,
            index_count: mesh.index_count,
            transform_offset: None,
            opaque: true,
            micromap: None,
        }
    }
}

struct PendingBlas {
    id: AccelStructId,
    geometries: Vec<BlasGeometry>,
    sizes: AccelStructSizes,
    scratch_offset: u64,
}

/// Builds all bottom-level structures: one per non-empty static bucket and
/// one per unique dynamic mesh instance.
///
/// Every structure gets built uncompacted first (sharing one scratch buffer,
/// each at its own offset), then its compacted size is queried and it gets
/// copied into a tightly-sized structure; all temporaries are released
/// before returning.
///
/// Assigns [`crate::MeshInstance::blas_index`] of dynamic mesh instances.
pub fn build_blases(
    backend: &mut impl Backend,
    registry: &mut ResourceRegistry,
    scene: &mut Scene,
    classification: &Classification,
    omm: &OmmCache,
    scratch_alignment: u64,
) -> BlasSet {
    let mut blases = BlasSet::default();
    let buckets: Vec<_> = classification.non_empty_buckets().collect();
    let dynamic_mesh_instances = classification.dynamic_mesh_instances();

    if buckets.is_empty() && dynamic_mesh_instances.is_empty() {
        return blases;
    }

    info!(
        "Building BLASes; static={}, dynamic={}",
        buckets.len(),
        dynamic_mesh_instances.len()
    );

    // Step 1: stage geometry
    let staging = Staging::new(scene, classification);

    let staging_buffer = registry.create_buffer(
        backend,
        BufferId::Staging,
        BufferDesc {
            label: "glint_blas_staging".into(),
            size: staging.bytes.len() as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::STORAGE,
            host_visible: true,
        },
    );

    backend
        .write_buffer(staging_buffer, 0, &staging.bytes)
        .or_fatal("couldn't upload BLAS geometry");

    let mut pending = Vec::new();

    for bucket in buckets {
        let geometries = classification
            .bucket(bucket)
            .iter()
            .map(|&instance_idx| {
                staging.static_geometry(
                    staging_buffer,
                    scene,
                    omm,
                    instance_idx,
                )
            })
            .collect();

        pending.push((AccelStructId::BlasStatic(bucket), geometries));
    }

    for (blas_idx, &mesh_instance) in dynamic_mesh_instances.iter().enumerate()
    {
        let instances: Vec<_> = classification
            .dynamic_instances()
            .iter()
            .copied()
            .filter(|&idx| scene.instances[idx].mesh_instance == mesh_instance)
            .collect();

        assert!(
            !instances.is_empty(),
            "mesh instance without instances: {mesh_instance}"
        );

        let (geometry, micromap) =
            staging.shared_geometry(staging_buffer, scene, omm, &instances);

        blases.dynamic_micromaps.push(micromap);

        pending.push((
            AccelStructId::BlasDynamic(blas_idx as u32),
            vec![geometry],
        ));
    }

    // Step 2: build uncompacted
    let mut scratch_size = 0;

    let pending: Vec<_> = pending
        .into_iter()
        .map(|(id, geometries)| {
            let sizes = backend.accel_struct_sizes(AccelStructInputs::Bottom {
                geometries: &geometries,
            });

            let scratch_offset = scratch_size;

            scratch_size = align_up(
                scratch_offset + sizes.build_scratch_size,
                scratch_alignment,
            );

            debug!(
                "Sizing {id:?}; geometries={}, size={}, scratch={}",
                geometries.len(),
                sizes.size,
                sizes.build_scratch_size
            );

            PendingBlas {
                id,
                geometries,
                sizes,
                scratch_offset,
            }
        })
        .collect();

    let scratch = registry.create_buffer(
        backend,
        BufferId::BlasScratch,
        BufferDesc {
            label: "glint_blas_scratch".into(),
            size: scratch_size.max(scratch_alignment),
            usage: wgpu::BufferUsages::STORAGE,
            host_visible: false,
        },
    );

    let uncompacted: Vec<_> = pending
        .iter()
        .enumerate()
        .map(|(idx, blas)| {
            registry.create_accel_struct(
                backend,
                AccelStructId::BlasUncompacted(idx as u32),
                AccelStructDesc {
                    label: format!("glint_blas_uncompacted_{idx}"),
                    kind: AccelStructKind::BottomLevel,
                    size: blas.sizes.size,
                },
            )
        })
        .collect();

    let query_pool = backend
        .create_query_pool(pending.len() as u32)
        .or_fatal("couldn't create compaction query pool");

    let mut commands = CommandList::new("glint_blas_build");

    let requests: Vec<_> = [
        StateRequest::new(BufferId::Staging, Access::AccelStructBuildInput),
        StateRequest::write(BufferId::BlasScratch),
    ]
    .into_iter()
    .chain((0..pending.len()).map(|idx| {
        StateRequest::new(
            AccelStructId::BlasUncompacted(idx as u32),
            Access::AccelStructWrite,
        )
    }))
    .collect();

    record_transitions(registry, &mut commands, &requests);

    for (blas, dst) in pending.iter().zip(&uncompacted) {
        commands.push(Command::BuildBlas {
            dst: *dst,
            geometries: blas.geometries.clone(),
            scratch,
            scratch_offset: blas.scratch_offset,
        });
    }

    // Step 3: query compacted sizes
    let requests: Vec<_> = (0..pending.len())
        .map(|idx| {
            StateRequest::new(
                AccelStructId::BlasUncompacted(idx as u32),
                Access::AccelStructRead,
            )
        })
        .collect();

    record_transitions(registry, &mut commands, &requests);

    for (query, src) in uncompacted.iter().enumerate() {
        commands.push(Command::WriteCompactedSize {
            src: *src,
            pool: query_pool,
            query: query as u32,
        });
    }

    let fence = backend.submit(commands).or_fatal("couldn't build BLASes");

    backend.wait(fence).or_fatal("couldn't build BLASes");

    let compacted_sizes = backend
        .read_query_pool(query_pool, pending.len() as u32)
        .or_fatal("couldn't read compacted sizes");

    // Step 4: compact
    let mut commands = CommandList::new("glint_blas_compact");

    let compacted: Vec<_> = pending
        .iter()
        .zip(&compacted_sizes)
        .map(|(blas, &size)| {
            debug!(
                "Compacting {:?}; {} -> {} bytes",
                blas.id, blas.sizes.size, size
            );

            registry.create_accel_struct(
                backend,
                blas.id,
                AccelStructDesc {
                    label: format!("glint_{:?}", blas.id).to_lowercase(),
                    kind: AccelStructKind::BottomLevel,
                    size,
                },
            )
        })
        .collect();

    let requests: Vec<_> = pending
        .iter()
        .map(|blas| StateRequest::new(blas.id, Access::AccelStructWrite))
        .collect();

    record_transitions(registry, &mut commands, &requests);

    for (src, dst) in uncompacted.iter().zip(&compacted) {
        commands.push(Command::CopyCompact {
            src: *src,
            dst: *dst,
        });
    }

    let requests: Vec<_> = pending
        .iter()
        .map(|blas| StateRequest::new(blas.id, Access::AccelStructRead))
        .collect();

    record_transitions(registry, &mut commands, &requests);

    let fence = backend
        .submit(commands)
        .or_fatal("couldn't compact BLASes");

    backend.wait(fence).or_fatal("couldn't compact BLASes");

    // Step 5: release temporaries
    for idx in 0..pending.len() {
        registry.remove(backend, AccelStructId::BlasUncompacted(idx as u32));
    }

    registry.remove(backend, BufferId::Staging);
    registry.remove(backend, BufferId::BlasScratch);
    backend.destroy(NativeObject::QueryPool(query_pool));

    for (blas, accel_struct) in pending.iter().zip(compacted) {
        match blas.id {
            AccelStructId::BlasStatic(bucket) => {
                blases.statics[bucket.index()] = Some(accel_struct);
            }
            AccelStructId::BlasDynamic(_) => {
                blases.dynamics.push(accel_struct);
            }
            other => unreachable!("unexpected BLAS: {other:?}"),
        }
    }

    for (blas_idx, &mesh_instance) in dynamic_mesh_instances.iter().enumerate()
    {
        scene.mesh_instances[mesh_instance as usize].blas_index =
            Some(blas_idx as u32);
    }

    blases
}
