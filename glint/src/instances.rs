use std::ops::Range;

use glam::DAffine3;
use glint_gpu::{InstanceData, TlasInstance};

use crate::accel::instance_mask;
use crate::utils::to_affine3a;
use crate::{
    AccelStructs, CameraState, Instance, Material, Scene, Settings,
    StaticBucket,
};

/// Distance (in instance scales) between the camera and the grid of nine
/// brothers.
const NINE_BROTHERS_DISTANCE: f64 = 6.0;

/// Distance (in instance scales) between neighbouring brothers.
const NINE_BROTHERS_SPACING: f64 = 2.0;

/// Per-frame instance data together with instances of both TLASes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GatheredInstances {
    pub instance_data: Vec<InstanceData>,
    pub world_tlas: Vec<TlasInstance>,
    pub emissive_tlas: Vec<TlasInstance>,

    /// Instance data entries of each static bucket, in
    /// [`StaticBucket::ORDER`].
    pub bucket_ranges: [Range<u32>; 4],
}

/// Packs data of all instances for the current frame.
///
/// Static instances come first, bucket by bucket, in the same order their
/// geometries were merged into static BLASes; dynamic instances follow.
/// TLAS transforms are made relative to `camera`.
///
/// Previous transforms get committed afterwards, so calling this twice
/// without moving anything yields the same buffers with zero motion.
pub fn gather_instances(
    scene: &mut Scene,
    accel: &AccelStructs,
    settings: &Settings,
    camera: &CameraState,
    camera_prev: &CameraState,
) -> GatheredInstances {
    let mut out = GatheredInstances::default();
    let origin = camera.position();

    for bucket in StaticBucket::ORDER {
        let instances = accel.classification.bucket(bucket);
        let first = out.instance_data.len() as u32;

        for &instance_idx in instances {
            let instance = &scene.instances[instance_idx];
            let (_, rotation, _) = instance.transform.to_scale_rotation_translation();

            out.instance_data.push(
                instance_data(scene, instance, false)
                    .with_overloaded(to_affine3a(DAffine3::from_quat(rotation))),
            );
        }

        out.bucket_ranges[bucket.index()] = first..out.instance_data.len() as u32;

        let Some(blas) = accel.blases.static_blas(bucket) else {
            continue;
        };

        let opacity = if bucket.is_transparent() {
            Opacity::Transparent
        } else if accel.classification.has_alpha_tested(bucket) {
            Opacity::AlphaTested
        } else {
            Opacity::Opaque
        };

        // Static geometry is baked in world space
        let tlas_instance = TlasInstance::new(
            to_affine3a(DAffine3::from_translation(-origin)),
            first,
            bucket.mask(),
            tlas_flags(opacity, false, settings.omm),
            blas.address,
        );

        out.world_tlas.push(tlas_instance);

        if bucket.is_emissive() {
            out.emissive_tlas.push(tlas_instance);
        }
    }

    let mut dynamics: Vec<(usize, DAffine3, DAffine3)> = accel
        .classification
        .dynamic_instances()
        .iter()
        .map(|&idx| {
            let instance = &scene.instances[idx];

            (idx, instance.transform, instance.prev_transform)
        })
        .collect();

    if settings.nine_brothers && !dynamics.is_empty() {
        let (idx, transform, _) = dynamics.remove(0);

        dynamics = nine_brothers(transform, camera, camera_prev)
            .into_iter()
            .map(|(curr, prev)| (idx, curr, prev))
            .chain(dynamics)
            .collect();
    }

    for (instance_idx, transform, prev_transform) in dynamics {
        let instance = &scene.instances[instance_idx];
        let material = scene.material_of(instance);
        let custom_index = out.instance_data.len() as u32;

        let blas_index = scene
            .mesh_instance_of(instance)
            .blas_index
            .unwrap_or_else(|| {
                panic!("dynamic instance without BLAS: {instance_idx}")
            });

        let left_handed = transform.matrix3.determinant() < 0.0;

        // Instances sharing a BLAS can differ in opacity; only the one whose
        // mask got baked into the BLAS may use its micromap
        let micromaps = settings.omm
            && material.is_alpha_tested()
            && accel.blases.dynamic_micromap(blas_index)
                == Some(instance.material);

        // Motion is computed in double precision, since both transforms can
        // be far away from the origin
        let prev_to_curr = prev_transform * transform.inverse();

        let mut data = instance_data(scene, instance, true)
            .with_overloaded(to_affine3a(prev_to_curr));

        data.scale = InstanceData::pack_scale(instance.scale, left_handed);
        out.instance_data.push(data);

        let mut relative = transform;

        relative.translation -= origin;

        let tlas_instance = TlasInstance::new(
            to_affine3a(relative),
            custom_index,
            instance_mask(material.is_transparent(), material.is_emissive()),
            tlas_flags(Opacity::of(material), left_handed, micromaps),
            accel.blases.dynamic_blas(blas_index).address,
        );

        out.world_tlas.push(tlas_instance);

        if material.is_emissive() {
            out.emissive_tlas.push(tlas_instance);
        }
    }

    for instance in &mut scene.instances {
        instance.prev_transform = instance.transform;
    }

    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Opacity {
    Opaque,
    AlphaTested,
    Transparent,
}

impl Opacity {
    fn of(material: &Material) -> Self {
        if material.is_transparent() {
            Self::Transparent
        } else if material.is_alpha_tested() {
            Self::AlphaTested
        } else {
            Self::Opaque
        }
    }
}

fn tlas_flags(opacity: Opacity, left_handed: bool, micromaps: bool) -> u8 {
    let mut flags = match opacity {
        Opacity::Opaque => TlasInstance::FLAG_FORCE_OPAQUE,

        // Geometry flags decide, keeping micromaps and any-hit in play
        Opacity::AlphaTested => 0,

        Opacity::Transparent => TlasInstance::FLAG_FORCE_NON_OPAQUE,
    };

    if left_handed {
        flags |= TlasInstance::FLAG_TRIANGLE_FLIP_FACING;
    }

    if !micromaps {
        flags |= TlasInstance::FLAG_DISABLE_OPACITY_MICROMAPS;
    }

    flags
}

fn instance_data(scene: &Scene, instance: &Instance, dynamic: bool) -> InstanceData {
    let material = scene.material_of(instance);
    let mesh = scene.mesh_of(instance);
    let mut flags = 0;

    if material.is_transparent() {
        flags |= InstanceData::FLAG_TRANSPARENT;
    } else {
        flags |= InstanceData::FLAG_OPAQUE;
    }

    if material.is_emissive() {
        flags |= InstanceData::FLAG_EMISSION;
    }

    if material.is_alpha_tested() {
        flags |= InstanceData::FLAG_ALPHA_TESTED;
    }

    if dynamic {
        flags |= InstanceData::FLAG_DYNAMIC;
    }

    InstanceData {
        base_color_and_metalness_scale: material
            .base_color
            .truncate()
            .extend(material.metalness),
        emission_and_roughness_scale: material
            .emission
            .extend(material.roughness),
        base_primitive_index: mesh.index_offset / 3,
        material_index: instance.material,
        flags,
        scale: InstanceData::pack_scale(
            instance.scale,
            instance.is_left_handed(),
        ),
        ..Default::default()
    }
}

/// Replicates `transform` into a 3x3 grid placed in front of the camera;
/// returns current and previous transforms of each copy.
///
/// The grid follows the camera, so previous transforms are computed from
/// the previous camera.
fn nine_brothers(
    transform: DAffine3,
    camera: &CameraState,
    camera_prev: &CameraState,
) -> Vec<(DAffine3, DAffine3)> {
    let (scale, rotation, _) = transform.to_scale_rotation_translation();
    let size = scale.abs().max_element();

    let place = |camera: &CameraState, row: i32, col: i32| -> DAffine3 {
        let center = camera.ahead(NINE_BROTHERS_DISTANCE * size);

        let offset = camera.right().as_dvec3() * (col as f64)
            + camera.up().as_dvec3() * (row as f64);

        DAffine3::from_scale_rotation_translation(
            scale,
            rotation,
            center + offset * NINE_BROTHERS_SPACING * size,
        )
    };

    let mut brothers = Vec::with_capacity(9);

    for row in -1..=1 {
        for col in -1..=1 {
            brothers.push((
                place(camera, row, col),
                place(camera_prev, row, col),
            ));
        }
    }

    brothers
}
