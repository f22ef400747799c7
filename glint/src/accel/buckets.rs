use fxhash::FxHashSet;
use glint_gpu::TlasInstance;

use crate::{Material, Scene};

/// Group of static instances merged into a single BLAS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StaticBucket {
    Opaque,
    Transparent,
    EmissiveOpaque,
    EmissiveTransparent,
}

impl StaticBucket {
    /// Order in which buckets get merged into BLASes, appended into TLASes
    /// and laid out in the instance data buffer; these must all agree.
    pub const ORDER: [Self; 4] = [
        Self::Opaque,
        Self::Transparent,
        Self::EmissiveOpaque,
        Self::EmissiveTransparent,
    ];

    pub fn of(material: &Material) -> Self {
        match (material.is_emissive(), material.is_transparent()) {
            (false, false) => Self::Opaque,
            (false, true) => Self::Transparent,
            (true, false) => Self::EmissiveOpaque,
            (true, true) => Self::EmissiveTransparent,
        }
    }

    /// Position within [`Self::ORDER`].
    pub fn index(self) -> usize {
        match self {
            Self::Opaque => 0,
            Self::Transparent => 1,
            Self::EmissiveOpaque => 2,
            Self::EmissiveTransparent => 3,
        }
    }

    pub fn is_transparent(self) -> bool {
        matches!(self, Self::Transparent | Self::EmissiveTransparent)
    }

    pub fn is_emissive(self) -> bool {
        matches!(self, Self::EmissiveOpaque | Self::EmissiveTransparent)
    }

    pub fn mask(self) -> u8 {
        instance_mask(self.is_transparent(), self.is_emissive())
    }
}

pub(crate) fn instance_mask(transparent: bool, emissive: bool) -> u8 {
    let mut mask = if transparent {
        TlasInstance::MASK_TRANSPARENT
    } else {
        TlasInstance::MASK_OPAQUE
    };

    if emissive {
        mask |= TlasInstance::MASK_EMISSIVE;
    }

    mask
}

/// Split of the scene's instances into static buckets and dynamic
/// instances; computed once, after which bucket membership never changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Indices of static instances, per bucket (in [`StaticBucket::ORDER`]).
    buckets: [Vec<usize>; 4],

    /// Whether given bucket contains any alpha-tested geometry, in which
    /// case its instance can't be forced opaque.
    alpha_tested: [bool; 4],

    /// Indices of dynamic instances, in scene order.
    dynamic_instances: Vec<usize>,

    /// Mesh instances referenced by dynamic instances, deduplicated and in
    /// first-seen order; position in this list is the BLAS index.
    dynamic_mesh_instances: Vec<u32>,
}

impl Classification {
    pub fn new(scene: &Scene) -> Self {
        let mut this = Self::default();
        let mut seen = FxHashSet::default();

        for (instance_idx, instance) in scene.instances.iter().enumerate() {
            if instance.proxy {
                continue;
            }

            let material = scene.material_of(instance);

            if material.off {
                continue;
            }

            if instance.allow_update {
                this.dynamic_instances.push(instance_idx);

                if seen.insert(instance.mesh_instance) {
                    this.dynamic_mesh_instances.push(instance.mesh_instance);
                }
            } else {
                let bucket = StaticBucket::of(material).index();

                this.buckets[bucket].push(instance_idx);
                this.alpha_tested[bucket] |= material.is_alpha_tested();
            }
        }

        this
    }

    pub fn bucket(&self, bucket: StaticBucket) -> &[usize] {
        &self.buckets[bucket.index()]
    }

    pub fn has_alpha_tested(&self, bucket: StaticBucket) -> bool {
        self.alpha_tested[bucket.index()]
    }

    /// Returns non-empty buckets, in [`StaticBucket::ORDER`].
    pub fn non_empty_buckets(
        &self,
    ) -> impl Iterator<Item = StaticBucket> + '_ {
        StaticBucket::ORDER
            .into_iter()
            .filter(|bucket| !self.bucket(*bucket).is_empty())
    }

    pub fn dynamic_instances(&self) -> &[usize] {
        &self.dynamic_instances
    }

    pub fn dynamic_mesh_instances(&self) -> &[u32] {
        &self.dynamic_mesh_instances
    }

    pub fn static_instance_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_static(&self, instance_idx: usize) -> bool {
        self.buckets.iter().any(|bucket| bucket.contains(&instance_idx))
    }
}

#[cfg(test)]
mod tests {
    use glam::{vec3, DAffine3, Vec3};

    use super::*;
    use crate::{AlphaMode, Instance};

    fn scene() -> Scene {
        let mut scene = Scene::default();

        let mesh = scene.add_mesh(
            &[Vec3::ZERO, Vec3::X, Vec3::Y],
            &[0, 1, 2],
        );

        for _ in 0..3 {
            scene.add_mesh_instance(mesh);
        }

        let opaque = scene.add_material(Default::default());

        let transparent = scene.add_material(
            Material::default().with_alpha_mode(AlphaMode::Blend),
        );

        let emissive = scene.add_material(
            Material::default().with_emission(vec3(1.0, 1.0, 1.0)),
        );

        let off = scene.add_material(Material::default().with_off(true));

        let xform = DAffine3::IDENTITY;

        // 0..=3: static
        scene.add_instance(Instance::new(0, opaque, xform));
        scene.add_instance(Instance::new(0, transparent, xform));
        scene.add_instance(Instance::new(0, opaque, xform));
        scene.add_instance(Instance::new(0, emissive, xform));

        // 4..=6: dynamic, sharing mesh instances
        scene.add_instance(Instance::new(1, opaque, xform).with_allow_update(true));
        scene.add_instance(Instance::new(2, transparent, xform).with_allow_update(true));
        scene.add_instance(Instance::new(1, emissive, xform).with_allow_update(true));

        // 7, 8: skipped
        scene.add_instance(Instance::new(0, off, xform));
        scene.add_instance(Instance::new(0, opaque, xform).with_proxy(true));

        scene
    }

    #[test]
    fn buckets() {
        let target = Classification::new(&scene());

        assert_eq!(&[0, 2], target.bucket(StaticBucket::Opaque));
        assert_eq!(&[1], target.bucket(StaticBucket::Transparent));
        assert_eq!(&[3], target.bucket(StaticBucket::EmissiveOpaque));
        assert!(target.bucket(StaticBucket::EmissiveTransparent).is_empty());
        assert_eq!(4, target.static_instance_count());
        assert!(!target.has_alpha_tested(StaticBucket::Opaque));

        assert_eq!(
            vec![
                StaticBucket::Opaque,
                StaticBucket::Transparent,
                StaticBucket::EmissiveOpaque
            ],
            target.non_empty_buckets().collect::<Vec<_>>()
        );
    }

    #[test]
    fn dynamic_meshes_are_deduplicated() {
        let target = Classification::new(&scene());

        assert_eq!(&[4, 5, 6], target.dynamic_instances());
        assert_eq!(&[1, 2], target.dynamic_mesh_instances());
    }

    #[test]
    fn static_transparent_never_goes_dynamic() {
        let target = Classification::new(&scene());

        assert!(target.is_static(1));
        assert!(!target.dynamic_instances().contains(&1));
    }

    #[test]
    fn alpha_tested_goes_to_opaque_buckets() {
        let mut scene = Scene::default();
        let mesh = scene.add_mesh(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]);
        let mi = scene.add_mesh_instance(mesh);

        let foliage = scene.add_material(
            Material::default().with_alpha_mode(AlphaMode::Mask),
        );

        let glowing_foliage = scene.add_material(
            Material::default()
                .with_alpha_mode(AlphaMode::Mask)
                .with_emission(vec3(1.0, 1.0, 1.0)),
        );

        scene.add_instance(Instance::new(mi, foliage, DAffine3::IDENTITY));

        scene.add_instance(Instance::new(
            mi,
            glowing_foliage,
            DAffine3::IDENTITY,
        ));

        let target = Classification::new(&scene);

        assert_eq!(&[0], target.bucket(StaticBucket::Opaque));
        assert_eq!(&[1], target.bucket(StaticBucket::EmissiveOpaque));
        assert!(target.bucket(StaticBucket::Transparent).is_empty());
        assert!(target.bucket(StaticBucket::EmissiveTransparent).is_empty());
        assert!(target.has_alpha_tested(StaticBucket::Opaque));

        assert_eq!(TlasInstance::MASK_OPAQUE, StaticBucket::Opaque.mask());
    }

    #[test]
    fn order_matches_indices() {
        for (idx, bucket) in StaticBucket::ORDER.into_iter().enumerate() {
            assert_eq!(idx, bucket.index());
        }
    }
}
