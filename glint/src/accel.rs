mod blas;
mod buckets;
mod tlas;

use log::info;

pub use self::blas::*;
pub use self::buckets::*;
pub use self::tlas::*;
use crate::{Backend, OmmCache, ResourceRegistry, Scene};

/// Every acceleration structure of a scene.
#[derive(Clone, Debug)]
pub struct AccelStructs {
    pub classification: Classification,
    pub blases: BlasSet,
    pub tlases: TlasSet,
}

impl AccelStructs {
    /// Classifies the scene's instances and builds all acceleration
    /// structures; happens once, at setup.
    pub fn build(
        backend: &mut impl Backend,
        registry: &mut ResourceRegistry,
        scene: &mut Scene,
        omm: &OmmCache,
        max_instances: u32,
        scratch_alignment: u64,
    ) -> Self {
        let scratch_alignment =
            scratch_alignment.max(backend.caps().scratch_alignment);

        let classification = Classification::new(scene);

        info!(
            "Classified instances; static={}, dynamic={}, dynamic meshes={}",
            classification.static_instance_count(),
            classification.dynamic_instances().len(),
            classification.dynamic_mesh_instances().len(),
        );

        let blases = build_blases(
            backend,
            registry,
            scene,
            &classification,
            omm,
            scratch_alignment,
        );

        let tlases =
            TlasSet::create(backend, registry, max_instances, scratch_alignment);

        Self {
            classification,
            blases,
            tlases,
        }
    }
}
