use std::mem;

use glint_gpu::TlasInstance;
use log::info;

use crate::utils::align_up;
use crate::{
    record_transitions, Access, AccelStructDesc, AccelStructId,
    AccelStructInputs, AccelStructKind, Backend, BufferDesc, BufferId,
    Command, CommandList, ResourceRegistry, StateRequest,
};

/// World and emissive top-level structures.
///
/// Both are created once, with room for `capacity` instances, and rebuilt
/// from scratch every frame.
#[derive(Clone, Copy, Debug)]
pub struct TlasSet {
    capacity: u32,
    emissive_scratch_offset: u64,
}

impl TlasSet {
    pub fn create(
        backend: &mut impl Backend,
        registry: &mut ResourceRegistry,
        capacity: u32,
        scratch_alignment: u64,
    ) -> Self {
        info!("Creating TLASes; capacity={capacity}");

        let sizes = backend.accel_struct_sizes(AccelStructInputs::Top {
            max_instances: capacity,
        });

        for (id, label) in [
            (AccelStructId::TlasWorld, "glint_tlas_world"),
            (AccelStructId::TlasEmissive, "glint_tlas_emissive"),
        ] {
            registry.create_accel_struct(
                backend,
                id,
                AccelStructDesc {
                    label: label.into(),
                    kind: AccelStructKind::TopLevel,
                    size: sizes.size,
                },
            );
        }

        // Both structures get built in the same command list, so each one
        // has its own scratch range
        let emissive_scratch_offset =
            align_up(sizes.build_scratch_size, scratch_alignment);

        registry.create_buffer(
            backend,
            BufferId::TlasScratch,
            BufferDesc {
                label: "glint_tlas_scratch".into(),
                size: emissive_scratch_offset * 2,
                usage: wgpu::BufferUsages::STORAGE,
                host_visible: false,
            },
        );

        for (id, label) in [
            (BufferId::TlasWorldInstances, "glint_tlas_world_instances"),
            (
                BufferId::TlasEmissiveInstances,
                "glint_tlas_emissive_instances",
            ),
        ] {
            registry.create_buffer(
                backend,
                id,
                BufferDesc {
                    label: label.into(),
                    size: capacity as u64
                        * mem::size_of::<TlasInstance>() as u64,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST,
                    host_visible: false,
                },
            );
        }

        Self {
            capacity,
            emissive_scratch_offset,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Records builds of both structures; instance buffers must already
    /// contain `world_count` and `emissive_count` instances.
    pub fn record_builds(
        &self,
        registry: &mut ResourceRegistry,
        commands: &mut CommandList,
        world_count: u32,
        emissive_count: u32,
    ) {
        assert!(
            world_count <= self.capacity && emissive_count <= self.capacity,
            "too many TLAS instances: {world_count}/{emissive_count} > {}",
            self.capacity
        );

        record_transitions(
            registry,
            commands,
            &[
                StateRequest::new(
                    BufferId::TlasWorldInstances,
                    Access::AccelStructBuildInput,
                ),
                StateRequest::new(
                    BufferId::TlasEmissiveInstances,
                    Access::AccelStructBuildInput,
                ),
                StateRequest::write(BufferId::TlasScratch),
                StateRequest::new(
                    AccelStructId::TlasWorld,
                    Access::AccelStructWrite,
                ),
                StateRequest::new(
                    AccelStructId::TlasEmissive,
                    Access::AccelStructWrite,
                ),
            ],
        );

        let scratch = registry.buffer(BufferId::TlasScratch);

        commands.push(Command::BuildTlas {
            dst: registry.accel_struct(AccelStructId::TlasWorld),
            instances: registry.buffer(BufferId::TlasWorldInstances),
            instance_count: world_count,
            scratch,
            scratch_offset: 0,
        });

        commands.push(Command::BuildTlas {
            dst: registry.accel_struct(AccelStructId::TlasEmissive),
            instances: registry.buffer(BufferId::TlasEmissiveInstances),
            instance_count: emissive_count,
            scratch,
            scratch_offset: self.emissive_scratch_offset,
        });

        record_transitions(
            registry,
            commands,
            &[
                StateRequest::new(
                    AccelStructId::TlasWorld,
                    Access::AccelStructRead,
                ),
                StateRequest::new(
                    AccelStructId::TlasEmissive,
                    Access::AccelStructRead,
                ),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessBackend;

    #[test]
    fn rebuilds_each_frame_with_scratch_hazards() {
        let mut backend = HeadlessBackend::default();
        let mut registry = ResourceRegistry::default();
        let target = TlasSet::create(&mut backend, &mut registry, 64, 256);

        let mut commands = CommandList::new("frame 0");

        target.record_builds(&mut registry, &mut commands, 3, 1);

        // 2 instance buffers, scratch, 2 TLASes; then 2 TLASes again
        assert_eq!(7, commands.barrier_count());

        let mut commands = CommandList::new("frame 1");

        target.record_builds(&mut registry, &mut commands, 3, 1);

        // Scratch write-after-write, 2 TLASes becoming writable and then
        // readable again
        assert_eq!(5, commands.barrier_count());

        let builds: Vec<_> = commands
            .iter()
            .filter_map(|command| match command {
                Command::BuildTlas { scratch_offset, .. } => Some(*scratch_offset),
                _ => None,
            })
            .collect();

        assert_eq!(2, builds.len());
        assert_ne!(builds[0], builds[1]);
    }

    #[test]
    #[should_panic(expected = "too many TLAS instances")]
    fn capacity_is_enforced() {
        let mut backend = HeadlessBackend::default();
        let mut registry = ResourceRegistry::default();
        let target = TlasSet::create(&mut backend, &mut registry, 4, 256);

        target.record_builds(
            &mut registry,
            &mut CommandList::new("frame"),
            5,
            0,
        );
    }
}
