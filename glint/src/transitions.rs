//! Minimal barrier computation.
//!
//! Textures flow through a dozen passes per frame and most consecutive
//! passes leave them in the same state, so instead of guarding every pass
//! with a full set of barriers, each pass lists the states it needs and only
//! the actual changes get recorded.

use fxhash::FxHashSet;

use crate::{
    CommandList, NativeResource, ResourceId, ResourceRegistry,
    ResourceState, StateRequest,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub id: ResourceId,
    pub resource: NativeResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Barrier {
    /// Whether this barrier only orders two storage writes, without changing
    /// the resource's state.
    pub fn is_storage_hazard(&self) -> bool {
        self.before == self.after && self.after.is_storage_write()
    }
}

/// Barriers to record together, split the way graphics APIs expect them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BarrierBatch {
    pub textures: Vec<Barrier>,

    /// Buffers and acceleration structures.
    pub buffers: Vec<Barrier>,
}

impl BarrierBatch {
    pub fn len(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Barrier> + '_ {
        self.textures.iter().chain(&self.buffers)
    }

    fn push(&mut self, barrier: Barrier) {
        if barrier.id.is_texture() {
            self.textures.push(barrier);
        } else {
            self.buffers.push(barrier);
        }
    }
}

/// Computes barriers required to bring resources into requested states and
/// updates the registry's state records as if those barriers were already
/// executed.
///
/// Must be called in submission order: the records describe the GPU state
/// at the point of the command stream where the barriers get recorded.
///
/// A request produces a barrier when the resource's access or layout
/// differs from its record, or when both the recorded and the requested
/// access are storage writes (two writes still have to be ordered). A
/// resource requested twice within the same call is merged: the repeated
/// request doesn't produce a second storage barrier.
pub fn build_transitions(
    registry: &mut ResourceRegistry,
    requests: &[StateRequest],
) -> BarrierBatch {
    let mut batch = BarrierBatch::default();
    let mut seen = FxHashSet::default();

    for request in requests {
        let handle = registry
            .handle(request.id)
            .unwrap_or_else(|| panic!("resource not known: {:?}", request.id));

        let first_in_batch = seen.insert(handle);
        let before = registry.state_of(request.id);
        let after = request.state;

        let is_needed = before != after
            || (first_in_batch
                && before.is_storage_write()
                && after.is_storage_write());

        if !is_needed {
            continue;
        }

        batch.push(Barrier {
            id: request.id,
            resource: registry.entry_by_handle(handle).native,
            before,
            after,
        });

        *registry.state_mut(handle) = after;
    }

    batch
}

/// Like [`build_transitions()`], but records the barriers straight away;
/// returns the number of barriers recorded.
pub fn record_transitions(
    registry: &mut ResourceRegistry,
    commands: &mut CommandList,
    requests: &[StateRequest],
) -> usize {
    let batch = build_transitions(registry, requests);
    let len = batch.len();

    commands.barriers(batch);

    len
}

#[cfg(test)]
mod tests {
    use fxhash::FxHashMap;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::{
        Access, BufferDesc, BufferId, HeadlessBackend, Layout, TextureDesc,
        TextureId,
    };

    const TEXTURES: [TextureId; 4] = [
        TextureId::ViewZ,
        TextureId::Mv,
        TextureId::Composed,
        TextureId::Diff,
    ];

    const ACCESSES: [Access; 5] = [
        Access::ShaderRead,
        Access::StorageWrite,
        Access::CopySrc,
        Access::CopyDst,
        Access::ColorAttachment,
    ];

    fn registry() -> ResourceRegistry {
        let mut backend = HeadlessBackend::default();
        let mut registry = ResourceRegistry::default();

        for id in TEXTURES {
            registry.create_texture(
                &mut backend,
                id,
                TextureDesc {
                    label: format!("{id:?}"),
                    width: 4,
                    height: 4,
                    format: id.format(),
                    usage: wgpu::TextureUsages::STORAGE_BINDING,
                },
            );
        }

        registry.create_buffer(
            &mut backend,
            BufferId::InstanceData,
            BufferDesc {
                label: "instance_data".into(),
                size: 1024,
                usage: wgpu::BufferUsages::STORAGE,
                host_visible: false,
            },
        );

        registry
    }

    #[test]
    fn skips_unchanged_states() {
        let mut registry = registry();

        let batch = build_transitions(
            &mut registry,
            &[
                StateRequest::read(TextureId::ViewZ),
                StateRequest::read(BufferId::InstanceData),
            ],
        );

        assert_eq!(1, batch.textures.len());
        assert_eq!(1, batch.buffers.len());
        assert_eq!(ResourceState::INITIAL, batch.textures[0].before);

        assert_eq!(
            ResourceState::texture(Access::ShaderRead),
            registry.state_of(TextureId::ViewZ)
        );

        let batch = build_transitions(
            &mut registry,
            &[
                StateRequest::read(TextureId::ViewZ),
                StateRequest::read(BufferId::InstanceData),
            ],
        );

        assert!(batch.is_empty());
    }

    #[test]
    fn orders_consecutive_storage_writes() {
        let mut registry = registry();

        let batch = build_transitions(
            &mut registry,
            &[StateRequest::write(TextureId::Composed)],
        );

        assert_eq!(1, batch.len());
        assert!(!batch.textures[0].is_storage_hazard());

        let batch = build_transitions(
            &mut registry,
            &[StateRequest::write(TextureId::Composed)],
        );

        assert_eq!(1, batch.len());
        assert!(batch.textures[0].is_storage_hazard());
    }

    #[test]
    fn merges_repeated_requests_within_batch() {
        let mut registry = registry();

        build_transitions(
            &mut registry,
            &[StateRequest::write(TextureId::Composed)],
        );

        let batch = build_transitions(
            &mut registry,
            &[
                StateRequest::write(TextureId::Composed),
                StateRequest::write(TextureId::Composed),
            ],
        );

        assert_eq!(1, batch.len());
    }

    #[test]
    fn layout_alone_triggers_barrier() {
        let mut registry = registry();

        build_transitions(
            &mut registry,
            &[StateRequest::read(TextureId::Mv)],
        );

        let batch = build_transitions(
            &mut registry,
            &[StateRequest::read(TextureId::Mv).with_layout(Layout::General)],
        );

        assert_eq!(1, batch.len());
        assert_eq!(Access::ShaderRead, batch.textures[0].after.access);
        assert_eq!(Layout::General, batch.textures[0].after.layout);
    }

    #[test]
    fn records_nothing_for_empty_batches() {
        let mut registry = registry();
        let mut commands = CommandList::new("test");

        let recorded = record_transitions(
            &mut registry,
            &mut commands,
            &[StateRequest::read(TextureId::Diff)],
        );

        assert_eq!(1, recorded);
        assert_eq!(1, commands.len());

        let recorded = record_transitions(
            &mut registry,
            &mut commands,
            &[StateRequest::read(TextureId::Diff)],
        );

        assert_eq!(0, recorded);
        assert_eq!(1, commands.len());
    }

    /// Feeds random request sequences and compares the number of emitted
    /// barriers against a straightforward model: one barrier per state
    /// change plus one per write-after-write.
    #[test]
    fn barrier_count_matches_state_changes() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..64 {
            let mut registry = registry();
            let mut model: FxHashMap<TextureId, ResourceState> =
                TEXTURES
                    .iter()
                    .map(|id| (*id, ResourceState::INITIAL))
                    .collect();

            let mut expected = 0;
            let mut actual = 0;

            for _ in 0..128 {
                // Each batch touches distinct resources
                let mut ids = TEXTURES.to_vec();
                let len = rng.gen_range(1..=ids.len());

                let requests: Vec<_> = (0..len)
                    .map(|_| {
                        let id = ids.remove(rng.gen_range(0..ids.len()));
                        let access = ACCESSES[rng.gen_range(0..ACCESSES.len())];

                        StateRequest::new(id, access)
                    })
                    .collect();

                for request in &requests {
                    let ResourceId::Texture(id) = request.id else {
                        unreachable!();
                    };

                    let before = model[&id];

                    if before != request.state
                        || (before.is_storage_write()
                            && request.state.is_storage_write())
                    {
                        expected += 1;
                    }

                    model.insert(id, request.state);
                }

                actual += build_transitions(&mut registry, &requests).len();

                for (id, state) in &model {
                    assert_eq!(*state, registry.state_of(*id));
                }
            }

            assert_eq!(expected, actual);
        }
    }
}
