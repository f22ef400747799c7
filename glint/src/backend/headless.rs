use fxhash::FxHashMap;
use log::debug;

use crate::{
    bytes_per_texel, utils, AccelStructDesc, AccelStructInputs,
    AccelStructSizes, Backend, BackendCaps, BackendError, BufferDesc, Command,
    CommandList, DescriptorSetDesc, Descriptors, FenceValue, NativeAccelStruct,
    NativeBuffer, NativeDescriptorSet, NativeObject, NativePipeline,
    NativeQueryPool, NativeResource, NativeTexture, PipelineDesc, TextureDesc,
};

/// Backend that doesn't talk to any GPU: it hands out ids, keeps track of
/// which objects are alive and records every submitted command list.
///
/// Used for tests and dry runs; command-level semantics that matter to glint
/// (compacted-size queries, fences) are simulated.
#[derive(Debug)]
pub struct HeadlessBackend {
    caps: BackendCaps,
    next_id: u64,
    objects: FxHashMap<u64, HeadlessObject>,
    destroyed: usize,
    contents: FxHashMap<u64, Vec<u8>>,
    clears: Vec<(NativeBuffer, u32)>,
    queries: FxHashMap<(u64, u32), u64>,
    submissions: Vec<CommandList>,
    submitted: u64,
    completed: u64,
    allocator_resets: Vec<usize>,
    swapchain: Vec<NativeTexture>,
    swapchain_index: u32,
    presents: usize,
    out_of_date: bool,
    memory_budget: Option<u64>,
    memory_used: u64,
}

#[derive(Clone, Debug)]
enum HeadlessObject {
    Buffer { size: u64 },
    Texture { size: u64 },
    AccelStruct { size: u64 },
    QueryPool { capacity: u32 },
    Pipeline,
    DescriptorSet { bindings: Vec<NativeResource> },
}

impl HeadlessObject {
    fn memory(&self) -> u64 {
        match self {
            Self::Buffer { size }
            | Self::Texture { size }
            | Self::AccelStruct { size } => *size,
            _ => 0,
        }
    }
}

impl HeadlessBackend {
    const SWAPCHAIN_LEN: u64 = 3;

    pub fn with_caps(mut self, caps: BackendCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Makes allocations fail once more than `bytes` of device memory would
    /// be in use.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Makes the next acquire or present report an out-of-date swapchain.
    pub fn mark_out_of_date(&mut self) {
        self.out_of_date = true;
    }

    pub fn alive_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn destroyed_objects(&self) -> usize {
        self.destroyed
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub fn submissions(&self) -> &[CommandList] {
        &self.submissions
    }

    pub fn last_submission(&self) -> Option<&CommandList> {
        self.submissions.last()
    }

    pub fn allocator_resets(&self) -> &[usize] {
        &self.allocator_resets
    }

    pub fn presents(&self) -> usize {
        self.presents
    }

    /// Returns every buffer clear executed so far, in submission order.
    pub fn clears(&self) -> &[(NativeBuffer, u32)] {
        &self.clears
    }

    pub fn completed_fence(&self) -> FenceValue {
        FenceValue(self.completed)
    }

    /// Returns the bytes written into given buffer so far, either directly
    /// or through submitted command lists.
    pub fn buffer_contents(&self, buffer: NativeBuffer) -> Option<&[u8]> {
        self.contents.get(&buffer.0).map(|data| data.as_slice())
    }

    /// Returns size of the acceleration structure after compaction.
    pub fn compacted_size(&self, size: u64) -> u64 {
        utils::align_up(size / 2, self.caps.accel_struct_alignment)
    }

    fn alloc(&mut self, object: HeadlessObject) -> Result<u64, BackendError> {
        let requested = object.memory();

        if let Some(budget) = self.memory_budget {
            if self.memory_used + requested > budget {
                return Err(BackendError::OutOfMemory { requested });
            }
        }

        let id = self.next_id;

        self.next_id += 1;
        self.memory_used += requested;
        self.objects.insert(id, object);

        Ok(id)
    }

    fn object(&self, id: u64) -> Option<&HeadlessObject> {
        self.objects.get(&id)
    }

    fn check_resource(
        &self,
        resource: NativeResource,
    ) -> Result<(), BackendError> {
        let is_alive = match resource {
            NativeResource::Buffer(buffer) => {
                matches!(self.object(buffer.0), Some(HeadlessObject::Buffer { .. }))
            }
            NativeResource::Texture(texture) => {
                self.swapchain.contains(&texture)
                    || matches!(
                        self.object(texture.0),
                        Some(HeadlessObject::Texture { .. })
                    )
            }
            NativeResource::AccelStruct(accel_struct) => matches!(
                self.object(accel_struct.id),
                Some(HeadlessObject::AccelStruct { .. })
            ),
        };

        if is_alive {
            Ok(())
        } else {
            Err(BackendError::InvalidObject(NativeObject::Resource(resource)))
        }
    }

    fn accel_struct_size(
        &self,
        accel_struct: NativeAccelStruct,
    ) -> Result<u64, BackendError> {
        match self.object(accel_struct.id) {
            Some(HeadlessObject::AccelStruct { size }) => Ok(*size),
            _ => Err(BackendError::InvalidObject(NativeObject::Resource(
                NativeResource::AccelStruct(accel_struct),
            ))),
        }
    }

    fn execute(&mut self, command: &Command) -> Result<(), BackendError> {
        match command {
            Command::BeginRegion(_) | Command::EndRegion => {}

            Command::Dispatch {
                pipeline,
                descriptors,
                ..
            } => {
                if !matches!(self.object(pipeline.0), Some(HeadlessObject::Pipeline))
                {
                    return Err(BackendError::InvalidObject(
                        NativeObject::Pipeline(*pipeline),
                    ));
                }

                let bindings = match descriptors {
                    Descriptors::Set(set) => match self.object(set.0) {
                        Some(HeadlessObject::DescriptorSet { bindings }) => {
                            bindings.clone()
                        }
                        _ => {
                            return Err(BackendError::InvalidObject(
                                NativeObject::DescriptorSet(*set),
                            ));
                        }
                    },
                    Descriptors::Push(resources) => resources.clone(),
                };

                for binding in bindings {
                    self.check_resource(binding)?;
                }
            }

            Command::Barriers(batch) => {
                for barrier in batch.iter() {
                    self.check_resource(barrier.resource)?;
                }
            }

            Command::ClearBuffer { buffer, value } => {
                self.check_resource(NativeResource::Buffer(*buffer))?;

                self.contents.remove(&buffer.0);
                self.clears.push((*buffer, *value));
            }

            Command::WriteBuffer {
                buffer,
                offset,
                data,
            } => {
                self.write_buffer(*buffer, *offset, data)?;
            }

            Command::CopyTexture { src, dst } => {
                self.check_resource(NativeResource::Texture(*src))?;
                self.check_resource(NativeResource::Texture(*dst))?;
            }

            Command::BuildBlas {
                dst,
                geometries,
                scratch,
                ..
            } => {
                self.check_resource(NativeResource::AccelStruct(*dst))?;
                self.check_resource(NativeResource::Buffer(*scratch))?;

                for geometry in geometries {
                    self.check_resource(NativeResource::Buffer(
                        geometry.buffer,
                    ))?;
                }
            }

            Command::BuildTlas {
                dst,
                instances,
                scratch,
                ..
            } => {
                self.check_resource(NativeResource::AccelStruct(*dst))?;
                self.check_resource(NativeResource::Buffer(*instances))?;
                self.check_resource(NativeResource::Buffer(*scratch))?;
            }

            Command::WriteCompactedSize { src, pool, query } => {
                let size = self.compacted_size(self.accel_struct_size(*src)?);

                match self.object(pool.0) {
                    Some(HeadlessObject::QueryPool { capacity })
                        if query < capacity => {}
                    _ => {
                        return Err(BackendError::InvalidObject(
                            NativeObject::QueryPool(*pool),
                        ));
                    }
                }

                self.queries.insert((pool.0, *query), size);
            }

            Command::CopyCompact { src, dst } => {
                let src_size = self.compacted_size(self.accel_struct_size(*src)?);
                let dst_size = self.accel_struct_size(*dst)?;

                if dst_size < src_size {
                    return Err(BackendError::Unsupported(format!(
                        "compacted copy doesn't fit: {src_size} > {dst_size}"
                    )));
                }
            }

            Command::External { resources, .. } => {
                for resource in resources {
                    self.check_resource(*resource)?;
                }
            }
        }

        Ok(())
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        let swapchain =
            (1..=Self::SWAPCHAIN_LEN).map(NativeTexture).collect();

        Self {
            caps: Default::default(),
            next_id: Self::SWAPCHAIN_LEN + 1,
            objects: Default::default(),
            destroyed: 0,
            contents: Default::default(),
            clears: Default::default(),
            queries: Default::default(),
            submissions: Default::default(),
            submitted: 0,
            completed: 0,
            allocator_resets: Default::default(),
            swapchain,
            swapchain_index: 0,
            presents: 0,
            out_of_date: false,
            memory_budget: None,
            memory_used: 0,
        }
    }
}

impl Backend for HeadlessBackend {
    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
    ) -> Result<NativeBuffer, BackendError> {
        self.alloc(HeadlessObject::Buffer { size: desc.size })
            .map(NativeBuffer)
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
    ) -> Result<NativeTexture, BackendError> {
        let size = desc.width as u64
            * desc.height as u64
            * bytes_per_texel(desc.format)? as u64;

        self.alloc(HeadlessObject::Texture { size })
            .map(NativeTexture)
    }

    fn accel_struct_sizes(
        &self,
        inputs: AccelStructInputs<'_>,
    ) -> AccelStructSizes {
        let (size, build_scratch_size) = match inputs {
            AccelStructInputs::Bottom { geometries } => {
                let triangles: u64 = geometries
                    .iter()
                    .map(|geometry| geometry.triangle_count() as u64)
                    .sum();

                (256 + triangles * 64, 128 + triangles * 32)
            }

            AccelStructInputs::Top { max_instances } => {
                let instances = max_instances as u64;

                (256 + instances * 128, 256 + instances * 64)
            }
        };

        AccelStructSizes {
            size: utils::align_up(size, self.caps.accel_struct_alignment),
            build_scratch_size: utils::align_up(
                build_scratch_size,
                self.caps.scratch_alignment,
            ),
        }
    }

    fn create_accel_struct(
        &mut self,
        desc: &AccelStructDesc,
    ) -> Result<NativeAccelStruct, BackendError> {
        let id = self.alloc(HeadlessObject::AccelStruct { size: desc.size })?;

        Ok(NativeAccelStruct {
            id,
            address: id << 32,
        })
    }

    fn create_query_pool(
        &mut self,
        capacity: u32,
    ) -> Result<NativeQueryPool, BackendError> {
        self.alloc(HeadlessObject::QueryPool { capacity })
            .map(NativeQueryPool)
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDesc,
    ) -> Result<NativePipeline, BackendError> {
        if desc.shader.is_empty() {
            return Err(BackendError::Unsupported(format!(
                "pipeline `{}` has no shader",
                desc.label
            )));
        }

        self.alloc(HeadlessObject::Pipeline).map(NativePipeline)
    }

    fn create_descriptor_set(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> Result<NativeDescriptorSet, BackendError> {
        if !matches!(self.object(desc.pipeline.0), Some(HeadlessObject::Pipeline))
        {
            return Err(BackendError::InvalidObject(NativeObject::Pipeline(
                desc.pipeline,
            )));
        }

        for binding in &desc.bindings {
            self.check_resource(*binding)?;
        }

        self.alloc(HeadlessObject::DescriptorSet {
            bindings: desc.bindings.clone(),
        })
        .map(NativeDescriptorSet)
    }

    fn destroy(&mut self, object: NativeObject) {
        let id = match object {
            NativeObject::Resource(NativeResource::Buffer(buffer)) => buffer.0,
            NativeObject::Resource(NativeResource::Texture(texture)) => {
                texture.0
            }
            NativeObject::Resource(NativeResource::AccelStruct(accel)) => {
                accel.id
            }
            NativeObject::Pipeline(pipeline) => pipeline.0,
            NativeObject::DescriptorSet(set) => set.0,
            NativeObject::QueryPool(pool) => pool.0,
        };

        let removed = self
            .objects
            .remove(&id)
            .unwrap_or_else(|| panic!("destroying unknown object: {object:?}"));

        self.memory_used -= removed.memory();
        self.destroyed += 1;
        self.contents.remove(&id);
    }

    fn write_buffer(
        &mut self,
        buffer: NativeBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let Some(HeadlessObject::Buffer { size }) = self.object(buffer.0)
        else {
            return Err(BackendError::InvalidObject(NativeObject::Resource(
                NativeResource::Buffer(buffer),
            )));
        };

        let size = *size as usize;
        let offset = offset as usize;

        if offset + data.len() > size {
            return Err(BackendError::Unsupported(format!(
                "write out of bounds: {}+{} > {size}",
                offset,
                data.len()
            )));
        }

        let contents = self
            .contents
            .entry(buffer.0)
            .or_insert_with(|| vec![0; size]);

        contents[offset..offset + data.len()].copy_from_slice(data);

        Ok(())
    }

    fn reset_command_allocator(
        &mut self,
        slot: usize,
    ) -> Result<(), BackendError> {
        self.allocator_resets.push(slot);

        Ok(())
    }

    fn submit(
        &mut self,
        commands: CommandList,
    ) -> Result<FenceValue, BackendError> {
        debug!(
            "Submitting `{}`; commands={}, barriers={}",
            commands.label(),
            commands.len(),
            commands.barrier_count(),
        );

        for command in commands.iter() {
            self.execute(command)?;
        }

        self.submissions.push(commands);
        self.submitted += 1;

        Ok(FenceValue(self.submitted))
    }

    fn wait(&mut self, fence: FenceValue) -> Result<(), BackendError> {
        if fence.0 > self.submitted {
            return Err(BackendError::Unsupported(format!(
                "waiting for a fence that was never signaled: {fence:?}"
            )));
        }

        self.completed = self.completed.max(fence.0);

        Ok(())
    }

    fn read_query_pool(
        &mut self,
        pool: NativeQueryPool,
        count: u32,
    ) -> Result<Vec<u64>, BackendError> {
        (0..count)
            .map(|query| {
                self.queries.get(&(pool.0, query)).copied().ok_or(
                    BackendError::InvalidObject(NativeObject::QueryPool(pool)),
                )
            })
            .collect()
    }

    fn swapchain_textures(&self) -> Vec<NativeTexture> {
        self.swapchain.clone()
    }

    fn acquire_swapchain_texture(&mut self) -> Result<u32, BackendError> {
        if self.out_of_date {
            self.out_of_date = false;
            return Err(BackendError::OutOfDate);
        }

        Ok(self.swapchain_index)
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.swapchain_index =
            (self.swapchain_index + 1) % self.swapchain.len() as u32;

        if self.out_of_date {
            self.out_of_date = false;
            return Err(BackendError::OutOfDate);
        }

        self.presents += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccelStructKind, BlasGeometry};

    fn buffer(size: u64) -> BufferDesc {
        BufferDesc {
            label: "buffer".into(),
            size,
            usage: wgpu::BufferUsages::STORAGE,
            host_visible: true,
        }
    }

    #[test]
    fn tracks_object_lifetimes() {
        let mut target = HeadlessBackend::default();

        let a = target.create_buffer(&buffer(16)).unwrap();
        let b = target.create_buffer(&buffer(32)).unwrap();

        assert_ne!(a, b);
        assert_eq!(2, target.alive_objects());
        assert_eq!(48, target.memory_used());

        target.destroy(NativeObject::Resource(NativeResource::Buffer(a)));

        assert_eq!(1, target.alive_objects());
        assert_eq!(1, target.destroyed_objects());
        assert_eq!(32, target.memory_used());
    }

    #[test]
    fn respects_memory_budget() {
        let mut target = HeadlessBackend::default().with_memory_budget(64);

        target.create_buffer(&buffer(48)).unwrap();

        let err = target.create_buffer(&buffer(32)).unwrap_err();

        assert!(matches!(err, BackendError::OutOfMemory { requested: 32 }));
    }

    #[test]
    fn simulates_compaction_queries() {
        let mut target = HeadlessBackend::default();
        let staging = target.create_buffer(&buffer(1024)).unwrap();

        let geometries = [BlasGeometry {
            buffer: staging,
            vertex_offset: 0,
            vertex_count: 3,
            vertex_stride: 12,
            index_offset: 36,
            index_count: 3,
            transform_offset: None,
            opaque: true,
            micromap: None,
        }];

        let sizes = target.accel_struct_sizes(AccelStructInputs::Bottom {
            geometries: &geometries,
        });

        let blas = target
            .create_accel_struct(&AccelStructDesc {
                label: "blas".into(),
                kind: AccelStructKind::BottomLevel,
                size: sizes.size,
            })
            .unwrap();

        let pool = target.create_query_pool(1).unwrap();
        let mut commands = CommandList::new("compaction");

        commands.push(Command::WriteCompactedSize {
            src: blas,
            pool,
            query: 0,
        });

        let fence = target.submit(commands).unwrap();

        target.wait(fence).unwrap();

        let sizes_after = target.read_query_pool(pool, 1).unwrap();

        assert_eq!(vec![target.compacted_size(sizes.size)], sizes_after);
        assert!(sizes_after[0] < sizes.size);
    }

    #[test]
    fn rejects_commands_on_destroyed_objects() {
        let mut target = HeadlessBackend::default();
        let buffer = target.create_buffer(&buffer(16)).unwrap();

        target.destroy(NativeObject::Resource(NativeResource::Buffer(buffer)));

        let mut commands = CommandList::new("clear");

        commands.push(Command::ClearBuffer { buffer, value: 0 });

        assert!(target.submit(commands).is_err());
    }

    #[test]
    fn out_of_date_is_reported_once() {
        let mut target = HeadlessBackend::default();

        target.mark_out_of_date();

        assert!(matches!(
            target.acquire_swapchain_texture(),
            Err(BackendError::OutOfDate)
        ));

        assert_eq!(0, target.acquire_swapchain_texture().unwrap());

        target.present().unwrap();

        assert_eq!(1, target.acquire_swapchain_texture().unwrap());
        assert_eq!(1, target.presents());
    }
}
