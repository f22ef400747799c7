mod ids;
mod state;

use fxhash::FxHashMap;
use log::debug;

pub use self::ids::*;
pub use self::state::*;
use crate::backend::OrFatal;
use crate::{
    AccelStructDesc, Backend, BackendError, BufferDesc, NativeAccelStruct,
    NativeBuffer, NativeObject, NativeResource, NativeTexture, TextureDesc,
};

/// Owns every GPU resource glint uses, keyed by its logical id, together
/// with the last-known state of each of them.
///
/// Entries live in an arena and are addressed through stable handles; a
/// handle stays valid until its resource gets removed, recreating a
/// resource under the same id keeps its handle.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Vec<Option<ResourceEntry>>,
    index: FxHashMap<ResourceId, ResourceHandle>,
    free: Vec<ResourceHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle(u32);

#[derive(Clone, Debug)]
pub struct ResourceEntry {
    pub id: ResourceId,
    pub desc: ResourceDesc,
    pub native: NativeResource,
    state: ResourceState,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
    AccelStruct(AccelStructDesc),

    /// Resource owned by someone else (e.g. swapchain images); never
    /// destroyed by the registry.
    Imported,
}

impl ResourceRegistry {
    pub fn create_buffer(
        &mut self,
        backend: &mut impl Backend,
        id: BufferId,
        desc: BufferDesc,
    ) -> NativeBuffer {
        debug!(
            "Allocating buffer `{}`; size={}, host_visible={}",
            desc.label, desc.size, desc.host_visible
        );

        let buffer = backend
            .create_buffer(&desc)
            .or_fatal(format_args!("couldn't create buffer `{}`", desc.label));

        self.insert(
            backend,
            id.into(),
            ResourceDesc::Buffer(desc),
            NativeResource::Buffer(buffer),
        );

        buffer
    }

    pub fn create_texture(
        &mut self,
        backend: &mut impl Backend,
        id: TextureId,
        desc: TextureDesc,
    ) -> NativeTexture {
        let texel_size = bytes_per_texel(desc.format)
            .or_fatal(format_args!("couldn't create texture `{}`", desc.label));

        debug!(
            "Allocating texture `{}`; size={}x{}, format={:?}, bytes={}",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.width as u64 * desc.height as u64 * texel_size as u64,
        );

        let texture = backend
            .create_texture(&desc)
            .or_fatal(format_args!("couldn't create texture `{}`", desc.label));

        self.insert(
            backend,
            id.into(),
            ResourceDesc::Texture(desc),
            NativeResource::Texture(texture),
        );

        texture
    }

    pub fn create_accel_struct(
        &mut self,
        backend: &mut impl Backend,
        id: AccelStructId,
        desc: AccelStructDesc,
    ) -> NativeAccelStruct {
        debug!(
            "Allocating acceleration structure `{}`; kind={:?}, size={}",
            desc.label, desc.kind, desc.size
        );

        let accel_struct = backend.create_accel_struct(&desc).or_fatal(
            format_args!(
                "couldn't create acceleration structure `{}`",
                desc.label
            ),
        );

        self.insert(
            backend,
            id.into(),
            ResourceDesc::AccelStruct(desc),
            NativeResource::AccelStruct(accel_struct),
        );

        accel_struct
    }

    /// Registers a resource owned by someone else, so that its state can be
    /// tracked like any other.
    pub fn import_texture(
        &mut self,
        backend: &mut impl Backend,
        id: TextureId,
        texture: NativeTexture,
        state: ResourceState,
    ) {
        let handle = self.insert(
            backend,
            id.into(),
            ResourceDesc::Imported,
            NativeResource::Texture(texture),
        );

        *self.state_mut(handle) = state;
    }

    fn insert(
        &mut self,
        backend: &mut impl Backend,
        id: ResourceId,
        desc: ResourceDesc,
        native: NativeResource,
    ) -> ResourceHandle {
        let entry = ResourceEntry {
            id,
            desc,
            native,
            state: ResourceState::INITIAL,
        };

        if let Some(&handle) = self.index.get(&id) {
            let prev = self.entries[handle.0 as usize].replace(entry);

            if let Some(prev) = prev {
                Self::release(backend, prev);
            }

            return handle;
        }

        let handle = if let Some(handle) = self.free.pop() {
            self.entries[handle.0 as usize] = Some(entry);
            handle
        } else {
            self.entries.push(Some(entry));
            ResourceHandle(self.entries.len() as u32 - 1)
        };

        self.index.insert(id, handle);

        handle
    }

    /// Destroys given resource; does nothing if it doesn't exist.
    pub fn remove(
        &mut self,
        backend: &mut impl Backend,
        id: impl Into<ResourceId>,
    ) {
        let Some(handle) = self.index.remove(&id.into()) else {
            return;
        };

        if let Some(entry) = self.entries[handle.0 as usize].take() {
            Self::release(backend, entry);
        }

        self.free.push(handle);
    }

    fn release(backend: &mut impl Backend, entry: ResourceEntry) {
        if !matches!(entry.desc, ResourceDesc::Imported) {
            debug!("Releasing {:?}", entry.id);

            backend.destroy(NativeObject::Resource(entry.native));
        }
    }

    pub fn handle(&self, id: impl Into<ResourceId>) -> Option<ResourceHandle> {
        self.index.get(&id.into()).copied()
    }

    pub fn contains(&self, id: impl Into<ResourceId>) -> bool {
        self.handle(id).is_some()
    }

    pub fn entry(&self, id: impl Into<ResourceId>) -> &ResourceEntry {
        let id = id.into();

        self.handle(id)
            .and_then(|handle| self.entries[handle.0 as usize].as_ref())
            .unwrap_or_else(|| panic!("resource not known: {id:?}"))
    }

    pub fn get(&self, id: impl Into<ResourceId>) -> NativeResource {
        self.entry(id).native
    }

    pub fn buffer(&self, id: BufferId) -> NativeBuffer {
        match self.get(id) {
            NativeResource::Buffer(buffer) => buffer,
            other => panic!("{id:?} is not a buffer: {other:?}"),
        }
    }

    pub fn texture(&self, id: TextureId) -> NativeTexture {
        match self.get(id) {
            NativeResource::Texture(texture) => texture,
            other => panic!("{id:?} is not a texture: {other:?}"),
        }
    }

    pub fn accel_struct(&self, id: AccelStructId) -> NativeAccelStruct {
        match self.get(id) {
            NativeResource::AccelStruct(accel_struct) => accel_struct,
            other => {
                panic!("{id:?} is not an acceleration structure: {other:?}")
            }
        }
    }

    pub fn state_of(&self, id: impl Into<ResourceId>) -> ResourceState {
        self.entry(id).state
    }

    /// Destroys all resources.
    pub fn clear(&mut self, backend: &mut impl Backend) {
        debug!("Releasing {} resources", self.index.len());

        for entry in self.entries.drain(..).flatten() {
            Self::release(backend, entry);
        }

        self.index.clear();
        self.free.clear();
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> + '_ {
        self.entries.iter().flatten()
    }

    pub(crate) fn entry_by_handle(
        &self,
        handle: ResourceHandle,
    ) -> &ResourceEntry {
        self.entries[handle.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("stale resource handle: {handle:?}"))
    }

    /// State records are only ever touched by the transition optimizer (and
    /// by resource imports), see: [`crate::build_transitions()`].
    pub(crate) fn state_mut(
        &mut self,
        handle: ResourceHandle,
    ) -> &mut ResourceState {
        &mut self.entries[handle.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("stale resource handle: {handle:?}"))
            .state
    }
}

/// Returns the size of a single texel for given format.
///
/// Only formats glint itself creates are known.
pub fn bytes_per_texel(
    format: wgpu::TextureFormat,
) -> Result<u32, BackendError> {
    use wgpu::TextureFormat as F;

    let size = match format {
        F::R8Unorm => 1,
        F::R16Float | F::Rg8Unorm => 2,
        F::R32Float
        | F::R32Uint
        | F::Rg16Float
        | F::Rgba8Unorm
        | F::Rgba8UnormSrgb
        | F::Bgra8Unorm
        | F::Bgra8UnormSrgb
        | F::Rgb10a2Unorm
        | F::Rg11b10Float => 4,
        F::Rgba16Float | F::Rg32Float => 8,
        F::Rgba32Float => 16,
        other => {
            return Err(BackendError::Unsupported(format!(
                "texture format {other:?}"
            )));
        }
    };

    Ok(size)
}
