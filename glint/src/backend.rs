//! The seam between glint and an actual graphics API.
//!
//! Everything glint does on the GPU goes through [`Backend`]: resources are
//! created through it, command lists recorded by glint are submitted to it
//! and the swapchain is driven by it. Native objects are referred to by
//! opaque ids, the backend maps them onto its own objects.

mod headless;

use std::fmt;

use thiserror::Error;

pub use self::headless::*;
use crate::CommandList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeBuffer(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeTexture(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeAccelStruct {
    pub id: u64,

    /// Device address, as referenced by top-level instances.
    pub address: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativePipeline(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeDescriptorSet(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeQueryPool(pub u64);

/// Any native object that can be bound to a pass or guarded by a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeResource {
    Buffer(NativeBuffer),
    Texture(NativeTexture),
    AccelStruct(NativeAccelStruct),
}

/// Any native object that can be destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeObject {
    Resource(NativeResource),
    Pipeline(NativePipeline),
    DescriptorSet(NativeDescriptorSet),
    QueryPool(NativeQueryPool),
}

impl From<NativeResource> for NativeObject {
    fn from(resource: NativeResource) -> Self {
        Self::Resource(resource)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FenceValue(pub u64);

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,

    /// Whether the CPU writes into this buffer directly (upload heap).
    pub host_visible: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelStructKind {
    BottomLevel,
    TopLevel,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccelStructDesc {
    pub label: String,
    pub kind: AccelStructKind,
    pub size: u64,
}

/// Geometry of a bottom-level structure; offsets point into a staging
/// buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct BlasGeometry {
    pub buffer: NativeBuffer,
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_offset: u64,
    pub index_count: u32,

    /// Row-major 3x4 transform baked into the geometry, if any.
    pub transform_offset: Option<u64>,

    pub opaque: bool,
    pub micromap: Option<MicromapBinding>,
}

impl BlasGeometry {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MicromapBinding {
    pub array: NativeBuffer,
    pub indices: NativeBuffer,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AccelStructInputs<'a> {
    Bottom { geometries: &'a [BlasGeometry] },
    Top { max_instances: u32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelStructSizes {
    pub size: u64,
    pub build_scratch_size: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub label: String,
    pub shader: String,
    pub push_constants_size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorSetDesc {
    pub label: String,
    pub pipeline: NativePipeline,
    pub bindings: Vec<NativeResource>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendCaps {
    pub scratch_alignment: u64,
    pub accel_struct_alignment: u64,
    pub constant_buffer_alignment: u64,
    pub supports_micromaps: bool,
}

impl Default for BackendCaps {
    fn default() -> Self {
        Self {
            scratch_alignment: 256,
            accel_struct_alignment: 256,
            constant_buffer_alignment: 256,
            supports_micromaps: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("out of device memory (requested {requested} bytes)")]
    OutOfMemory { requested: u64 },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("device lost")]
    DeviceLost,

    #[error("swapchain is out of date")]
    OutOfDate,

    #[error("invalid object: {0:?}")]
    InvalidObject(NativeObject),
}

pub trait Backend {
    fn caps(&self) -> BackendCaps;

    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
    ) -> Result<NativeBuffer, BackendError>;

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
    ) -> Result<NativeTexture, BackendError>;

    fn accel_struct_sizes(&self, inputs: AccelStructInputs<'_>)
        -> AccelStructSizes;

    fn create_accel_struct(
        &mut self,
        desc: &AccelStructDesc,
    ) -> Result<NativeAccelStruct, BackendError>;

    fn create_query_pool(
        &mut self,
        capacity: u32,
    ) -> Result<NativeQueryPool, BackendError>;

    fn create_pipeline(
        &mut self,
        desc: &PipelineDesc,
    ) -> Result<NativePipeline, BackendError>;

    fn create_descriptor_set(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> Result<NativeDescriptorSet, BackendError>;

    fn destroy(&mut self, object: NativeObject);

    /// Writes into a host-visible buffer right away.
    fn write_buffer(
        &mut self,
        buffer: NativeBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn reset_command_allocator(
        &mut self,
        slot: usize,
    ) -> Result<(), BackendError>;

    fn submit(
        &mut self,
        commands: CommandList,
    ) -> Result<FenceValue, BackendError>;

    /// Blocks until the GPU has reached `fence`.
    fn wait(&mut self, fence: FenceValue) -> Result<(), BackendError>;

    /// Reads results of a query pool; must be called after the commands
    /// writing into it have been waited for.
    fn read_query_pool(
        &mut self,
        pool: NativeQueryPool,
        count: u32,
    ) -> Result<Vec<u64>, BackendError>;

    fn swapchain_textures(&self) -> Vec<NativeTexture>;

    fn acquire_swapchain_texture(&mut self) -> Result<u32, BackendError>;

    fn present(&mut self) -> Result<(), BackendError>;
}

/// Turns a backend failure into a process abort.
///
/// Device-level failures leave the GPU in a state we can't reason about,
/// so none of them are recovered from.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self, context: impl fmt::Display) -> T;
}

impl<T> OrFatal<T> for Result<T, BackendError> {
    #[track_caller]
    fn or_fatal(self, context: impl fmt::Display) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!("{context}: {err}");
                panic!("{context}: {err}");
            }
        }
    }
}
