use crate::ResourceId;

/// How a resource is going to be accessed by the next pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    None,
    ConstantBuffer,
    ShaderRead,
    StorageWrite,
    ColorAttachment,
    CopySrc,
    CopyDst,
    AccelStructBuildInput,
    AccelStructRead,
    AccelStructWrite,
    Present,
}

impl Access {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::StorageWrite
                | Self::ColorAttachment
                | Self::CopyDst
                | Self::AccelStructWrite
        )
    }
}

/// Image layout; buffers and acceleration structures always stay
/// [`Layout::Undefined`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    Undefined,
    General,
    ShaderReadOnly,
    ColorAttachment,
    TransferSrc,
    TransferDst,
    Present,
}

impl Layout {
    /// Returns the canonical image layout for given access.
    pub fn for_access(access: Access) -> Self {
        match access {
            Access::None => Self::Undefined,
            Access::ShaderRead => Self::ShaderReadOnly,
            Access::ColorAttachment => Self::ColorAttachment,
            Access::CopySrc => Self::TransferSrc,
            Access::CopyDst => Self::TransferDst,
            Access::Present => Self::Present,

            Access::ConstantBuffer
            | Access::StorageWrite
            | Access::AccelStructBuildInput
            | Access::AccelStructRead
            | Access::AccelStructWrite => Self::General,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceState {
    pub access: Access,
    pub layout: Layout,
}

impl ResourceState {
    pub const INITIAL: Self = Self {
        access: Access::None,
        layout: Layout::Undefined,
    };

    pub fn new(access: Access, layout: Layout) -> Self {
        Self { access, layout }
    }

    pub fn texture(access: Access) -> Self {
        Self::new(access, Layout::for_access(access))
    }

    pub fn buffer(access: Access) -> Self {
        Self::new(access, Layout::Undefined)
    }

    pub fn is_storage_write(&self) -> bool {
        self.access == Access::StorageWrite
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// A state some resource has to be in before the next pass starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateRequest {
    pub id: ResourceId,
    pub state: ResourceState,
}

impl StateRequest {
    /// Creates a request using the canonical layout for given access.
    pub fn new(id: impl Into<ResourceId>, access: Access) -> Self {
        let id = id.into();

        let state = if id.is_texture() {
            ResourceState::texture(access)
        } else {
            ResourceState::buffer(access)
        };

        Self { id, state }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.state.layout = layout;
        self
    }

    pub fn read(id: impl Into<ResourceId>) -> Self {
        Self::new(id, Access::ShaderRead)
    }

    pub fn write(id: impl Into<ResourceId>) -> Self {
        Self::new(id, Access::StorageWrite)
    }
}
