use crate::StaticBucket;

/// Logical identity of every resource glint tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Texture(TextureId),
    Buffer(BufferId),
    AccelStruct(AccelStructId),
}

impl ResourceId {
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }
}

impl From<TextureId> for ResourceId {
    fn from(id: TextureId) -> Self {
        Self::Texture(id)
    }
}

impl From<BufferId> for ResourceId {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<AccelStructId> for ResourceId {
    fn from(id: AccelStructId) -> Self {
        Self::AccelStruct(id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureId {
    // Written by opaque tracing
    ViewZ,
    Mv,
    NormalRoughness,
    BaseColorMetalness,
    DirectLighting,
    DirectEmission,
    Penumbra,
    UnfilteredDiff,
    UnfilteredSpec,
    UnfilteredDiffSh,
    UnfilteredSpecSh,

    // Written by the denoiser
    Shadow,
    Diff,
    Spec,
    DiffSh,
    SpecSh,
    ReferenceAccumulation,
    DenoiserTransient(u16),

    // Composition & post-processing
    Composed,
    UpscalerInput,
    Upscaled,
    TaaPing,
    TaaPong,
    PostAa,
    PreFinal,
    Final,

    Swapchain(u32),
}

impl TextureId {
    pub fn format(&self) -> wgpu::TextureFormat {
        use wgpu::TextureFormat as F;

        match self {
            Self::ViewZ => F::R32Float,
            Self::Mv => F::Rgba16Float,
            Self::NormalRoughness => F::Rgb10a2Unorm,
            Self::BaseColorMetalness => F::Rgba8Unorm,
            Self::DirectLighting | Self::DirectEmission => F::Rg11b10Float,
            Self::Penumbra => F::R16Float,
            Self::Shadow => F::Rgba8Unorm,
            Self::Final => F::Rgba8Unorm,
            Self::Swapchain(_) => F::Bgra8Unorm,
            Self::DenoiserTransient(_) => F::Rgba16Float,

            Self::UnfilteredDiff
            | Self::UnfilteredSpec
            | Self::UnfilteredDiffSh
            | Self::UnfilteredSpecSh
            | Self::Diff
            | Self::Spec
            | Self::DiffSh
            | Self::SpecSh
            | Self::ReferenceAccumulation
            | Self::Composed
            | Self::UpscalerInput
            | Self::Upscaled
            | Self::TaaPing
            | Self::TaaPong
            | Self::PostAa
            | Self::PreFinal => F::Rgba16Float,
        }
    }

    /// Every texture created at setup, swapchain and denoiser-owned ones
    /// excluded.
    pub const ALL: [Self; 25] = [
        Self::ViewZ,
        Self::Mv,
        Self::NormalRoughness,
        Self::BaseColorMetalness,
        Self::DirectLighting,
        Self::DirectEmission,
        Self::Penumbra,
        Self::UnfilteredDiff,
        Self::UnfilteredSpec,
        Self::UnfilteredDiffSh,
        Self::UnfilteredSpecSh,
        Self::Shadow,
        Self::Diff,
        Self::Spec,
        Self::DiffSh,
        Self::SpecSh,
        Self::ReferenceAccumulation,
        Self::Composed,
        Self::UpscalerInput,
        Self::Upscaled,
        Self::TaaPing,
        Self::TaaPong,
        Self::PostAa,
        Self::PreFinal,
        Self::Final,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferId {
    Constants,
    InstanceData,
    TlasWorldInstances,
    TlasEmissiveInstances,
    TlasScratch,

    // Temporaries used while building bottom-level structures
    Staging,
    BlasScratch,

    // Radiance cache
    SharcHashEntries,
    SharcVoxelData,
    SharcVoxelDataPrev,

    // Opacity micromaps, per bake
    OmmArray(u32),
    OmmIndices(u32),
    OmmScratch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelStructId {
    TlasWorld,
    TlasEmissive,
    BlasStatic(StaticBucket),
    BlasDynamic(u32),
    BlasUncompacted(u32),
}
