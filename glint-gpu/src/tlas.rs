use bytemuck::{Pod, Zeroable};
use glam::Affine3A;

/// Top-level acceleration structure instance, laid out exactly like
/// `VkAccelerationStructureInstanceKHR` / `D3D12_RAYTRACING_INSTANCE_DESC`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TlasInstance {
    /// Row-major 3x4 transform.
    pub transform: [f32; 12],

    /// Lower 24 bits: custom index (first instance-data entry); upper 8
    /// bits: visibility mask.
    pub custom_index_and_mask: u32,

    /// Lower 24 bits: hit group offset; upper 8 bits: instance flags.
    pub sbt_offset_and_flags: u32,

    pub blas_address: u64,
}

impl TlasInstance {
    pub const MASK_OPAQUE: u8 = 1 << 0;
    pub const MASK_TRANSPARENT: u8 = 1 << 1;
    pub const MASK_EMISSIVE: u8 = 1 << 2;

    pub const FLAG_TRIANGLE_CULL_DISABLE: u8 = 1 << 0;
    pub const FLAG_TRIANGLE_FLIP_FACING: u8 = 1 << 1;
    pub const FLAG_FORCE_OPAQUE: u8 = 1 << 2;
    pub const FLAG_FORCE_NON_OPAQUE: u8 = 1 << 3;
    pub const FLAG_DISABLE_OPACITY_MICROMAPS: u8 = 1 << 5;

    const INDEX_MASK: u32 = 0x00ff_ffff;

    pub fn new(
        xform: Affine3A,
        custom_index: u32,
        mask: u8,
        flags: u8,
        blas_address: u64,
    ) -> Self {
        assert!(
            custom_index <= Self::INDEX_MASK,
            "instance index out of range: {custom_index}"
        );

        let m = xform.matrix3;
        let t = xform.translation;

        Self {
            transform: [
                m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x, //
                m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y, //
                m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z, //
            ],
            custom_index_and_mask: custom_index | ((mask as u32) << 24),
            sbt_offset_and_flags: (flags as u32) << 24,
            blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & Self::INDEX_MASK
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    pub fn flags(&self) -> u8 {
        (self.sbt_offset_and_flags >> 24) as u8
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.transform[3], self.transform[7], self.transform[11]]
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use glam::vec3;

    use super::*;

    #[test]
    fn layout() {
        assert_eq!(64, mem::size_of::<TlasInstance>());
    }

    #[test]
    fn packing() {
        let instance = TlasInstance::new(
            Affine3A::from_translation(vec3(1.0, 2.0, 3.0)),
            1234,
            TlasInstance::MASK_TRANSPARENT,
            TlasInstance::FLAG_FORCE_NON_OPAQUE,
            0xdead_beef,
        );

        assert_eq!(1234, instance.custom_index());
        assert_eq!(TlasInstance::MASK_TRANSPARENT, instance.mask());
        assert_eq!(TlasInstance::FLAG_FORCE_NON_OPAQUE, instance.flags());
        assert_eq!([1.0, 2.0, 3.0], instance.translation());
        assert_eq!(1.0, instance.transform[0]);
    }

    #[test]
    #[should_panic(expected = "instance index out of range")]
    fn index_overflow() {
        TlasInstance::new(Affine3A::IDENTITY, 1 << 24, 0, 0, 0);
    }
}
