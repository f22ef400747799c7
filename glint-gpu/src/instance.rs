use bytemuck::{Pod, Zeroable};
use glam::{vec3a, vec4, Affine3A, Mat3A, Vec4};

/// Per-instance shading data.
///
/// Static instances are stored bucket-by-bucket (in the same order their
/// geometries were merged into the static BLASes), followed by dynamic
/// instances; shaders find an instance's entry through
/// `InstanceID() + GeometryIndex()`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// Rows of a 3x4 matrix whose meaning depends on [`Self::FLAG_DYNAMIC`]:
    ///
    /// - dynamic instances store the previous-object-to-current-object
    ///   transform (used to compute motion vectors),
    /// - static instances store their pure rotation (used to bring normals
    ///   into world space).
    pub overloaded_d0: Vec4,
    pub overloaded_d1: Vec4,
    pub overloaded_d2: Vec4,

    pub base_color_and_metalness_scale: Vec4,
    pub emission_and_roughness_scale: Vec4,

    pub base_primitive_index: u32,
    pub material_index: u32,
    pub flags: u32,

    /// Uniform scale; sign bit is set for left-handed (mirrored) transforms.
    pub scale: f32,
}

impl InstanceData {
    pub const FLAG_OPAQUE: u32 = 1 << 0;
    pub const FLAG_TRANSPARENT: u32 = 1 << 1;
    pub const FLAG_EMISSION: u32 = 1 << 2;
    pub const FLAG_DYNAMIC: u32 = 1 << 3;
    pub const FLAG_ALPHA_TESTED: u32 = 1 << 4;

    pub fn is_dynamic(&self) -> bool {
        self.flags & Self::FLAG_DYNAMIC > 0
    }

    pub fn is_left_handed(&self) -> bool {
        self.scale.is_sign_negative()
    }

    pub fn overloaded(&self) -> Affine3A {
        decode_affine([
            self.overloaded_d0,
            self.overloaded_d1,
            self.overloaded_d2,
        ])
    }

    pub fn with_overloaded(mut self, xform: Affine3A) -> Self {
        [self.overloaded_d0, self.overloaded_d1, self.overloaded_d2] =
            encode_affine(xform);

        self
    }

    /// Packs `scale` together with the handedness bit.
    pub fn pack_scale(scale: f32, left_handed: bool) -> f32 {
        let scale = scale.abs();

        if left_handed {
            -scale
        } else {
            scale
        }
    }
}

/// Encodes a 3D affine transformation as three row-vectors; we use this to
/// overcome padding issues when copying data from CPU into GPU.
pub fn encode_affine(xform: Affine3A) -> [Vec4; 3] {
    let d0 = vec4(
        xform.matrix3.x_axis.x,
        xform.matrix3.y_axis.x,
        xform.matrix3.z_axis.x,
        xform.translation.x,
    );

    let d1 = vec4(
        xform.matrix3.x_axis.y,
        xform.matrix3.y_axis.y,
        xform.matrix3.z_axis.y,
        xform.translation.y,
    );

    let d2 = vec4(
        xform.matrix3.x_axis.z,
        xform.matrix3.y_axis.z,
        xform.matrix3.z_axis.z,
        xform.translation.z,
    );

    [d0, d1, d2]
}

/// See: [`encode_affine()`].
pub fn decode_affine([d0, d1, d2]: [Vec4; 3]) -> Affine3A {
    Affine3A {
        matrix3: Mat3A {
            x_axis: vec3a(d0.x, d1.x, d2.x),
            y_axis: vec3a(d0.y, d1.y, d2.y),
            z_axis: vec3a(d0.z, d1.z, d2.z),
        },
        translation: vec3a(d0.w, d1.w, d2.w),
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use approx::assert_relative_eq;
    use glam::{vec3, Quat};

    use super::*;

    #[test]
    fn layout() {
        assert_eq!(96, mem::size_of::<InstanceData>());
    }

    #[test]
    fn affine_encoding() {
        let xform = Affine3A::from_scale_rotation_translation(
            vec3(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.75),
            vec3(-4.0, 5.0, 6.5),
        );

        let [d0, _, _] = encode_affine(xform);

        // Rows, not columns:
        assert_relative_eq!(d0.w, -4.0);
        assert_relative_eq!(d0.x, xform.matrix3.x_axis.x);
        assert_relative_eq!(d0.y, xform.matrix3.y_axis.x);

        let decoded = decode_affine(encode_affine(xform));

        assert!(decoded.abs_diff_eq(xform, 1e-6));
    }

    #[test]
    fn scale_packing() {
        assert_relative_eq!(2.5, InstanceData::pack_scale(2.5, false));
        assert_relative_eq!(-2.5, InstanceData::pack_scale(2.5, true));
        assert_relative_eq!(-2.5, InstanceData::pack_scale(-2.5, true));

        let data = InstanceData {
            scale: InstanceData::pack_scale(1.0, true),
            ..Default::default()
        };

        assert!(data.is_left_handed());
    }
}
