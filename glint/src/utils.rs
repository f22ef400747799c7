mod metrics;

use glam::{Affine3A, DAffine3, Mat3, UVec2, UVec3};

pub use self::metrics::*;

/// Rounds `value` up to the nearest multiple of `alignment`, which must be a
/// power of two.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());

    (value + alignment - 1) & !(alignment - 1)
}

/// Returns the number of workgroups required to cover `size` with square
/// tiles of `tile` pixels.
pub fn dispatch_size(size: UVec2, tile: u32) -> UVec3 {
    UVec3::new(
        (size.x + tile - 1) / tile,
        (size.y + tile - 1) / tile,
        1,
    )
}

/// Narrows a double-precision transform; callers are expected to make it
/// camera-relative first, if precision matters.
pub fn to_affine3a(xform: DAffine3) -> Affine3A {
    let m = xform.matrix3;

    Affine3A::from_mat3_translation(
        Mat3::from_cols(
            m.x_axis.as_vec3(),
            m.y_axis.as_vec3(),
            m.z_axis.as_vec3(),
        ),
        xform.translation.as_vec3(),
    )
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);

    t * t * (3.0 - 2.0 * t)
}

/// Returns `index`-th element of the Halton sequence for given base, in
/// `[0, 1)`.
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut f = 1.0;
    let mut r = 0.0;

    while index > 0 {
        f /= base as f32;
        r += f * (index % base) as f32;
        index /= base;
    }

    r
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{dvec3, uvec2, DQuat};

    use super::*;

    #[test]
    fn align() {
        assert_eq!(0, align_up(0, 256));
        assert_eq!(256, align_up(1, 256));
        assert_eq!(256, align_up(256, 256));
        assert_eq!(512, align_up(257, 256));
    }

    #[test]
    fn dispatch() {
        assert_eq!(UVec3::new(120, 68, 1), dispatch_size(uvec2(1920, 1080), 16));
        assert_eq!(UVec3::new(1, 1, 1), dispatch_size(uvec2(1, 1), 16));
    }

    #[test]
    fn narrowing() {
        let xform = DAffine3::from_rotation_translation(
            DQuat::from_rotation_y(0.5),
            dvec3(1.0, 2.0, 3.0),
        );

        let target = to_affine3a(xform);

        assert_relative_eq!(target.translation.y, 2.0);
        assert_relative_eq!(target.matrix3.x_axis.x, 0.5f32.cos(), epsilon = 1e-6);
    }

    #[test]
    fn smoothstep_clamps() {
        assert_relative_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_relative_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
        assert_relative_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
    }

    #[test]
    fn halton_sequence() {
        assert_relative_eq!(halton(1, 2), 0.5);
        assert_relative_eq!(halton(2, 2), 0.25);
        assert_relative_eq!(halton(3, 2), 0.75);
        assert_relative_eq!(halton(1, 3), 1.0 / 3.0);
        assert_relative_eq!(halton(2, 3), 2.0 / 3.0);
    }
}
