use bytemuck::{Pod, Zeroable};

/// Push constants shared by glint's own compute passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassParams {
    pub frame_index: u32,

    /// 0 on even frames, 1 on odd frames; selects which half of every
    /// ping-pong pair is the current one.
    pub parity: u32,

    pub flags: u32,
    pub seed: u32,
}

impl PassParams {
    /// Composition reads denoised signals (otherwise it reads the raw ones).
    pub const FLAG_DENOISED: u32 = 1 << 0;

    /// Signals are encoded as spherical harmonics.
    pub const FLAG_SH: u32 = 1 << 1;

    /// Upsampling is required after temporal anti-aliasing.
    pub const FLAG_UPSAMPLE: u32 = 1 << 2;
}
