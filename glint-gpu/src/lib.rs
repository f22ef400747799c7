//! Plain-old-data structs shared between glint's renderer and its shaders.
//!
//! Everything here is `#[repr(C)]` + `Pod`, so it can be copied into GPU
//! buffers verbatim.

mod constants;
mod instance;
mod passes;
mod tlas;

pub use self::constants::*;
pub use self::instance::*;
pub use self::passes::*;
pub use self::tlas::*;

/// Radiance cache (SHARC) capacity, in hash entries.
pub const SHARC_CAPACITY: u32 = 1 << 22;

/// Radiance cache update runs at a reduced resolution; this is the
/// downscale factor along each axis.
pub const SHARC_DOWNSCALE: u32 = 4;

/// Workgroup size (along each axis) used by every screen-space pass.
pub const TILE_SIZE: u32 = 16;
