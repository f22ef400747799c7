//! Frame orchestration core of a hardware ray-traced renderer: resource
//! registry with state tracking, minimal barrier computation, acceleration
//! structure building, per-frame instance gathering and a fixed pass
//! pipeline driving external denoisers and upscalers.

mod accel;
mod animation;
mod backend;
mod camera;
mod commands;
mod config;
mod denoiser;
mod engine;
mod frame;
mod frame_pipeline;
mod instances;
mod omm;
mod registry;
mod scene;
mod settings;
mod test_cases;
mod transitions;
mod upscaler;
mod utils;

pub use glint_gpu as gpu;

pub use self::accel::*;
pub use self::animation::*;
pub use self::backend::*;
pub use self::camera::*;
pub use self::commands::*;
pub use self::config::*;
pub use self::denoiser::*;
pub use self::engine::*;
pub use self::frame::*;
pub use self::frame_pipeline::*;
pub use self::instances::*;
pub use self::omm::*;
pub use self::registry::*;
pub use self::scene::*;
pub use self::settings::*;
pub use self::test_cases::*;
pub use self::transitions::*;
pub use self::upscaler::*;
