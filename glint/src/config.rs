use glam::{uvec2, UVec2};

/// Engine configuration fixed at startup (except for the output size, which
/// changes through [`crate::Engine::resize()`]).
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub output_size: UVec2,
    pub swapchain_format: wgpu::TextureFormat,

    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,

    /// Capacity of top-level acceleration structures.
    pub max_instances: u32,

    /// Minimum alignment of scratch allocations; the backend's own
    /// requirement is used when it's stricter.
    pub scratch_alignment: u64,

    /// Seed of the per-frame random numbers passed to shaders.
    pub seed: u64,

    /// Wraps passes in named debug regions.
    pub debug_labels: bool,
}

impl EngineConfig {
    pub fn with_output_size(mut self, output_size: UVec2) -> Self {
        self.output_size = output_size;
        self
    }

    pub fn with_swapchain_format(
        mut self,
        swapchain_format: wgpu::TextureFormat,
    ) -> Self {
        self.swapchain_format = swapchain_format;
        self
    }

    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame must be in flight");

        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_scratch_alignment(mut self, scratch_alignment: u64) -> Self {
        assert!(
            scratch_alignment.is_power_of_two(),
            "scratch alignment must be a power of two"
        );

        self.scratch_alignment = scratch_alignment;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_debug_labels(mut self, debug_labels: bool) -> Self {
        self.debug_labels = debug_labels;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_size: uvec2(1280, 720),
            swapchain_format: wgpu::TextureFormat::Bgra8Unorm,
            frames_in_flight: 2,
            max_instances: 16 * 1024,
            scratch_alignment: 256,
            seed: 0,
            debug_labels: true,
        }
    }
}
