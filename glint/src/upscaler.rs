use derivative::Derivative;
use glam::{UVec2, Vec2};

use crate::{
    record_transitions, Command, CommandList, FrameState, NativeResource,
    NativeTexture, ResourceRegistry, StateRequest, TextureId, Upscaler,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpscaleDesc {
    pub upscaler: Upscaler,
    pub input: NativeTexture,
    pub output: NativeTexture,
    pub view_z: NativeTexture,
    pub motion_vectors: NativeTexture,
    pub jitter: Vec2,
    pub render_size: UVec2,
    pub output_size: UVec2,
    pub sharpness: f32,

    /// Whether the upscaler should drop its history.
    pub reset: bool,
}

/// External upscaler (DLSS, FSR); records its work straight into glint's
/// command list.
pub trait UpscalerLibrary {
    fn supports(&self, upscaler: Upscaler) -> bool;

    fn upscale(&mut self, desc: &UpscaleDesc, commands: &mut CommandList);
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct UpscalerAdapter {
    #[derivative(Debug = "ignore")]
    library: Box<dyn UpscalerLibrary>,
}

impl UpscalerAdapter {
    pub fn new(library: Box<dyn UpscalerLibrary>) -> Self {
        Self { library }
    }

    pub fn supports(&self, upscaler: Upscaler) -> bool {
        upscaler == Upscaler::None || self.library.supports(upscaler)
    }

    /// Upscales [`TextureId::UpscalerInput`] into [`TextureId::Upscaled`].
    pub fn upscale(
        &mut self,
        registry: &mut ResourceRegistry,
        commands: &mut CommandList,
        frame: &FrameState,
    ) {
        let settings = frame.settings();
        let upscaler = settings.effective_upscaler();

        assert!(
            upscaler != Upscaler::None && self.library.supports(upscaler),
            "upscaler not available: {upscaler:?}"
        );

        record_transitions(
            registry,
            commands,
            &[
                StateRequest::read(TextureId::UpscalerInput),
                StateRequest::read(TextureId::ViewZ),
                StateRequest::read(TextureId::Mv),
                StateRequest::write(TextureId::Upscaled),
            ],
        );

        let desc = UpscaleDesc {
            upscaler,
            input: registry.texture(TextureId::UpscalerInput),
            output: registry.texture(TextureId::Upscaled),
            view_z: registry.texture(TextureId::ViewZ),
            motion_vectors: registry.texture(TextureId::Mv),
            jitter: frame.jitter(),
            render_size: frame.render_size(),
            output_size: frame.output_size(),
            sharpness: settings.sharpness,
            reset: frame.force_history_reset(),
        };

        self.library.upscale(&desc, commands);
    }
}

/// Upscaler that records an opaque external command; used for tests and dry
/// runs.
#[derive(Clone, Debug, Default)]
pub struct HeadlessUpscaler {
    unsupported: Vec<Upscaler>,
}

impl HeadlessUpscaler {
    pub fn without(mut self, upscaler: Upscaler) -> Self {
        self.unsupported.push(upscaler);
        self
    }
}

impl UpscalerLibrary for HeadlessUpscaler {
    fn supports(&self, upscaler: Upscaler) -> bool {
        !self.unsupported.contains(&upscaler)
    }

    fn upscale(&mut self, desc: &UpscaleDesc, commands: &mut CommandList) {
        let label = match desc.upscaler {
            Upscaler::Dlss => "dlss",
            Upscaler::Fsr => "fsr",
            Upscaler::None => "none",
        };

        commands.push(Command::External {
            label: label.into(),
            resources: [
                desc.input,
                desc.view_z,
                desc.motion_vectors,
                desc.output,
            ]
            .into_iter()
            .map(NativeResource::Texture)
            .collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use glam::uvec2;

    use super::*;
    use crate::{
        Access, CameraState, HeadlessBackend, Settings, TextureDesc,
    };

    fn registry() -> ResourceRegistry {
        let mut backend = HeadlessBackend::default();
        let mut registry = ResourceRegistry::default();

        for id in [
            TextureId::UpscalerInput,
            TextureId::ViewZ,
            TextureId::Mv,
            TextureId::Upscaled,
        ] {
            registry.create_texture(
                &mut backend,
                id,
                TextureDesc {
                    label: format!("{id:?}"),
                    width: 8,
                    height: 8,
                    format: id.format(),
                    usage: wgpu::TextureUsages::STORAGE_BINDING,
                },
            );
        }

        registry
    }

    fn frame(upscaler: Upscaler) -> FrameState {
        let mut frame = FrameState::new(uvec2(8, 8));

        frame.prepare(
            Settings {
                upscaler,
                resolution_scale: 0.5,
                ..Default::default()
            },
            CameraState::default(),
            false,
        );

        frame
    }

    #[test]
    fn transitions_inputs_and_outputs() {
        let mut registry = registry();
        let mut commands = CommandList::new("frame");
        let mut target = UpscalerAdapter::new(Box::<HeadlessUpscaler>::default());

        target.upscale(&mut registry, &mut commands, &frame(Upscaler::Fsr));

        assert_eq!(
            Access::ShaderRead,
            registry.state_of(TextureId::UpscalerInput).access
        );

        assert_eq!(
            Access::StorageWrite,
            registry.state_of(TextureId::Upscaled).access
        );

        assert!(matches!(
            commands.iter().last(),
            Some(Command::External { label, .. }) if label == "fsr"
        ));
    }

    #[test]
    #[should_panic(expected = "upscaler not available")]
    fn unsupported_upscaler() {
        let mut registry = registry();

        let mut target = UpscalerAdapter::new(Box::new(
            HeadlessUpscaler::default().without(Upscaler::Dlss),
        ));

        assert!(!target.supports(Upscaler::Dlss));

        target.upscale(
            &mut registry,
            &mut CommandList::new("frame"),
            &frame(Upscaler::Dlss),
        );
    }
}
