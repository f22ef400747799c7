use glam::UVec3;

use crate::{
    BarrierBatch, BlasGeometry, NativeAccelStruct, NativeBuffer,
    NativeDescriptorSet, NativePipeline, NativeQueryPool, NativeResource,
    NativeTexture,
};

/// A linear stream of GPU commands, recorded on the CPU and handed over to
/// [`crate::Backend::submit()`] in one piece.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    label: String,
    commands: Vec<Command>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRegion(String),
    EndRegion,

    Barriers(BarrierBatch),

    ClearBuffer {
        buffer: NativeBuffer,
        value: u32,
    },

    WriteBuffer {
        buffer: NativeBuffer,
        offset: u64,
        data: Vec<u8>,
    },

    CopyTexture {
        src: NativeTexture,
        dst: NativeTexture,
    },

    Dispatch {
        label: String,
        pipeline: NativePipeline,
        descriptors: Descriptors,
        push_constants: Vec<u8>,
        groups: UVec3,
    },

    BuildBlas {
        dst: NativeAccelStruct,
        geometries: Vec<BlasGeometry>,
        scratch: NativeBuffer,
        scratch_offset: u64,
    },

    BuildTlas {
        dst: NativeAccelStruct,
        instances: NativeBuffer,
        instance_count: u32,
        scratch: NativeBuffer,
        scratch_offset: u64,
    },

    WriteCompactedSize {
        src: NativeAccelStruct,
        pool: NativeQueryPool,
        query: u32,
    },

    CopyCompact {
        src: NativeAccelStruct,
        dst: NativeAccelStruct,
    },

    /// Work recorded by an external library (upscaler, UI etc.) that glint
    /// doesn't look into.
    External {
        label: String,
        resources: Vec<NativeResource>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptors {
    /// Descriptor set created up-front.
    Set(NativeDescriptorSet),

    /// Descriptors pushed inline, used by external libraries whose resource
    /// bindings change from dispatch to dispatch.
    Push(Vec<NativeResource>),
}

impl CommandList {
    pub fn new(label: impl ToString) -> Self {
        Self {
            label: label.to_string(),
            commands: Default::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Records a barrier batch; empty batches are dropped.
    pub fn barriers(&mut self, batch: BarrierBatch) {
        if !batch.is_empty() {
            self.commands.push(Command::Barriers(batch));
        }
    }

    pub fn begin_region(&mut self, name: impl ToString) {
        self.commands.push(Command::BeginRegion(name.to_string()));
    }

    pub fn end_region(&mut self) {
        self.commands.push(Command::EndRegion);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> + '_ {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the number of individual barriers recorded so far.
    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .map(|command| match command {
                Command::Barriers(batch) => batch.len(),
                _ => 0,
            })
            .sum()
    }

    /// Returns labels of all dispatches, in recording order.
    pub fn dispatches(&self) -> impl Iterator<Item = &str> + '_ {
        self.commands.iter().filter_map(|command| match command {
            Command::Dispatch { label, .. } => Some(label.as_str()),
            _ => None,
        })
    }

    /// Returns names of all top-level regions, in recording order.
    pub fn regions(&self) -> impl Iterator<Item = &str> + '_ {
        self.commands.iter().filter_map(|command| match command {
            Command::BeginRegion(name) => Some(name.as_str()),
            _ => None,
        })
    }
}
